//! Text helpers shared by every backend and the particle glue.

use rhi::shader::{VarType, VertexOutput};

/// `\t<owner>.<name> = <type>(0, 0, ...);` with one zero per component,
/// spelled with GLSL type names (the preludes alias them elsewhere).
pub(crate) fn zero_init(owner: &str, name: &str, ty: VarType) -> String {
    let mut line = format!("\t{owner}.{name} = {}(0", ty.glsl_name());
    for _ in 1..ty.component_count() {
        line.push_str(", 0");
    }
    line.push_str(");\n");
    line
}

/// Same as [`zero_init`] with backend type spelling.
pub(crate) fn zero_init_typed(owner: &str, name: &str, type_name: &str, components: u32) -> String {
    let mut line = format!("\t{owner}.{name} = {type_name}(0");
    for _ in 1..components {
        line.push_str(", 0");
    }
    line.push_str(");\n");
    line
}

/// `[N]` suffix for arrays, nothing for scalars.
pub(crate) fn array_suffix(array_size: u32) -> String {
    if array_size >= 1 {
        format!("[{array_size}];\n")
    } else {
        ";\n".to_string()
    }
}

/// Attribute slots taken by `outputs`, assigned in order.
pub(crate) fn interpolant_locations(outputs: &[VertexOutput]) -> Vec<u32> {
    let mut next = 0;
    outputs
        .iter()
        .map(|output| {
            let location = next;
            next += output.ty.row_count();
            location
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_init_covers_every_component() {
        assert_eq!(zero_init("vOutput", "fragColor", VarType::Float4), "\tvOutput.fragColor = vec4(0, 0, 0, 0);\n");
        assert_eq!(zero_init("gOutput", "Id", VarType::Uint), "\tgOutput.Id = uint(0);\n");
    }

    #[test]
    fn matrices_take_one_location_per_row() {
        let outputs = vec![
            VertexOutput::new("fragTransform", VarType::Float4x4),
            VertexOutput::new("fragColor", VarType::Float4),
        ];
        assert_eq!(interpolant_locations(&outputs), vec![0, 4]);
    }
}
