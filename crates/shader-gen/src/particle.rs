//! Particle glue injected between the user shader body and the stage main.
//!
//! Vertex permutations get a `VertexGenerated` pass-through that fetches
//! particle data and fills the vertex outputs; geometry billboarding gets a
//! `GeometryGenerated` wrapper around `GeometryBillboard`. Both are pushed in
//! front of the user entry point so the stage main calls them first.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use rhi::shader::{ShaderDescription, ShaderStage, VarType, VertexAttributeDesc, VertexOutput};

use crate::generator::common::zero_init;
use crate::options::ShaderOptions;

pub const VERTEX_PASS_THROUGH_FUNCTION: &str = "VertexGenerated";
pub const GEOM_BILLBOARDING_FUNCTION: &str = "GeometryGenerated";

/// Billboarding library sources prepended to the generated wrappers.
///
/// Each source defines the `VertexBillboard` / `GeometryBillboard` callee
/// for its mode. Missing sources are left empty; the preprocessor or the
/// native compiler reports the unresolved call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleLibrary {
    pub billboard_vertex: String,
    pub triangle_vertex: String,
    pub ribbon_vertex: String,
    pub billboard_geometry: String,
}

impl ParticleLibrary {
    /// Reads `Billboard.vert`, `Triangle.vert`, `Ribbon.vert` and
    /// `Billboard.geom` from `dir`. Absent files stay empty.
    pub fn load(dir: &Path) -> std::io::Result<Self> {
        let read = |name: &str| -> std::io::Result<String> {
            let path = dir.join(name);
            if path.exists() {
                debug!("particle library: {}", path.display());
                std::fs::read_to_string(path)
            } else {
                Ok(String::new())
            }
        };
        Ok(Self {
            billboard_vertex: read("Billboard.vert")?,
            triangle_vertex: read("Triangle.vert")?,
            ribbon_vertex: read("Ribbon.vert")?,
            billboard_geometry: read("Billboard.geom")?,
        })
    }
}

/// `GetMeshMatrix` helper emitted in every vertex shader.
pub const MESH_TRANSFORM_HELPER: &str = concat!(
    "mat4\t\tGetMeshMatrix(IN(SVertexInput) vInput VS_ARGS)\n",
    "{\n",
    "#if\t\tdefined(VRESOURCE_MeshTransforms)\n",
    "\tconst uint\tstorageID = GET_CONSTANT(GPUMeshPushConstants, DrawRequest);\n",
    "\tconst uint\tindirectionOffsetsID = GET_CONSTANT(GPUMeshPushConstants, IndirectionOffsetsIndex);\n",
    "\tconst uint\tindirectionOffset = LOADU(GET_RAW_BUFFER(IndirectionOffsets), RAW_BUFFER_INDEX(indirectionOffsetsID));\n",
    "\tconst uint\ttransformsOffset = LOADU(GET_RAW_BUFFER(MeshTransformsOffsets), RAW_BUFFER_INDEX(storageID));\n",
    "\tconst uint\tparticleID = LOADU(GET_RAW_BUFFER(Indirection), indirectionOffset + RAW_BUFFER_INDEX(vInput.InstanceId));\n",
    "\tconst vec4\tm0 = LOADF4(GET_RAW_BUFFER(MeshTransforms), transformsOffset + RAW_BUFFER_INDEX(particleID * 16 + 0 * 4));\n",
    "\tconst vec4\tm1 = LOADF4(GET_RAW_BUFFER(MeshTransforms), transformsOffset + RAW_BUFFER_INDEX(particleID * 16 + 1 * 4));\n",
    "\tconst vec4\tm2 = LOADF4(GET_RAW_BUFFER(MeshTransforms), transformsOffset + RAW_BUFFER_INDEX(particleID * 16 + 2 * 4));\n",
    "\tconst vec4\tm3 = LOADF4(GET_RAW_BUFFER(MeshTransforms), transformsOffset + RAW_BUFFER_INDEX(particleID * 16 + 3 * 4));\n",
    "\treturn BUILD_MAT4(m0, m1, m2, m3);\n",
    "#elif\t\tdefined(VINPUT_MeshTransform)\n",
    "\treturn vInput.MeshTransform;\n",
    "#else\n",
    "\treturn BUILD_MAT4(vec4(1, 0, 0, 0), vec4(0, 1, 0, 0), vec4(0, 0, 1, 0), vec4(0, 0, 0, 1));\n",
    "#endif\n",
    "}\n\n",
);

const PASS_THROUGH_SIGNATURE: &str =
    "(IN(SVertexInput) vInput, OUT(SVertexOutput) vOutput VS_ARGS)\n{\n";

const GPU_MESH_TRANSFORMS: &str = concat!(
    "#if\tdefined(VOUTPUT_fragWorldPosition)\n",
    "\tvOutput.fragWorldPosition = mul(modelMatrix, vec4(vInput.Position, 1.0f)).xyz;\n",
    "#endif\n",
    "#if\tdefined(VINPUT_Normal)\n",
    "\tvOutput.fragNormal = mul(modelMatrix, vec4(vInput.Normal.xyz, 0)).xyz;\n",
    "#endif\n",
    "#if\tdefined(VINPUT_Tangent)\n",
    "\tvOutput.fragTangent = vec4(mul(modelMatrix, vec4(vInput.Tangent.xyz, 0)).xyz, vInput.Tangent.w);\n",
    "#endif\n",
    "#if\tdefined(VOUTPUT_fragViewProjPosition)\n",
    "\tvOutput.fragViewProjPosition = vOutput.VertexPosition;\n",
    "#endif\n",
);

const GPU_MESH_ATLAS: &str = concat!(
    "#if\tdefined(BB_Feature_Atlas) && defined(VINPUT_UV0)\n",
    "#\tif !defined(VRESOURCE_Atlas_TextureIDsOffsets)\n",
    "#\t\terror \"config error\"\n",
    "#\tendif\n",
    "\tconst uint\tmaxAtlasID = LOADU(GET_RAW_BUFFER(Atlas), RAW_BUFFER_INDEX(0)) - 1U;\n",
    "\tconst float\ttextureID = LOADF(GET_RAW_BUFFER(GPUSimData), LOADU(GET_RAW_BUFFER(Atlas_TextureIDsOffsets), RAW_BUFFER_INDEX(storageID)) + RAW_BUFFER_INDEX(particleID));\n",
    "\tconst uint\tatlasID0 = min(uint(textureID), maxAtlasID);\n",
    "\tconst uint\tatlasID1 = min(uint(textureID + 1), maxAtlasID);\n",
    "\tconst vec4\trect0 = LOADF4(GET_RAW_BUFFER(Atlas), RAW_BUFFER_INDEX(atlasID0 * 4 + 1));\n",
    "\tconst vec4\trect1 = LOADF4(GET_RAW_BUFFER(Atlas), RAW_BUFFER_INDEX(atlasID1 * 4 + 1));\n",
    "\tvOutput.fragUV0 = vInput.UV0 * rect0.xy + rect0.zw;\n",
    "#\tif !defined(MESH_USE_UV1)\n",
    "\tvOutput.fragUV1 = vInput.UV0 * rect1.xy + rect1.zw;\n",
    "#\tendif // !defined(MESH_USE_UV1)\n",
    "#endif\n",
);

const MESH_TRANSFORMS: &str = concat!(
    "#if\tdefined(VINPUT_MeshTransform)\n",
    "\tmat4 modelMatrix = vInput.MeshTransform;\n",
    "#endif\n",
    "#if\tdefined(VOUTPUT_fragWorldPosition)\n",
    "#\tif\t\tdefined(VINPUT_MeshTransform)\n",
    "\tvOutput.fragWorldPosition = mul(modelMatrix, vec4(vInput.Position, 1.0f)).xyz;\n",
    "#\telse\n",
    "\tvOutput.fragWorldPosition = vInput.Position;\n",
    "#\tendif\n",
    "#endif\n",
    "#if\tdefined(VINPUT_Normal) && defined(VINPUT_MeshTransform)\n",
    "\tvOutput.fragNormal = mul(modelMatrix, vec4(vInput.Normal.xyz, 0)).xyz;\n",
    "#endif\n",
    "#if\tdefined(VINPUT_Tangent) && defined(VINPUT_MeshTransform)\n",
    "\tvOutput.fragTangent = vec4(mul(modelMatrix, vec4(vInput.Tangent.xyz, 0)).xyz, vInput.Tangent.w);\n",
    "#endif\n",
    "#if\tdefined(VOUTPUT_fragViewProjPosition)\n",
    "\tvOutput.fragViewProjPosition = vOutput.VertexPosition;\n",
    "#endif\n",
);

const MESH_ATLAS: &str = concat!(
    "#if\tdefined(BB_Feature_Atlas) && defined(VINPUT_UV0)\n",
    "#\tif !defined(VINPUT_Atlas_TextureID)\n",
    "#\t\terror \"config error\"\n",
    "#\tendif\n",
    "\tconst uint\tmaxAtlasID = LOADU(GET_RAW_BUFFER(Atlas), RAW_BUFFER_INDEX(0)) - 1U;\n",
    "\tconst float\ttextureID = vInput.Atlas_TextureID;\n",
    "\tconst uint\tatlasID0 = min(uint(textureID), maxAtlasID);\n",
    "\tconst uint\tatlasID1 = min(uint(textureID + 1), maxAtlasID);\n",
    "\tconst vec4\trect0 = LOADF4(GET_RAW_BUFFER(Atlas), RAW_BUFFER_INDEX(atlasID0 * 4 + 1));\n",
    "\tconst vec4\trect1 = LOADF4(GET_RAW_BUFFER(Atlas), RAW_BUFFER_INDEX(atlasID1 * 4 + 1));\n",
    "\tvOutput.fragUV0 = vInput.UV0 * rect0.xy + rect0.zw;\n",
    "#\tif !defined(MESH_USE_UV1)\n",
    "\tvOutput.fragUV1 = vInput.UV0 * rect1.xy + rect1.zw;\n",
    "#\tendif // !defined(MESH_USE_UV1)\n",
    "#endif\n",
);

// ---------------------------------------------------------------------------
// Particle data loads
// ---------------------------------------------------------------------------

/// `LOADF3`, `LOADU`, ... for a 1 to 4 component output.
fn load_macro(ty: VarType) -> Option<String> {
    let dim = ty.component_count();
    if !(1..=4).contains(&dim) {
        return None;
    }
    let base = if ty.is_float() { "LOADF" } else { "LOADU" };
    Some(if dim > 1 {
        format!("{base}{dim}")
    } else {
        base.to_string()
    })
}

/// Per-particle stream name backing `output`: `fragColor` reads `Colors`.
fn stream_name(output: &VertexOutput) -> String {
    output.name.replace("frag", "")
}

/// Load of `output` from the GPU simulation storage through its stream
/// offset table, indexed by `storage_var`.
fn gpu_sim_load(output: &VertexOutput, storage_var: &str) -> Option<String> {
    let load = load_macro(output.ty)?;
    let dim = output.ty.component_count();
    let expr = format!(
        "{load}(GET_RAW_BUFFER(GPUSimData), LOADU(GET_RAW_BUFFER({}sOffsets), RAW_BUFFER_INDEX({storage_var})) + RAW_BUFFER_INDEX(particleID * {dim}))",
        stream_name(output)
    );
    Some(if output.ty == VarType::Int {
        format!("\tvOutput.{} = int({expr});\n", output.name)
    } else {
        format!("\tvOutput.{} = {expr};\n", output.name)
    })
}

/// Load of `output` from its own CPU-filled stream buffer.
fn stream_load(output: &VertexOutput) -> Option<String> {
    let load = load_macro(output.ty)?;
    Some(format!(
        "\tvOutput.{} = {load}(GET_RAW_BUFFER({}s), RAW_BUFFER_INDEX(particleID * {}));\n",
        output.name,
        stream_name(output),
        output.ty.component_count()
    ))
}

/// Swizzle turning the position attribute into a `vec3` expression.
fn position_swizzle(ty: VarType) -> Option<&'static str> {
    match ty {
        VarType::Float2 => Some(".xy, 0.0"),
        VarType::Float3 | VarType::Float4 => Some(".xyz"),
        _ => None,
    }
}

fn attribute_at(inputs: &[VertexAttributeDesc], location: u32) -> Option<(usize, &VertexAttributeDesc)> {
    inputs.iter().enumerate().find(|(_, attr)| attr.location == location)
}

// ---------------------------------------------------------------------------
// Vertex pass-through bodies
// ---------------------------------------------------------------------------

fn vertex_billboard_body(
    description: &ShaderDescription,
    options: ShaderOptions,
    library: &ParticleLibrary,
) -> String {
    let mut code = if options.contains(ShaderOptions::VERTEX_BILLBOARDING) {
        library.billboard_vertex.clone()
    } else if options.contains(ShaderOptions::TRIANGLE_VERTEX_BILLBOARDING) {
        library.triangle_vertex.clone()
    } else {
        library.ribbon_vertex.clone()
    };
    code.push_str(&format!("\nvoid {VERTEX_PASS_THROUGH_FUNCTION}{PASS_THROUGH_SIGNATURE}"));
    code.push_str("\tconst uint\tindicesOffset = GET_CONSTANT(GPUBillboardPushConstants, IndicesOffset);\n");

    let gpu_storage = options.contains(ShaderOptions::GPU_STORAGE);
    if gpu_storage {
        code.push_str("\tconst uint\tstorageId = GET_CONSTANT(GPUBillboardPushConstants, StreamOffsetsIndex);\n");
        code.push_str("\tuint\tparticleID = vInput.InstanceId;\n");
        if options.contains(ShaderOptions::GPU_SORT) {
            code.push_str("#if\tdefined(VRESOURCE_Indirection)\n");
            code.push_str("\tparticleID = LOADU(GET_RAW_BUFFER(Indirection), RAW_BUFFER_INDEX(particleID));\n");
            code.push_str("#endif\n");
        }
    } else {
        code.push_str("\tconst uint\tparticleID = LOADU(GET_RAW_BUFFER(Indices), RAW_BUFFER_INDEX(indicesOffset) + RAW_BUFFER_INDEX(vInput.InstanceId));\n");
    }

    for output in &description.vertex_output {
        code.push_str(&zero_init("vOutput", &output.name, output.ty));
    }

    // Ribbon quads span two particles: the callee returns the one this
    // vertex belongs to.
    if options.contains(ShaderOptions::RIBBON_VERTEX_BILLBOARDING) {
        code.push_str("\tparticleID = VertexBillboard(vInput, vOutput, particleID VS_PARAMS);\n");
    } else {
        code.push_str("\tVertexBillboard(vInput, vOutput, particleID VS_PARAMS);\n");
    }
    code.push_str("#if\tdefined(VOUTPUT_fragViewProjPosition)\nvOutput.fragViewProjPosition = vOutput.VertexPosition;\n#endif\n");

    for output in description.vertex_output.iter().filter(|o| o.input_related.is_some()) {
        let line = if gpu_storage {
            gpu_sim_load(output, "storageId")
        } else {
            stream_load(output)
        };
        if let Some(line) = line {
            code.push_str(&line);
        }
    }

    code.push_str("}\n");
    code
}

fn gpu_mesh_body(description: &ShaderDescription, position_location: u32) -> String {
    let inputs = &description.bindings.input_attributes;
    let mut code = format!("void {VERTEX_PASS_THROUGH_FUNCTION}{PASS_THROUGH_SIGNATURE}");
    code.push_str("\tconst uint\tstorageID = GET_CONSTANT(GPUMeshPushConstants, DrawRequest);\n");
    code.push_str("\tconst uint\tindirectionOffsetsID = GET_CONSTANT(GPUMeshPushConstants, IndirectionOffsetsIndex);\n");
    code.push_str("\tconst uint\tindirectionOffset = LOADU(GET_RAW_BUFFER(IndirectionOffsets), RAW_BUFFER_INDEX(indirectionOffsetsID));\n");
    code.push_str("\tconst uint\tparticleID = LOADU(GET_RAW_BUFFER(Indirection), indirectionOffset + RAW_BUFFER_INDEX(vInput.InstanceId));\n");
    code.push_str("\tconst mat4\tmodelMatrix = GetMeshMatrix(vInput VS_PARAMS);\n");

    if let Some((_, position)) = attribute_at(inputs, position_location) {
        if let Some(swizzle) = position_swizzle(position.ty) {
            let name = &position.name;
            code.push_str("\n#if\t\tdefined(CONST_SceneInfo_ViewProj)\n");
            code.push_str(&format!("\tvec4 pos = mul(modelMatrix, vec4(vInput.{name}{swizzle}, 1.0));\n"));
            code.push_str("\tvOutput.VertexPosition = mul(GET_CONSTANT(SceneInfo, ViewProj), pos);\n");
            code.push_str("#else\n");
            code.push_str(&format!("\tvOutput.VertexPosition = vec4(vInput.{name}{swizzle}, 1.0);\n"));
            code.push_str("#endif\n");
        }
    }

    for output in &description.vertex_output {
        match output.input_related {
            Some(location) => match attribute_at(inputs, location) {
                Some((_, attr)) => {
                    code.push_str(&format!("\tvOutput.{} = vInput.{};\n", output.name, attr.name));
                }
                None => {
                    if let Some(line) = gpu_sim_load(output, "storageID") {
                        code.push_str(&line);
                    }
                }
            },
            None => code.push_str(&zero_init("vOutput", &output.name, output.ty)),
        }
    }

    code.push_str(GPU_MESH_TRANSFORMS);
    code.push_str(GPU_MESH_ATLAS);
    code.push_str("}\n");
    code
}

fn generic_body(description: &ShaderDescription, position_location: u32, options: ShaderOptions) -> String {
    let inputs = &description.bindings.input_attributes;
    let geom_bb = options.contains(ShaderOptions::GEOM_BILLBOARDING);
    let mut code = format!("void {VERTEX_PASS_THROUGH_FUNCTION}{PASS_THROUGH_SIGNATURE}");

    if let Some((index, position)) = attribute_at(inputs, position_location) {
        if let Some(swizzle) = position_swizzle(position.ty) {
            let name = &position.name;
            if !geom_bb {
                code.push_str("#if\t\tdefined(CONST_SceneInfo_ViewProj)\n");
                code.push_str(" #if\t\tdefined(VINPUT_MeshTransform)\n");
                code.push_str(&format!("\tvec4 pos = mul(vInput.MeshTransform, vec4(vInput.{name}{swizzle}, 1.0));\n"));
                code.push_str("\tvOutput.VertexPosition = mul(GET_CONSTANT(SceneInfo, ViewProj), pos);\n");
                code.push_str(" #else\n");
                code.push_str(&format!("\tvOutput.VertexPosition = mul(GET_CONSTANT(SceneInfo, ViewProj), vec4(vInput.{name}{swizzle}, 1.0));\n"));
                code.push_str(" #endif\n");
                code.push_str("#else\n");
                code.push_str(&format!("\tvOutput.VertexPosition = vec4(vInput.{name}{swizzle}, 1.0);\n"));
                code.push_str("#endif\n");
            } else if options.contains(ShaderOptions::GPU_STORAGE) {
                // The draw request id travels in the position's w.
                code.push_str(&format!("\tvOutput.VertexPosition = vec4(vInput.{name}{swizzle}, 0.0);\n"));
            } else if let Some(next) = inputs.get(index + 1) {
                code.push_str(&format!(
                    "\tvOutput.VertexPosition = vec4(vInput.{name}{swizzle}, vInput.{});\n",
                    next.name
                ));
            }
        }
    }

    for output in &description.vertex_output {
        match output.input_related {
            Some(location) => {
                for attr in inputs.iter().filter(|attr| attr.location == location) {
                    code.push_str(&format!("\tvOutput.{} = vInput.{};\n", output.name, attr.name));
                }
            }
            None => code.push_str(&zero_init("vOutput", &output.name, output.ty)),
        }
    }

    code.push_str(MESH_TRANSFORMS);
    code.push_str(MESH_ATLAS);

    let size_zero = if options.contains(ShaderOptions::BILLBOARD_SIZE_FLOAT2) {
        "vec2(0.f, 0.f)"
    } else {
        "0.f"
    };
    code.push_str("#if\tdefined(VINPUT_Enabled)\n\tif (vInput.Enabled == 0u)\n");
    code.push_str(&format!("\t\tvOutput.geomSize = {size_zero};\n"));
    code.push_str("#endif\n");
    code.push_str("}\n");
    code
}

/// `VertexGenerated` for `options`. The position is the attribute bound at
/// `position_location`.
pub fn vertex_pass_through(
    description: &ShaderDescription,
    position_location: u32,
    options: ShaderOptions,
    library: &ParticleLibrary,
) -> String {
    if options.is_vertex_billboarding() {
        vertex_billboard_body(description, options, library)
    } else if options.contains(ShaderOptions::GPU_MESH) {
        gpu_mesh_body(description, position_location)
    } else {
        generic_body(description, position_location, options)
    }
}

/// `GeometryGenerated`: forwards related vertex outputs of the first input
/// vertex, then expands the billboard.
pub fn geom_billboarding(description: &ShaderDescription, library: &ParticleLibrary) -> String {
    let mut code = library.billboard_geometry.clone();
    code.push_str(&format!(
        "\nvoid {GEOM_BILLBOARDING_FUNCTION}(IN(SGeometryInput) gInput, SGeometryOutput gOutput GS_ARGS)\n{{\n"
    ));
    for output in &description.geometry_output.outputs {
        let source = output
            .input_related
            .and_then(|index| description.vertex_output.get(index as usize));
        if let Some(source) = source {
            code.push_str(&format!(
                "\tgOutput.{} = gInput.Primitives[0].{};\n",
                output.name, source.name
            ));
        }
    }
    code.push_str("\tGeometryBillboard(gInput, gOutput GS_PARAMS);\n}\n");
    code
}

/// Glue functions `stage` needs for `options`. Their names are put in front
/// of `func_to_call` so the stage main runs them before the user function.
pub fn additional_functions(
    description: &ShaderDescription,
    options: ShaderOptions,
    func_to_call: &mut Vec<String>,
    stage: ShaderStage,
    library: &ParticleLibrary,
) -> String {
    let mut code = String::new();
    if options.contains(ShaderOptions::VERTEX_PASS_THROUGH) && stage == ShaderStage::Vertex {
        code.push_str(&vertex_pass_through(description, 0, options, library));
        func_to_call.insert(0, VERTEX_PASS_THROUGH_FUNCTION.to_string());
    }
    if options.contains(ShaderOptions::GEOM_BILLBOARDING) && stage == ShaderStage::Geometry {
        code.push_str(&geom_billboarding(description, library));
        func_to_call.insert(0, GEOM_BILLBOARDING_FUNCTION.to_string());
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhi::shader::GeometryOutput;

    fn mesh_description() -> ShaderDescription {
        let mut description = ShaderDescription::default();
        description.bindings.input_attributes = vec![
            VertexAttributeDesc {
                name: "Position".into(),
                ty: VarType::Float3,
                location: 0,
            },
            VertexAttributeDesc {
                name: "UV0".into(),
                ty: VarType::Float2,
                location: 1,
            },
        ];
        description.vertex_output = vec![
            VertexOutput::new("fragUV0", VarType::Float2).related_to(1),
            VertexOutput::new("fragColor", VarType::Float4).related_to(7),
            VertexOutput::new("fragNormal", VarType::Float3),
        ];
        description
    }

    #[test]
    fn generic_pass_through_copies_related_inputs() {
        let code = vertex_pass_through(
            &mesh_description(),
            0,
            ShaderOptions::VERTEX_PASS_THROUGH,
            &ParticleLibrary::default(),
        );
        assert!(code.starts_with("void VertexGenerated(IN(SVertexInput) vInput, OUT(SVertexOutput) vOutput VS_ARGS)\n{\n"));
        assert!(code.contains("\tvOutput.VertexPosition = mul(GET_CONSTANT(SceneInfo, ViewProj), vec4(vInput.Position.xyz, 1.0));\n"));
        assert!(code.contains("\tvOutput.fragUV0 = vInput.UV0;\n"));
        assert!(code.contains("\tvOutput.fragNormal = vec3(0, 0, 0);\n"));
        assert!(!code.contains("fragColor"));
        assert!(code.contains("\t\tvOutput.geomSize = 0.f;\n"));
        assert!(code.ends_with("#endif\n}\n"));
    }

    #[test]
    fn gpu_mesh_falls_back_to_sim_data() {
        let code = vertex_pass_through(
            &mesh_description(),
            0,
            ShaderOptions::VERTEX_PASS_THROUGH | ShaderOptions::GPU_MESH,
            &ParticleLibrary::default(),
        );
        assert!(code.contains("\tconst mat4\tmodelMatrix = GetMeshMatrix(vInput VS_PARAMS);\n"));
        assert!(code.contains("\tvec4 pos = mul(modelMatrix, vec4(vInput.Position.xyz, 1.0));\n"));
        assert!(code.contains(
            "\tvOutput.fragColor = LOADF4(GET_RAW_BUFFER(GPUSimData), LOADU(GET_RAW_BUFFER(ColorsOffsets), RAW_BUFFER_INDEX(storageID)) + RAW_BUFFER_INDEX(particleID * 4));\n"
        ));
        assert!(code.contains("VRESOURCE_Atlas_TextureIDsOffsets"));
    }

    #[test]
    fn vertex_billboards_prepend_the_library() {
        let library = ParticleLibrary {
            ribbon_vertex: "// ribbon library\n".into(),
            ..ParticleLibrary::default()
        };
        let mut description = ShaderDescription::default();
        description.vertex_output = vec![
            VertexOutput::new("fragColor", VarType::Float4).related_to(0),
            VertexOutput::new("fragAlpha", VarType::Int).related_to(1),
        ];
        let options = ShaderOptions::RIBBON_VERTEX_BILLBOARDING
            | ShaderOptions::GPU_STORAGE
            | ShaderOptions::GPU_SORT;
        let code = vertex_pass_through(&description, 0, options, &library);
        assert!(code.starts_with("// ribbon library\n\nvoid VertexGenerated"));
        assert!(code.contains("\tparticleID = VertexBillboard(vInput, vOutput, particleID VS_PARAMS);\n"));
        assert!(code.contains("#if\tdefined(VRESOURCE_Indirection)\n"));
        assert!(code.contains("\tvOutput.fragAlpha = int(LOADU(GET_RAW_BUFFER(GPUSimData), LOADU(GET_RAW_BUFFER(AlphasOffsets), RAW_BUFFER_INDEX(storageId)) + RAW_BUFFER_INDEX(particleID * 1)));\n"));
    }

    #[test]
    fn cpu_billboards_read_their_streams() {
        let mut description = ShaderDescription::default();
        description.vertex_output = vec![VertexOutput::new("fragColor", VarType::Float4).related_to(0)];
        let code = vertex_pass_through(&description, 0, ShaderOptions::VERTEX_BILLBOARDING, &ParticleLibrary::default());
        assert!(code.contains("\tVertexBillboard(vInput, vOutput, particleID VS_PARAMS);\n"));
        assert!(code.contains("\tvOutput.fragColor = LOADF4(GET_RAW_BUFFER(Colors), RAW_BUFFER_INDEX(particleID * 4));\n"));
    }

    #[test]
    fn geometry_wrapper_forwards_first_vertex() {
        let mut description = ShaderDescription::default();
        description.vertex_output = vec![VertexOutput::new("geomColor", VarType::Float4)];
        description.geometry_output = GeometryOutput {
            outputs: vec![
                VertexOutput::new("fragColor", VarType::Float4).related_to(0),
                VertexOutput::new("fragUV", VarType::Float2).related_to(3),
            ],
            max_vertices: 4,
            primitive_type: rhi::shader::DrawMode::Triangles,
        };
        let code = geom_billboarding(&description, &ParticleLibrary::default());
        assert!(code.contains("\tgOutput.fragColor = gInput.Primitives[0].geomColor;\n"));
        assert!(!code.contains("fragUV"));
        assert!(code.ends_with("\tGeometryBillboard(gInput, gOutput GS_PARAMS);\n}\n"));
    }

    #[test]
    fn glue_runs_before_user_function() {
        let mut funcs = vec!["VertexMain".to_string()];
        let code = additional_functions(
            &mesh_description(),
            ShaderOptions::VERTEX_PASS_THROUGH,
            &mut funcs,
            ShaderStage::Vertex,
            &ParticleLibrary::default(),
        );
        assert!(!code.is_empty());
        assert_eq!(funcs, vec!["VertexGenerated", "VertexMain"]);

        let mut funcs = vec!["FragmentMain".to_string()];
        let code = additional_functions(
            &mesh_description(),
            ShaderOptions::VERTEX_PASS_THROUGH,
            &mut funcs,
            ShaderStage::Fragment,
            &ParticleLibrary::default(),
        );
        assert!(code.is_empty());
        assert_eq!(funcs.len(), 1);
    }
}
