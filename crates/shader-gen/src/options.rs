//! Particle shader options and the per-stage shader names they select.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use rhi::{ShaderStage, StagePipeline};

bitflags! {
    /// Features a particle shader permutation is generated with.
    ///
    /// Tests against a single option use [`ShaderOptions::contains`]:
    /// [`ShaderOptions::AXIS_C2`] includes the [`ShaderOptions::AXIS_C1`]
    /// bit, so a two-axis permutation also matches the one-axis entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ShaderOptions: u32 {
        const VERTEX_PASS_THROUGH = 1 << 0;
        /// Billboards expanded in the vertex stage.
        const VERTEX_BILLBOARDING = 1 << 1;
        /// Billboards expanded in the geometry stage.
        const GEOM_BILLBOARDING = 1 << 2;
        const TRIANGLE_VERTEX_BILLBOARDING = 1 << 3;
        const RIBBON_VERTEX_BILLBOARDING = 1 << 4;
        const GPU_MESH = 1 << 5;
        const AXIS_C1 = 1 << 6;
        const AXIS_C2 = (1 << 7) | (1 << 6);
        /// Six vertices per billboard instead of four.
        const CAPSULE = 1 << 8;
        const BILLBOARD_SIZE_FLOAT2 = 1 << 9;
        /// Particles live in GPU simulation storage.
        const GPU_STORAGE = 1 << 10;
        const GPU_SORT = 1 << 11;
    }
}

impl ShaderOptions {
    /// Any of the three vertex billboarding modes.
    pub fn is_vertex_billboarding(self) -> bool {
        self.contains(Self::VERTEX_BILLBOARDING)
            || self.contains(Self::TRIANGLE_VERTEX_BILLBOARDING)
            || self.contains(Self::RIBBON_VERTEX_BILLBOARDING)
    }

    /// Parses `"GPU_STORAGE | GEOM_BILLBOARDING"` style text.
    pub fn parse(text: &str) -> Result<Self, String> {
        if text.trim().is_empty() {
            return Ok(Self::empty());
        }
        bitflags::parser::from_str::<Self>(text).map_err(|e| format!("invalid shader options '{text}': {e}"))
    }
}

struct PerStageShaderName {
    option: ShaderOptions,
    vertex: Option<&'static str>,
    geometry: Option<&'static str>,
    fragment: Option<&'static str>,
}

const fn names(
    option: ShaderOptions,
    vertex: Option<&'static str>,
    geometry: Option<&'static str>,
    fragment: Option<&'static str>,
) -> PerStageShaderName {
    PerStageShaderName {
        option,
        vertex,
        geometry,
        fragment,
    }
}

// Order matters: names are joined in table order.
const SHADER_NAMES: [PerStageShaderName; 12] = [
    names(ShaderOptions::VERTEX_PASS_THROUGH, Some("Fwd"), None, None),
    names(ShaderOptions::GEOM_BILLBOARDING, Some("Geom"), Some("Geom"), Some("Geom")),
    names(ShaderOptions::VERTEX_BILLBOARDING, Some("Vertex"), None, Some("Vertex")),
    names(ShaderOptions::AXIS_C1, Some("C1"), Some("C1"), Some("C1")),
    names(ShaderOptions::AXIS_C2, Some("C2"), Some("C2"), Some("C2")),
    names(ShaderOptions::CAPSULE, Some("Caps"), Some("Caps"), None),
    names(ShaderOptions::BILLBOARD_SIZE_FLOAT2, Some("Size2"), Some("Size2"), None),
    names(ShaderOptions::TRIANGLE_VERTEX_BILLBOARDING, Some("Tri"), None, Some("VB")),
    names(ShaderOptions::RIBBON_VERTEX_BILLBOARDING, Some("Ribbon"), None, Some("VB")),
    names(ShaderOptions::GPU_STORAGE, Some("GPU"), Some("GPU"), Some("GPU")),
    names(ShaderOptions::GPU_MESH, Some("GPUMesh"), None, Some("GPUMesh")),
    names(ShaderOptions::GPU_SORT, Some("GPUSort"), None, Some("GPUSort")),
];

/// Name of the shader file implementing `options` for `stage`, e.g.
/// `Fwd_GPU` or `Geom_C1_C2`. Falls back to `User` when no option names the
/// stage. Compute shaders are never named by options.
pub fn shader_name(options: ShaderOptions, stage: ShaderStage) -> String {
    let parts: Vec<&str> = SHADER_NAMES
        .iter()
        .filter(|entry| options.contains(entry.option))
        .filter_map(|entry| match stage {
            ShaderStage::Vertex => entry.vertex,
            ShaderStage::Geometry => entry.geometry,
            ShaderStage::Fragment => entry.fragment,
            ShaderStage::Compute => None,
        })
        .collect();
    if parts.is_empty() {
        "User".to_string()
    } else {
        parts.join("_")
    }
}

/// Stage chain a particle permutation renders with.
pub fn stage_pipeline(options: ShaderOptions) -> StagePipeline {
    if options.contains(ShaderOptions::GEOM_BILLBOARDING) {
        StagePipeline::VsGsPs
    } else {
        StagePipeline::VsPs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_name_is_user() {
        assert_eq!(shader_name(ShaderOptions::empty(), ShaderStage::Vertex), "User");
        assert_eq!(
            shader_name(ShaderOptions::VERTEX_PASS_THROUGH, ShaderStage::Fragment),
            "User"
        );
        assert_eq!(shader_name(ShaderOptions::all(), ShaderStage::Compute), "User");
    }

    #[test]
    fn names_join_in_table_order() {
        let options = ShaderOptions::GPU_STORAGE
            | ShaderOptions::VERTEX_PASS_THROUGH
            | ShaderOptions::GEOM_BILLBOARDING;
        assert_eq!(shader_name(options, ShaderStage::Vertex), "Fwd_Geom_GPU");
        assert_eq!(shader_name(options, ShaderStage::Geometry), "Geom_GPU");
        assert_eq!(shader_name(options, ShaderStage::Fragment), "Geom_GPU");
    }

    #[test]
    fn two_axis_matches_one_axis_entry() {
        let options = ShaderOptions::GEOM_BILLBOARDING | ShaderOptions::AXIS_C2;
        assert_eq!(shader_name(options, ShaderStage::Geometry), "Geom_C1_C2");
        assert_eq!(
            shader_name(ShaderOptions::AXIS_C1, ShaderStage::Geometry),
            "C1"
        );
    }

    #[test]
    fn vertex_billboard_fragments_share_a_name() {
        assert_eq!(
            shader_name(ShaderOptions::TRIANGLE_VERTEX_BILLBOARDING, ShaderStage::Fragment),
            "VB"
        );
        assert_eq!(
            shader_name(ShaderOptions::RIBBON_VERTEX_BILLBOARDING, ShaderStage::Vertex),
            "Ribbon"
        );
    }

    #[test]
    fn geometry_billboards_need_a_geometry_stage() {
        assert_eq!(stage_pipeline(ShaderOptions::GEOM_BILLBOARDING), StagePipeline::VsGsPs);
        assert_eq!(stage_pipeline(ShaderOptions::VERTEX_BILLBOARDING), StagePipeline::VsPs);
    }

    #[test]
    fn options_parse_from_text() {
        assert_eq!(
            ShaderOptions::parse("GPU_STORAGE | GEOM_BILLBOARDING").unwrap(),
            ShaderOptions::GPU_STORAGE | ShaderOptions::GEOM_BILLBOARDING
        );
        assert_eq!(ShaderOptions::parse("").unwrap(), ShaderOptions::empty());
        assert!(ShaderOptions::parse("NOT_AN_OPTION").is_err());
    }
}
