//! Preprocessor defines derived from a shader description.
//!
//! Shader bodies test for the resources and interpolants a permutation
//! provides with `#if defined(...)`. The defines are computed per stage:
//!
//! - user defines visible to the stage, as `NAME` or `NAME=VALUE`
//! - `CONST_<Buffer>_<Member>` for constant-buffer and push-constant members
//! - `VRESOURCE_<Name>` for raw buffers
//! - `SAMPLER_<Name>` / `SAMPLER_MS_<Name>` for samplers
//! - `VINPUT_`, `VOUTPUT_`, `GINPUT_`, `GOUTPUT_`, `FINPUT_` for stage I/O

use rhi::shader::{ConstantDesc, SamplerType, ShaderDescription, ShaderStage, StagePipeline};

pub fn defines_from_description(description: &ShaderDescription, stage: ShaderStage) -> Vec<String> {
    let mask = stage.mask();
    let bindings = &description.bindings;
    let mut defines = Vec::new();

    for define in bindings.defines.iter().filter(|d| d.stages.intersects(mask)) {
        if define.value.is_empty() {
            defines.push(define.name.clone());
        } else {
            defines.push(format!("{}={}", define.name, define.value));
        }
    }

    for set in bindings.constant_sets.iter().filter(|s| s.stages.intersects(mask)) {
        for constant in &set.constants {
            match constant {
                ConstantDesc::ConstantBuffer(cb) => {
                    for var in &cb.constants {
                        defines.push(format!("CONST_{}_{}", cb.name, var.name));
                    }
                }
                ConstantDesc::RawBuffer { name, .. } => defines.push(format!("VRESOURCE_{name}")),
                ConstantDesc::Sampler { name, ty, .. } => {
                    if *ty == SamplerType::Multi {
                        defines.push(format!("SAMPLER_MS_{name}"));
                    } else {
                        defines.push(format!("SAMPLER_{name}"));
                    }
                }
                ConstantDesc::TextureStorage { .. } => {}
            }
        }
    }

    if stage == ShaderStage::Vertex {
        for input in &bindings.input_attributes {
            defines.push(format!("VINPUT_{}", input.name));
        }
    }

    for pc in bindings.push_constants.iter().filter(|pc| pc.stages.intersects(mask)) {
        for var in &pc.constants {
            defines.push(format!("CONST_{}_{}", pc.name, var.name));
        }
    }

    for output in &description.vertex_output {
        if stage == ShaderStage::Vertex {
            defines.push(format!("VOUTPUT_{}", output.name));
        }
        if description.pipeline == StagePipeline::VsPs {
            if stage == ShaderStage::Fragment {
                defines.push(format!("FINPUT_{}", output.name));
            }
        } else if stage == ShaderStage::Geometry {
            defines.push(format!("GINPUT_{}", output.name));
        }
    }

    for output in &description.geometry_output.outputs {
        if stage == ShaderStage::Geometry {
            defines.push(format!("GOUTPUT_{}", output.name));
        }
        if description.pipeline == StagePipeline::VsGsPs && stage == ShaderStage::Fragment {
            defines.push(format!("FINPUT_{}", output.name));
        }
    }

    defines
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhi::shader::{
        ConstantBufferDesc, ConstantSetLayout, PushConstantBuffer, ShaderDefine, ShaderStageMask,
        VarType, VertexAttributeDesc, VertexOutput,
    };

    fn description(pipeline: StagePipeline) -> ShaderDescription {
        let mut set = ConstantSetLayout::new(ShaderStageMask::VERTEX | ShaderStageMask::FRAGMENT);
        set.add_constant_buffer(ConstantBufferDesc::new("SceneInfo").with_constant("ViewProj", VarType::Float4x4))
            .add_raw_buffer("Indices", true)
            .add_sampler("Diffuse", SamplerType::Single)
            .add_sampler("Depth", SamplerType::Multi);

        let mut description = ShaderDescription {
            pipeline,
            ..Default::default()
        };
        description.bindings.constant_sets.push(set);
        description.bindings.push_constants.push(
            PushConstantBuffer::new("GPUBillboardPushConstants", ShaderStageMask::VERTEX)
                .with_constant("IndicesOffset", VarType::Uint),
        );
        description.bindings.defines = vec![
            ShaderDefine::new("BB_Feature_Atlas", ""),
            ShaderDefine::new("MAX_LIGHTS", "4").for_stages(ShaderStageMask::FRAGMENT),
        ];
        description.bindings.input_attributes.push(VertexAttributeDesc {
            name: "Position".into(),
            ty: VarType::Float3,
            location: 0,
        });
        description.vertex_output.push(VertexOutput::new("fragColor", VarType::Float4));
        description.geometry_output.outputs.push(VertexOutput::new("fragUV0", VarType::Float2));
        description
    }

    #[test]
    fn vertex_stage_sees_inputs_outputs_and_its_constants() {
        let defines = defines_from_description(&description(StagePipeline::VsPs), ShaderStage::Vertex);
        assert_eq!(
            defines,
            vec![
                "BB_Feature_Atlas",
                "CONST_SceneInfo_ViewProj",
                "VRESOURCE_Indices",
                "SAMPLER_Diffuse",
                "SAMPLER_MS_Depth",
                "VINPUT_Position",
                "CONST_GPUBillboardPushConstants_IndicesOffset",
                "VOUTPUT_fragColor",
            ]
        );
    }

    #[test]
    fn fragment_inputs_follow_the_pipeline() {
        let vs_ps = defines_from_description(&description(StagePipeline::VsPs), ShaderStage::Fragment);
        assert!(vs_ps.contains(&"MAX_LIGHTS=4".to_string()));
        assert!(vs_ps.contains(&"FINPUT_fragColor".to_string()));
        assert!(!vs_ps.contains(&"FINPUT_fragUV0".to_string()));
        assert!(!vs_ps.iter().any(|d| d.starts_with("CONST_GPUBillboard")));

        let vs_gs_ps = defines_from_description(&description(StagePipeline::VsGsPs), ShaderStage::Fragment);
        assert!(vs_gs_ps.contains(&"FINPUT_fragUV0".to_string()));
        assert!(!vs_gs_ps.contains(&"FINPUT_fragColor".to_string()));
    }

    #[test]
    fn geometry_stage_reads_vertex_outputs() {
        let defines = defines_from_description(&description(StagePipeline::VsGsPs), ShaderStage::Geometry);
        assert_eq!(
            defines,
            vec!["BB_Feature_Atlas", "GINPUT_fragColor", "GOUTPUT_fragUV0"]
        );
    }
}
