//! Vulkan GLSL (`#version 450`) generator.
//!
//! Resources carry explicit `set`/`binding` qualifiers and every push
//! constant block visible to a stage is merged into one
//! `UStagePushConstant` block, with a `#define` per original block name so
//! `GET_CONSTANT(Block, Member)` keeps resolving.

use rhi::shader::{
    ConstantDesc, ConstantSetLayout, DrawMode, FragmentOutput, GeometryOutput, GroupsharedVariable,
    PushConstantBuffer, SamplerType, ShaderDescription, ShaderStage, VertexAttributeDesc,
    VertexOutput,
};

use super::common::array_suffix;
use super::glsl::{
    calls, compute_main_body, end_primitive, fragment_output_struct, geometry_input_structs,
    groupshared, interpolant_struct, output_layout, primitive_layout, split_fragment_outputs,
    uniform_members, vertex_input_struct,
};
use super::ShaderGenerator;

const PRELUDE: &str = include_str!("prelude/vulkan.h");

/// Minimum push constant range every Vulkan implementation supports.
pub const MAX_PUSH_CONSTANT_BYTES: u32 = 128;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VulkanGenerator;

impl ShaderGenerator for VulkanGenerator {
    fn defines(&self, _description: &ShaderDescription) -> String {
        PRELUDE.to_string()
    }

    fn header(&self, _stage: ShaderStage) -> String {
        "VERSION\nEXTENSION\n\nbool any(bool r) { return r; }\nbool all(bool r) { return r; }\n".to_string()
    }

    fn vertex_inputs(&self, inputs: &[VertexAttributeDesc]) -> String {
        let mut code = String::new();
        for attr in inputs {
            code.push_str(&format!(
                "layout(location = {}) in {} _vin_{};\n",
                attr.location,
                attr.ty.glsl_name(),
                attr.name
            ));
        }
        code.push_str(&vertex_input_struct(inputs));
        code
    }

    fn vertex_outputs(&self, outputs: &[VertexOutput], _to_fragment: bool) -> String {
        let mut code = String::new();
        let mut location = 0;
        for output in outputs {
            code.push_str(&format!(
                "layout(location = {location}) {} out {} _vtof_{};\n",
                output.interpolation.glsl_qualifier(),
                output.ty.glsl_name(),
                output.name
            ));
            location += output.ty.row_count();
        }
        code.push_str(&interpolant_struct("SVertexOutput", outputs, "\tvec4 VertexPosition;\n"));
        code
    }

    fn geometry_inputs(&self, inputs: &[VertexOutput], draw_mode: DrawMode) -> String {
        let points = draw_mode.vertex_count();
        let mut code = format!("layout({}) in;\n", primitive_layout(draw_mode));
        let mut location = 0;
        for input in inputs {
            code.push_str(&format!(
                "layout(location = {location}) in {} _gin_{}[{points}];\n",
                input.ty.glsl_name(),
                input.name
            ));
            location += input.ty.row_count();
        }
        code.push_str(&geometry_input_structs(inputs, points));
        code
    }

    fn geometry_outputs(&self, outputs: &GeometryOutput) -> String {
        debug_assert!(outputs.max_vertices != 0, "geometry stage emits at most 0 vertices");
        let mut code = format!(
            "layout({}, max_vertices = {}) out;\n",
            output_layout(outputs.primitive_type),
            outputs.max_vertices
        );
        let mut location = 0;
        for output in &outputs.outputs {
            code.push_str(&format!(
                "layout(location = {location}) {} out {} _gout_{};\n",
                output.interpolation.glsl_qualifier(),
                output.ty.glsl_name(),
                output.name
            ));
            location += output.ty.row_count();
        }
        code.push_str(&interpolant_struct("SGeometryOutput", &outputs.outputs, "\tvec4 VertexPosition;\n"));
        code
    }

    fn fragment_inputs(&self, inputs: &[VertexOutput]) -> String {
        let mut code = String::new();
        let mut location = 0;
        for input in inputs {
            code.push_str(&format!(
                "layout(location = {location}) {} in {} _vtof_{};\n",
                input.interpolation.glsl_qualifier(),
                input.ty.glsl_name(),
                input.name
            ));
            location += input.ty.row_count();
        }
        code.push_str(&interpolant_struct("SFragmentInput", inputs, "\tbool IsFrontFace;\n"));
        code
    }

    fn fragment_outputs(&self, outputs: &[FragmentOutput]) -> String {
        let (colors, _) = split_fragment_outputs(outputs);
        let mut code = String::new();
        for (location, (ty, name)) in colors.iter().enumerate() {
            code.push_str(&format!("layout(location = {location}) out {ty} _fout_{name};\n"));
        }
        code.push_str(&fragment_output_struct(outputs));
        code
    }

    fn constant_sets(&self, sets: &[ConstantSetLayout], stage: ShaderStage) -> String {
        let mut code = String::new();
        for set in sets.iter().filter(|s| s.stages.intersects(stage.mask())) {
            let set_index = set.per_set_binding;
            for (binding, constant) in set.constants.iter().enumerate() {
                match constant {
                    ConstantDesc::ConstantBuffer(cb) => {
                        code.push_str(&format!(
                            "layout(set = {set_index}, binding = {binding}) uniform U{}\n{{\n",
                            cb.name
                        ));
                        uniform_members(&mut code, &cb.constants);
                        code.push_str(&format!("}}\t\t{};\n", cb.name));
                    }
                    ConstantDesc::RawBuffer { name, read_only, .. } => {
                        let ro = if *read_only { "readonly" } else { "" };
                        code.push_str(&format!(
                            "layout(set = {set_index}, binding = {binding}) {ro} buffer B{name}\n{{\n\tuint {name}[];\n}} {name};\n"
                        ));
                    }
                    ConstantDesc::TextureStorage {
                        name,
                        read_only,
                        format,
                        ..
                    } => {
                        let qualifier = format
                            .and_then(|f| f.glsl_image_layout())
                            .map(|q| format!(", {q}"))
                            .unwrap_or_default();
                        let access = if *read_only {
                            "readonly"
                        } else if format.is_some() {
                            ""
                        } else {
                            "writeonly"
                        };
                        code.push_str(&format!(
                            "layout(set = {set_index}, binding = {binding} {qualifier}) uniform {access} image2D {name};\n"
                        ));
                    }
                    ConstantDesc::Sampler { name, ty, .. } => {
                        let sampler = match ty {
                            SamplerType::Multi => "sampler2DMS",
                            SamplerType::Cube => "samplerCube",
                            SamplerType::Single => "sampler2D",
                        };
                        code.push_str(&format!(
                            "layout(set = {set_index}, binding = {binding}) uniform {sampler} {name};\n"
                        ));
                    }
                }
            }
        }
        code
    }

    fn push_constants(&self, blocks: &[PushConstantBuffer], stage: ShaderStage) -> String {
        let mut code = String::new();
        let mut remaps = String::new();
        let mut block_size = 0;

        for block in blocks.iter().filter(|b| b.stages.intersects(stage.mask())) {
            debug_assert!(!block.constants.is_empty(), "empty push constant block '{}'", block.name);
            // Vulkan allows a single push constant block per stage.
            if remaps.is_empty() {
                code.push_str("layout(push_constant) uniform UStagePushConstant\n{\n");
            }
            remaps.push_str(&format!("#define {} StagePushConstant\n", block.name));

            let mut offset = 0;
            for var in &block.constants {
                code.push_str(&format!(
                    "\tlayout(offset = {}) {} {}",
                    block.byte_offset + offset,
                    var.ty.glsl_name(),
                    var.name
                ));
                code.push_str(&array_suffix(var.array_size));
                offset += var.ty.byte_size();
            }
            block_size += offset;
        }

        if block_size > 0 {
            debug_assert!(
                block_size <= MAX_PUSH_CONSTANT_BYTES,
                "{block_size} bytes of push constants exceed the guaranteed {MAX_PUSH_CONSTANT_BYTES}"
            );
            code.push_str("}\t\tStagePushConstant;\n");
            code.push_str(&remaps);
        }
        code
    }

    fn groupshared_variables(&self, variables: &[GroupsharedVariable]) -> String {
        groupshared(variables)
    }

    fn vertex_main(
        &self,
        inputs: &[VertexAttributeDesc],
        outputs: &[VertexOutput],
        func_to_call: &[String],
        _output_clipspace_position: bool,
    ) -> String {
        let mut code = String::from("void\tmain()\n{\n\tSVertexInput\tvInput;\n\tSVertexOutput\tvOutput;\n\n");
        for attr in inputs {
            code.push_str(&format!("\tvInput.{0} = _vin_{0};\n", attr.name));
        }
        code.push_str("\tvInput.VertexIndex = gl_VertexIndex;\n");
        code.push_str("\tvInput.InstanceId = uint(gl_InstanceIndex);\n");
        for func in func_to_call.iter().filter(|f| !f.is_empty()) {
            code.push_str(&format!("\n\t{func}(vInput, vOutput);\n"));
        }
        for output in outputs {
            code.push_str(&format!("\t_vtof_{0} = vOutput.{0};\n", output.name));
        }
        code.push_str("\tgl_Position = vOutput.VertexPosition;\n}\n");
        code
    }

    fn geometry_main(
        &self,
        inputs: &[VertexOutput],
        _outputs: &GeometryOutput,
        func_to_call: &[String],
        draw_mode: DrawMode,
    ) -> String {
        let points = draw_mode.vertex_count();
        let mut code = String::from("in gl_PerVertex {\n    vec4    gl_Position;\n} gl_in[];\n\n");
        code.push_str("void\tmain()\n{\n\tSGeometryInput\tgInput;\n\tSGeometryOutput\tgOutput;\n\n");
        for input in inputs {
            for i in 0..points {
                code.push_str(&format!("\tgInput.Primitives[{i}].{0} = _gin_{0}[{i}];\n", input.name));
            }
        }
        for i in 0..points {
            code.push_str(&format!("\tgInput.Primitives[{i}].VertexPosition = gl_in[{i}].gl_Position;\n"));
        }
        code.push_str("\tgInput.PrimitiveId = gl_PrimitiveIDIn;\n");
        code.push_str(&calls(func_to_call, "gInput, gOutput"));
        code.push_str("}\n");
        code
    }

    fn fragment_main(
        &self,
        inputs: &[VertexOutput],
        outputs: &[FragmentOutput],
        func_to_call: &[String],
    ) -> String {
        let mut code = String::from("void\tmain()\n{\n\tSFragmentInput\tfInput;\n\tSFragmentOutput\tfOutput;\n\n");
        for input in inputs {
            code.push_str(&format!("\tfInput.{0} = _vtof_{0};\n", input.name));
        }
        code.push_str("\tfInput.IsFrontFace = gl_FrontFacing;\n");
        code.push_str(&calls(func_to_call, "fInput, fOutput"));
        let (colors, has_depth) = split_fragment_outputs(outputs);
        for (_, name) in colors {
            code.push_str(&format!("\t_fout_{name} = fOutput.{name};\n"));
        }
        if has_depth {
            code.push_str("\tgl_FragDepth = fOutput.DepthValue;\n");
        }
        code.push_str("}\n");
        code
    }

    fn geometry_emit_vertex(&self, outputs: &GeometryOutput, _output_clipspace_position: bool) -> String {
        let mut code = String::from("void\tAppendVertex(in SGeometryOutput outputData)\n{\n");
        for output in &outputs.outputs {
            code.push_str(&format!("\t_gout_{0} = outputData.{0};\n", output.name));
        }
        code.push_str("\tgl_Position = outputData.VertexPosition;\n\tEmitVertex();\n}");
        code
    }

    fn geometry_end_primitive(&self, _outputs: &GeometryOutput) -> String {
        end_primitive()
    }

    fn compute_inputs(&self) -> String {
        "\n\nstruct SComputeInput\n{\n\tuvec3 GlobalThreadID;\n\tuvec3 LocalThreadID;\n\tuvec3 GroupID;\n};\n".to_string()
    }

    fn compute_main(&self, dispatch_size: [u32; 3], func_to_call: &[String]) -> String {
        compute_main_body(dispatch_size, func_to_call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhi::shader::{ConstantBufferDesc, ShaderStageMask, VarType};
    use rhi::PixelFormat;

    #[test]
    fn bindings_are_positional_inside_a_set() {
        let mut set = ConstantSetLayout::new(ShaderStageMask::COMPUTE);
        set.per_set_binding = 2;
        set.add_constant_buffer(ConstantBufferDesc::new("FilterInfo").with_constant("Face", VarType::Uint))
            .add_sampler("Input", SamplerType::Cube)
            .add_texture_storage("Output", false, Some(PixelFormat::Float16Rgba))
            .add_raw_buffer("Weights", false);
        let code = VulkanGenerator.constant_sets(&[set], ShaderStage::Compute);
        assert_eq!(
            code,
            concat!(
                "layout(set = 2, binding = 0) uniform UFilterInfo\n{\n\tuint Face;\n}\t\tFilterInfo;\n",
                "layout(set = 2, binding = 1) uniform samplerCube Input;\n",
                "layout(set = 2, binding = 2 , rgba16f) uniform  image2D Output;\n",
                "layout(set = 2, binding = 3)  buffer BWeights\n{\n\tuint Weights[];\n} Weights;\n",
            )
        );
    }

    #[test]
    fn push_constants_merge_into_one_stage_block() {
        let mut second = PushConstantBuffer::new("GPUMeshPushConstants", ShaderStageMask::VERTEX)
            .with_constant("DrawRequest", VarType::Uint)
            .with_constant("IndirectionOffsetsIndex", VarType::Uint);
        second.byte_offset = 16;
        let blocks = vec![
            PushConstantBuffer::new("Info", ShaderStageMask::VERTEX).with_constant("Tint", VarType::Float4),
            second,
            PushConstantBuffer::new("Hidden", ShaderStageMask::FRAGMENT).with_constant("X", VarType::Float),
        ];
        let code = VulkanGenerator.push_constants(&blocks, ShaderStage::Vertex);
        assert_eq!(
            code,
            concat!(
                "layout(push_constant) uniform UStagePushConstant\n{\n",
                "\tlayout(offset = 0) vec4 Tint;\n",
                "\tlayout(offset = 16) uint DrawRequest;\n",
                "\tlayout(offset = 20) uint IndirectionOffsetsIndex;\n",
                "}\t\tStagePushConstant;\n",
                "#define Info StagePushConstant\n",
                "#define GPUMeshPushConstants StagePushConstant\n",
            )
        );
        assert!(VulkanGenerator.push_constants(&blocks, ShaderStage::Compute).is_empty());
    }

    #[test]
    fn vertex_main_uses_vulkan_builtins() {
        let outputs = vec![VertexOutput::new("fragUV", VarType::Float2)];
        let main = VulkanGenerator.vertex_main(&[], &outputs, &["VertexMain".into()], true);
        assert!(main.contains("\tvInput.VertexIndex = gl_VertexIndex;\n"));
        assert!(main.contains("\n\tVertexMain(vInput, vOutput);\n\t_vtof_fragUV = vOutput.fragUV;\n"));
        assert!(!main.contains("vec2(0"));
    }
}
