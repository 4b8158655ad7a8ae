//! Direct3D 11/12 generator (HLSL, shader model 5).
//!
//! Interpolants are matched by `TEXCOORD` semantics numbered per matrix
//! row. Resources carry explicit registers computed by
//! `rhi::shader::binding::generate_bindings_for_api`. Clip-space Y is flipped on the
//! stage that last writes `VertexPosition`.

use rhi::shader::{
    ConstantDesc, ConstantSetLayout, DrawMode, FragmentOutput, GeometryOutput, GroupsharedVariable,
    PushConstantBuffer, SamplerType, ShaderDescription, ShaderStage, StagePipeline,
    VertexAttributeDesc, VertexOutput,
};

use super::common::{array_suffix, interpolant_locations, zero_init};
use super::ShaderGenerator;

const PRELUDE: &str = include_str!("prelude/hlsl.h");

const SWIZZLE: [&str; 4] = ["x", "y", "z", "w"];

fn input_primitive(draw_mode: DrawMode) -> &'static str {
    match draw_mode {
        DrawMode::Points => "point",
        DrawMode::Lines => "line",
        DrawMode::Triangles => "triangle",
        DrawMode::Invalid => panic!("geometry shader input primitive type is not set"),
    }
}

fn output_stream(draw_mode: DrawMode) -> &'static str {
    match draw_mode {
        DrawMode::Points => "PointStream",
        DrawMode::Lines => "LineStream",
        DrawMode::Triangles => "TriangleStream",
        DrawMode::Invalid => panic!("geometry shader output primitive type is not set"),
    }
}

/// `struct <name>` with one `TEXCOORDn` member per interpolant. Geometry
/// interpolants keep GLSL type names, the prelude aliases them.
fn semantic_struct(name: &str, members: &[VertexOutput], glsl_types: bool, builtin: &str) -> String {
    let mut code = format!("\nstruct\t{name}\n{{\n");
    for (member, location) in members.iter().zip(interpolant_locations(members)) {
        let ty = if glsl_types { member.ty.glsl_name() } else { member.ty.hlsl_name() };
        code.push_str(&format!(
            "\t{} {ty} {} : TEXCOORD{location};\n",
            member.interpolation.hlsl_qualifier(),
            member.name
        ));
    }
    code.push_str(builtin);
    code.push_str("};\n");
    code
}

fn calls(func_to_call: &[String], args: &str) -> String {
    func_to_call
        .iter()
        .filter(|f| !f.is_empty())
        .map(|f| format!("\t{f}({args});\n"))
        .collect()
}

/// Unit generator: HLSL needs no per-shader state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HlslGenerator;

impl ShaderGenerator for HlslGenerator {
    fn defines(&self, description: &ShaderDescription) -> String {
        let mut code = PRELUDE.to_string();
        if description.pipeline == StagePipeline::VsGsPs {
            code.push_str(&format!(
                "#define\t\tGS_ARGS\t\t\t\t\t, inout {}<SGeometryOutput> _outputStream\n",
                output_stream(description.geometry_output.primitive_type)
            ));
        }
        code
    }

    fn header(&self, _stage: ShaderStage) -> String {
        String::new()
    }

    fn vertex_inputs(&self, inputs: &[VertexAttributeDesc]) -> String {
        let mut code = String::from("\nstruct\tSVertexInput\n{\n");
        for attr in inputs {
            code.push_str(&format!(
                "\t{} {} : TEXCOORD{};\n",
                attr.ty.hlsl_name(),
                attr.name,
                attr.location
            ));
        }
        code.push_str("\tuint VertexIndex : SV_VertexID;\n");
        code.push_str("\tuint InstanceId : SV_InstanceID;\n");
        code.push_str("};\n");
        code
    }

    fn vertex_outputs(&self, outputs: &[VertexOutput], _to_fragment: bool) -> String {
        semantic_struct("SVertexOutput", outputs, false, "\tfloat4 VertexPosition : SV_POSITION;\n")
    }

    fn geometry_inputs(&self, inputs: &[VertexOutput], draw_mode: DrawMode) -> String {
        assert!(draw_mode != DrawMode::Invalid, "geometry shader input primitive type is not set");
        let mut code = semantic_struct("SPrimitives", inputs, true, "\tfloat4 VertexPosition : SV_POSITION;\n");
        code.push_str("\nstruct\tSGeometryInput\n{\n");
        code.push_str(&format!("\tSPrimitives Primitives[{}];\n", draw_mode.vertex_count()));
        code.push_str("\tint PrimitiveId;\n};\n");
        code
    }

    fn geometry_outputs(&self, outputs: &GeometryOutput) -> String {
        debug_assert!(outputs.max_vertices != 0, "geometry stage emits at most 0 vertices");
        semantic_struct(
            "SGeometryOutput",
            &outputs.outputs,
            true,
            "\tfloat4 VertexPosition : SV_POSITION;\n",
        )
    }

    fn fragment_inputs(&self, inputs: &[VertexOutput]) -> String {
        semantic_struct("SFragmentInput", inputs, false, "\tbool IsFrontFace : SV_IsFrontFace;\n")
    }

    fn fragment_outputs(&self, outputs: &[FragmentOutput]) -> String {
        let mut code = String::from("\nstruct\tSFragmentOutput\n{\n");
        let mut target = 0;
        let mut has_depth = false;
        for output in outputs {
            let (ty, is_depth) = output.format.to_var_type();
            if is_depth {
                has_depth = true;
            } else {
                code.push_str(&format!("\t{} {} : SV_Target{target};\n", ty.hlsl_name(), output.name));
                target += 1;
            }
        }
        if has_depth {
            code.push_str("\tfloat DepthValue : SV_Depth;\n");
        }
        code.push_str("};\n");
        code
    }

    fn constant_sets(&self, sets: &[ConstantSetLayout], stage: ShaderStage) -> String {
        let profile = stage.hlsl_profile();
        let mut code = String::new();
        for set in sets.iter().filter(|s| s.stages.intersects(stage.mask())) {
            for constant in &set.constants {
                match constant {
                    ConstantDesc::ConstantBuffer(cb) => {
                        code.push_str(&format!("cbuffer\t{} : register(b{})\n{{\n", cb.name, cb.per_block_binding));
                        for var in &cb.constants {
                            code.push_str(&format!("\t{} {}", var.ty.hlsl_name(), var.name));
                            if var.array_size >= 1 {
                                code.push_str(&format!("[{}]", var.array_size));
                            }
                            let register = var.offset_in_buffer / 16;
                            let component = (var.offset_in_buffer % 16) / 4;
                            code.push_str(&format!(
                                " : packoffset(c{register}.{});\n",
                                SWIZZLE[component as usize]
                            ));
                        }
                        code.push_str("};\n");
                    }
                    ConstantDesc::RawBuffer {
                        name,
                        read_only,
                        per_block_binding,
                    } => {
                        if *read_only {
                            code.push_str(&format!("ByteAddressBuffer\t{name} : register(t{per_block_binding});\n"));
                        } else {
                            code.push_str(&format!("RWByteAddressBuffer\t{name} : register(u{per_block_binding});\n"));
                        }
                    }
                    // TODO: derive the RWTexture2D element type from the storage format instead of float4.
                    ConstantDesc::TextureStorage {
                        name,
                        read_only,
                        per_block_binding,
                        ..
                    } => {
                        if *read_only {
                            code.push_str(&format!("Texture2D\t{name} : register(t{per_block_binding});\n"));
                        } else {
                            code.push_str(&format!("RWTexture2D<float4>\t{name} : register(u{per_block_binding});\n"));
                        }
                    }
                    ConstantDesc::Sampler {
                        name,
                        ty,
                        per_block_binding,
                        per_stage_sampler_binding,
                    } => {
                        let texture = match ty {
                            SamplerType::Multi => "Texture2DMS<float4>",
                            SamplerType::Cube => "TextureCube",
                            SamplerType::Single => "Texture2D",
                        };
                        code.push_str(&format!(
                            "{texture} Tex_{name} : register({profile}, t{per_block_binding});\n"
                        ));
                        if *ty != SamplerType::Multi {
                            code.push_str(&format!(
                                "SamplerState Sampler_{name} : register({profile}, s{per_stage_sampler_binding});\n"
                            ));
                        }
                    }
                }
            }
        }
        code
    }

    fn push_constants(&self, blocks: &[PushConstantBuffer], stage: ShaderStage) -> String {
        let mut code = String::new();
        for block in blocks.iter().filter(|b| b.stages.intersects(stage.mask())) {
            code.push_str(&format!("cbuffer\t{} : register(b{})\n{{\n", block.name, block.per_block_binding));
            for var in &block.constants {
                code.push_str(&format!("\t{} {}", var.ty.hlsl_name(), var.name));
                code.push_str(&array_suffix(var.array_size));
            }
            code.push_str("};\n");
        }
        code
    }

    fn groupshared_variables(&self, variables: &[GroupsharedVariable]) -> String {
        variables
            .iter()
            .map(|v| format!("groupshared {}\t{}[{}];\n", v.ty.hlsl_name(), v.name, v.array_size))
            .collect()
    }

    fn vertex_main(
        &self,
        _inputs: &[VertexAttributeDesc],
        _outputs: &[VertexOutput],
        func_to_call: &[String],
        output_clipspace_position: bool,
    ) -> String {
        let mut code = String::from("void\tmain(in SVertexInput vInput, out SVertexOutput vOutput)\n{\n");
        code.push_str(&calls(func_to_call, "vInput, vOutput"));
        if output_clipspace_position {
            code.push_str("\tvOutput.VertexPosition.y *= -1.0;\n");
        }
        code.push_str("}\n");
        code
    }

    fn geometry_main(
        &self,
        _inputs: &[VertexOutput],
        outputs: &GeometryOutput,
        func_to_call: &[String],
        draw_mode: DrawMode,
    ) -> String {
        let mut code = format!("[maxvertexcount({})]\n", outputs.max_vertices);
        code.push_str(&format!(
            "void\tmain({} SPrimitives _input[{}], in uint PrimitiveId : SV_PrimitiveID, inout {}<SGeometryOutput> _output)\n{{\n",
            input_primitive(draw_mode),
            draw_mode.vertex_count(),
            output_stream(outputs.primitive_type)
        ));
        code.push_str("\tSGeometryInput\tgInput;\n\tSGeometryOutput\tgOutput;\n\n");
        code.push_str("\tgInput.Primitives = _input;\n\n");
        code.push_str("\tgInput.PrimitiveId = PrimitiveId;\n\n");
        for output in &outputs.outputs {
            code.push_str(&zero_init("gOutput", &output.name, output.ty));
        }
        code.push_str(&calls(func_to_call, "gInput, gOutput, _output"));
        code.push_str("}\n");
        code
    }

    fn fragment_main(
        &self,
        _inputs: &[VertexOutput],
        _outputs: &[FragmentOutput],
        func_to_call: &[String],
    ) -> String {
        let mut code = String::from("void\tmain(in SFragmentInput fInput, out SFragmentOutput fOutput)\n{\n");
        code.push_str(&calls(func_to_call, "fInput, fOutput"));
        code.push_str("}\n");
        code
    }

    fn geometry_emit_vertex(&self, outputs: &GeometryOutput, output_clipspace_position: bool) -> String {
        let mut code = format!(
            "void\tAppendVertex(in SGeometryOutput outputData, inout {}<SGeometryOutput> _outputStream)\n{{\n",
            output_stream(outputs.primitive_type)
        );
        code.push_str("\tSGeometryOutput output;\n");
        for output in &outputs.outputs {
            code.push_str(&format!("\toutput.{0} = outputData.{0};\n", output.name));
        }
        code.push_str("\toutput.VertexPosition = outputData.VertexPosition;\n");
        if output_clipspace_position {
            code.push_str("\toutput.VertexPosition.y *= -1.0;\n");
        }
        code.push_str("\t_outputStream.Append(output);\n}");
        code
    }

    fn geometry_end_primitive(&self, outputs: &GeometryOutput) -> String {
        format!(
            "void\tFinishPrimitive(in SGeometryOutput outputData, inout {}<SGeometryOutput> _outputStream)\n{{\n\t_outputStream.RestartStrip();\n}}\n",
            output_stream(outputs.primitive_type)
        )
    }

    fn compute_inputs(&self) -> String {
        concat!(
            "\nstruct SComputeInput\n{\n",
            "\tuint3 GlobalThreadID : SV_DispatchThreadID;\n",
            "\tuint3 LocalThreadID : SV_GroupThreadID;\n",
            "\tuint3 GroupID : SV_GroupID;\n",
            "};\n",
        )
        .to_string()
    }

    fn compute_main(&self, dispatch_size: [u32; 3], func_to_call: &[String]) -> String {
        let [x, y, z] = dispatch_size;
        let mut code = format!("[numthreads({x}, {y}, {z})]\n");
        code.push_str("void\tmain(in SComputeInput cInput)\n{\n");
        code.push_str(&calls(func_to_call, "cInput"));
        code.push_str("}\n");
        code
    }
}
