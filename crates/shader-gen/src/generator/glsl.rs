//! OpenGL and OpenGL ES generator.
//!
//! Desktop GL targets `#version 330`, or `#version 430` when the shader
//! uses raw buffers or storage images. ES targets `#version 310 es` with
//! medium precision qualifiers. Binding indices are left in comments: GL
//! resolves them by name at link time.

use rhi::shader::{
    ConstantDesc, ConstantSetLayout, DrawMode, FragmentOutput, GeometryOutput, GroupsharedVariable,
    PushConstantBuffer, SamplerType, ShaderDescription, ShaderStage, VertexAttributeDesc,
    VertexOutput,
};

use super::common::{array_suffix, zero_init};
use super::ShaderGenerator;

const PRELUDE: &str = include_str!("prelude/glsl.h");

const PRECISIONS: &str = concat!(
    "#define FLOAT_PRECISION\n",
    "#define SAMPLER2D_PRECISION\n",
    "#define SAMPLER2DMS_PRECISION\n",
    "#define SAMPLERCUBE_PRECISION\n",
);

const MEDIUM_PRECISIONS: &str = concat!(
    "#define FLOAT_PRECISION\t\tprecision mediump float;\n",
    "#define SAMPLER2D_PRECISION\tprecision mediump sampler2D;\n",
    "#define SAMPLER2DMS_PRECISION\tprecision mediump sampler2DMS;\n",
    "#define SAMPLERCUBE_PRECISION\tprecision mediump samplerCube;\n",
);

// ---------------------------------------------------------------------------
// Helpers shared with the Vulkan dialect
// ---------------------------------------------------------------------------

pub(crate) fn primitive_layout(draw_mode: DrawMode) -> &'static str {
    match draw_mode {
        DrawMode::Points => "points",
        DrawMode::Lines => "lines",
        DrawMode::Triangles => "triangles",
        DrawMode::Invalid => panic!("geometry shader input primitive type is not set"),
    }
}

pub(crate) fn output_layout(draw_mode: DrawMode) -> &'static str {
    match draw_mode {
        DrawMode::Points => "points",
        DrawMode::Lines => "line_strip",
        DrawMode::Triangles => "triangle_strip",
        DrawMode::Invalid => panic!("geometry shader output primitive type is not set"),
    }
}

/// `"\nstruct\t<name>\n{\n\t<type> <member>;\n..."` without the closing
/// brace, so callers can append built-in members.
pub(crate) fn open_struct<'a>(name: &str, members: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    let mut code = format!("\nstruct\t{name}\n{{\n");
    for (ty, member) in members {
        code.push_str(&format!("\t{ty} {member};\n"));
    }
    code
}

pub(crate) fn vertex_input_struct(inputs: &[VertexAttributeDesc]) -> String {
    let mut code = open_struct(
        "SVertexInput",
        inputs.iter().map(|a| (a.ty.glsl_name(), a.name.as_str())),
    );
    code.push_str("\tint VertexIndex;\n\tuint InstanceId;\n};\n");
    code
}

pub(crate) fn interpolant_struct(name: &str, members: &[VertexOutput], builtin: &str) -> String {
    let mut code = open_struct(name, members.iter().map(|o| (o.ty.glsl_name(), o.name.as_str())));
    code.push_str(builtin);
    code.push_str("};\n");
    code
}

pub(crate) fn geometry_input_structs(inputs: &[VertexOutput], points: u32) -> String {
    let mut code = interpolant_struct("SPrimitives", inputs, "\tvec4 VertexPosition;\n");
    code.push_str("\nstruct\tSGeometryInput\n{\n");
    code.push_str(&format!("\tSPrimitives Primitives[{points}];\n"));
    code.push_str("\tint PrimitiveId;\n};\n");
    code
}

/// Render-target declarations: `(location, type, name)` for colour
/// outputs, plus whether a depth output exists.
pub(crate) fn split_fragment_outputs(outputs: &[FragmentOutput]) -> (Vec<(&'static str, &str)>, bool) {
    let mut colors = Vec::new();
    let mut has_depth = false;
    for output in outputs {
        let (ty, is_depth) = output.format.to_var_type();
        if is_depth {
            has_depth = true;
        } else {
            colors.push((ty.glsl_name(), output.name.as_str()));
        }
    }
    (colors, has_depth)
}

pub(crate) fn fragment_output_struct(outputs: &[FragmentOutput]) -> String {
    let (colors, has_depth) = split_fragment_outputs(outputs);
    let mut code = open_struct("SFragmentOutput", colors.into_iter());
    if has_depth {
        code.push_str("\tfloat DepthValue;\n");
    }
    code.push_str("};\n");
    code
}

pub(crate) fn uniform_members(code: &mut String, members: &[rhi::shader::ConstantVarDesc]) {
    for var in members {
        code.push_str(&format!("\t{} {}", var.ty.glsl_name(), var.name));
        code.push_str(&array_suffix(var.array_size));
    }
}

pub(crate) fn groupshared(variables: &[GroupsharedVariable]) -> String {
    variables
        .iter()
        .map(|v| format!("shared {}\t{}[{}];\n", v.ty.glsl_name(), v.name, v.array_size))
        .collect()
}

pub(crate) fn calls(func_to_call: &[String], args: &str) -> String {
    func_to_call
        .iter()
        .filter(|f| !f.is_empty())
        .map(|f| format!("\t{f}({args});\n"))
        .collect()
}

pub(crate) fn compute_main_body(dispatch_size: [u32; 3], func_to_call: &[String]) -> String {
    let [x, y, z] = dispatch_size;
    let mut code = format!("layout(local_size_x = {x}, local_size_y = {y}, local_size_z = {z}) in;\n");
    code.push_str("void\tmain()\n{\n");
    code.push_str("\tSComputeInput\tcInput;\n");
    code.push_str("\tcInput.GlobalThreadID = gl_GlobalInvocationID;\n");
    code.push_str("\tcInput.LocalThreadID = gl_LocalInvocationID;\n");
    code.push_str("\tcInput.GroupID = gl_WorkGroupID;\n");
    code.push_str(&calls(func_to_call, "cInput"));
    code.push_str("}\n");
    code
}

pub(crate) fn end_primitive() -> String {
    "void\tFinishPrimitive(in SGeometryOutput outputData)\n{\n\tEndPrimitive();\n}\n".to_string()
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlslGenerator {
    pub es: bool,
}

impl GlslGenerator {
    pub fn desktop() -> Self {
        Self { es: false }
    }

    pub fn es() -> Self {
        Self { es: true }
    }
}

impl ShaderGenerator for GlslGenerator {
    fn defines(&self, description: &ShaderDescription) -> String {
        let mut code = PRELUDE.to_string();
        code.push_str(if self.es { MEDIUM_PRECISIONS } else { PRECISIONS });
        if self.es {
            code.push_str("#define VERSION\t\t\t#version 310 es\n");
            code.push_str("#define\tEXTENSION1\n");
        } else {
            if description.bindings.has_raw_or_storage() {
                code.push_str("#define VERSION\t\t\t#version 430\n");
            } else {
                code.push_str("#define VERSION\t\t\t#version 330\n");
            }
            code.push_str("#define\tEXTENSION1\t#extension GL_ARB_separate_shader_objects : enable\n");
        }
        code
    }

    fn header(&self, _stage: ShaderStage) -> String {
        "VERSION\nEXTENSION1\nFLOAT_PRECISION\nSAMPLER2D_PRECISION\nSAMPLER2DMS_PRECISION\nSAMPLERCUBE_PRECISION\n"
            .to_string()
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
                "layout(location = {location}) {} out {} _vout_{};\n",
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
                "layout(location = {location}) {} in {} _gin_{}[{points}];\n",
                input.interpolation.glsl_qualifier(),
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
                "layout(location = {location}) {} in {} _fin_{};\n",
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
            for constant in &set.constants {
                match constant {
                    ConstantDesc::ConstantBuffer(cb) => {
                        code.push_str(&format!(
                            "layout(/*binding = {}, */std140) uniform U{}\n{{\n",
                            cb.per_block_binding, cb.name
                        ));
                        uniform_members(&mut code, &cb.constants);
                        code.push_str(&format!("}}\t\t{};\n", cb.name));
                    }
                    ConstantDesc::RawBuffer {
                        name,
                        read_only,
                        per_block_binding,
                    } => {
                        let ro = if *read_only { "readonly" } else { "" };
                        code.push_str(&format!(
                            "layout(std430/*, binding = {per_block_binding}*/) {ro} buffer B{name}\n{{\n\tuint {name}[];\n}} {name};\n"
                        ));
                    }
                    ConstantDesc::TextureStorage {
                        name,
                        read_only,
                        format,
                        per_block_binding,
                    } => {
                        let layout = format
                            .and_then(|f| f.glsl_image_layout())
                            .map(|q| format!("layout({q})"))
                            .unwrap_or_default();
                        let access = if *read_only {
                            "readonly"
                        } else if format.is_some() {
                            ""
                        } else {
                            "writeonly"
                        };
                        code.push_str(&format!(
                            "/*layout(binding = {per_block_binding})*/ {layout} uniform {access} image2D {name};\n"
                        ));
                    }
                    ConstantDesc::Sampler {
                        name,
                        ty,
                        per_block_binding,
                        ..
                    } => {
                        let sampler = match ty {
                            SamplerType::Multi => "highp sampler2DMS",
                            SamplerType::Cube => "samplerCube",
                            SamplerType::Single => "sampler2D",
                        };
                        code.push_str(&format!(
                            "/*layout(binding = {per_block_binding}) */uniform {sampler} {name};\n"
                        ));
                    }
                }
            }
        }
        code
    }

    fn push_constants(&self, blocks: &[PushConstantBuffer], stage: ShaderStage) -> String {
        let mut code = String::new();
        for block in blocks.iter().filter(|b| b.stages.intersects(stage.mask())) {
            code.push_str(&format!(
                "layout(/*binding = {}, */std140) uniform U{}\n{{\n",
                block.per_block_binding, block.name
            ));
            uniform_members(&mut code, &block.constants);
            code.push_str(&format!("}}\t\t{};\n", block.name));
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
        code.push_str("\tvInput.VertexIndex = gl_VertexID;\n");
        code.push_str("\tvInput.InstanceId = uint(gl_InstanceID);\n");
        for output in outputs {
            code.push_str(&zero_init("vOutput", &output.name, output.ty));
        }
        code.push_str(&calls(func_to_call, "vInput, vOutput"));
        for output in outputs {
            code.push_str(&format!("\t_vout_{0} = vOutput.{0};\n", output.name));
        }
        code.push_str("\tgl_Position = vOutput.VertexPosition;\n}\n");
        code
    }

    fn geometry_main(
        &self,
        inputs: &[VertexOutput],
        outputs: &GeometryOutput,
        func_to_call: &[String],
        draw_mode: DrawMode,
    ) -> String {
        let points = draw_mode.vertex_count();
        let mut code = String::from("void\tmain()\n{\n\tSGeometryInput\tgInput;\n\tSGeometryOutput\tgOutput;\n\n");
        for input in inputs {
            for i in 0..points {
                code.push_str(&format!("\tgInput.Primitives[{i}].{0} = _gin_{0}[{i}];\n", input.name));
            }
        }
        for i in 0..points {
            code.push_str(&format!("\tgInput.Primitives[{i}].VertexPosition = gl_in[{i}].gl_Position;\n"));
        }
        code.push_str("\tgInput.PrimitiveId = gl_PrimitiveIDIn;\n");
        for output in &outputs.outputs {
            code.push_str(&zero_init("gOutput", &output.name, output.ty));
        }
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
            code.push_str(&format!("\tfInput.{0} = _fin_{0};\n", input.name));
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
        "\n\nstruct SComputeInput\n{\n\tuvec3 GlobalThreadID;\tuvec3 LocalThreadID;\tuvec3 GroupID;};\n".to_string()
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
    fn version_follows_storage_use() {
        let mut description = ShaderDescription::compute([8, 8, 1]);
        let gl = GlslGenerator::desktop();
        assert!(gl.defines(&description).contains("#define VERSION\t\t\t#version 330\n"));

        let mut set = ConstantSetLayout::new(ShaderStageMask::COMPUTE);
        set.add_raw_buffer("Data", true);
        description.bindings.constant_sets.push(set);
        let defines = gl.defines(&description);
        assert!(defines.contains("#define VERSION\t\t\t#version 430\n"));
        assert!(defines.contains("#extension GL_ARB_separate_shader_objects : enable"));
        assert!(defines.contains("#define FLOAT_PRECISION\n"));

        let es = GlslGenerator::es().defines(&description);
        assert!(es.contains("#define VERSION\t\t\t#version 310 es\n"));
        assert!(es.contains("precision mediump sampler2D;"));
        assert!(es.ends_with("#define\tEXTENSION1\n"));
    }

    #[test]
    fn interpolants_take_row_locations() {
        let outputs = vec![
            VertexOutput::new("fragTransform", VarType::Float4x4),
            VertexOutput {
                interpolation: rhi::shader::Interpolation::Flat,
                ..VertexOutput::new("fragId", VarType::Uint)
            },
        ];
        let code = GlslGenerator::desktop().vertex_outputs(&outputs, true);
        assert!(code.starts_with("layout(location = 0)  out mat4 _vout_fragTransform;\n"));
        assert!(code.contains("layout(location = 4) flat out uint _vout_fragId;\n"));
        assert!(code.ends_with("\tuint fragId;\n\tvec4 VertexPosition;\n};\n"));
    }

    #[test]
    fn constant_sets_are_filtered_by_stage() {
        let mut fragment = ConstantSetLayout::new(ShaderStageMask::FRAGMENT);
        fragment
            .add_sampler("EnvironmentMapSampler", SamplerType::Cube)
            .add_constant_buffer(ConstantBufferDesc::new("EnvironmentMapInfo").with_constant("Rotation", VarType::Float2x2))
            .add_texture_storage("Output", false, Some(PixelFormat::Float16Rgba))
            .add_texture_storage("Scratch", false, None);
        let mut vertex = ConstantSetLayout::new(ShaderStageMask::VERTEX);
        vertex.add_raw_buffer("Indices", true);

        let gl = GlslGenerator::desktop();
        let code = gl.constant_sets(&[fragment.clone(), vertex.clone()], ShaderStage::Fragment);
        assert_eq!(
            code,
            concat!(
                "/*layout(binding = 0) */uniform samplerCube EnvironmentMapSampler;\n",
                "layout(/*binding = 0, */std140) uniform UEnvironmentMapInfo\n{\n\tmat2 Rotation;\n}\t\tEnvironmentMapInfo;\n",
                "/*layout(binding = 0)*/ layout(rgba16f) uniform  image2D Output;\n",
                "/*layout(binding = 0)*/  uniform writeonly image2D Scratch;\n",
            )
        );
        let code = gl.constant_sets(&[fragment, vertex], ShaderStage::Vertex);
        assert_eq!(
            code,
            "layout(std430/*, binding = 0*/) readonly buffer BIndices\n{\n\tuint Indices[];\n} Indices;\n"
        );
    }

    #[test]
    fn fragment_depth_goes_to_frag_depth() {
        let outputs = vec![
            FragmentOutput {
                name: "Color".into(),
                format: PixelFormat::Float16Rgba,
            },
            FragmentOutput {
                name: "Depth".into(),
                format: PixelFormat::Depth24Stencil8,
            },
        ];
        let gl = GlslGenerator::desktop();
        assert_eq!(
            gl.fragment_outputs(&outputs),
            "layout(location = 0) out vec4 _fout_Color;\n\nstruct\tSFragmentOutput\n{\n\tvec4 Color;\n\tfloat DepthValue;\n};\n"
        );
        let main = gl.fragment_main(&[], &outputs, &["FragmentMain".to_string(), String::new()]);
        assert!(main.contains("\tFragmentMain(fInput, fOutput);\n\t_fout_Color = fOutput.Color;\n\tgl_FragDepth = fOutput.DepthValue;\n}\n"));
    }

    #[test]
    fn geometry_main_reads_every_primitive_vertex() {
        let inputs = vec![VertexOutput::new("geomColor", VarType::Float4)];
        let outputs = GeometryOutput {
            outputs: vec![VertexOutput::new("fragColor", VarType::Float4)],
            max_vertices: 4,
            primitive_type: DrawMode::Triangles,
        };
        let gl = GlslGenerator::desktop();
        let main = gl.geometry_main(&inputs, &outputs, &["GeometryMain".into()], DrawMode::Lines);
        assert!(main.contains("\tgInput.Primitives[1].geomColor = _gin_geomColor[1];\n"));
        assert!(main.contains("\tgInput.Primitives[1].VertexPosition = gl_in[1].gl_Position;\n"));
        assert!(!main.contains("Primitives[2]"));
        assert!(main.contains("\tgOutput.fragColor = vec4(0, 0, 0, 0);\n\tGeometryMain(gInput, gOutput);\n}\n"));
        assert!(gl
            .geometry_outputs(&outputs)
            .starts_with("layout(triangle_strip, max_vertices = 4) out;\nlayout(location = 0)  out vec4 _gout_fragColor;\n"));
        assert!(gl.geometry_emit_vertex(&outputs, true).ends_with("\tEmitVertex();\n}"));
    }
}
