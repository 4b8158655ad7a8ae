//! Metal Shading Language generator.
//!
//! Metal has no global resource namespace: every constant set becomes an
//! argument buffer struct passed down to the user functions. The
//! `__CONSTANT_SET_<name>` / `__DEREF_SYM_<name>` defines route the
//! prelude's `GET_CONSTANT` and `SAMPLE` macros to the right argument.
//!
//! Textures that user functions receive as parameters
//! (`SAMPLER2D_DCL_ARG(name)`) must not be prefixed with a set name, so
//! [`MetalGenerator::gather_shader_info`] scans the body and its includes
//! for them first. The scan only understands a single plain identifier
//! between the parentheses.
//!
//! Geometry shaders do not exist on Metal: every geometry operation
//! panics.

use std::path::Path;

use rhi::shader::{
    ConstantDesc, ConstantSetLayout, DrawMode, FragmentOutput, GeometryOutput, GroupsharedVariable,
    PushConstantBuffer, SamplerType, ShaderDescription, ShaderStage, VertexAttributeDesc,
    VertexOutput,
};
use tracing::{error, info};

use super::common::array_suffix;
use super::ShaderGenerator;
use crate::error::ShaderGenResult;
use crate::preprocess;

const PRELUDE: &str = include_str!("prelude/metal.h");

const TEXTURE_ARGUMENT_MACROS: [&str; 2] = ["SAMPLER2D_DCL_ARG", "SAMPLER2DMS_DCL_ARG"];

const NO_GEOMETRY: &str = "Metal does not handle geometry shaders";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetalGenerator {
    texture_parameters: Vec<String>,
}

impl MetalGenerator {
    /// Identifiers found in `SAMPLER2D_DCL_ARG(...)`-style declarations, in
    /// discovery order.
    pub fn texture_parameters(&self) -> &[String] {
        &self.texture_parameters
    }

    fn collect_texture_parameters(&mut self, code: &str) {
        for macro_name in TEXTURE_ARGUMENT_MACROS {
            for identifier in find_macro_arguments(code, macro_name) {
                info!("Found identifier '{identifier}'");
                if !self.texture_parameters.contains(&identifier) {
                    self.texture_parameters.push(identifier);
                }
            }
        }
    }
}

/// Argument lists threaded through one stage: the entry point signature,
/// the user function declarations and the call sites.
struct StageArguments {
    main_args: String,
    args: String,
    params: String,
}

impl StageArguments {
    fn new(main_args: &str, args: &str, params: &str) -> Self {
        Self {
            main_args: format!("#define {main_args}\t"),
            args: format!("#define {args}\t"),
            params: format!("#define {params}\t"),
        }
    }

    fn push(&mut self, ty: &str, name: &str, attribute: &str) {
        self.main_args.push_str(&format!(", {ty} &{name} {attribute}"));
        self.args.push_str(&format!(", {ty} &{name}"));
        self.params.push_str(&format!(", {name}"));
    }

    fn finish(self, code: &mut String) {
        for line in [self.main_args, self.args, self.params] {
            code.push('\n');
            code.push_str(&line);
        }
    }
}

fn constant_set_arguments(stage: ShaderStage) -> StageArguments {
    match stage {
        ShaderStage::Vertex => StageArguments::new("__VS_MAIN_ARGS", "__VS_ARGS", "__VS_PARAMS"),
        ShaderStage::Fragment => StageArguments::new("__FS_MAIN_ARGS", "__FS_ARGS", "__FS_PARAMS"),
        ShaderStage::Compute => StageArguments::new("__CS_MAIN_ARGS", "__CS_ARGS", "__CS_PARAMS"),
        ShaderStage::Geometry => panic!("{NO_GEOMETRY}"),
    }
}

fn push_constant_arguments(stage: ShaderStage) -> StageArguments {
    match stage {
        ShaderStage::Vertex => StageArguments::new(
            "VS_MAIN_ARGS __VS_MAIN_ARGS",
            "VS_ARGS __VS_ARGS",
            "VS_PARAMS __VS_PARAMS",
        ),
        ShaderStage::Fragment => StageArguments::new(
            "FS_MAIN_ARGS __FS_MAIN_ARGS",
            "FS_ARGS __FS_ARGS",
            "FS_PARAMS __FS_PARAMS",
        ),
        ShaderStage::Compute => StageArguments::new(
            "_CS_MAIN_ARGS __CS_MAIN_ARGS",
            "_CS_ARGS __CS_ARGS",
            "_CS_PARAMS __CS_PARAMS",
        ),
        ShaderStage::Geometry => panic!("{NO_GEOMETRY}"),
    }
}

fn calls(code: &mut String, func_to_call: &[String], args: &str, prefix: &str) {
    for func in func_to_call.iter().filter(|f| !f.is_empty()) {
        code.push_str(&format!("{prefix}\t{func}({args});\n"));
    }
}

impl ShaderGenerator for MetalGenerator {
    fn gather_shader_info(&mut self, content: &str, shader_dir: &Path) -> ShaderGenResult<()> {
        let dependencies = preprocess::find_shader_dependencies(content, shader_dir).inspect_err(|_| {
            error!("Could not find the shader dependencies");
        })?;
        self.collect_texture_parameters(content);
        for dependency in dependencies {
            let code = std::fs::read_to_string(&dependency)?;
            self.collect_texture_parameters(&code);
        }
        Ok(())
    }

    fn defines(&self, _description: &ShaderDescription) -> String {
        PRELUDE.to_string()
    }

    fn header(&self, _stage: ShaderStage) -> String {
        "METAL_INCLUDE\nusing namespace metal;\n".to_string()
    }

    fn vertex_inputs(&self, inputs: &[VertexAttributeDesc]) -> String {
        // Matrices arrive as one attribute per row.
        let mut code = String::from("\nstruct\t__SVertexInput\n{\n");
        for attr in inputs {
            let rows = attr.ty.row_count();
            if rows == 1 {
                code.push_str(&format!(
                    "\t{} {} [[attribute({})]];\n",
                    attr.ty.hlsl_name(),
                    attr.name,
                    attr.location
                ));
            } else {
                let row_type = attr.ty.row_type().hlsl_name();
                for i in 0..rows {
                    code.push_str(&format!(
                        "\t{row_type} {}_{i} [[attribute({})]];\n",
                        attr.name,
                        attr.location + i
                    ));
                }
            }
        }
        code.push_str("};\n");
        code.push_str("\nstruct\tSVertexInput\n{\n");
        for attr in inputs {
            code.push_str(&format!("\t{} {};\n", attr.ty.hlsl_name(), attr.name));
        }
        code.push_str("\tuint VertexIndex;\n\tuint InstanceId;\n};\n");
        code
    }

    fn vertex_outputs(&self, outputs: &[VertexOutput], _to_fragment: bool) -> String {
        let mut code = String::from("\nstruct\tSVertexOutput\n{\n");
        for (location, output) in outputs.iter().enumerate() {
            code.push_str(&format!(
                "\t{} {} [[user(attribute{location})]];\n",
                output.ty.hlsl_name(),
                output.name
            ));
        }
        code.push_str("\tfloat4 VertexPosition [[position]];\n};\n");
        code
    }

    fn geometry_inputs(&self, _inputs: &[VertexOutput], _draw_mode: DrawMode) -> String {
        panic!("{NO_GEOMETRY}")
    }

    fn geometry_outputs(&self, _outputs: &GeometryOutput) -> String {
        panic!("{NO_GEOMETRY}")
    }

    fn fragment_inputs(&self, inputs: &[VertexOutput]) -> String {
        let mut code = String::from("\nstruct\tSFragmentInput\n{\n");
        for (location, input) in inputs.iter().enumerate() {
            code.push_str(&format!(
                "\t{} {} [[user(attribute{location})]];\n",
                input.ty.hlsl_name(),
                input.name
            ));
        }
        code.push_str("\tfloat4 VertexPosition [[position]];\n");
        code.push_str("\tbool IsFrontFace[[front_facing]];\n};\n");
        code
    }

    fn fragment_outputs(&self, outputs: &[FragmentOutput]) -> String {
        let mut code = String::from("\nstruct\tSFragmentOutput\n{\n");
        let mut color = 0;
        for output in outputs {
            let (ty, is_depth) = output.format.to_var_type();
            if is_depth {
                code.push_str(&format!("\t{} {} [[depth(any)]];\n", ty.hlsl_name(), output.name));
            } else {
                code.push_str(&format!("\t{} {} [[color({color})]];\n", ty.hlsl_name(), output.name));
                color += 1;
            }
        }
        code.push_str("};\n");
        code
    }

    fn constant_sets(&self, sets: &[ConstantSetLayout], stage: ShaderStage) -> String {
        let mut arguments = constant_set_arguments(stage);
        let mut set_names = String::new();
        let mut code = String::new();

        for set in sets.iter().filter(|s| s.stages.intersects(stage.mask())) {
            let set_name = format!("ConstantSet{}", set.per_set_binding);
            let mut structures = String::new();
            let mut members = String::new();
            let mut id = 0u32;
            let mut next_id = || {
                let current = id;
                id += 1;
                current
            };

            for constant in &set.constants {
                match constant {
                    ConstantDesc::ConstantBuffer(cb) => {
                        set_names.push_str(&format!("#define __CONSTANT_SET_{}\t{set_name}.\n", cb.name));
                        set_names.push_str(&format!("#define __DEREF_SYM_{}\t->\n", cb.name));
                        structures.push_str(&format!("struct\tS{}{{\n", cb.name));
                        for var in &cb.constants {
                            structures.push_str(&format!("\t{} {}", var.ty.hlsl_name(), var.name));
                            structures.push_str(&array_suffix(var.array_size));
                        }
                        structures.push_str("};\n\n");
                        members.push_str(&format!(
                            "\tconstant S{0} *{0} [[id({1})]];\n",
                            cb.name,
                            next_id()
                        ));
                    }
                    ConstantDesc::RawBuffer { name, read_only, .. } => {
                        set_names.push_str(&format!("#define __CONSTANT_SET_{name}\t{set_name}.\n"));
                        let space = if *read_only { "constant" } else { "device" };
                        members.push_str(&format!("\t{space} uint *{name} [[id({})]];\n", next_id()));
                    }
                    ConstantDesc::TextureStorage { name, read_only, .. } => {
                        set_names.push_str(&format!("#define __CONSTANT_SET_{name}\t{set_name}.\n"));
                        let access = if *read_only { "access::read" } else { "access::read_write" };
                        members.push_str(&format!(
                            "\ttexture2d<float, {access}> Tex_{name} [[id({})]];\n",
                            next_id()
                        ));
                    }
                    ConstantDesc::Sampler { name, ty, .. } => {
                        set_names.push_str(&format!("#define __CONSTANT_SET_{name}\t{set_name}.\n"));
                        let texture = match ty {
                            SamplerType::Cube => "texturecube<float>",
                            SamplerType::Multi => "texture2d_ms<float>",
                            SamplerType::Single => "texture2d<float>",
                        };
                        members.push_str(&format!("\t{texture} Tex_{name} [[id({})]];\n", next_id()));
                        members.push_str(&format!("\tsampler Sampler_{name} [[id({})]];\n", next_id()));
                    }
                }
            }

            code.push_str(&structures);
            code.push_str(&format!("struct\tS{set_name}\n{{\n"));
            code.push_str(&members);
            code.push_str("};\n");
            arguments.push(
                &format!("constant S{set_name}"),
                &set_name,
                &format!("[[buffer({})]]", set.per_set_binding),
            );
        }

        for identifier in &self.texture_parameters {
            set_names.push_str(&format!("#define __CONSTANT_SET_{identifier}\n"));
        }

        arguments.finish(&mut code);
        code.push('\n');
        code.push_str(&set_names);
        code
    }

    fn push_constants(&self, blocks: &[PushConstantBuffer], stage: ShaderStage) -> String {
        let mut arguments = push_constant_arguments(stage);
        let mut set_names = String::new();
        let mut code = String::new();

        for block in blocks.iter().filter(|b| b.stages.intersects(stage.mask())) {
            set_names.push_str(&format!("#define __CONSTANT_SET_{}\n", block.name));
            set_names.push_str(&format!("#define __DEREF_SYM_{}\t.\n", block.name));

            code.push_str(&format!("struct\tS{}\n{{\n", block.name));
            for (id, var) in block.constants.iter().enumerate() {
                code.push_str(&format!("\t{} {} [[id({id})]]", var.ty.hlsl_name(), var.name));
                if var.array_size >= 1 {
                    code.push_str(&format!(" [{}];\n", var.array_size));
                } else {
                    code.push_str(";\n");
                }
            }
            code.push_str("};\n");
            arguments.push(
                &format!("constant S{}", block.name),
                &block.name,
                &format!("[[buffer({})]]", block.per_block_binding),
            );
        }

        arguments.finish(&mut code);
        code.push('\n');
        code.push_str(&set_names);
        code
    }

    fn groupshared_variables(&self, variables: &[GroupsharedVariable]) -> String {
        let mut arguments =
            StageArguments::new("CS_MAIN_ARGS _CS_MAIN_ARGS", "CS_ARGS _CS_ARGS", "CS_PARAMS _CS_PARAMS");
        let mut code = String::new();
        if !variables.is_empty() {
            code.push_str("struct\tSGroupshared\n{\n");
            for variable in variables {
                code.push_str(&format!(
                    "\t{} {}[{}];\n",
                    variable.ty.hlsl_name(),
                    variable.name,
                    variable.array_size
                ));
            }
            code.push_str("};\n");
            arguments.push("threadgroup SGroupshared", "Groupshared", "[[threadgroup(0)]]");
        }
        arguments.finish(&mut code);
        code
    }

    fn vertex_main(
        &self,
        inputs: &[VertexAttributeDesc],
        _outputs: &[VertexOutput],
        func_to_call: &[String],
        _output_clipspace_position: bool,
    ) -> String {
        let mut code = String::from(
            "vertex SVertexOutput\tvert_main(__SVertexInput _vInput [[stage_in]], uint vertexID [[vertex_id]], uint instanceID [[instance_id]] VS_MAIN_ARGS)\n{\n",
        );
        code.push_str("\tSVertexInput\tvInput;\n\tSVertexOutput\tvOutput;\n\n");
        for attr in inputs {
            let rows = attr.ty.row_count();
            if rows == 1 {
                code.push_str(&format!("\tvInput.{0} = _vInput.{0};\n", attr.name));
            } else {
                for i in 0..rows {
                    code.push_str(&format!("\tvInput.{0}[{i}] = _vInput.{0}_{i};\n", attr.name));
                }
            }
        }
        code.push_str("\tvInput.VertexIndex = vertexID;\n");
        code.push_str("\tvInput.InstanceId = instanceID;\n\n");
        calls(&mut code, func_to_call, "vInput, vOutput VS_PARAMS", "\n");
        code.push_str("\treturn vOutput;\n}\n");
        code
    }

    fn geometry_main(
        &self,
        _inputs: &[VertexOutput],
        _outputs: &GeometryOutput,
        _func_to_call: &[String],
        _draw_mode: DrawMode,
    ) -> String {
        panic!("{NO_GEOMETRY}")
    }

    fn fragment_main(
        &self,
        _inputs: &[VertexOutput],
        _outputs: &[FragmentOutput],
        func_to_call: &[String],
    ) -> String {
        let mut code = String::from(
            "fragment SFragmentOutput\tfrag_main(SFragmentInput fInput [[stage_in]] FS_MAIN_ARGS)\n{\n",
        );
        code.push_str("\tSFragmentOutput\tfOutput;\n\n");
        calls(&mut code, func_to_call, "fInput, fOutput FS_PARAMS", "");
        code.push_str("\treturn fOutput;\n}\n");
        code
    }

    fn geometry_emit_vertex(&self, _outputs: &GeometryOutput, _output_clipspace_position: bool) -> String {
        panic!("{NO_GEOMETRY}")
    }

    fn geometry_end_primitive(&self, _outputs: &GeometryOutput) -> String {
        panic!("{NO_GEOMETRY}")
    }

    fn compute_inputs(&self) -> String {
        "\nstruct SComputeInput\n{\n\tuint3 GlobalThreadID;\n\tuint3 LocalThreadID;\n\tuint3 GroupID;\n};\n"
            .to_string()
    }

    fn compute_main(&self, _dispatch_size: [u32; 3], func_to_call: &[String]) -> String {
        let mut code = String::from(
            "kernel void\tcomp_main(uint3 globalThreadID [[thread_position_in_grid]], uint3 localThreadID [[thread_position_in_threadgroup]], uint3 groupID [[threadgroup_position_in_grid]] CS_MAIN_ARGS)\n{\n",
        );
        code.push_str("\tSComputeInput\tcInput;\n");
        code.push_str("\tcInput.GlobalThreadID = globalThreadID;\n");
        code.push_str("\tcInput.LocalThreadID = localThreadID;\n");
        code.push_str("\tcInput.GroupID = groupID;\n");
        calls(&mut code, func_to_call, "cInput CS_PARAMS", "\n");
        code.push_str("}\n");
        code
    }
}

// ---------------------------------------------------------------------------
// Texture parameter scan
// ---------------------------------------------------------------------------

fn is_space(c: u8) -> bool {
    c == b' ' || c == b'\t'
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// Identifiers passed as the single argument of `macro_name(...)` in
/// `code`, skipping `//` and `/* */` comments.
pub(crate) fn find_macro_arguments(code: &str, macro_name: &str) -> Vec<String> {
    let bytes = code.as_bytes();
    let pattern = macro_name.as_bytes();
    let len = bytes.len();
    let at = |i: usize| bytes.get(i).copied().unwrap_or(0);
    let mut found = Vec::new();
    let mut i = 0;

    while i < len {
        if at(i) == b'/' && at(i + 1) == b'/' {
            i += 2;
            while i < len && at(i) != b'\n' {
                i += 1;
            }
        }
        if at(i) == b'/' && at(i + 1) == b'*' {
            i += 2;
            while i + 1 < len {
                if at(i) == b'*' && at(i + 1) == b'/' {
                    i += 2;
                    break;
                } else if at(i) == b'\\' {
                    i += 2;
                } else {
                    i += 1;
                }
            }
        }

        let matched = pattern
            .iter()
            .zip(&bytes[i.min(len)..])
            .take_while(|(a, b)| a == b)
            .count();
        if matched < pattern.len() {
            i += matched.max(1);
            continue;
        }

        i += matched;
        while is_space(at(i)) {
            i += 1;
        }
        if at(i) != b'(' {
            continue;
        }
        i += 1;
        while is_space(at(i)) {
            i += 1;
        }
        let start = i;
        if !is_ident_start(at(i)) {
            continue;
        }
        while is_ident(at(i)) {
            i += 1;
        }
        let end = i;
        while is_space(at(i)) {
            i += 1;
        }
        if at(i) == b')' {
            i += 1;
            found.push(code[start..end].to_string());
        }
    }
    found
}
