//! Backend shader generators.
//!
//! One [`ShaderDescription`] is turned into backend source by a
//! [`ShaderGenerator`]. Each backend implements the per-section operations;
//! [`generate_shader`] sequences them into a full stage:
//!
//! 1. defines and header
//! 2. stage inputs and outputs (plus emit/end helpers for geometry, thread
//!    group defines and input struct for compute)
//! 3. constant sets, push constants, compute groupshared memory
//! 4. the mesh-matrix helper (vertex only), the user body, particle glue
//! 5. the stage `main`
//!
//! [`Generator`] selects the backend for a [`GraphicsApi`].

pub(crate) mod common;
pub mod glsl;
pub mod hlsl;
pub mod metal;
pub mod vulkan;

use std::path::Path;

use rhi::shader::{
    ConstantSetLayout, DrawMode, FragmentOutput, GeometryOutput, GraphicsApi, GroupsharedVariable,
    PushConstantBuffer, ShaderDescription, ShaderStage, StagePipeline, VertexAttributeDesc,
    VertexOutput,
};

use crate::error::{ShaderGenError, ShaderGenResult};
use crate::options::ShaderOptions;
use crate::particle::{self, ParticleLibrary};

pub use glsl::GlslGenerator;
pub use hlsl::HlslGenerator;
pub use metal::MetalGenerator;
pub use vulkan::VulkanGenerator;

/// Per-section source emitters of one backend.
pub trait ShaderGenerator {
    /// Scans the user body (and its includes, resolved from `shader_dir`)
    /// before generation. Most backends need nothing.
    fn gather_shader_info(&mut self, _content: &str, _shader_dir: &Path) -> ShaderGenResult<()> {
        Ok(())
    }

    fn defines(&self, description: &ShaderDescription) -> String;
    fn header(&self, stage: ShaderStage) -> String;

    fn vertex_inputs(&self, inputs: &[VertexAttributeDesc]) -> String;
    /// `to_fragment` is false when a geometry stage sits in between.
    fn vertex_outputs(&self, outputs: &[VertexOutput], to_fragment: bool) -> String;
    fn geometry_inputs(&self, inputs: &[VertexOutput], draw_mode: DrawMode) -> String;
    fn geometry_outputs(&self, outputs: &GeometryOutput) -> String;
    fn fragment_inputs(&self, inputs: &[VertexOutput]) -> String;
    fn fragment_outputs(&self, outputs: &[FragmentOutput]) -> String;

    /// Declarations of the sets visible to `stage`.
    fn constant_sets(&self, sets: &[ConstantSetLayout], stage: ShaderStage) -> String;
    fn push_constants(&self, blocks: &[PushConstantBuffer], stage: ShaderStage) -> String;
    fn groupshared_variables(&self, variables: &[GroupsharedVariable]) -> String;

    fn vertex_main(
        &self,
        inputs: &[VertexAttributeDesc],
        outputs: &[VertexOutput],
        func_to_call: &[String],
        output_clipspace_position: bool,
    ) -> String;
    fn geometry_main(
        &self,
        inputs: &[VertexOutput],
        outputs: &GeometryOutput,
        func_to_call: &[String],
        draw_mode: DrawMode,
    ) -> String;
    fn fragment_main(
        &self,
        inputs: &[VertexOutput],
        outputs: &[FragmentOutput],
        func_to_call: &[String],
    ) -> String;

    /// `AppendVertex` helper called by geometry bodies.
    fn geometry_emit_vertex(&self, outputs: &GeometryOutput, output_clipspace_position: bool) -> String;
    /// `FinishPrimitive` helper called by geometry bodies.
    fn geometry_end_primitive(&self, outputs: &GeometryOutput) -> String;

    fn compute_inputs(&self) -> String;
    fn compute_main(&self, dispatch_size: [u32; 3], func_to_call: &[String]) -> String;
}

/// User entry point a non-empty body must define for `stage`.
pub fn user_entry_point(stage: ShaderStage) -> &'static str {
    match stage {
        ShaderStage::Vertex => "VertexMain",
        ShaderStage::Geometry => "GeometryMain",
        ShaderStage::Fragment => "FragmentMain",
        ShaderStage::Compute => "ComputeMain",
    }
}

/// Full `stage` source for `content`. The output only depends on the
/// arguments: generating twice yields identical text.
pub fn generate_shader(
    generator: &dyn ShaderGenerator,
    content: &str,
    stage: ShaderStage,
    description: &ShaderDescription,
    options: ShaderOptions,
    library: &ParticleLibrary,
) -> String {
    debug_assert!(
        description.pipeline != StagePipeline::Invalid,
        "shader pipeline is not set"
    );

    let fragment_inputs: &[VertexOutput] = match description.pipeline {
        StagePipeline::VsPs => &description.vertex_output,
        StagePipeline::VsGsPs => &description.geometry_output.outputs,
        StagePipeline::Cs | StagePipeline::Invalid => &[],
    };

    let mut code = generator.defines(description);
    code.push_str(&generator.header(stage));
    code.push('\n');

    match stage {
        ShaderStage::Vertex => {
            code.push_str(&generator.vertex_inputs(&description.bindings.input_attributes));
            code.push('\n');
            code.push_str(&generator.vertex_outputs(
                &description.vertex_output,
                description.pipeline == StagePipeline::VsPs,
            ));
            code.push('\n');
        }
        ShaderStage::Geometry => {
            if description.pipeline == StagePipeline::VsGsPs {
                code.push_str(&generator.geometry_inputs(&description.vertex_output, description.draw_mode));
            }
            code.push('\n');
            code.push_str(&generator.geometry_outputs(&description.geometry_output));
            code.push('\n');
            // Geometry bodies emit clip-space vertices.
            code.push_str(&generator.geometry_emit_vertex(&description.geometry_output, true));
            code.push('\n');
            code.push_str(&generator.geometry_end_primitive(&description.geometry_output));
            code.push('\n');
        }
        ShaderStage::Fragment => {
            code.push_str(&generator.fragment_inputs(fragment_inputs));
            code.push('\n');
            code.push_str(&generator.fragment_outputs(&description.fragment_output));
            code.push('\n');
        }
        ShaderStage::Compute => {
            let [x, y, z] = description.dispatch_size;
            code.push_str(&format!("#define THREADGROUP_SIZE_X {x} \n"));
            code.push_str(&format!("#define THREADGROUP_SIZE_Y {y} \n"));
            code.push_str(&format!("#define THREADGROUP_SIZE_Z {z} \n"));
            code.push_str(&generator.compute_inputs());
            code.push('\n');
        }
    }

    code.push_str(&generator.constant_sets(&description.bindings.constant_sets, stage));
    code.push('\n');
    code.push_str(&generator.push_constants(&description.bindings.push_constants, stage));
    code.push('\n');
    if stage == ShaderStage::Compute {
        code.push_str(&generator.groupshared_variables(&description.bindings.groupshared));
        code.push('\n');
    }
    code.push('\n');
    if stage == ShaderStage::Vertex {
        code.push_str(particle::MESH_TRANSFORM_HELPER);
        code.push('\n');
    }
    code.push_str(content);
    code.push('\n');

    // The user entry point goes in first so the particle glue lands in
    // front of it.
    let mut func_to_call = Vec::new();
    if !content.is_empty() {
        func_to_call.push(user_entry_point(stage).to_string());
    }
    code.push_str(&particle::additional_functions(
        description,
        options,
        &mut func_to_call,
        stage,
        library,
    ));
    code.push('\n');

    let main = match stage {
        ShaderStage::Vertex => generator.vertex_main(
            &description.bindings.input_attributes,
            &description.vertex_output,
            &func_to_call,
            description.pipeline == StagePipeline::VsPs,
        ),
        ShaderStage::Geometry => generator.geometry_main(
            &description.vertex_output,
            &description.geometry_output,
            &func_to_call,
            description.draw_mode,
        ),
        ShaderStage::Fragment => {
            generator.fragment_main(fragment_inputs, &description.fragment_output, &func_to_call)
        }
        ShaderStage::Compute => generator.compute_main(description.dispatch_size, &func_to_call),
    };
    code.push_str(&main);
    code.push('\n');
    code
}

// ---------------------------------------------------------------------------
// Backend selection
// ---------------------------------------------------------------------------

/// Closed set of generator backends.
#[derive(Debug, Clone)]
pub enum Backend {
    Glsl(GlslGenerator),
    Vulkan(VulkanGenerator),
    Hlsl(HlslGenerator),
    Metal(MetalGenerator),
}

impl Backend {
    pub fn for_api(api: GraphicsApi) -> ShaderGenResult<Self> {
        match api {
            GraphicsApi::OpenGL => Ok(Backend::Glsl(GlslGenerator::desktop())),
            GraphicsApi::OpenGLES => Ok(Backend::Glsl(GlslGenerator::es())),
            GraphicsApi::Vulkan => Ok(Backend::Vulkan(VulkanGenerator)),
            GraphicsApi::D3D11 | GraphicsApi::D3D12 => Ok(Backend::Hlsl(HlslGenerator)),
            GraphicsApi::Metal => Ok(Backend::Metal(MetalGenerator::default())),
            GraphicsApi::Null | GraphicsApi::Orbis => Err(ShaderGenError::UnsupportedBackend(api)),
        }
    }

    pub fn as_generator(&self) -> &dyn ShaderGenerator {
        match self {
            Backend::Glsl(g) => g,
            Backend::Vulkan(g) => g,
            Backend::Hlsl(g) => g,
            Backend::Metal(g) => g,
        }
    }

    pub fn as_generator_mut(&mut self) -> &mut dyn ShaderGenerator {
        match self {
            Backend::Glsl(g) => g,
            Backend::Vulkan(g) => g,
            Backend::Hlsl(g) => g,
            Backend::Metal(g) => g,
        }
    }
}

/// Backend plus the particle library its glue draws from.
#[derive(Debug, Clone)]
pub struct Generator {
    backend: Backend,
    library: ParticleLibrary,
}

impl Generator {
    /// Generator for `api`. Null and Orbis have no generator.
    pub fn for_api(api: GraphicsApi) -> ShaderGenResult<Self> {
        Ok(Self {
            backend: Backend::for_api(api)?,
            library: ParticleLibrary::default(),
        })
    }

    pub fn with_particle_library(mut self, library: ParticleLibrary) -> Self {
        self.library = library;
        self
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn gather_shader_info(&mut self, content: &str, shader_dir: &Path) -> ShaderGenResult<()> {
        self.backend.as_generator_mut().gather_shader_info(content, shader_dir)
    }

    pub fn generate_shader(
        &self,
        content: &str,
        stage: ShaderStage,
        description: &ShaderDescription,
        options: ShaderOptions,
    ) -> String {
        generate_shader(
            self.backend.as_generator(),
            content,
            stage,
            description,
            options,
            &self.library,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_generating_api_has_a_backend() {
        assert!(matches!(
            Backend::for_api(GraphicsApi::OpenGLES).unwrap(),
            Backend::Glsl(GlslGenerator { es: true })
        ));
        assert!(matches!(Backend::for_api(GraphicsApi::D3D12).unwrap(), Backend::Hlsl(_)));
        assert!(matches!(Backend::for_api(GraphicsApi::Metal).unwrap(), Backend::Metal(_)));
    }

    #[test]
    fn null_and_orbis_are_unsupported() {
        for api in [GraphicsApi::Null, GraphicsApi::Orbis] {
            let err = Generator::for_api(api).unwrap_err();
            assert!(matches!(err, ShaderGenError::UnsupportedBackend(a) if a == api));
        }
    }

    #[test]
    fn empty_body_calls_only_the_glue() {
        let description = ShaderDescription::compute([8, 8, 1]);
        let generator = Generator::for_api(GraphicsApi::OpenGL).unwrap();
        let code = generator.generate_shader("", ShaderStage::Compute, &description, ShaderOptions::empty());
        assert!(code.contains("#define THREADGROUP_SIZE_X 8 \n"));
        assert!(!code.contains("ComputeMain"));
        assert!(code.ends_with("\tcInput.GroupID = gl_WorkGroupID;\n}\n\n"));
    }
}
