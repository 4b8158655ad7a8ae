//! Constant-set layouts of the environment map kernels.
//!
//! Every compute kernel reads one constant set laid out as
//! `[constant buffer, sampled texture, storage texture]`; the slot indices
//! below are the ones the pipeline fills.

use rhi::shader::binding::{generate_bindings_for_api, reset_bindings};
use rhi::shader::{ConstantBufferDesc, SamplerType, ShaderBindings, ShaderDefine};
use rhi::{ConstantSetLayout, GraphicsApi, PixelFormat, ShaderStageMask, VarType};

use crate::loader::Kernel;

pub const DATA_SLOT: usize = 0;
pub const INPUT_SLOT: usize = 1;
pub const OUTPUT_SLOT: usize = 2;

/// Slots of the [`cubemap_sampler_layout`] sets handed to renderers.
pub const CUBEMAP_SAMPLER_SLOT: usize = 0;
pub const CUBEMAP_ROTATION_SLOT: usize = 1;

/// Fragment-visible cubemap plus its 2x2 yaw rotation.
pub fn cubemap_sampler_layout() -> ConstantSetLayout {
    let mut layout = ConstantSetLayout::new(ShaderStageMask::FRAGMENT);
    layout
        .add_sampler("EnvironmentMapSampler", SamplerType::Cube)
        .add_constant_buffer(
            ConstantBufferDesc::new("EnvironmentMapInfo").with_constant("Rotation", VarType::Float2x2),
        );
    layout
}

pub fn compute_cubemap_layout(input_is_latlong: bool) -> ConstantSetLayout {
    let mut layout = ConstantSetLayout::new(ShaderStageMask::COMPUTE);
    layout.add_constant_buffer(
        ConstantBufferDesc::new("CubemapData")
            .with_constant("Face", VarType::Uint)
            .with_constant("Size", VarType::Uint),
    );
    if input_is_latlong {
        layout.add_sampler("InputTextureLatlong", SamplerType::Single);
    } else {
        layout.add_sampler("InputTextureCube", SamplerType::Cube);
    }
    layout.add_texture_storage("OutData", false, None);
    layout
}

pub fn filter_cubemap_layout(output_format: PixelFormat) -> ConstantSetLayout {
    let mut layout = ConstantSetLayout::new(ShaderStageMask::COMPUTE);
    layout
        .add_constant_buffer(
            ConstantBufferDesc::new("CubemapData")
                .with_constant("Face", VarType::Uint)
                .with_constant("Roughness", VarType::Float)
                .with_constant("Size", VarType::Uint)
                .with_constant("SampleCount", VarType::Uint)
                .with_constant("PerformedSampleCount", VarType::Uint)
                .with_constant("TotalSampleCount", VarType::Uint),
        )
        .add_sampler("InputTextureCube", SamplerType::Cube)
        .add_texture_storage("OutData", false, Some(output_format));
    layout
}

pub fn compute_mipmap_layout() -> ConstantSetLayout {
    let mut layout = ConstantSetLayout::new(ShaderStageMask::COMPUTE);
    layout
        .add_constant_buffer(ConstantBufferDesc::new("Data").with_constant("TexelSize", VarType::Float2))
        .add_sampler("InputTexture", SamplerType::Single)
        .add_texture_storage("OutputTexture", false, None);
    layout
}

pub fn render_face_layout() -> ConstantSetLayout {
    let mut layout = ConstantSetLayout::new(ShaderStageMask::COMPUTE);
    layout
        .add_constant_buffer(
            ConstantBufferDesc::new("Data")
                .with_constant("Face", VarType::Uint)
                .with_constant("MipLevel", VarType::Uint)
                .with_constant("Size", VarType::Uint)
                .with_constant("Padding", VarType::Uint),
        )
        .add_sampler("InputCubeTexture", SamplerType::Cube)
        .add_texture_storage("OutputTexture", false, None);
    layout
}

pub fn blur_face_layout() -> ConstantSetLayout {
    let mut layout = ConstantSetLayout::new(ShaderStageMask::COMPUTE);
    layout
        .add_constant_buffer(
            ConstantBufferDesc::new("Data")
                .with_constant("Size", VarType::Uint)
                .with_constant("KernelSize", VarType::Uint)
                .with_constant("HalfAngle", VarType::Float),
        )
        .add_sampler("InputTexture", SamplerType::Single)
        .add_texture_storage("OutputTexture", false, None);
    layout
}

/// Layout of the per-dispatch constant sets of `kernel`.
pub fn kernel_layout(kernel: Kernel, output_format: PixelFormat) -> ConstantSetLayout {
    match kernel {
        Kernel::CubemapFromLatLong => compute_cubemap_layout(true),
        Kernel::CubemapFromCube => compute_cubemap_layout(false),
        Kernel::MipMap => compute_mipmap_layout(),
        Kernel::FilterCubemap => filter_cubemap_layout(output_format),
        Kernel::RenderFace => render_face_layout(),
        Kernel::BlurFace => blur_face_layout(),
    }
}

/// Shader bindings of `kernel`'s compute state, with slots assigned for
/// `api`.
pub fn kernel_bindings(kernel: Kernel, output_format: PixelFormat, api: GraphicsApi) -> ShaderBindings {
    let mut bindings = ShaderBindings::default();
    bindings.constant_sets.push(kernel_layout(kernel, output_format));
    match kernel {
        Kernel::CubemapFromLatLong => bindings
            .defines
            .push(ShaderDefine::new("INPUTLATLONG", "").for_stages(ShaderStageMask::COMPUTE)),
        Kernel::CubemapFromCube => bindings
            .defines
            .push(ShaderDefine::new("INPUTCUBE", "").for_stages(ShaderStageMask::COMPUTE)),
        _ => {}
    }
    reset_bindings(&mut bindings);
    generate_bindings_for_api(api, &mut bindings);
    bindings
}
