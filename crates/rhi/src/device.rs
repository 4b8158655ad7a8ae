//! Device and command-buffer interfaces.
//!
//! These are the only GPU entry points the environment map pipeline uses.
//! Resource creation goes through [`GpuDevice`]; recorded work goes through
//! [`CommandBuffer`]. Both are object safe so callers hold
//! `Arc<dyn GpuDevice>` and `&mut dyn CommandBuffer`.

use anyhow::Result;

use crate::constant_set::ConstantSet;
use crate::format::{FormatUsage, PixelFormat};
use crate::image::Image;
use crate::resource::{
    BufferUsage, ComputeState, ComputeStateDesc, CopyRegion, GpuBuffer, ReadBackTexture,
    RenderTarget, Sampler, SamplerDesc, Texture, TextureDesc, TextureInit,
};
use crate::shader::{ConstantSetLayout, GraphicsApi};

pub trait GpuDevice: Send + Sync {
    /// Backend the device drives. Shader loaders pick their output
    /// language from it.
    fn api(&self) -> GraphicsApi;

    fn supports_format(&self, format: PixelFormat, usage: FormatUsage) -> bool;

    fn create_texture(&self, desc: TextureDesc, init: TextureInit<'_>) -> Result<Texture>;

    fn create_sampler(&self, desc: SamplerDesc) -> Result<Sampler>;

    fn create_gpu_buffer(&self, label: &str, usage: BufferUsage, size: usize) -> Result<GpuBuffer>;

    /// Writes `data` at the start of `buffer` through a mapped CPU view.
    fn update_buffer(&self, buffer: &GpuBuffer, data: &[u8]) -> Result<()>;

    fn create_constant_set(&self, label: &str, layout: &ConstantSetLayout) -> Result<ConstantSet>;

    fn create_render_target(
        &self,
        label: &str,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<RenderTarget>;

    /// Compiles a compute pipeline. The description must carry a program.
    fn bake_compute_state(&self, desc: ComputeStateDesc) -> Result<ComputeState>;

    /// Allocates CPU-visible storage matching `target`.
    fn create_readback_texture(&self, label: &str, target: &RenderTarget)
        -> Result<ReadBackTexture>;

    /// True once the GPU finished the copy into `readback`.
    fn is_readable(&self, readback: &ReadBackTexture) -> bool;

    /// Maps a readable readback into a single-mip image.
    fn readback_image(&self, readback: &ReadBackTexture) -> Result<Image>;
}

pub trait CommandBuffer {
    fn begin_compute_pass(&mut self) -> Result<()>;

    fn end_compute_pass(&mut self) -> Result<()>;

    fn bind_compute_state(&mut self, state: &ComputeState) -> Result<()>;

    fn bind_constant_set(&mut self, set: &ConstantSet) -> Result<()>;

    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()>;

    fn copy_texture(&mut self, src: &Texture, dst: &Texture, region: &CopyRegion) -> Result<()>;

    fn read_back_render_target(&mut self, target: &RenderTarget, dst: &ReadBackTexture)
        -> Result<()>;
}
