#![allow(clippy::too_many_arguments)]

//! Minimal rendering hardware interface for offline GPU tooling.
//!
//! This crate holds the vocabulary shared by the shader generators
//! and the environment map pipeline: shader descriptions, pixel formats,
//! resource handles, and the device traits work is recorded through.
//!
//! # Overview
//!
//! - [`ShaderDescription`] describes a shader's bindings and stage IO
//!   independently of any backend.
//! - [`GpuDevice`] creates resources; [`CommandBuffer`] records passes,
//!   dispatches, copies and readbacks.
//! - [`RecordingDevice`] implements both traits on the CPU, validating and
//!   logging every call.
//! - [`ConstantSet`] groups resources under a [`ConstantSetLayout`].
//! - [`Image`] is the in-memory texel container; [`pkim`] is its on-disk
//!   codec and [`DiskResourceManager`] loads and saves by path.
//! - [`ErrorAccumulator`] lets a batch of GPU calls run to completion and
//!   report the first failure.
//! - [`AsBytes`] views `#[repr(C)]` constant blocks as bytes.

pub mod accumulate;
pub mod bytes;
pub mod constant_set;
pub mod device;
pub mod error;
pub mod format;
pub mod image;
pub mod io;
pub mod pkim;
pub mod recording;
pub mod resource;
pub mod shader;

// Re-export primary types at crate root for convenience.
pub use crate::image::{Image, ImageFrame, ImageMip};
pub use accumulate::ErrorAccumulator;
pub use bytes::AsBytes;
pub use constant_set::{ConstantBinding, ConstantSet};
pub use device::{CommandBuffer, GpuDevice};
pub use error::{RhiError, RhiResult};
pub use format::{FormatUsage, PixelFormat};
pub use io::{DiskResourceManager, ResourceManager};
pub use pkim::CodecWriteFlags;
pub use recording::{Command, CopyRecord, DispatchRecord, RecordingCommandBuffer, RecordingDevice};
pub use resource::{
    BufferUsage, ComputeState, ComputeStateDesc, CopyRegion, Filter, GpuBuffer, ReadBackTexture,
    RenderTarget, ResourceId, Sampler, SamplerDesc, Texture, TextureDesc, TextureInit,
    TextureType, WrapMode,
};
pub use shader::{
    ConstantSetLayout, DrawMode, GraphicsApi, ShaderDescription, ShaderLanguage, ShaderProgram,
    ShaderStage, ShaderStageMask, StagePipeline, VarType,
};
