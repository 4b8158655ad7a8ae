//! Shader I/O description shared by the generators and the devices.
//!
//! - [`ShaderDescription`] is the per-shader IR.
//! - [`binding`] assigns backend binding slots to its constant sets and
//!   push constants.
//! - [`ShaderProgram`] is backend source ready to be baked into a
//!   compute state.

pub mod binding;
pub mod description;
pub mod stage;
pub mod types;

pub use description::*;
pub use stage::{DrawMode, GraphicsApi, ShaderStage, ShaderStageMask, StagePipeline};
pub use types::{BaseType, Interpolation, VarType};

use serde::{Deserialize, Serialize};

/// Source language of a loaded program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShaderLanguage {
    Wgsl,
    Glsl,
    GlslEs,
    Msl,
    Hlsl,
}

/// Backend source for one entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderProgram {
    pub language: ShaderLanguage,
    pub entry_point: String,
    pub source: String,
}
