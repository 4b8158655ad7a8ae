#![allow(clippy::too_many_arguments)]

//! Cross-backend shader generation and compilation.
//!
//! One backend-agnostic [`ShaderDescription`](rhi::ShaderDescription) and a
//! shader body are turned into GLSL, GLSL ES, Vulkan GLSL, HLSL or Metal
//! source, preprocessed, and handed to the backend's offline compiler.
//!
//! # Overview
//!
//! - [`Generator`] picks the [`ShaderGenerator`] for a
//!   [`GraphicsApi`](rhi::GraphicsApi) and sequences its sections with
//!   [`generate_shader`].
//! - [`ShaderOptions`] selects particle permutations; [`shader_name`] names
//!   the per-stage shader files and [`particle`] emits their glue.
//! - [`defines_from_description`] lists the defines a stage is
//!   preprocessed with.
//! - [`preprocess`] expands macros, conditionals and includes.
//! - [`ShaderCompilation`] runs generation and compilation of one job under
//!   lock files shared with concurrent builds.

pub mod compile;
pub mod defines;
pub mod error;
pub mod generator;
pub mod options;
pub mod particle;
pub mod preprocess;

// Re-export primary types at crate root for convenience.
pub use compile::{
    CompilationSettings, CompilationStep, CompilationTarget, ExecStatus, ShaderCompilation,
};
pub use defines::defines_from_description;
pub use error::{ShaderGenError, ShaderGenResult};
pub use generator::{generate_shader, Backend, Generator, ShaderGenerator};
pub use options::{shader_name, stage_pipeline, ShaderOptions};
pub use particle::ParticleLibrary;
pub use preprocess::{find_shader_dependencies, Preprocessed, Preprocessor};
