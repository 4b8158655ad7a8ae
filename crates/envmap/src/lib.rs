#![allow(clippy::too_many_arguments)]

//! GPU environment-map processing for image based lighting.
//!
//! A latlong or cubemap image is turned into three cubemaps on the GPU:
//! an intermediate resample with its full mip chain, a background cubemap
//! whose mips are progressively blurred for display, and a prefiltered
//! IBL cubemap (GGX importance sampling, one roughness per mip). Results
//! can be written to and restored from a `.pkim` disk cache.
//!
//! # Overview
//!
//! - [`EnvironmentMap`] owns the device resources and drives generation
//!   through a [`CommandBuffer`](rhi::CommandBuffer), optionally spread
//!   over several calls.
//! - [`EnvironmentMapConfig`] holds face sizes, sample budgets and the
//!   cache location.
//! - [`WgslKernelLoader`] translates the embedded WGSL kernels for the
//!   device's backend; any [`ShaderLoader`] can stand in for it.
//! - [`math`] holds the blur footprint heuristic.

pub mod config;
pub mod error;
pub mod layouts;
pub mod loader;
pub mod math;
pub mod pipeline;

// Re-export primary types at crate root for convenience.
pub use config::EnvironmentMapConfig;
pub use error::{EnvMapError, EnvMapResult};
pub use loader::{Kernel, KernelParams, ShaderLoader, WgslKernelLoader};
pub use math::{blur_angle, texel_range_from_angle};
pub use pipeline::EnvironmentMap;
