//! Sizes, sample budgets and cache location of an [`EnvironmentMap`](crate::EnvironmentMap).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EnvMapError, EnvMapResult};
use crate::math::mip_count_for;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentMapConfig {
    /// Face size of the intermediate and background cubemaps.
    pub max_face_size: u32,
    /// Face size of the IBL cubemap's first mip.
    pub ibl_face_size: u32,
    pub ibl_mip_count: u32,
    /// Importance samples per texel of every prefiltered IBL mip.
    pub ibl_sample_count: u32,
    /// Slices the IBL prefilter is spread over in progressive mode.
    pub progressive_steps: u32,
    /// Edge of the square compute thread groups.
    pub thread_group_size: u32,
    /// Directory the `.cube.pkim` / `.ibl.pkim` files live in. Empty keeps
    /// them next to the source image.
    pub cache_path: PathBuf,
}

impl Default for EnvironmentMapConfig {
    fn default() -> Self {
        Self {
            max_face_size: 1024,
            ibl_face_size: 512,
            ibl_mip_count: 7,
            ibl_sample_count: 1024,
            progressive_steps: 64,
            thread_group_size: 8,
            cache_path: PathBuf::new(),
        }
    }
}

impl EnvironmentMapConfig {
    /// Reads a JSON config. Missing fields keep their defaults.
    pub fn load(path: &Path) -> EnvMapResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| EnvMapError::config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EnvMapResult<()> {
        if !self.max_face_size.is_power_of_two() || self.max_face_size < 4 {
            return Err(EnvMapError::config(
                "max_face_size must be a power of two of at least 4",
            ));
        }
        if !self.ibl_face_size.is_power_of_two() || self.ibl_face_size > self.max_face_size {
            return Err(EnvMapError::config(
                "ibl_face_size must be a power of two no larger than max_face_size",
            ));
        }
        if self.ibl_mip_count < 2 || self.ibl_mip_count > mip_count_for(self.ibl_face_size) {
            return Err(EnvMapError::config(format!(
                "ibl_mip_count must be in 2..={} for {}x{} faces",
                mip_count_for(self.ibl_face_size),
                self.ibl_face_size,
                self.ibl_face_size
            )));
        }
        if self.progressive_steps == 0 || self.ibl_sample_count == 0 {
            return Err(EnvMapError::config(
                "ibl_sample_count and progressive_steps must be non-zero",
            ));
        }
        if !self.ibl_sample_count.is_multiple_of(self.progressive_steps) {
            return Err(EnvMapError::config(format!(
                "ibl_sample_count ({}) must split evenly into {} progressive steps",
                self.ibl_sample_count, self.progressive_steps
            )));
        }
        if !(1..=16).contains(&self.thread_group_size) {
            return Err(EnvMapError::config("thread_group_size must be in 1..=16"));
        }
        Ok(())
    }

    pub fn with_cache_path(mut self, cache_path: impl Into<PathBuf>) -> Self {
        self.cache_path = cache_path.into();
        self
    }

    /// Mips of the intermediate and background cubemaps.
    pub fn background_mip_count(&self) -> u32 {
        mip_count_for(self.max_face_size)
    }

    /// Intermediate mip whose faces seed IBL mip 0.
    pub fn ibl_source_mip(&self) -> u32 {
        self.max_face_size.ilog2() - self.ibl_face_size.ilog2()
    }
}
