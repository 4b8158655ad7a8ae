//! Pixel formats and the per-format capability query.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::shader::VarType;

/// Texel layout of a texture, render target or fragment output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Unorm8Rgba,
    Unorm8Bgra,
    Float16R,
    Float16Rgba,
    Float32R,
    Float32Rgba,
    Depth16,
    Depth24Stencil8,
    Depth32,
}

bitflags! {
    /// Ways a format can be used on a device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FormatUsage: u32 {
        const SAMPLING = 1 << 0;
        const RENDER_TARGET = 1 << 1;
        const STORAGE = 1 << 2;
    }
}

impl PixelFormat {
    pub fn bytes_per_texel(self) -> usize {
        match self {
            PixelFormat::Unorm8Rgba | PixelFormat::Unorm8Bgra => 4,
            PixelFormat::Float16R | PixelFormat::Depth16 => 2,
            PixelFormat::Float16Rgba => 8,
            PixelFormat::Float32R | PixelFormat::Depth24Stencil8 | PixelFormat::Depth32 => 4,
            PixelFormat::Float32Rgba => 16,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            PixelFormat::Float16R
                | PixelFormat::Float16Rgba
                | PixelFormat::Float32R
                | PixelFormat::Float32Rgba
        )
    }

    pub fn is_depth(self) -> bool {
        matches!(
            self,
            PixelFormat::Depth16 | PixelFormat::Depth24Stencil8 | PixelFormat::Depth32
        )
    }

    /// GLSL image layout qualifier, when the format can back a storage image.
    pub fn glsl_image_layout(self) -> Option<&'static str> {
        match self {
            PixelFormat::Unorm8Rgba => Some("rgba8"),
            PixelFormat::Float16R => Some("r16f"),
            PixelFormat::Float16Rgba => Some("rgba16f"),
            PixelFormat::Float32R => Some("r32f"),
            PixelFormat::Float32Rgba => Some("rgba32f"),
            _ => None,
        }
    }

    /// Shader-side type written by a fragment output of this format, and
    /// whether the output is the depth value.
    pub fn to_var_type(self) -> (VarType, bool) {
        match self {
            PixelFormat::Depth16 | PixelFormat::Depth24Stencil8 | PixelFormat::Depth32 => {
                (VarType::Float, true)
            }
            PixelFormat::Float16R | PixelFormat::Float32R => (VarType::Float, false),
            _ => (VarType::Float4, false),
        }
    }

    /// Stable numeric code used by the `.pkim` codec.
    pub fn code(self) -> u32 {
        match self {
            PixelFormat::Unorm8Rgba => 1,
            PixelFormat::Unorm8Bgra => 2,
            PixelFormat::Float16R => 3,
            PixelFormat::Float16Rgba => 4,
            PixelFormat::Float32R => 5,
            PixelFormat::Float32Rgba => 6,
            PixelFormat::Depth16 => 7,
            PixelFormat::Depth24Stencil8 => 8,
            PixelFormat::Depth32 => 9,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => PixelFormat::Unorm8Rgba,
            2 => PixelFormat::Unorm8Bgra,
            3 => PixelFormat::Float16R,
            4 => PixelFormat::Float16Rgba,
            5 => PixelFormat::Float32R,
            6 => PixelFormat::Float32Rgba,
            7 => PixelFormat::Depth16,
            8 => PixelFormat::Depth24Stencil8,
            9 => PixelFormat::Depth32,
            _ => return None,
        })
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for format in [
            PixelFormat::Unorm8Rgba,
            PixelFormat::Float16Rgba,
            PixelFormat::Float32Rgba,
            PixelFormat::Depth32,
        ] {
            assert_eq!(PixelFormat::from_code(format.code()), Some(format));
        }
        assert_eq!(PixelFormat::from_code(0), None);
    }

    #[test]
    fn depth_formats_map_to_depth_output() {
        assert_eq!(PixelFormat::Depth24Stencil8.to_var_type(), (VarType::Float, true));
        assert_eq!(PixelFormat::Float16Rgba.to_var_type(), (VarType::Float4, false));
        assert_eq!(PixelFormat::Float16Rgba.glsl_image_layout(), Some("rgba16f"));
        assert_eq!(PixelFormat::Float16Rgba.bytes_per_texel(), 8);
    }
}
