use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Graphics backends a shader can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GraphicsApi {
    Null,
    OpenGL,
    OpenGLES,
    Vulkan,
    Orbis,
    D3D11,
    D3D12,
    Metal,
}

impl GraphicsApi {
    pub fn name(self) -> &'static str {
        match self {
            GraphicsApi::Null => "Null",
            GraphicsApi::OpenGL => "OpenGL",
            GraphicsApi::OpenGLES => "OpenGLES",
            GraphicsApi::Vulkan => "Vulkan",
            GraphicsApi::Orbis => "Orbis",
            GraphicsApi::D3D11 => "D3D11",
            GraphicsApi::D3D12 => "D3D12",
            GraphicsApi::Metal => "Metal",
        }
    }
}

impl std::str::FromStr for GraphicsApi {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "null" => Ok(GraphicsApi::Null),
            "opengl" | "gl" => Ok(GraphicsApi::OpenGL),
            "opengles" | "gles" => Ok(GraphicsApi::OpenGLES),
            "vulkan" | "vk" => Ok(GraphicsApi::Vulkan),
            "orbis" => Ok(GraphicsApi::Orbis),
            "d3d11" => Ok(GraphicsApi::D3D11),
            "d3d12" => Ok(GraphicsApi::D3D12),
            "metal" => Ok(GraphicsApi::Metal),
            other => Err(format!("unknown graphics api '{other}'")),
        }
    }
}

/// One programmable stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderStage {
    Vertex,
    Geometry,
    Fragment,
    Compute,
}

bitflags! {
    /// Set of stages a constant set or push-constant block is visible to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ShaderStageMask: u32 {
        const VERTEX = 1 << 0;
        const GEOMETRY = 1 << 1;
        const FRAGMENT = 1 << 2;
        const COMPUTE = 1 << 3;
    }
}

impl ShaderStage {
    pub fn mask(self) -> ShaderStageMask {
        match self {
            ShaderStage::Vertex => ShaderStageMask::VERTEX,
            ShaderStage::Geometry => ShaderStageMask::GEOMETRY,
            ShaderStage::Fragment => ShaderStageMask::FRAGMENT,
            ShaderStage::Compute => ShaderStageMask::COMPUTE,
        }
    }

    /// `vert` / `geom` / `frag` / `comp`.
    pub fn long_name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vert",
            ShaderStage::Geometry => "geom",
            ShaderStage::Fragment => "frag",
            ShaderStage::Compute => "comp",
        }
    }

    /// Shader model 5 profile used in HLSL register declarations.
    pub fn hlsl_profile(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vs_5_0",
            ShaderStage::Geometry => "gs_5_0",
            ShaderStage::Fragment => "ps_5_0",
            ShaderStage::Compute => "cs_5_0",
        }
    }
}

impl std::str::FromStr for ShaderStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vertex" | "vert" | "vs" => Ok(ShaderStage::Vertex),
            "geometry" | "geom" | "gs" => Ok(ShaderStage::Geometry),
            "fragment" | "frag" | "ps" | "fs" => Ok(ShaderStage::Fragment),
            "compute" | "comp" | "cs" => Ok(ShaderStage::Compute),
            other => Err(format!("unknown shader stage '{other}'")),
        }
    }
}

/// Primitive topology the geometry stage consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DrawMode {
    #[default]
    Invalid,
    Points,
    Lines,
    Triangles,
}

impl DrawMode {
    /// Vertices per input primitive.
    pub fn vertex_count(self) -> u32 {
        match self {
            DrawMode::Invalid => 0,
            DrawMode::Points => 1,
            DrawMode::Lines => 2,
            DrawMode::Triangles => 3,
        }
    }
}

/// Stage chain of one logical shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StagePipeline {
    #[default]
    Invalid,
    VsPs,
    VsGsPs,
    Cs,
}
