//! Scalar, vector and matrix variable types shared by every backend.

use serde::{Deserialize, Serialize};

/// Type of a shader variable (attribute, interpolant, constant member).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VarType {
    Float,
    Float2,
    Float3,
    Float4,
    Int,
    Int2,
    Int3,
    Int4,
    Uint,
    Uint2,
    Uint3,
    Uint4,
    Bool,
    Float2x2,
    Float3x3,
    Float4x4,
}

/// Scalar family of a [`VarType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseType {
    Float,
    Int,
    Uint,
    Bool,
}

impl VarType {
    /// GLSL spelling (`vec3`, `uvec2`, `mat4`, ...).
    pub fn glsl_name(self) -> &'static str {
        match self {
            VarType::Float => "float",
            VarType::Float2 => "vec2",
            VarType::Float3 => "vec3",
            VarType::Float4 => "vec4",
            VarType::Int => "int",
            VarType::Int2 => "ivec2",
            VarType::Int3 => "ivec3",
            VarType::Int4 => "ivec4",
            VarType::Uint => "uint",
            VarType::Uint2 => "uvec2",
            VarType::Uint3 => "uvec3",
            VarType::Uint4 => "uvec4",
            VarType::Bool => "bool",
            VarType::Float2x2 => "mat2",
            VarType::Float3x3 => "mat3",
            VarType::Float4x4 => "mat4",
        }
    }

    /// HLSL / Metal spelling (`float3`, `uint2`, `float4x4`, ...).
    pub fn hlsl_name(self) -> &'static str {
        match self {
            VarType::Float => "float",
            VarType::Float2 => "float2",
            VarType::Float3 => "float3",
            VarType::Float4 => "float4",
            VarType::Int => "int",
            VarType::Int2 => "int2",
            VarType::Int3 => "int3",
            VarType::Int4 => "int4",
            VarType::Uint => "uint",
            VarType::Uint2 => "uint2",
            VarType::Uint3 => "uint3",
            VarType::Uint4 => "uint4",
            VarType::Bool => "bool",
            VarType::Float2x2 => "float2x2",
            VarType::Float3x3 => "float3x3",
            VarType::Float4x4 => "float4x4",
        }
    }

    pub fn base_type(self) -> BaseType {
        match self {
            VarType::Float
            | VarType::Float2
            | VarType::Float3
            | VarType::Float4
            | VarType::Float2x2
            | VarType::Float3x3
            | VarType::Float4x4 => BaseType::Float,
            VarType::Int | VarType::Int2 | VarType::Int3 | VarType::Int4 => BaseType::Int,
            VarType::Uint | VarType::Uint2 | VarType::Uint3 | VarType::Uint4 => BaseType::Uint,
            VarType::Bool => BaseType::Bool,
        }
    }

    pub fn is_float(self) -> bool {
        self.base_type() == BaseType::Float
    }

    /// Number of attribute rows the type occupies (matrices take one
    /// location per row).
    pub fn row_count(self) -> u32 {
        match self {
            VarType::Float2x2 => 2,
            VarType::Float3x3 => 3,
            VarType::Float4x4 => 4,
            _ => 1,
        }
    }

    /// Type of one row of a matrix; identity for non-matrix types.
    pub fn row_type(self) -> VarType {
        match self {
            VarType::Float2x2 => VarType::Float2,
            VarType::Float3x3 => VarType::Float3,
            VarType::Float4x4 => VarType::Float4,
            other => other,
        }
    }

    /// Total scalar count.
    pub fn component_count(self) -> u32 {
        match self {
            VarType::Float | VarType::Int | VarType::Uint | VarType::Bool => 1,
            VarType::Float2 | VarType::Int2 | VarType::Uint2 => 2,
            VarType::Float3 | VarType::Int3 | VarType::Uint3 => 3,
            VarType::Float4 | VarType::Int4 | VarType::Uint4 => 4,
            VarType::Float2x2 => 4,
            VarType::Float3x3 => 9,
            VarType::Float4x4 => 16,
        }
    }

    /// Tightly packed byte size (4 bytes per scalar).
    pub fn byte_size(self) -> u32 {
        self.component_count() * 4
    }

    /// Base alignment under std140 rules.
    pub fn std140_alignment(self) -> u32 {
        match self {
            VarType::Float | VarType::Int | VarType::Uint | VarType::Bool => 4,
            VarType::Float2 | VarType::Int2 | VarType::Uint2 => 8,
            _ => 16,
        }
    }

    /// Size under std140 rules. Matrix columns are padded to a vec4.
    pub fn std140_size(self) -> u32 {
        match self {
            VarType::Float2x2 => 32,
            VarType::Float3x3 => 48,
            VarType::Float4x4 => 64,
            other => other.byte_size(),
        }
    }
}

/// Interpolation qualifier of an interpolant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Interpolation {
    #[default]
    Smooth,
    Flat,
    NoPerspective,
}

impl Interpolation {
    pub fn glsl_qualifier(self) -> &'static str {
        match self {
            Interpolation::Smooth => "",
            Interpolation::Flat => "flat",
            Interpolation::NoPerspective => "noperspective",
        }
    }

    pub fn hlsl_qualifier(self) -> &'static str {
        match self {
            Interpolation::Smooth => "",
            Interpolation::Flat => "nointerpolation",
            Interpolation::NoPerspective => "noperspective",
        }
    }
}
