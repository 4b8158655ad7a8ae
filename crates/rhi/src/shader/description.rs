//! Backend-agnostic shader I/O description.
//!
//! A [`ShaderDescription`] lists everything a stage consumes and produces:
//! vertex attributes, interpolants, fragment outputs, constant-set layouts,
//! push constants and groupshared memory. The same description is reused
//! for every stage of one logical shader; each generator only reads the
//! parts relevant to the stage it emits.

use serde::{Deserialize, Serialize};

use super::stage::{DrawMode, ShaderStageMask, StagePipeline};
use super::types::{Interpolation, VarType};
use crate::format::PixelFormat;

// ---------------------------------------------------------------------------
// Constant buffers
// ---------------------------------------------------------------------------

/// One member of a constant buffer or push-constant block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantVarDesc {
    pub name: String,
    pub ty: VarType,
    /// `0` for a plain member, the element count for an array.
    #[serde(default)]
    pub array_size: u32,
    /// Byte offset under std140 rules.
    #[serde(default)]
    pub offset_in_buffer: u32,
}

/// Uniform block layout.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConstantBufferDesc {
    pub name: String,
    pub constants: Vec<ConstantVarDesc>,
    #[serde(default)]
    pub per_block_binding: u32,
}

fn align_up(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

impl ConstantBufferDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_constant(mut self, name: impl Into<String>, ty: VarType) -> Self {
        self.add_constant(name, ty, 0);
        self
    }

    pub fn with_array(mut self, name: impl Into<String>, ty: VarType, count: u32) -> Self {
        self.add_constant(name, ty, count);
        self
    }

    /// Appends a member at its std140 offset.
    pub fn add_constant(&mut self, name: impl Into<String>, ty: VarType, array_size: u32) {
        let end = self.byte_size();
        let (alignment, _) = Self::std140_footprint(ty, array_size);
        self.constants.push(ConstantVarDesc {
            name: name.into(),
            ty,
            array_size,
            offset_in_buffer: align_up(end, alignment),
        });
    }

    fn std140_footprint(ty: VarType, array_size: u32) -> (u32, u32) {
        if array_size == 0 {
            (ty.std140_alignment(), ty.std140_size())
        } else {
            let stride = align_up(ty.std140_size(), 16);
            (16, stride * array_size)
        }
    }

    /// End offset of the last member.
    pub fn byte_size(&self) -> u32 {
        self.constants
            .last()
            .map(|c| c.offset_in_buffer + Self::std140_footprint(c.ty, c.array_size).1)
            .unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Constant sets
// ---------------------------------------------------------------------------

/// Kind of texture a sampler declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SamplerType {
    #[default]
    Single,
    Cube,
    Multi,
}

/// One entry of a constant set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstantDesc {
    ConstantBuffer(ConstantBufferDesc),
    RawBuffer {
        name: String,
        #[serde(default)]
        read_only: bool,
        #[serde(default)]
        per_block_binding: u32,
    },
    TextureStorage {
        name: String,
        #[serde(default)]
        read_only: bool,
        #[serde(default)]
        format: Option<PixelFormat>,
        #[serde(default)]
        per_block_binding: u32,
    },
    Sampler {
        name: String,
        #[serde(default)]
        ty: SamplerType,
        #[serde(default)]
        per_block_binding: u32,
        #[serde(default)]
        per_stage_sampler_binding: u32,
    },
}

impl ConstantDesc {
    pub fn name(&self) -> &str {
        match self {
            ConstantDesc::ConstantBuffer(cb) => &cb.name,
            ConstantDesc::RawBuffer { name, .. }
            | ConstantDesc::TextureStorage { name, .. }
            | ConstantDesc::Sampler { name, .. } => name,
        }
    }

    pub fn per_block_binding(&self) -> u32 {
        match self {
            ConstantDesc::ConstantBuffer(cb) => cb.per_block_binding,
            ConstantDesc::RawBuffer {
                per_block_binding, ..
            }
            | ConstantDesc::TextureStorage {
                per_block_binding, ..
            }
            | ConstantDesc::Sampler {
                per_block_binding, ..
            } => *per_block_binding,
        }
    }

    pub(crate) fn set_per_block_binding(&mut self, binding: u32) {
        match self {
            ConstantDesc::ConstantBuffer(cb) => cb.per_block_binding = binding,
            ConstantDesc::RawBuffer {
                per_block_binding, ..
            }
            | ConstantDesc::TextureStorage {
                per_block_binding, ..
            }
            | ConstantDesc::Sampler {
                per_block_binding, ..
            } => *per_block_binding = binding,
        }
    }
}

/// Ordered group of resources bound together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantSetLayout {
    pub stages: ShaderStageMask,
    #[serde(default)]
    pub per_set_binding: u32,
    #[serde(default)]
    pub constants: Vec<ConstantDesc>,
}

impl ConstantSetLayout {
    pub fn new(stages: ShaderStageMask) -> Self {
        Self {
            stages,
            per_set_binding: 0,
            constants: Vec::new(),
        }
    }

    pub fn add_constant_buffer(&mut self, desc: ConstantBufferDesc) -> &mut Self {
        self.constants.push(ConstantDesc::ConstantBuffer(desc));
        self
    }

    pub fn add_raw_buffer(&mut self, name: impl Into<String>, read_only: bool) -> &mut Self {
        self.constants.push(ConstantDesc::RawBuffer {
            name: name.into(),
            read_only,
            per_block_binding: 0,
        });
        self
    }

    pub fn add_texture_storage(
        &mut self,
        name: impl Into<String>,
        read_only: bool,
        format: Option<PixelFormat>,
    ) -> &mut Self {
        self.constants.push(ConstantDesc::TextureStorage {
            name: name.into(),
            read_only,
            format,
            per_block_binding: 0,
        });
        self
    }

    pub fn add_sampler(&mut self, name: impl Into<String>, ty: SamplerType) -> &mut Self {
        self.constants.push(ConstantDesc::Sampler {
            name: name.into(),
            ty,
            per_block_binding: 0,
            per_stage_sampler_binding: 0,
        });
        self
    }

    pub fn has_raw_or_storage(&self) -> bool {
        self.constants.iter().any(|c| {
            matches!(
                c,
                ConstantDesc::RawBuffer { .. } | ConstantDesc::TextureStorage { .. }
            )
        })
    }
}

/// Small uniform block pushed inline with the draw or dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushConstantBuffer {
    pub name: String,
    pub stages: ShaderStageMask,
    #[serde(default)]
    pub constants: Vec<ConstantVarDesc>,
    #[serde(default)]
    pub per_block_binding: u32,
    /// Offset of the block inside the stage push-constant range (Vulkan).
    #[serde(default)]
    pub byte_offset: u32,
}

impl PushConstantBuffer {
    pub fn new(name: impl Into<String>, stages: ShaderStageMask) -> Self {
        Self {
            name: name.into(),
            stages,
            constants: Vec::new(),
            per_block_binding: 0,
            byte_offset: 0,
        }
    }

    pub fn with_constant(mut self, name: impl Into<String>, ty: VarType) -> Self {
        self.constants.push(ConstantVarDesc {
            name: name.into(),
            ty,
            array_size: 0,
            offset_in_buffer: 0,
        });
        self
    }

    /// Tightly packed size of every member.
    pub fn tight_size(&self) -> u32 {
        self.constants
            .iter()
            .map(|c| c.ty.byte_size() * c.array_size.max(1))
            .sum()
    }
}

/// Compute-only threadgroup memory array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupsharedVariable {
    pub name: String,
    pub ty: VarType,
    pub array_size: u32,
}

/// User `#define` attached to the description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderDefine {
    pub name: String,
    #[serde(default)]
    pub value: String,
    /// Stages the define is visible to.
    #[serde(default = "ShaderStageMask::all")]
    pub stages: ShaderStageMask,
}

impl ShaderDefine {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            stages: ShaderStageMask::all(),
        }
    }

    pub fn for_stages(mut self, stages: ShaderStageMask) -> Self {
        self.stages = stages;
        self
    }
}

// ---------------------------------------------------------------------------
// Stage I/O
// ---------------------------------------------------------------------------

/// Vertex input attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexAttributeDesc {
    pub name: String,
    pub ty: VarType,
    /// Shader location. Matrices take `row_count` consecutive locations.
    pub location: u32,
}

/// Interpolant written by the vertex or geometry stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexOutput {
    pub name: String,
    pub ty: VarType,
    #[serde(default)]
    pub interpolation: Interpolation,
    /// Index of the input this output is copied from, when it is a plain
    /// forward of a vertex attribute (or of a vertex output, for the
    /// geometry stage).
    #[serde(default)]
    pub input_related: Option<u32>,
}

impl VertexOutput {
    pub fn new(name: impl Into<String>, ty: VarType) -> Self {
        Self {
            name: name.into(),
            ty,
            interpolation: Interpolation::Smooth,
            input_related: None,
        }
    }

    pub fn related_to(mut self, input: u32) -> Self {
        self.input_related = Some(input);
        self
    }
}

/// Geometry stage output block.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeometryOutput {
    #[serde(default)]
    pub outputs: Vec<VertexOutput>,
    #[serde(default)]
    pub max_vertices: u32,
    #[serde(default)]
    pub primitive_type: DrawMode,
}

/// Render target written by the fragment stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentOutput {
    pub name: String,
    pub format: PixelFormat,
}

/// All resources visible to the stages.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ShaderBindings {
    #[serde(default)]
    pub constant_sets: Vec<ConstantSetLayout>,
    #[serde(default)]
    pub push_constants: Vec<PushConstantBuffer>,
    #[serde(default)]
    pub input_attributes: Vec<VertexAttributeDesc>,
    #[serde(default)]
    pub defines: Vec<ShaderDefine>,
    #[serde(default)]
    pub groupshared: Vec<GroupsharedVariable>,
}

impl ShaderBindings {
    pub fn has_raw_or_storage(&self) -> bool {
        self.constant_sets.iter().any(ConstantSetLayout::has_raw_or_storage)
    }
}

/// Complete I/O description of one logical shader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderDescription {
    pub bindings: ShaderBindings,
    pub vertex_output: Vec<VertexOutput>,
    pub geometry_output: GeometryOutput,
    pub fragment_output: Vec<FragmentOutput>,
    pub pipeline: StagePipeline,
    pub draw_mode: DrawMode,
    pub dispatch_size: [u32; 3],
}

impl Default for ShaderDescription {
    fn default() -> Self {
        Self {
            bindings: ShaderBindings::default(),
            vertex_output: Vec::new(),
            geometry_output: GeometryOutput::default(),
            fragment_output: Vec::new(),
            pipeline: StagePipeline::Invalid,
            draw_mode: DrawMode::Invalid,
            dispatch_size: [1, 1, 1],
        }
    }
}

impl ShaderDescription {
    /// Compute-only description with the given thread-group size.
    pub fn compute(dispatch_size: [u32; 3]) -> Self {
        Self {
            pipeline: StagePipeline::Cs,
            dispatch_size,
            ..Default::default()
        }
    }

    /// A description with neither pipeline nor draw mode produces no shader.
    pub fn is_empty(&self) -> bool {
        self.pipeline == StagePipeline::Invalid && self.draw_mode == DrawMode::Invalid
    }
}
