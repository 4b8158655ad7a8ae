//! GPU resource handles.
//!
//! Handles are cheap to clone and compare by [`ResourceId`]. Devices own the
//! backing memory; a handle only carries the immutable description it was
//! created from.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::format::PixelFormat;
use crate::image::Image;
use crate::shader::{ShaderBindings, ShaderProgram};

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a GPU object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    pub fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Textures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureType {
    Texture2D,
    Cubemap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: String,
    pub ty: TextureType,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub mip_count: u32,
    pub gamma_corrected: bool,
}

impl TextureDesc {
    pub fn face_count(&self) -> u32 {
        match self.ty {
            TextureType::Texture2D => 1,
            TextureType::Cubemap => 6,
        }
    }

    /// Extent of `level`, clamped to 1x1.
    pub fn mip_extent(&self, level: u32) -> (u32, u32) {
        (
            (self.width >> level.min(31)).max(1),
            (self.height >> level.min(31)).max(1),
        )
    }

    /// Describes a texture holding `image`: one entry per face, mip count
    /// taken from the first frame.
    pub fn for_image(label: impl Into<String>, image: &Image) -> Option<Self> {
        let frame = image.frames.first()?;
        let base = frame.mipmaps.first()?;
        let faces = if image.cubemap { 6 } else { 1 };
        Some(Self {
            label: label.into(),
            ty: if image.cubemap {
                TextureType::Cubemap
            } else {
                TextureType::Texture2D
            },
            format: image.format,
            width: base.width,
            height: base.height,
            mip_count: (frame.mipmaps.len() as u32 / faces).max(1),
            gamma_corrected: image.gamma_corrected,
        })
    }
}

/// Initial contents of a new texture.
pub enum TextureInit<'a> {
    /// Every mip of every face cleared to zero (black).
    Zeroed,
    /// Face-major texel data: entry `face * mip_count + level`.
    Mips(&'a [crate::image::ImageMip]),
}

#[derive(Debug, Clone)]
pub struct Texture {
    id: ResourceId,
    desc: Arc<TextureDesc>,
}

impl Texture {
    pub fn new(desc: TextureDesc) -> Self {
        Self {
            id: ResourceId::next(),
            desc: Arc::new(desc),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn label(&self) -> &str {
        &self.desc.label
    }

    pub fn format(&self) -> PixelFormat {
        self.desc.format
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn mip_count(&self) -> u32 {
        self.desc.mip_count
    }

    pub fn is_cubemap(&self) -> bool {
        self.desc.ty == TextureType::Cubemap
    }
}

impl PartialEq for Texture {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

// ---------------------------------------------------------------------------
// Samplers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapMode {
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerDesc {
    pub label: String,
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub mip_filter: Filter,
    pub wrap: WrapMode,
    pub mip_count: u32,
    pub anisotropic: bool,
}

impl SamplerDesc {
    /// Clamped sampler using `filter` for magnification, minification and
    /// mip selection.
    pub fn clamped(label: impl Into<String>, filter: Filter, mip_count: u32) -> Self {
        Self {
            label: label.into(),
            mag_filter: filter,
            min_filter: filter,
            mip_filter: filter,
            wrap: WrapMode::ClampToEdge,
            mip_count,
            anisotropic: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Sampler {
    id: ResourceId,
    desc: Arc<SamplerDesc>,
}

impl Sampler {
    pub fn new(desc: SamplerDesc) -> Self {
        Self {
            id: ResourceId::next(),
            desc: Arc::new(desc),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn desc(&self) -> &SamplerDesc {
        &self.desc
    }
}

// ---------------------------------------------------------------------------
// Buffers and render targets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Constant,
    Raw,
    Vertex,
    Index,
}

#[derive(Debug, Clone)]
pub struct GpuBuffer {
    id: ResourceId,
    label: Arc<str>,
    usage: BufferUsage,
    size: usize,
}

impl GpuBuffer {
    pub fn new(label: &str, usage: BufferUsage, size: usize) -> Self {
        Self {
            id: ResourceId::next(),
            label: Arc::from(label),
            usage,
            size,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// A single-mip 2D texture that compute passes write to.
#[derive(Debug, Clone)]
pub struct RenderTarget {
    id: ResourceId,
    texture: Texture,
}

impl RenderTarget {
    pub fn new(texture: Texture) -> Self {
        Self {
            id: ResourceId::next(),
            texture,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn width(&self) -> u32 {
        self.texture.width()
    }

    pub fn height(&self) -> u32 {
        self.texture.height()
    }

    pub fn format(&self) -> PixelFormat {
        self.texture.format()
    }
}

/// CPU-visible copy destination for a render target.
#[derive(Debug, Clone)]
pub struct ReadBackTexture {
    id: ResourceId,
    label: Arc<str>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl ReadBackTexture {
    pub fn new(label: &str, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            id: ResourceId::next(),
            label: Arc::from(label),
            width,
            height,
            format,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }
}

// ---------------------------------------------------------------------------
// Compute states
// ---------------------------------------------------------------------------

/// Everything needed to bake a compute pipeline.
#[derive(Debug, Clone)]
pub struct ComputeStateDesc {
    pub label: String,
    pub bindings: ShaderBindings,
    pub program: Option<ShaderProgram>,
}

impl ComputeStateDesc {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            bindings: ShaderBindings::default(),
            program: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComputeState {
    id: ResourceId,
    desc: Arc<ComputeStateDesc>,
}

impl ComputeState {
    pub fn new(desc: ComputeStateDesc) -> Self {
        Self {
            id: ResourceId::next(),
            desc: Arc::new(desc),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.desc.label
    }

    pub fn desc(&self) -> &ComputeStateDesc {
        &self.desc
    }
}

/// Region of a texture-to-texture copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyRegion {
    pub src_mip: u32,
    pub dst_mip: u32,
    pub src_face: u32,
    pub dst_face: u32,
    pub src_origin: (u32, u32),
    pub dst_origin: (u32, u32),
    pub extent: (u32, u32),
}

impl CopyRegion {
    /// Whole-surface copy of a `size` x `size` face from mip 0 of the source
    /// into (`dst_mip`, `dst_face`).
    pub fn face(size: u32, dst_mip: u32, dst_face: u32) -> Self {
        Self {
            src_mip: 0,
            dst_mip,
            src_face: 0,
            dst_face,
            src_origin: (0, 0),
            dst_origin: (0, 0),
            extent: (size, size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = ResourceId::next();
        let b = ResourceId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn mip_extent_clamps_to_one() {
        let desc = TextureDesc {
            label: "t".into(),
            ty: TextureType::Cubemap,
            format: PixelFormat::Float16Rgba,
            width: 8,
            height: 8,
            mip_count: 4,
            gamma_corrected: false,
        };
        assert_eq!(desc.mip_extent(2), (2, 2));
        assert_eq!(desc.mip_extent(5), (1, 1));
        assert_eq!(desc.face_count(), 6);
    }
}
