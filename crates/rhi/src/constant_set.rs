//! Constant sets: resources bound together under one layout.

use std::sync::Arc;

use crate::error::{RhiError, RhiResult};
use crate::resource::{GpuBuffer, ResourceId, Sampler, Texture};
use crate::shader::{ConstantDesc, ConstantSetLayout};

/// Resource placed in one slot of a constant set.
#[derive(Debug, Clone)]
pub enum ConstantBinding {
    /// Backs a constant buffer or a raw buffer slot.
    Buffer(GpuBuffer),
    /// Backs a sampler slot.
    SampledTexture { sampler: Sampler, texture: Texture },
    /// Backs a texture-storage slot.
    Storage(Texture),
}

impl ConstantBinding {
    pub fn sampled(sampler: &Sampler, texture: &Texture) -> Self {
        Self::SampledTexture {
            sampler: sampler.clone(),
            texture: texture.clone(),
        }
    }

    fn matches(&self, desc: &ConstantDesc) -> bool {
        matches!(
            (self, desc),
            (ConstantBinding::Buffer(_), ConstantDesc::ConstantBuffer(_))
                | (ConstantBinding::Buffer(_), ConstantDesc::RawBuffer { .. })
                | (
                    ConstantBinding::SampledTexture { .. },
                    ConstantDesc::Sampler { .. }
                )
                | (ConstantBinding::Storage(_), ConstantDesc::TextureStorage { .. })
        )
    }
}

#[derive(Debug, Clone)]
pub struct ConstantSet {
    id: ResourceId,
    label: Arc<str>,
    layout: Arc<ConstantSetLayout>,
    slots: Vec<Option<ConstantBinding>>,
    version: u64,
}

impl ConstantSet {
    pub fn new(label: &str, layout: &ConstantSetLayout) -> Self {
        Self {
            id: ResourceId::next(),
            label: Arc::from(label),
            layout: Arc::new(layout.clone()),
            slots: vec![None; layout.constants.len()],
            version: 0,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn layout(&self) -> &ConstantSetLayout {
        &self.layout
    }

    /// Number of successful [`ConstantSet::update_constant_values`] calls.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn slot(&self, index: usize) -> Option<&ConstantBinding> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn slots(&self) -> impl Iterator<Item = Option<&ConstantBinding>> {
        self.slots.iter().map(Option::as_ref)
    }

    pub fn set_constants(&mut self, slot: usize, binding: ConstantBinding) -> RhiResult<()> {
        let count = self.slots.len();
        let entry = self.slots.get_mut(slot).ok_or_else(|| {
            RhiError::binding(format!(
                "slot {slot} out of range for '{}' ({count} slots)",
                self.label
            ))
        })?;
        *entry = Some(binding);
        Ok(())
    }

    /// Commits the slots. Every slot must be filled with a resource of the
    /// kind its layout entry declares.
    pub fn update_constant_values(&mut self) -> RhiResult<()> {
        for (index, (slot, desc)) in self.slots.iter().zip(&self.layout.constants).enumerate() {
            match slot {
                None => {
                    return Err(RhiError::binding(format!(
                        "slot {index} ('{}') of '{}' is empty",
                        desc.name(),
                        self.label
                    )))
                }
                Some(binding) if !binding.matches(desc) => {
                    return Err(RhiError::binding(format!(
                        "slot {index} ('{}') of '{}' holds the wrong resource kind",
                        desc.name(),
                        self.label
                    )))
                }
                Some(_) => {}
            }
        }
        self.version += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::PixelFormat;
    use crate::resource::{BufferUsage, Filter, SamplerDesc, TextureDesc, TextureType};
    use crate::shader::{ConstantBufferDesc, SamplerType, ShaderStageMask, VarType};

    fn layout() -> ConstantSetLayout {
        let mut layout = ConstantSetLayout::new(ShaderStageMask::FRAGMENT);
        layout
            .add_sampler("EnvironmentMapSampler", SamplerType::Cube)
            .add_constant_buffer(
                ConstantBufferDesc::new("EnvironmentMapInfo")
                    .with_constant("Rotation", VarType::Float2x2),
            );
        layout
    }

    fn texture() -> Texture {
        Texture::new(TextureDesc {
            label: "t".into(),
            ty: TextureType::Cubemap,
            format: PixelFormat::Unorm8Rgba,
            width: 1,
            height: 1,
            mip_count: 1,
            gamma_corrected: false,
        })
    }

    #[test]
    fn complete_sets_update() {
        let mut set = ConstantSet::new("set", &layout());
        let sampler = Sampler::new(SamplerDesc::clamped("s", Filter::Linear, 1));
        set.set_constants(0, ConstantBinding::sampled(&sampler, &texture()))
            .unwrap();
        set.set_constants(1, ConstantBinding::Buffer(GpuBuffer::new("b", BufferUsage::Constant, 32)))
            .unwrap();
        set.update_constant_values().unwrap();
        assert_eq!(set.version(), 1);
    }

    #[test]
    fn missing_or_mismatched_slots_fail() {
        let mut set = ConstantSet::new("set", &layout());
        assert!(set.update_constant_values().is_err());
        set.set_constants(0, ConstantBinding::Storage(texture())).unwrap();
        set.set_constants(1, ConstantBinding::Buffer(GpuBuffer::new("b", BufferUsage::Constant, 32)))
            .unwrap();
        let err = set.update_constant_values().unwrap_err();
        assert!(err.to_string().contains("wrong resource kind"));
        assert!(set.set_constants(2, ConstantBinding::Storage(texture())).is_err());
    }
}
