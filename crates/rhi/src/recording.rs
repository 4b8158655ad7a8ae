//! A device that validates and records work instead of executing it.
//!
//! [`RecordingDevice`] hands out real handles and keeps buffer contents on
//! the CPU. [`RecordingCommandBuffer`] checks pass and binding rules as
//! calls arrive and appends a [`Command`] per call, snapshotting the bound
//! buffers at dispatch time, so tools and tests can inspect exactly what a
//! frame would have submitted.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use tracing::debug;

use crate::constant_set::{ConstantBinding, ConstantSet};
use crate::device::{CommandBuffer, GpuDevice};
use crate::error::RhiError;
use crate::format::{FormatUsage, PixelFormat};
use crate::image::{Image, ImageMip};
use crate::resource::{
    BufferUsage, ComputeState, ComputeStateDesc, CopyRegion, GpuBuffer, ReadBackTexture,
    RenderTarget, ResourceId, Sampler, SamplerDesc, Texture, TextureDesc, TextureInit,
    TextureType,
};
use crate::shader::{ConstantSetLayout, GraphicsApi};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct DeviceState {
    fail_labels: Mutex<Vec<String>>,
    unsupported: Mutex<HashSet<PixelFormat>>,
    buffers: Mutex<HashMap<ResourceId, Vec<u8>>>,
    readable: Mutex<HashSet<ResourceId>>,
    created: AtomicUsize,
}

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RecordingDevice {
    api: GraphicsApi,
    state: Arc<DeviceState>,
}

impl RecordingDevice {
    pub fn new(api: GraphicsApi) -> Self {
        Self {
            api,
            state: Arc::default(),
        }
    }

    /// Makes every later creation whose label contains `pattern` fail.
    pub fn fail_on(&self, pattern: impl Into<String>) {
        lock(&self.state.fail_labels).push(pattern.into());
    }

    pub fn clear_failures(&self) {
        lock(&self.state.fail_labels).clear();
    }

    /// Reports `format` as unusable for any purpose.
    pub fn mark_unsupported(&self, format: PixelFormat) {
        lock(&self.state.unsupported).insert(format);
    }

    /// Number of objects created so far.
    pub fn created_objects(&self) -> usize {
        self.state.created.load(Ordering::Relaxed)
    }

    /// Current contents of `buffer`.
    pub fn buffer_contents(&self, buffer: &GpuBuffer) -> Option<Vec<u8>> {
        lock(&self.state.buffers).get(&buffer.id()).cloned()
    }

    pub fn command_buffer(&self) -> RecordingCommandBuffer {
        RecordingCommandBuffer {
            state: Arc::clone(&self.state),
            commands: Vec::new(),
            pass_open: false,
            bound_state: None,
            bound_set: None,
            pending_readbacks: Vec::new(),
        }
    }

    fn check_label(&self, kind: &str, label: &str) -> Result<()> {
        let failing = lock(&self.state.fail_labels)
            .iter()
            .any(|pattern| label.contains(pattern.as_str()));
        if failing {
            return Err(RhiError::creation(format!("{kind} '{label}'")).into());
        }
        self.state.created.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn validate_mips(desc: &TextureDesc, mips: &[ImageMip]) -> Result<()> {
    let expected = (desc.face_count() * desc.mip_count) as usize;
    if mips.len() != expected {
        return Err(RhiError::creation(format!(
            "texture '{}' expects {expected} mips, got {}",
            desc.label,
            mips.len()
        ))
        .into());
    }
    for (index, mip) in mips.iter().enumerate() {
        let level = index as u32 % desc.mip_count;
        if (mip.width, mip.height) != desc.mip_extent(level) {
            return Err(RhiError::creation(format!(
                "texture '{}' mip {index} is {}x{}, expected {:?}",
                desc.label,
                mip.width,
                mip.height,
                desc.mip_extent(level)
            ))
            .into());
        }
        if mip.data.len() != mip.expected_len(desc.format) {
            return Err(RhiError::creation(format!(
                "texture '{}' mip {index} holds {} bytes, expected {}",
                desc.label,
                mip.data.len(),
                mip.expected_len(desc.format)
            ))
            .into());
        }
    }
    Ok(())
}

impl GpuDevice for RecordingDevice {
    fn api(&self) -> GraphicsApi {
        self.api
    }

    fn supports_format(&self, format: PixelFormat, _usage: FormatUsage) -> bool {
        !lock(&self.state.unsupported).contains(&format)
    }

    fn create_texture(&self, desc: TextureDesc, init: TextureInit<'_>) -> Result<Texture> {
        if desc.width == 0 || desc.height == 0 || desc.mip_count == 0 {
            return Err(RhiError::creation(format!("texture '{}' has no texels", desc.label)).into());
        }
        if let TextureInit::Mips(mips) = init {
            validate_mips(&desc, mips)?;
        }
        self.check_label("texture", &desc.label)?;
        Ok(Texture::new(desc))
    }

    fn create_sampler(&self, desc: SamplerDesc) -> Result<Sampler> {
        self.check_label("sampler", &desc.label)?;
        Ok(Sampler::new(desc))
    }

    fn create_gpu_buffer(&self, label: &str, usage: BufferUsage, size: usize) -> Result<GpuBuffer> {
        self.check_label("buffer", label)?;
        let buffer = GpuBuffer::new(label, usage, size);
        lock(&self.state.buffers).insert(buffer.id(), vec![0; size]);
        Ok(buffer)
    }

    fn update_buffer(&self, buffer: &GpuBuffer, data: &[u8]) -> Result<()> {
        if data.len() > buffer.size() {
            return Err(RhiError::command(format!(
                "{} bytes do not fit buffer '{}' ({} bytes)",
                data.len(),
                buffer.label(),
                buffer.size()
            ))
            .into());
        }
        let mut buffers = lock(&self.state.buffers);
        let contents = buffers
            .get_mut(&buffer.id())
            .ok_or_else(|| anyhow::anyhow!("Unknown buffer '{}'", buffer.label()))?;
        contents[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn create_constant_set(&self, label: &str, layout: &ConstantSetLayout) -> Result<ConstantSet> {
        self.check_label("constant set", label)?;
        Ok(ConstantSet::new(label, layout))
    }

    fn create_render_target(
        &self,
        label: &str,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<RenderTarget> {
        let texture = self.create_texture(
            TextureDesc {
                label: label.to_string(),
                ty: TextureType::Texture2D,
                format,
                width,
                height,
                mip_count: 1,
                gamma_corrected: false,
            },
            TextureInit::Zeroed,
        )?;
        Ok(RenderTarget::new(texture))
    }

    fn bake_compute_state(&self, desc: ComputeStateDesc) -> Result<ComputeState> {
        if desc.program.is_none() {
            return Err(RhiError::creation(format!(
                "compute state '{}' has no program",
                desc.label
            ))
            .into());
        }
        self.check_label("compute state", &desc.label)?;
        Ok(ComputeState::new(desc))
    }

    fn create_readback_texture(
        &self,
        label: &str,
        target: &RenderTarget,
    ) -> Result<ReadBackTexture> {
        self.check_label("readback", label)?;
        Ok(ReadBackTexture::new(
            label,
            target.width(),
            target.height(),
            target.format(),
        ))
    }

    fn is_readable(&self, readback: &ReadBackTexture) -> bool {
        lock(&self.state.readable).contains(&readback.id())
    }

    fn readback_image(&self, readback: &ReadBackTexture) -> Result<Image> {
        if !self.is_readable(readback) {
            return Err(RhiError::command(format!("readback '{}' is not ready", readback.label())).into());
        }
        let mip = ImageMip::zeroed(readback.width(), readback.height(), readback.format());
        let (width, height) = (mip.width, mip.height);
        Ok(Image::single(readback.format(), width, height, mip.data))
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// One compute dispatch as the GPU would see it.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRecord {
    pub state: String,
    pub set: String,
    pub groups: [u32; 3],
    /// Contents of every buffer slot, in slot order.
    pub buffers: Vec<Vec<u8>>,
    /// Labels of sampled textures, in slot order.
    pub sampled: Vec<String>,
    /// Labels and sizes of storage textures, in slot order.
    pub storage: Vec<(String, u32, u32)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CopyRecord {
    pub src: String,
    pub src_id: ResourceId,
    pub dst: String,
    pub dst_id: ResourceId,
    pub region: CopyRegion,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginComputePass,
    EndComputePass,
    BindComputeState(String),
    BindConstantSet(String),
    Dispatch(DispatchRecord),
    CopyTexture(CopyRecord),
    ReadBack { target: ResourceId, readback: String },
}

struct BoundSet {
    label: String,
    slots: Vec<ConstantBinding>,
}

pub struct RecordingCommandBuffer {
    state: Arc<DeviceState>,
    commands: Vec<Command>,
    pass_open: bool,
    bound_state: Option<String>,
    bound_set: Option<BoundSet>,
    pending_readbacks: Vec<ResourceId>,
}

impl RecordingCommandBuffer {
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn dispatches(&self) -> impl Iterator<Item = &DispatchRecord> {
        self.commands.iter().filter_map(|c| match c {
            Command::Dispatch(d) => Some(d),
            _ => None,
        })
    }

    pub fn copies(&self) -> impl Iterator<Item = &CopyRecord> {
        self.commands.iter().filter_map(|c| match c {
            Command::CopyTexture(c) => Some(c),
            _ => None,
        })
    }

    pub fn is_pass_open(&self) -> bool {
        self.pass_open
    }

    /// Hands the recorded work to the "GPU": every readback recorded so far
    /// becomes readable. Returns the recorded commands.
    pub fn submit(&mut self) -> Vec<Command> {
        let mut readable = lock(&self.state.readable);
        readable.extend(self.pending_readbacks.drain(..));
        drop(readable);
        self.pass_open = false;
        self.bound_state = None;
        self.bound_set = None;
        std::mem::take(&mut self.commands)
    }

    fn check_copy(texture: &Texture, mip: u32, face: u32, origin: (u32, u32), extent: (u32, u32)) -> Result<()> {
        let desc = texture.desc();
        if mip >= desc.mip_count || face >= desc.face_count() {
            return Err(RhiError::command(format!(
                "copy touches mip {mip} face {face} of '{}' ({} mips, {} faces)",
                desc.label,
                desc.mip_count,
                desc.face_count()
            ))
            .into());
        }
        let (w, h) = desc.mip_extent(mip);
        if origin.0 + extent.0 > w || origin.1 + extent.1 > h {
            return Err(RhiError::command(format!(
                "copy of {extent:?} at {origin:?} overflows mip {mip} of '{}' ({w}x{h})",
                desc.label
            ))
            .into());
        }
        Ok(())
    }
}

impl CommandBuffer for RecordingCommandBuffer {
    fn begin_compute_pass(&mut self) -> Result<()> {
        if self.pass_open {
            self.commands.push(Command::EndComputePass);
        }
        self.pass_open = true;
        self.commands.push(Command::BeginComputePass);
        Ok(())
    }

    fn end_compute_pass(&mut self) -> Result<()> {
        if !self.pass_open {
            return Err(RhiError::command("end_compute_pass without an open pass").into());
        }
        self.pass_open = false;
        self.commands.push(Command::EndComputePass);
        Ok(())
    }

    fn bind_compute_state(&mut self, state: &ComputeState) -> Result<()> {
        if !self.pass_open {
            return Err(RhiError::command(format!(
                "compute state '{}' bound outside a pass",
                state.label()
            ))
            .into());
        }
        self.bound_state = Some(state.label().to_string());
        self.commands
            .push(Command::BindComputeState(state.label().to_string()));
        Ok(())
    }

    fn bind_constant_set(&mut self, set: &ConstantSet) -> Result<()> {
        if set.version() == 0 {
            return Err(RhiError::command(format!(
                "constant set '{}' bound before update_constant_values",
                set.label()
            ))
            .into());
        }
        self.bound_set = Some(BoundSet {
            label: set.label().to_string(),
            slots: set.slots().flatten().cloned().collect(),
        });
        self.commands
            .push(Command::BindConstantSet(set.label().to_string()));
        Ok(())
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        if !self.pass_open {
            return Err(RhiError::command("dispatch outside a compute pass").into());
        }
        let state = self
            .bound_state
            .clone()
            .ok_or_else(|| RhiError::command("dispatch without a compute state"))?;
        let set = self
            .bound_set
            .as_ref()
            .ok_or_else(|| RhiError::command("dispatch without a constant set"))?;
        if x == 0 || y == 0 || z == 0 {
            return Err(RhiError::command(format!("empty dispatch ({x}, {y}, {z})")).into());
        }

        let buffers = lock(&self.state.buffers);
        let mut record = DispatchRecord {
            state,
            set: set.label.clone(),
            groups: [x, y, z],
            buffers: Vec::new(),
            sampled: Vec::new(),
            storage: Vec::new(),
        };
        for slot in &set.slots {
            match slot {
                ConstantBinding::Buffer(buffer) => {
                    record
                        .buffers
                        .push(buffers.get(&buffer.id()).cloned().unwrap_or_default());
                }
                ConstantBinding::SampledTexture { texture, .. } => {
                    record.sampled.push(texture.label().to_string());
                }
                ConstantBinding::Storage(texture) => {
                    record
                        .storage
                        .push((texture.label().to_string(), texture.width(), texture.height()));
                }
            }
        }
        drop(buffers);
        debug!("dispatch {} {:?}", record.state, record.groups);
        self.commands.push(Command::Dispatch(record));
        Ok(())
    }

    fn copy_texture(&mut self, src: &Texture, dst: &Texture, region: &CopyRegion) -> Result<()> {
        if self.pass_open {
            return Err(RhiError::command("copy_texture inside a compute pass").into());
        }
        Self::check_copy(src, region.src_mip, region.src_face, region.src_origin, region.extent)?;
        Self::check_copy(dst, region.dst_mip, region.dst_face, region.dst_origin, region.extent)?;
        self.commands.push(Command::CopyTexture(CopyRecord {
            src: src.label().to_string(),
            src_id: src.id(),
            dst: dst.label().to_string(),
            dst_id: dst.id(),
            region: *region,
        }));
        Ok(())
    }

    fn read_back_render_target(
        &mut self,
        target: &RenderTarget,
        dst: &ReadBackTexture,
    ) -> Result<()> {
        if self.pass_open {
            return Err(RhiError::command("read back inside a compute pass").into());
        }
        if (target.width(), target.height()) != (dst.width(), dst.height())
            || target.format() != dst.format()
        {
            return Err(RhiError::command(format!(
                "readback '{}' does not match its render target",
                dst.label()
            ))
            .into());
        }
        self.pending_readbacks.push(dst.id());
        self.commands.push(Command::ReadBack {
            target: target.id(),
            readback: dst.label().to_string(),
        });
        Ok(())
    }
}
