//! The environment map: source loading, GPU generation and the disk cache.
//!
//! Generation runs in two phases. The first call after a load resamples
//! the source into the intermediate cubemap (mip chain included), seeds
//! the background and IBL cubemaps from it and blurs every background
//! mip. Every call then runs one slice of the IBL prefilter; in
//! progressive mode the sample budget is spread over
//! [`EnvironmentMapConfig::progressive_steps`] calls.
//!
//! Render targets are stored face-major: target `level + face * mips`
//! holds `level` of `face`.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use rhi::{
    AsBytes, BufferUsage, CommandBuffer, ComputeState, ComputeStateDesc, ConstantBinding,
    ConstantSet, ConstantSetLayout, CopyRegion, ErrorAccumulator, Filter, FormatUsage, GpuBuffer,
    GpuDevice, Image, ImageMip, PixelFormat, RenderTarget, ResourceManager, Sampler, SamplerDesc,
    Texture, TextureDesc, TextureInit, TextureType,
};
#[cfg(feature = "write-codec")]
use rhi::{CodecWriteFlags, ImageFrame, ReadBackTexture};

use crate::config::EnvironmentMapConfig;
use crate::error::{EnvMapError, EnvMapResult};
use crate::layouts::{
    cubemap_sampler_layout, kernel_bindings, kernel_layout, CUBEMAP_ROTATION_SLOT,
    CUBEMAP_SAMPLER_SLOT, DATA_SLOT, INPUT_SLOT, OUTPUT_SLOT,
};
use crate::loader::{Kernel, KernelParams, ShaderLoader};
use crate::math::{blur_angle, blur_radius, dispatch_groups, texel_range_from_angle};

const FACE_COUNT: u32 = 6;

// ---------------------------------------------------------------------------
// Constant blocks
// ---------------------------------------------------------------------------

#[repr(C)]
struct FaceInfo {
    face: u32,
    size: u32,
}

unsafe impl AsBytes for FaceInfo {}

#[repr(C)]
struct MipInfo {
    texel_size: [f32; 2],
}

unsafe impl AsBytes for MipInfo {}

#[repr(C)]
struct RenderFaceInfo {
    face: u32,
    mip_level: u32,
    size: u32,
    padding: u32,
}

unsafe impl AsBytes for RenderFaceInfo {}

#[repr(C)]
struct BlurInfo {
    size: u32,
    kernel_size: u32,
    half_angle: f32,
}

unsafe impl AsBytes for BlurInfo {}

#[repr(C)]
struct FilterInfo {
    face: u32,
    roughness: f32,
    size: u32,
    sample_count: u32,
    performed_sample_count: u32,
    total_sample_count: u32,
}

unsafe impl AsBytes for FilterInfo {}

/// std140 `mat2x2<f32>`: two columns padded to 16 bytes.
#[repr(C)]
struct RotationInfo {
    columns: [f32; 8],
}

unsafe impl AsBytes for RotationInfo {}

impl RotationInfo {
    fn from_degrees(degrees: f32) -> Self {
        let (s, c) = degrees.to_radians().sin_cos();
        Self {
            columns: [c, -s, 0.0, 0.0, s, c, 0.0, 0.0],
        }
    }
}

// ---------------------------------------------------------------------------
// Device resources
// ---------------------------------------------------------------------------

/// A destination cubemap with its per-(face, mip) render targets and the
/// constant set renderers sample it through.
struct Cubemap {
    texture: Texture,
    sampler: Sampler,
    set: ConstantSet,
    targets: Vec<RenderTarget>,
    face_size: u32,
    mip_count: u32,
}

impl Cubemap {
    fn target(&self, face: u32, level: u32) -> &RenderTarget {
        &self.targets[(level + face * self.mip_count) as usize]
    }
}

struct KernelState {
    state: ComputeState,
    layout: ConstantSetLayout,
}

/// Source texture of the current asset.
struct Source {
    texture: Texture,
    sampler: Sampler,
    latlong: bool,
}

pub struct EnvironmentMap {
    device: Arc<dyn GpuDevice>,
    config: EnvironmentMapConfig,
    output_format: PixelFormat,

    white_set: ConstantSet,
    rotation_buffer: GpuBuffer,
    intermediate: Cubemap,
    background: Cubemap,
    ibl: Cubemap,
    /// Background faces padded for the blur, indexed like the background
    /// targets by the level they are rendered from.
    faces_for_blur: Vec<RenderTarget>,
    mip_sampler: Sampler,
    blur_face_sampler: Sampler,
    kernels: Vec<KernelState>,

    path: Option<PathBuf>,
    source: Option<Source>,
    load_valid: bool,
    usable: bool,
    must_register: bool,
    progressive: bool,
    counter: u32,

    #[cfg(feature = "write-codec")]
    cube_readbacks: Vec<ReadBackTexture>,
    #[cfg(feature = "write-codec")]
    ibl_readbacks: Vec<ReadBackTexture>,
}

impl EnvironmentMap {
    /// Allocates every resource that does not depend on the source image.
    pub fn init(
        device: Arc<dyn GpuDevice>,
        loader: &dyn ShaderLoader,
        config: EnvironmentMapConfig,
    ) -> EnvMapResult<Self> {
        config.validate()?;

        let output_format = pick_output_format(device.as_ref());
        let mip_count = config.background_mip_count();
        let sampling_layout = cubemap_sampler_layout();

        let rotation_buffer =
            device.create_gpu_buffer("CubemapRotation", BufferUsage::Constant, 32)?;
        device.update_buffer(&rotation_buffer, RotationInfo::from_degrees(0.0).as_bytes())?;

        let white_set = create_white_set(device.as_ref(), &sampling_layout, &rotation_buffer)?;

        let intermediate = create_cubemap(
            device.as_ref(),
            CubemapLabels {
                target: "Environment Map Render Target",
                texture: "Environment Map Texture",
                sampler: "Environment Map Sampler",
                set: "Environment Map Constant Set",
            },
            output_format,
            config.max_face_size,
            mip_count,
            &sampling_layout,
            &rotation_buffer,
        )?;
        let background = create_cubemap(
            device.as_ref(),
            CubemapLabels {
                target: "Blurred Cubemap Render Target",
                texture: "Blurred Texture",
                sampler: "Blurred Sampler",
                set: "Blurred Constant Set",
            },
            output_format,
            config.max_face_size,
            mip_count,
            &sampling_layout,
            &rotation_buffer,
        )?;
        let ibl = create_cubemap(
            device.as_ref(),
            CubemapLabels {
                target: "IBL Render Target",
                texture: "IBL Texture",
                sampler: "IBL Sampler",
                set: "IBL Constant Set",
            },
            output_format,
            config.ibl_face_size,
            config.ibl_mip_count,
            &sampling_layout,
            &rotation_buffer,
        )?;

        let mut faces_for_blur = Vec::with_capacity((FACE_COUNT * mip_count) as usize);
        for _face in 0..FACE_COUNT {
            for level in 0..mip_count {
                let size = (config.max_face_size >> level).max(1);
                let padded = size + 2 * blur_radius(level, mip_count, config.max_face_size);
                faces_for_blur.push(device.create_render_target(
                    "Blurred Face Render Target",
                    output_format,
                    padded,
                    padded,
                )?);
            }
        }

        let mip_sampler =
            device.create_sampler(SamplerDesc::clamped("Compute Mip Sampler", Filter::Linear, 1))?;
        let blur_face_sampler =
            device.create_sampler(SamplerDesc::clamped("Blur Face Sampler", Filter::Nearest, 1))?;

        let params = KernelParams {
            thread_group_size: config.thread_group_size,
            output_format,
        };
        let mut kernels = Vec::with_capacity(Kernel::ALL.len());
        for kernel in Kernel::ALL {
            let program = loader
                .load_compute(kernel, device.api(), params)
                .map_err(|e| EnvMapError::kernel(kernel.entry_point(), format!("{e:#}")))?;
            let mut desc = ComputeStateDesc::new(kernel.state_label());
            desc.bindings = kernel_bindings(kernel, output_format, device.api());
            desc.program = Some(program);
            kernels.push(KernelState {
                state: device.bake_compute_state(desc)?,
                layout: kernel_layout(kernel, output_format),
            });
        }

        info!(
            "environment map ready: {}x{} faces, {} mips, IBL {}x{} ({} mips), {}",
            config.max_face_size,
            config.max_face_size,
            mip_count,
            config.ibl_face_size,
            config.ibl_face_size,
            config.ibl_mip_count,
            output_format
        );

        Ok(Self {
            device,
            config,
            output_format,
            white_set,
            rotation_buffer,
            intermediate,
            background,
            ibl,
            faces_for_blur,
            mip_sampler,
            blur_face_sampler,
            kernels,
            path: None,
            source: None,
            load_valid: false,
            usable: false,
            must_register: false,
            progressive: false,
            counter: 0,
            #[cfg(feature = "write-codec")]
            cube_readbacks: Vec::new(),
            #[cfg(feature = "write-codec")]
            ibl_readbacks: Vec::new(),
        })
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Makes `path` the current asset, from the cache when both cache files
    /// are present and match the configured sizes.
    pub fn load(&mut self, path: &Path, resources: &dyn ResourceManager) -> EnvMapResult<()> {
        if self.path.as_deref() == Some(path) {
            return Ok(());
        }

        self.usable = false;
        self.load_valid = false;
        self.counter = 0;
        self.path = Some(path.to_path_buf());
        #[cfg(feature = "write-codec")]
        self.clear_readbacks();

        if self.try_load_from_cache(resources) {
            self.source = None;
            self.must_register = false;
            self.load_valid = true;
            self.usable = true;
            info!("loaded {} from cache", path.display());
            return Ok(());
        }

        match self.load_source(path, resources) {
            Ok(source) => {
                debug!(
                    "loaded {} ({}x{}, {})",
                    path.display(),
                    source.texture.width(),
                    source.texture.height(),
                    if source.latlong { "latlong" } else { "cubemap" }
                );
                self.source = Some(source);
                self.must_register = true;
                self.load_valid = true;
                Ok(())
            }
            Err(e) => {
                self.path = None;
                self.source = None;
                self.must_register = false;
                Err(e)
            }
        }
    }

    fn load_source(&self, path: &Path, resources: &dyn ResourceManager) -> EnvMapResult<Source> {
        let image = resources
            .load_image(path)
            .map_err(|e| EnvMapError::load(path, format!("{e:#}")))?;
        if image.is_empty() {
            return Err(EnvMapError::load(path, "image is empty"));
        }

        let mut desc = TextureDesc::for_image("Input Texture", &image)
            .ok_or_else(|| EnvMapError::load(path, "image has no frames"))?;
        desc.gamma_corrected = image.gamma_corrected || !image.format.is_float();
        let mips = &image.frames[0].mipmaps;
        let texture = self.device.create_texture(desc, TextureInit::Mips(mips))?;
        let sampler = self.device.create_sampler(SamplerDesc::clamped(
            "Input Sampler",
            Filter::Linear,
            texture.mip_count(),
        ))?;
        Ok(Source {
            latlong: !texture.is_cubemap(),
            texture,
            sampler,
        })
    }

    /// Cache file names of the current asset: `(background, ibl)`.
    fn cache_files(&self) -> Option<(PathBuf, PathBuf)> {
        let path = self.path.as_ref()?;
        let base = if self.config.cache_path.as_os_str().is_empty() {
            path.clone()
        } else {
            // Keep the asset's relative layout under the cache directory.
            let relative: PathBuf = path
                .components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .collect();
            self.config.cache_path.join(relative)
        };
        let with_suffix = |suffix: &str| {
            let mut name = base.clone().into_os_string();
            name.push(suffix);
            PathBuf::from(name)
        };
        Some((with_suffix(".cube.pkim"), with_suffix(".ibl.pkim")))
    }

    /// Any mismatch or load failure is a miss. The current textures are
    /// left untouched unless both cubemaps were rebuilt and bound.
    fn try_load_from_cache(&mut self, resources: &dyn ResourceManager) -> bool {
        let Some((cube_path, ibl_path)) = self.cache_files() else {
            return false;
        };
        if !resources.exists(&cube_path) || !resources.exists(&ibl_path) {
            return false;
        }

        let load = |path: &Path| match resources.load_image(path) {
            Ok(image) => Some(image),
            Err(e) => {
                debug!("cache miss on {}: {e:#}", path.display());
                None
            }
        };
        let (Some(cube), Some(ibl)) = (load(&cube_path), load(&ibl_path)) else {
            return false;
        };
        if !is_cache_image(&cube, self.background.face_size, self.background.mip_count)
            || !is_cache_image(&ibl, self.ibl.face_size, self.ibl.mip_count)
        {
            warn!("ignoring stale cache for {}", cube_path.display());
            return false;
        }

        let textures = self
            .cache_texture("Blurred Texture", &cube)
            .and_then(|bg| Ok((bg, self.cache_texture("IBL Texture", &ibl)?)));
        let (background, ibl) = match textures {
            Ok(textures) => textures,
            Err(e) => {
                warn!("cache for {} not usable: {e:#}", cube_path.display());
                return false;
            }
        };

        let previous_background = std::mem::replace(&mut self.background.texture, background);
        let previous_ibl = std::mem::replace(&mut self.ibl.texture, ibl);
        if let Err(e) = self.bind_output_textures() {
            warn!("cache for {} not bound: {e:#}", cube_path.display());
            self.background.texture = previous_background;
            self.ibl.texture = previous_ibl;
            if let Err(e) = self.bind_output_textures() {
                warn!("could not rebind the previous cubemaps: {e:#}");
            }
            return false;
        }
        true
    }

    fn cache_texture(&self, label: &str, image: &Image) -> anyhow::Result<Texture> {
        let mut desc = TextureDesc::for_image(label, image)
            .ok_or_else(|| anyhow::anyhow!("cache image '{label}' has no frames"))?;
        desc.gamma_corrected = false;
        self.device
            .create_texture(desc, TextureInit::Mips(&image.frames[0].mipmaps))
    }

    fn bind_output_textures(&mut self) -> rhi::RhiResult<()> {
        for cubemap in [&mut self.background, &mut self.ibl] {
            cubemap.set.set_constants(
                CUBEMAP_SAMPLER_SLOT,
                ConstantBinding::sampled(&cubemap.sampler, &cubemap.texture),
            )?;
            cubemap.set.update_constant_values()?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Generation
    // -----------------------------------------------------------------------

    /// Records one generation call: the resample and blur pass on the first
    /// call after a load, then one slice of the IBL prefilter. Records
    /// nothing once every slice has run.
    pub fn generate_cubemap(&mut self, cmd: &mut dyn CommandBuffer) -> EnvMapResult<()> {
        if !self.must_register {
            return if self.load_valid {
                Ok(())
            } else {
                Err(EnvMapError::NoSource)
            };
        }
        let mut acc = ErrorAccumulator::new();

        if self.counter == 0 {
            self.resample_source(cmd, &mut acc)?;
            self.blur_background(cmd, &mut acc)?;
        }
        self.filter_ibl(cmd, &mut acc)?;
        #[cfg(feature = "write-codec")]
        self.schedule_readbacks(cmd, &mut acc)?;

        acc.finish()?;

        self.counter += 1;
        self.usable = true;
        if self.counter >= self.step_count() {
            self.must_register = false;
            debug!("IBL prefilter complete after {} calls", self.counter);
        }
        Ok(())
    }

    /// Drives generation and, once it completes, writes the cache files as
    /// soon as their readbacks land.
    #[cfg(feature = "write-codec")]
    pub fn update_cubemap(
        &mut self,
        cmd: &mut dyn CommandBuffer,
        resources: &dyn ResourceManager,
    ) -> EnvMapResult<()> {
        if self.must_register {
            return self.generate_cubemap(cmd);
        }
        if self.cube_readbacks.is_empty() && self.ibl_readbacks.is_empty() {
            return Ok(());
        }
        let ready = self
            .cube_readbacks
            .iter()
            .chain(&self.ibl_readbacks)
            .all(|rb| self.device.is_readable(rb));
        if !ready {
            return Ok(());
        }
        self.export_cache(resources)
    }

    #[cfg(not(feature = "write-codec"))]
    pub fn update_cubemap(
        &mut self,
        cmd: &mut dyn CommandBuffer,
        _resources: &dyn ResourceManager,
    ) -> EnvMapResult<()> {
        if self.must_register {
            self.generate_cubemap(cmd)?;
        }
        Ok(())
    }

    fn step_count(&self) -> u32 {
        if self.progressive {
            self.config.progressive_steps
        } else {
            1
        }
    }

    fn kernel(&self, kernel: Kernel) -> &KernelState {
        &self.kernels[kernel as usize]
    }

    /// Builds the per-dispatch constant set of `kernel`. Creation failures
    /// abort; binding failures are tracked.
    fn dispatch_set(
        &self,
        kernel: Kernel,
        label: &str,
        constants: &[u8],
        input: ConstantBinding,
        output: &Texture,
        acc: &mut ErrorAccumulator,
    ) -> EnvMapResult<ConstantSet> {
        let layout = &self.kernel(kernel).layout;
        let buffer = self.device.create_gpu_buffer(
            &format!("{label} Buffer"),
            BufferUsage::Constant,
            constants.len(),
        )?;
        acc.track(self.device.update_buffer(&buffer, constants));

        let mut set = self.device.create_constant_set(label, layout)?;
        acc.track(set.set_constants(DATA_SLOT, ConstantBinding::Buffer(buffer)));
        acc.track(set.set_constants(INPUT_SLOT, input));
        acc.track(set.set_constants(OUTPUT_SLOT, ConstantBinding::Storage(output.clone())));
        acc.track(set.update_constant_values());
        Ok(set)
    }

    fn dispatch(
        &self,
        cmd: &mut dyn CommandBuffer,
        acc: &mut ErrorAccumulator,
        kernel: Kernel,
        set: &ConstantSet,
        size: u32,
    ) {
        let groups = dispatch_groups(size, self.config.thread_group_size);
        acc.track(cmd.bind_compute_state(&self.kernel(kernel).state));
        acc.track(cmd.bind_constant_set(set));
        acc.track(cmd.dispatch(groups, groups, 1));
    }

    /// Source into the intermediate chain, then mip 0 of the background and
    /// the IBL seed mip.
    fn resample_source(
        &self,
        cmd: &mut dyn CommandBuffer,
        acc: &mut ErrorAccumulator,
    ) -> EnvMapResult<()> {
        let source = self.source.as_ref().ok_or(EnvMapError::NoSource)?;
        let (kernel, label) = if source.latlong {
            (Kernel::CubemapFromLatLong, "LatLong Constant Set")
        } else {
            (Kernel::CubemapFromCube, "Cube Constant Set")
        };
        let max = self.config.max_face_size;
        let mips = self.intermediate.mip_count;

        acc.track(cmd.begin_compute_pass());
        for face in 0..FACE_COUNT {
            let set = self.dispatch_set(
                kernel,
                label,
                FaceInfo { face, size: max }.as_bytes(),
                ConstantBinding::sampled(&source.sampler, &source.texture),
                self.intermediate.target(face, 0).texture(),
                acc,
            )?;
            self.dispatch(cmd, acc, kernel, &set, max);
        }

        for level in 1..mips {
            let size = (max >> level).max(1);
            let texel = 1.0 / size as f32;
            acc.track(cmd.end_compute_pass());
            acc.track(cmd.begin_compute_pass());
            for face in 0..FACE_COUNT {
                let set = self.dispatch_set(
                    Kernel::MipMap,
                    "MipMap Constant Set",
                    MipInfo {
                        texel_size: [texel, texel],
                    }
                    .as_bytes(),
                    ConstantBinding::sampled(
                        &self.mip_sampler,
                        self.intermediate.target(face, level - 1).texture(),
                    ),
                    self.intermediate.target(face, level).texture(),
                    acc,
                )?;
                self.dispatch(cmd, acc, Kernel::MipMap, &set, size);
            }
        }
        acc.track(cmd.end_compute_pass());

        for face in 0..FACE_COUNT {
            for level in 0..mips {
                let size = (max >> level).max(1);
                acc.track(cmd.copy_texture(
                    self.intermediate.target(face, level).texture(),
                    &self.intermediate.texture,
                    &CopyRegion::face(size, level, face),
                ));
            }
        }

        let seed = self.config.ibl_source_mip();
        for face in 0..FACE_COUNT {
            acc.track(cmd.copy_texture(
                self.intermediate.target(face, 0).texture(),
                &self.background.texture,
                &CopyRegion::face(max, 0, face),
            ));
            acc.track(cmd.copy_texture(
                self.intermediate.target(face, seed).texture(),
                &self.ibl.texture,
                &CopyRegion::face(self.ibl.face_size, 0, face),
            ));
        }
        Ok(())
    }

    /// Each background mip is the previous one rendered with a margin and
    /// blurred with a cone that widens down the chain.
    fn blur_background(
        &self,
        cmd: &mut dyn CommandBuffer,
        acc: &mut ErrorAccumulator,
    ) -> EnvMapResult<()> {
        let max = self.config.max_face_size;
        let mips = self.background.mip_count;

        for level in 1..mips {
            let size = (max >> level).max(1);
            let source_size = size * 2;
            let angle = blur_angle(level - 1, mips);
            let radius = texel_range_from_angle(angle, source_size);

            acc.track(cmd.begin_compute_pass());
            for face in 0..FACE_COUNT {
                let padded = &self.faces_for_blur[(level - 1 + face * mips) as usize];
                let set = self.dispatch_set(
                    Kernel::RenderFace,
                    "Render Cubemap Face Constant Set",
                    RenderFaceInfo {
                        face,
                        mip_level: level,
                        size: source_size,
                        padding: radius,
                    }
                    .as_bytes(),
                    ConstantBinding::sampled(&self.background.sampler, &self.background.texture),
                    padded.texture(),
                    acc,
                )?;
                self.dispatch(cmd, acc, Kernel::RenderFace, &set, source_size + 2 * radius);
            }

            acc.track(cmd.end_compute_pass());
            acc.track(cmd.begin_compute_pass());
            for face in 0..FACE_COUNT {
                let padded = &self.faces_for_blur[(level - 1 + face * mips) as usize];
                let set = self.dispatch_set(
                    Kernel::BlurFace,
                    "Blur Cubemap Constant Set",
                    BlurInfo {
                        size,
                        kernel_size: radius,
                        half_angle: angle,
                    }
                    .as_bytes(),
                    ConstantBinding::sampled(&self.blur_face_sampler, padded.texture()),
                    self.background.target(face, level).texture(),
                    acc,
                )?;
                self.dispatch(cmd, acc, Kernel::BlurFace, &set, size);
            }
            acc.track(cmd.end_compute_pass());

            for face in 0..FACE_COUNT {
                acc.track(cmd.copy_texture(
                    self.background.target(face, level).texture(),
                    &self.background.texture,
                    &CopyRegion::face(size, level, face),
                ));
            }
        }
        Ok(())
    }

    /// One slice of the GGX prefilter over every IBL mip but the first.
    fn filter_ibl(&self, cmd: &mut dyn CommandBuffer, acc: &mut ErrorAccumulator) -> EnvMapResult<()> {
        let total = self.config.ibl_sample_count;
        let sample_count = total / self.step_count();
        let mips = self.ibl.mip_count;

        acc.track(cmd.begin_compute_pass());
        for level in 1..mips {
            let size = (self.ibl.face_size >> level).max(1);
            let roughness = level as f32 / (mips - 1) as f32;
            for face in 0..FACE_COUNT {
                let set = self.dispatch_set(
                    Kernel::FilterCubemap,
                    "Filter Cubemap Constant Set",
                    FilterInfo {
                        face,
                        roughness,
                        size,
                        sample_count,
                        performed_sample_count: sample_count * self.counter,
                        total_sample_count: total,
                    }
                    .as_bytes(),
                    ConstantBinding::sampled(&self.ibl.sampler, &self.intermediate.texture),
                    self.ibl.target(face, level).texture(),
                    acc,
                )?;
                self.dispatch(cmd, acc, Kernel::FilterCubemap, &set, size);
            }
        }
        acc.track(cmd.end_compute_pass());

        for level in 1..mips {
            let size = (self.ibl.face_size >> level).max(1);
            for face in 0..FACE_COUNT {
                acc.track(cmd.copy_texture(
                    self.ibl.target(face, level).texture(),
                    &self.ibl.texture,
                    &CopyRegion::face(size, level, face),
                ));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Cache export
    // -----------------------------------------------------------------------

    #[cfg(feature = "write-codec")]
    fn clear_readbacks(&mut self) {
        self.cube_readbacks.clear();
        self.ibl_readbacks.clear();
    }

    /// Queues a readback of every face and mip of both outputs, face-major.
    /// Mip 0 of each comes from the intermediate chain.
    #[cfg(feature = "write-codec")]
    fn schedule_readbacks(
        &mut self,
        cmd: &mut dyn CommandBuffer,
        acc: &mut ErrorAccumulator,
    ) -> EnvMapResult<()> {
        self.clear_readbacks();
        let seed = self.config.ibl_source_mip();

        for face in 0..FACE_COUNT {
            for level in 0..self.background.mip_count {
                let target = if level == 0 {
                    self.intermediate.target(face, 0)
                } else {
                    self.background.target(face, level)
                };
                let readback = self.device.create_readback_texture(
                    &format!("Cubemap_LOD_Face{face}_Level{level}"),
                    target,
                )?;
                acc.track(cmd.read_back_render_target(target, &readback));
                self.cube_readbacks.push(readback);
            }
        }
        for face in 0..FACE_COUNT {
            for level in 0..self.ibl.mip_count {
                let target = if level == 0 {
                    self.intermediate.target(face, seed)
                } else {
                    self.ibl.target(face, level)
                };
                let readback = self.device.create_readback_texture(
                    &format!("CubemapIBL_LOD_Face{face}_Level{level}"),
                    target,
                )?;
                acc.track(cmd.read_back_render_target(target, &readback));
                self.ibl_readbacks.push(readback);
            }
        }
        Ok(())
    }

    #[cfg(feature = "write-codec")]
    fn export_cache(&mut self, resources: &dyn ResourceManager) -> EnvMapResult<()> {
        let cube_readbacks = std::mem::take(&mut self.cube_readbacks);
        let ibl_readbacks = std::mem::take(&mut self.ibl_readbacks);
        let (cube_path, ibl_path) = self
            .cache_files()
            .ok_or_else(|| EnvMapError::export("no asset loaded"))?;

        let cube = self.assemble_cubemap(&cube_readbacks)?;
        let ibl = self.assemble_cubemap(&ibl_readbacks)?;

        let mut written = Vec::new();
        for (path, image) in [(&cube_path, &cube), (&ibl_path, &ibl)] {
            if let Err(e) = resources.save_image(path, image, CodecWriteFlags::WRITE_TEXELS) {
                written.push(path);
                for path in written {
                    if resources.exists(path) {
                        if let Err(e) = resources.delete(path) {
                            warn!("could not remove {}: {e:#}", path.display());
                        }
                    }
                }
                return Err(EnvMapError::export(format!("{}: {e:#}", path.display())));
            }
            written.push(path);
        }
        info!(
            "cached {} and {}",
            cube_path.display(),
            ibl_path.display()
        );
        Ok(())
    }

    /// Cubemap image from face-major single-mip readbacks.
    #[cfg(feature = "write-codec")]
    fn assemble_cubemap(&self, readbacks: &[ReadBackTexture]) -> EnvMapResult<Image> {
        let format = readbacks
            .first()
            .map(ReadBackTexture::format)
            .ok_or_else(|| EnvMapError::export("nothing was read back"))?;
        let mut mipmaps = Vec::with_capacity(readbacks.len());
        for readback in readbacks {
            let image = self
                .device
                .readback_image(readback)
                .map_err(|e| EnvMapError::export(format!("{e:#}")))?;
            let mip = image
                .frames
                .into_iter()
                .next()
                .and_then(|frame| frame.mipmaps.into_iter().next())
                .ok_or_else(|| EnvMapError::export(format!("readback '{}' is empty", readback.label())))?;
            mipmaps.push(mip);
        }
        Ok(Image {
            format,
            cubemap: true,
            gamma_corrected: false,
            frames: vec![ImageFrame { mipmaps }],
        })
    }

    // -----------------------------------------------------------------------
    // Accessors and settings
    // -----------------------------------------------------------------------

    fn ready(&self) -> bool {
        self.load_valid && self.usable
    }

    pub fn ibl_cubemap_constant_set(&self) -> &ConstantSet {
        if self.ready() {
            &self.ibl.set
        } else {
            &self.white_set
        }
    }

    pub fn background_cubemap_constant_set(&self) -> &ConstantSet {
        if self.ready() {
            &self.background.set
        } else {
            &self.white_set
        }
    }

    pub fn intermediate_cubemap_constant_set(&self) -> &ConstantSet {
        if self.ready() {
            &self.intermediate.set
        } else {
            &self.white_set
        }
    }

    /// 1x1 white cubemap bound whenever the real ones are not ready.
    pub fn white_constant_set(&self) -> &ConstantSet {
        &self.white_set
    }

    pub fn background_mip_count(&self) -> u32 {
        self.background.mip_count
    }

    pub fn ibl_mip_count(&self) -> u32 {
        self.ibl.mip_count
    }

    pub fn is_valid(&self) -> bool {
        self.load_valid
    }

    pub fn is_usable(&self) -> bool {
        self.usable
    }

    /// True while generation calls are still owed for the current asset.
    pub fn needs_compute(&self) -> bool {
        self.must_register
    }

    /// Generation calls made since the last load.
    pub fn progressive_step(&self) -> u32 {
        self.counter
    }

    pub fn output_format(&self) -> PixelFormat {
        self.output_format
    }

    pub fn config(&self) -> &EnvironmentMapConfig {
        &self.config
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Yaw of every cubemap set, in degrees.
    pub fn set_rotation(&self, degrees: f32) -> EnvMapResult<()> {
        self.device
            .update_buffer(&self.rotation_buffer, RotationInfo::from_degrees(degrees).as_bytes())?;
        Ok(())
    }

    pub fn rotation_buffer(&self) -> &GpuBuffer {
        &self.rotation_buffer
    }

    /// Forgets the current asset.
    pub fn reset(&mut self) {
        self.source = None;
        self.path = None;
        self.load_valid = false;
        self.usable = false;
        self.must_register = false;
        self.counter = 0;
        #[cfg(feature = "write-codec")]
        self.clear_readbacks();
    }

    /// Selects one-shot or sliced IBL prefiltering and restarts generation,
    /// even when the mode is unchanged. A cached asset has no source to
    /// regenerate from and only records the mode.
    pub fn set_progressive_processing(&mut self, progressive: bool) {
        self.progressive = progressive;
        if self.source.is_some() {
            self.counter = 0;
            self.usable = false;
            self.must_register = true;
            #[cfg(feature = "write-codec")]
            self.clear_readbacks();
        }
    }

    pub fn set_cache_path(&mut self, cache_path: impl Into<PathBuf>) {
        self.config.cache_path = cache_path.into();
    }
}

// ---------------------------------------------------------------------------
// Construction helpers
// ---------------------------------------------------------------------------

fn pick_output_format(device: &dyn GpuDevice) -> PixelFormat {
    let preferred = PixelFormat::Float16Rgba;
    if device.supports_format(preferred, FormatUsage::SAMPLING | FormatUsage::RENDER_TARGET) {
        preferred
    } else {
        warn!("The pixel format {preferred} is not supported by your GPU.");
        PixelFormat::Unorm8Rgba
    }
}

fn create_white_set(
    device: &dyn GpuDevice,
    layout: &ConstantSetLayout,
    rotation: &GpuBuffer,
) -> anyhow::Result<ConstantSet> {
    let white = vec![
        ImageMip {
            width: 1,
            height: 1,
            data: vec![0xFF; 4],
        };
        FACE_COUNT as usize
    ];
    let texture = device.create_texture(
        TextureDesc {
            label: "Dummy Environment Map Texture".into(),
            ty: TextureType::Cubemap,
            format: PixelFormat::Unorm8Rgba,
            width: 1,
            height: 1,
            mip_count: 1,
            gamma_corrected: false,
        },
        TextureInit::Mips(&white),
    )?;
    let sampler = device.create_sampler(SamplerDesc::clamped(
        "Dummy Environment Map Sampler",
        Filter::Linear,
        1,
    ))?;
    let mut set = device.create_constant_set("Dummy Environment Map Constant Set", layout)?;
    set.set_constants(CUBEMAP_SAMPLER_SLOT, ConstantBinding::sampled(&sampler, &texture))?;
    set.set_constants(CUBEMAP_ROTATION_SLOT, ConstantBinding::Buffer(rotation.clone()))?;
    set.update_constant_values()?;
    Ok(set)
}

struct CubemapLabels {
    target: &'static str,
    texture: &'static str,
    sampler: &'static str,
    set: &'static str,
}

fn create_cubemap(
    device: &dyn GpuDevice,
    labels: CubemapLabels,
    format: PixelFormat,
    face_size: u32,
    mip_count: u32,
    layout: &ConstantSetLayout,
    rotation: &GpuBuffer,
) -> anyhow::Result<Cubemap> {
    let mut targets = Vec::with_capacity((FACE_COUNT * mip_count) as usize);
    for _face in 0..FACE_COUNT {
        for level in 0..mip_count {
            let size = (face_size >> level).max(1);
            targets.push(device.create_render_target(labels.target, format, size, size)?);
        }
    }

    let texture = device.create_texture(
        TextureDesc {
            label: labels.texture.into(),
            ty: TextureType::Cubemap,
            format,
            width: face_size,
            height: face_size,
            mip_count,
            gamma_corrected: false,
        },
        TextureInit::Zeroed,
    )?;
    let sampler = device.create_sampler(SamplerDesc::clamped(labels.sampler, Filter::Linear, mip_count))?;
    let mut set = device.create_constant_set(labels.set, layout)?;
    set.set_constants(CUBEMAP_SAMPLER_SLOT, ConstantBinding::sampled(&sampler, &texture))?;
    set.set_constants(CUBEMAP_ROTATION_SLOT, ConstantBinding::Buffer(rotation.clone()))?;
    set.update_constant_values()?;

    Ok(Cubemap {
        texture,
        sampler,
        set,
        targets,
        face_size,
        mip_count,
    })
}

/// One frame holding every face and mip of a `face_size` cubemap.
fn is_cache_image(image: &Image, face_size: u32, mip_count: u32) -> bool {
    image.cubemap
        && image.frame_count() == 1
        && image.mipmap_count() == (FACE_COUNT * mip_count) as usize
        && image.frames[0]
            .mipmaps
            .first()
            .is_some_and(|mip| mip.width == face_size && mip.height == face_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_is_a_padded_column_major_matrix() {
        let rotation = RotationInfo::from_degrees(90.0);
        let [c0, c1, p0, p1, c2, c3, p2, p3] = rotation.columns;
        assert!(c0.abs() < 1e-6 && c3.abs() < 1e-6);
        assert!((c1 + 1.0).abs() < 1e-6);
        assert!((c2 - 1.0).abs() < 1e-6);
        assert_eq!([p0, p1, p2, p3], [0.0; 4]);
        assert_eq!(rotation.as_bytes().len(), 32);
    }

    #[test]
    fn constant_blocks_match_their_layouts() {
        use crate::layouts::kernel_layout;
        use rhi::shader::ConstantDesc;

        let sizes = [
            (Kernel::CubemapFromLatLong, std::mem::size_of::<FaceInfo>()),
            (Kernel::MipMap, std::mem::size_of::<MipInfo>()),
            (Kernel::RenderFace, std::mem::size_of::<RenderFaceInfo>()),
            (Kernel::BlurFace, std::mem::size_of::<BlurInfo>()),
            (Kernel::FilterCubemap, std::mem::size_of::<FilterInfo>()),
        ];
        for (kernel, size) in sizes {
            match &kernel_layout(kernel, PixelFormat::Float16Rgba).constants[DATA_SLOT] {
                ConstantDesc::ConstantBuffer(cb) => assert_eq!(cb.byte_size() as usize, size, "{kernel:?}"),
                other => panic!("unexpected slot {other:?}"),
            }
        }
    }

    #[test]
    fn cache_images_must_match_the_chain() {
        let face = |size: u32| ImageMip::zeroed(size, size, PixelFormat::Float16Rgba);
        let mut image = Image {
            format: PixelFormat::Float16Rgba,
            cubemap: true,
            gamma_corrected: false,
            frames: vec![rhi::ImageFrame {
                mipmaps: (0..6).flat_map(|_| [face(4), face(2), face(1)]).collect(),
            }],
        };
        assert!(is_cache_image(&image, 4, 3));
        assert!(!is_cache_image(&image, 8, 3));
        assert!(!is_cache_image(&image, 4, 2));
        image.cubemap = false;
        assert!(!is_cache_image(&image, 4, 3));
    }
}
