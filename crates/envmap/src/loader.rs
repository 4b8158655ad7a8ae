//! Compute kernels and their per-backend translation.
//!
//! Kernels are written once in WGSL (`shaders/*.wgsl`) and translated with
//! naga for the device's backend:
//!
//! | backend          | output          |
//! |------------------|-----------------|
//! | OpenGL, Vulkan   | GLSL 4.60       |
//! | OpenGL ES        | GLSL ES 3.10    |
//! | Metal            | MSL 2.0         |
//! | Null, D3D11/12   | validated WGSL  |
//!
//! Every kernel declares its constant set as group 0 with the bindings
//! `0` constant buffer, `1` input texture, `2` input sampler, `3` output
//! storage texture. The source carries two tokens filled in before
//! parsing: `TG_SIZE` (thread-group edge) and `OUTPUT_FORMAT` (WGSL texel
//! format of the output storage texture).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use anyhow::{anyhow, Context as _, Result};
use once_cell::sync::Lazy;
use tracing::debug;

use rhi::{GraphicsApi, PixelFormat, ShaderLanguage, ShaderProgram};

const COMMON_SOURCE: &str = include_str!("../shaders/common.wgsl");

/// One compute kernel of the environment map pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kernel {
    CubemapFromLatLong,
    CubemapFromCube,
    MipMap,
    FilterCubemap,
    RenderFace,
    BlurFace,
}

impl Kernel {
    pub const ALL: [Kernel; 6] = [
        Kernel::CubemapFromLatLong,
        Kernel::CubemapFromCube,
        Kernel::MipMap,
        Kernel::FilterCubemap,
        Kernel::RenderFace,
        Kernel::BlurFace,
    ];

    pub fn entry_point(self) -> &'static str {
        match self {
            Kernel::CubemapFromLatLong => "cubemap_from_latlong",
            Kernel::CubemapFromCube => "cubemap_from_cube",
            Kernel::MipMap => "mipmap",
            Kernel::FilterCubemap => "filter_cubemap",
            Kernel::RenderFace => "render_face",
            Kernel::BlurFace => "blur_face",
        }
    }

    /// Label of the compute state baked from this kernel.
    pub fn state_label(self) -> &'static str {
        match self {
            Kernel::CubemapFromLatLong => "Compute LatLong Compute State",
            Kernel::CubemapFromCube => "Cube Compute State",
            Kernel::MipMap => "MipMap Compute State",
            Kernel::FilterCubemap => "Filter Compute State",
            Kernel::RenderFace => "Render Cubemap Compute State",
            Kernel::BlurFace => "Blur Cubemap Compute State",
        }
    }

    fn source(self) -> &'static str {
        match self {
            Kernel::CubemapFromLatLong => include_str!("../shaders/cubemap_from_latlong.wgsl"),
            Kernel::CubemapFromCube => include_str!("../shaders/cubemap_from_cube.wgsl"),
            Kernel::MipMap => include_str!("../shaders/mipmap.wgsl"),
            Kernel::FilterCubemap => include_str!("../shaders/filter_cubemap.wgsl"),
            Kernel::RenderFace => include_str!("../shaders/render_face.wgsl"),
            Kernel::BlurFace => include_str!("../shaders/blur_face.wgsl"),
        }
    }
}

/// Values baked into a kernel's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelParams {
    pub thread_group_size: u32,
    pub output_format: PixelFormat,
}

/// Supplies backend programs for the environment map kernels.
pub trait ShaderLoader: Send + Sync {
    fn load_compute(&self, kernel: Kernel, api: GraphicsApi, params: KernelParams) -> Result<ShaderProgram>;
}

/// [`ShaderLoader`] over the embedded WGSL kernels.
///
/// Translations are cached for the lifetime of the process, keyed by
/// kernel, backend and parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct WgslKernelLoader;

type ProgramKey = (Kernel, GraphicsApi, KernelParams);

static PROGRAMS: Lazy<Mutex<HashMap<ProgramKey, ShaderProgram>>> = Lazy::new(Default::default);

impl ShaderLoader for WgslKernelLoader {
    fn load_compute(&self, kernel: Kernel, api: GraphicsApi, params: KernelParams) -> Result<ShaderProgram> {
        let key = (kernel, api, params);
        if let Some(program) = PROGRAMS.lock().unwrap_or_else(PoisonError::into_inner).get(&key) {
            return Ok(program.clone());
        }

        let source = kernel_source(kernel, params)?;
        let program = translate(kernel, api, source)
            .with_context(|| format!("kernel '{}' for {}", kernel.entry_point(), api.name()))?;
        debug!("translated {} for {}", kernel.entry_point(), api.name());

        PROGRAMS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, program.clone());
        Ok(program)
    }
}

/// WGSL texel format of an output storage texture.
pub fn storage_texel_format(format: PixelFormat) -> Result<&'static str> {
    match format {
        PixelFormat::Float16Rgba => Ok("rgba16float"),
        PixelFormat::Float32Rgba => Ok("rgba32float"),
        PixelFormat::Unorm8Rgba => Ok("rgba8unorm"),
        PixelFormat::Float32R => Ok("r32float"),
        other => Err(anyhow!("{other:?} cannot back a storage texture")),
    }
}

/// Complete WGSL of `kernel`: shared helpers followed by the kernel, with
/// its tokens filled in.
pub fn kernel_source(kernel: Kernel, params: KernelParams) -> Result<String> {
    let format = storage_texel_format(params.output_format)?;
    let body = kernel
        .source()
        .replace("OUTPUT_FORMAT", format)
        .replace("TG_SIZE", &params.thread_group_size.to_string());
    Ok(format!("{COMMON_SOURCE}\n{body}"))
}

/// Parses and validates WGSL.
pub fn parse_and_validate(source: &str) -> Result<(naga::Module, naga::valid::ModuleInfo)> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| anyhow!("Failed to parse WGSL: {}", e.emit_to_string(source)))?;
    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| anyhow!("WGSL validation failed: {e}"))?;
    Ok((module, info))
}

fn translate(kernel: Kernel, api: GraphicsApi, source: String) -> Result<ShaderProgram> {
    let (module, info) = parse_and_validate(&source)?;
    match api {
        GraphicsApi::OpenGL | GraphicsApi::Vulkan => write_glsl(
            &module,
            &info,
            kernel,
            naga::back::glsl::Version::Desktop(460),
            ShaderLanguage::Glsl,
        ),
        GraphicsApi::OpenGLES => write_glsl(
            &module,
            &info,
            kernel,
            naga::back::glsl::Version::Embedded {
                version: 310,
                is_webgl: false,
            },
            ShaderLanguage::GlslEs,
        ),
        GraphicsApi::Metal => write_msl(&module, &info, kernel),
        GraphicsApi::Null | GraphicsApi::D3D11 | GraphicsApi::D3D12 => Ok(ShaderProgram {
            language: ShaderLanguage::Wgsl,
            entry_point: kernel.entry_point().to_string(),
            source,
        }),
        GraphicsApi::Orbis => Err(anyhow!("No kernel translation for {}", api.name())),
    }
}

// ---------------------------------------------------------------------------
// GLSL
// ---------------------------------------------------------------------------

fn write_glsl(
    module: &naga::Module,
    info: &naga::valid::ModuleInfo,
    kernel: Kernel,
    version: naga::back::glsl::Version,
    language: ShaderLanguage,
) -> Result<ShaderProgram> {
    let options = naga::back::glsl::Options {
        version,
        writer_flags: naga::back::glsl::WriterFlags::empty(),
        binding_map: Default::default(),
        zero_initialize_workgroup_memory: true,
    };
    let pipeline_options = naga::back::glsl::PipelineOptions {
        shader_stage: naga::ShaderStage::Compute,
        entry_point: kernel.entry_point().to_string(),
        multiview: None,
    };

    let mut source = String::new();
    let mut writer = naga::back::glsl::Writer::new(
        &mut source,
        module,
        info,
        &options,
        &pipeline_options,
        naga::proc::BoundsCheckPolicies::default(),
    )
    .map_err(|e| anyhow!("GLSL writer init failed: {e}"))?;
    writer
        .write()
        .map_err(|e| anyhow!("GLSL transpilation failed: {e}"))?;

    Ok(ShaderProgram {
        language,
        entry_point: "main".to_string(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Metal
// ---------------------------------------------------------------------------

fn write_msl(module: &naga::Module, info: &naga::valid::ModuleInfo, kernel: Kernel) -> Result<ShaderProgram> {
    let mut per_entry_point_map = BTreeMap::new();
    per_entry_point_map.insert(
        kernel.entry_point().to_string(),
        naga::back::msl::EntryPointResources {
            resources: msl_binding_map(module),
            push_constant_buffer: None,
            sizes_buffer: None,
        },
    );

    let (source, translation) = naga::back::msl::write_string(
        module,
        info,
        &naga::back::msl::Options {
            lang_version: (2, 0),
            per_entry_point_map,
            fake_missing_bindings: false,
            ..Default::default()
        },
        &naga::back::msl::PipelineOptions::default(),
    )
    .map_err(|e| anyhow!("MSL transpilation failed: {e}"))?;

    // The namer may rename entry points that clash with MSL keywords.
    let entry_point = translation
        .entry_point_names
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("MSL output has no entry point"))?
        .map_err(|e| anyhow!("MSL entry point: {e}"))?;

    Ok(ShaderProgram {
        language: ShaderLanguage::Msl,
        entry_point,
        source,
    })
}

/// Sequential Metal slots per resource kind, in (group, binding) order.
fn msl_binding_map(
    module: &naga::Module,
) -> BTreeMap<naga::ResourceBinding, naga::back::msl::BindTarget> {
    let mut bindings: Vec<_> = module
        .global_variables
        .iter()
        .filter_map(|(_, var)| {
            let binding = var.binding.clone()?;
            Some((binding, module.types[var.ty].inner.clone()))
        })
        .collect();
    bindings.sort_by_key(|(binding, _)| (binding.group, binding.binding));

    let mut map = BTreeMap::new();
    let (mut textures, mut buffers, mut samplers) = (0u8, 0u8, 0u8);
    for (binding, inner) in bindings {
        let target = match inner {
            naga::TypeInner::Image { .. } => {
                textures += 1;
                naga::back::msl::BindTarget {
                    texture: Some(textures - 1),
                    ..Default::default()
                }
            }
            naga::TypeInner::Sampler { .. } => {
                samplers += 1;
                naga::back::msl::BindTarget {
                    sampler: Some(naga::back::msl::BindSamplerTarget::Resource(samplers - 1)),
                    ..Default::default()
                }
            }
            _ => {
                buffers += 1;
                naga::back::msl::BindTarget {
                    buffer: Some(buffers - 1),
                    ..Default::default()
                }
            }
        };
        map.insert(binding, target);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: KernelParams = KernelParams {
        thread_group_size: 8,
        output_format: PixelFormat::Float16Rgba,
    };

    #[test]
    fn every_kernel_validates() {
        for kernel in Kernel::ALL {
            let source = kernel_source(kernel, PARAMS).unwrap();
            let (module, _) = parse_and_validate(&source)
                .unwrap_or_else(|e| panic!("{}: {e:#}", kernel.entry_point()));
            assert_eq!(module.entry_points.len(), 1);
            let entry = &module.entry_points[0];
            assert_eq!(entry.name, kernel.entry_point());
            assert_eq!(entry.stage, naga::ShaderStage::Compute);
            assert_eq!(entry.workgroup_size, [8, 8, 1]);
        }
    }

    #[test]
    fn tokens_are_filled_in() {
        let params = KernelParams {
            thread_group_size: 16,
            output_format: PixelFormat::Unorm8Rgba,
        };
        let source = kernel_source(Kernel::MipMap, params).unwrap();
        assert!(source.contains("@workgroup_size(16, 16, 1)"));
        assert!(source.contains("texture_storage_2d<rgba8unorm, write>"));
        assert!(!source.contains("OUTPUT_FORMAT"));
        assert!(source.contains("fn texel_direction"));
    }

    #[test]
    fn depth_outputs_are_rejected() {
        let params = KernelParams {
            thread_group_size: 8,
            output_format: PixelFormat::Depth32,
        };
        assert!(kernel_source(Kernel::BlurFace, params).is_err());
    }

    #[test]
    fn backends_get_their_language() {
        let loader = WgslKernelLoader;
        let cases = [
            (GraphicsApi::OpenGL, ShaderLanguage::Glsl),
            (GraphicsApi::Vulkan, ShaderLanguage::Glsl),
            (GraphicsApi::OpenGLES, ShaderLanguage::GlslEs),
            (GraphicsApi::Metal, ShaderLanguage::Msl),
            (GraphicsApi::D3D11, ShaderLanguage::Wgsl),
            (GraphicsApi::Null, ShaderLanguage::Wgsl),
        ];
        for (api, language) in cases {
            let program = loader.load_compute(Kernel::RenderFace, api, PARAMS).unwrap();
            assert_eq!(program.language, language, "{}", api.name());
            assert!(!program.source.is_empty());
        }
        let glsl = loader.load_compute(Kernel::MipMap, GraphicsApi::OpenGL, PARAMS).unwrap();
        assert!(glsl.source.starts_with("#version 460"));
        assert_eq!(glsl.entry_point, "main");
        let es = loader.load_compute(Kernel::MipMap, GraphicsApi::OpenGLES, PARAMS).unwrap();
        assert!(es.source.starts_with("#version 310 es"));
    }

    #[test]
    fn orbis_has_no_translation() {
        let err = WgslKernelLoader
            .load_compute(Kernel::MipMap, GraphicsApi::Orbis, PARAMS)
            .unwrap_err();
        assert!(format!("{err:#}").contains("Orbis"));
    }
}
