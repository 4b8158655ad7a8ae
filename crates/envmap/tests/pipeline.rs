use std::path::{Path, PathBuf};
use std::sync::Arc;

use envmap::math::{blur_angle, blur_radius, dispatch_groups, texel_range_from_angle};
use envmap::{
    EnvMapError, EnvironmentMap, EnvironmentMapConfig, Kernel, KernelParams, ShaderLoader,
    WgslKernelLoader,
};
use rhi::{
    CodecWriteFlags, DiskResourceManager, DispatchRecord, GraphicsApi, Image, PixelFormat,
    RecordingDevice, ResourceManager, ShaderProgram,
};
use tempfile::{tempdir, TempDir};

/// 16x16 faces, 5 background mips, 8x8 IBL with 4 mips.
fn small_config() -> EnvironmentMapConfig {
    EnvironmentMapConfig {
        max_face_size: 16,
        ibl_face_size: 8,
        ibl_mip_count: 4,
        ibl_sample_count: 64,
        progressive_steps: 4,
        thread_group_size: 8,
        cache_path: PathBuf::new(),
    }
}

/// Writes an 8x4 latlong source next to a fresh resource manager.
fn workspace() -> (TempDir, DiskResourceManager) {
    let texels: Vec<u8> = (0..8 * 4)
        .flat_map(|i| [i as f32 / 32.0, 0.5, 1.0, 1.0])
        .flat_map(f32::to_le_bytes)
        .collect();
    workspace_with(Image::single(PixelFormat::Float32Rgba, 8, 4, texels))
}

fn workspace_with(source: Image) -> (TempDir, DiskResourceManager) {
    let tmp = tempdir().unwrap();
    let manager = DiskResourceManager::new(tmp.path());
    manager
        .save_image(Path::new("sky.pkim"), &source, CodecWriteFlags::WRITE_TEXELS)
        .unwrap();
    (tmp, manager)
}

fn init(device: &RecordingDevice, config: EnvironmentMapConfig) -> EnvironmentMap {
    EnvironmentMap::init(Arc::new(device.clone()), &WgslKernelLoader, config).unwrap()
}

fn word(buffer: &[u8], index: usize) -> u32 {
    u32::from_ne_bytes(buffer[index * 4..index * 4 + 4].try_into().unwrap())
}

fn float(buffer: &[u8], index: usize) -> f32 {
    f32::from_ne_bytes(buffer[index * 4..index * 4 + 4].try_into().unwrap())
}

fn by_state<'a>(dispatches: &'a [DispatchRecord], state: &str) -> Vec<&'a DispatchRecord> {
    dispatches.iter().filter(|d| d.state == state).collect()
}

#[test]
fn white_sets_until_the_first_generation() {
    let (_tmp, manager) = workspace();
    let device = RecordingDevice::new(GraphicsApi::Null);
    let mut map = init(&device, small_config());

    let white = map.white_constant_set().label().to_string();
    assert_eq!(white, "Dummy Environment Map Constant Set");
    assert_eq!(map.ibl_cubemap_constant_set().label(), white);

    map.load(Path::new("sky.pkim"), &manager).unwrap();
    assert!(map.is_valid());
    assert!(!map.is_usable());
    assert!(map.needs_compute());
    assert_eq!(map.background_cubemap_constant_set().label(), white);

    let mut cmd = device.command_buffer();
    map.generate_cubemap(&mut cmd).unwrap();
    assert!(map.is_usable());
    assert!(!map.needs_compute());
    assert_eq!(map.ibl_cubemap_constant_set().label(), "IBL Constant Set");
    assert_eq!(map.background_cubemap_constant_set().label(), "Blurred Constant Set");
    assert_eq!(
        map.intermediate_cubemap_constant_set().label(),
        "Environment Map Constant Set"
    );

    map.reset();
    assert!(!map.is_valid());
    assert_eq!(map.ibl_cubemap_constant_set().label(), white);
}

#[test]
fn loading_the_same_path_twice_is_a_no_op() {
    let (_tmp, manager) = workspace();
    let device = RecordingDevice::new(GraphicsApi::Null);
    let mut map = init(&device, small_config());

    map.load(Path::new("sky.pkim"), &manager).unwrap();
    let created = device.created_objects();
    map.load(Path::new("sky.pkim"), &manager).unwrap();
    assert_eq!(device.created_objects(), created);
    assert_eq!(map.path(), Some(Path::new("sky.pkim")));
}

#[test]
fn first_call_resamples_filters_mips_and_blurs() {
    let (_tmp, manager) = workspace();
    let device = RecordingDevice::new(GraphicsApi::Null);
    let mut map = init(&device, small_config());
    map.load(Path::new("sky.pkim"), &manager).unwrap();

    let mut cmd = device.command_buffer();
    map.generate_cubemap(&mut cmd).unwrap();
    assert!(!cmd.is_pass_open());
    let dispatches: Vec<_> = cmd.dispatches().cloned().collect();

    let resample = by_state(&dispatches, Kernel::CubemapFromLatLong.state_label());
    assert_eq!(resample.len(), 6);
    for (face, dispatch) in resample.iter().enumerate() {
        assert_eq!(dispatch.set, "LatLong Constant Set");
        assert_eq!(word(&dispatch.buffers[0], 0), face as u32);
        assert_eq!(word(&dispatch.buffers[0], 1), 16);
        assert_eq!(dispatch.groups, [2, 2, 1]);
        assert_eq!(dispatch.sampled, vec!["Input Texture".to_string()]);
    }

    let mips = by_state(&dispatches, Kernel::MipMap.state_label());
    assert_eq!(mips.len(), 6 * 4);
    assert_eq!(float(&mips[0].buffers[0], 0), 1.0 / 8.0);
    assert_eq!(mips[0].storage[0].1, 8);

    let rendered = by_state(&dispatches, Kernel::RenderFace.state_label());
    let blurred = by_state(&dispatches, Kernel::BlurFace.state_label());
    assert_eq!(rendered.len(), 6 * 4);
    assert_eq!(blurred.len(), 6 * 4);

    // Level 1 renders the 16x16 level 0 with a margin on every side.
    let radius = texel_range_from_angle(blur_angle(0, 5), 16);
    let first = rendered[0];
    assert_eq!(word(&first.buffers[0], 1), 1);
    assert_eq!(word(&first.buffers[0], 2), 16);
    assert_eq!(word(&first.buffers[0], 3), radius);
    assert_eq!(first.storage[0].1, 16 + 2 * radius);
    assert_eq!(first.groups[0], dispatch_groups(16 + 2 * radius, 8));
    assert_eq!(first.sampled, vec!["Blurred Texture".to_string()]);
    assert_eq!(word(&blurred[0].buffers[0], 0), 8);
    assert_eq!(blurred[0].storage[0].0, "Blurred Cubemap Render Target");

    let filtered = by_state(&dispatches, Kernel::FilterCubemap.state_label());
    assert_eq!(filtered.len(), 6 * 3);
    assert_eq!(filtered[0].sampled, vec!["Environment Map Texture".to_string()]);
}

#[test]
fn ibl_is_seeded_from_the_matching_intermediate_mip() {
    let (_tmp, manager) = workspace();
    let device = RecordingDevice::new(GraphicsApi::Null);
    let mut map = init(&device, small_config());
    map.load(Path::new("sky.pkim"), &manager).unwrap();

    let mut cmd = device.command_buffer();
    map.generate_cubemap(&mut cmd).unwrap();

    let seeds: Vec<_> = cmd
        .copies()
        .filter(|c| c.dst == "IBL Texture" && c.region.dst_mip == 0)
        .collect();
    assert_eq!(seeds.len(), 6);
    for (face, copy) in seeds.iter().enumerate() {
        assert_eq!(copy.src, "Environment Map Render Target");
        assert_eq!(copy.region.dst_face, face as u32);
        assert_eq!(copy.region.extent, (8, 8));
    }

    let intermediate = cmd
        .copies()
        .filter(|c| c.dst == "Environment Map Texture")
        .count();
    assert_eq!(intermediate, 6 * 5);
}

#[test]
fn progressive_slices_add_up_to_the_sample_budget() {
    let (_tmp, manager) = workspace();
    let device = RecordingDevice::new(GraphicsApi::Null);
    let mut map = init(&device, small_config());
    map.set_progressive_processing(true);
    map.load(Path::new("sky.pkim"), &manager).unwrap();

    let mut calls = 0;
    let mut slices = Vec::new();
    while map.needs_compute() {
        let mut cmd = device.command_buffer();
        map.update_cubemap(&mut cmd, &manager).unwrap();
        calls += 1;
        let first_filter = cmd
            .dispatches()
            .find(|d| d.state == Kernel::FilterCubemap.state_label())
            .cloned()
            .unwrap();
        slices.push((word(&first_filter.buffers[0], 3), word(&first_filter.buffers[0], 4)));
        assert!(calls <= 4, "generation did not converge");
    }

    assert_eq!(calls, 4);
    assert_eq!(map.progressive_step(), 4);
    assert_eq!(slices, vec![(16, 0), (16, 16), (16, 32), (16, 48)]);
    assert_eq!(slices.iter().map(|(count, _)| count).sum::<u32>(), 64);
}

#[test]
fn only_the_first_slice_resamples() {
    let (_tmp, manager) = workspace();
    let device = RecordingDevice::new(GraphicsApi::Null);
    let mut map = init(&device, small_config());
    map.set_progressive_processing(true);
    map.load(Path::new("sky.pkim"), &manager).unwrap();

    let mut first = device.command_buffer();
    map.generate_cubemap(&mut first).unwrap();
    let mut second = device.command_buffer();
    map.generate_cubemap(&mut second).unwrap();

    let states = |cmd: &rhi::RecordingCommandBuffer| {
        cmd.dispatches()
            .map(|d| d.state.clone())
            .collect::<std::collections::BTreeSet<_>>()
    };
    assert_eq!(states(&first).len(), 5);
    assert_eq!(
        states(&second).into_iter().collect::<Vec<_>>(),
        vec![Kernel::FilterCubemap.state_label().to_string()]
    );
    // Usable after the first slice even though compute is still owed.
    assert!(map.is_usable());
    assert!(map.needs_compute());
}

#[test]
fn toggling_progressive_mode_restarts_generation() {
    let (_tmp, manager) = workspace();
    let device = RecordingDevice::new(GraphicsApi::Null);
    let mut map = init(&device, small_config());
    map.load(Path::new("sky.pkim"), &manager).unwrap();

    let mut cmd = device.command_buffer();
    map.generate_cubemap(&mut cmd).unwrap();
    assert!(!map.needs_compute());

    map.set_progressive_processing(true);
    assert!(map.needs_compute());
    assert!(!map.is_usable());
    assert_eq!(map.progressive_step(), 0);
}

#[test]
fn setting_the_same_mode_again_restarts_generation() {
    let (_tmp, manager) = workspace();
    let device = RecordingDevice::new(GraphicsApi::Null);
    let mut map = init(&device, small_config());
    map.set_progressive_processing(true);
    map.load(Path::new("sky.pkim"), &manager).unwrap();

    for _ in 0..2 {
        let mut cmd = device.command_buffer();
        map.generate_cubemap(&mut cmd).unwrap();
    }
    assert_eq!(map.progressive_step(), 2);
    assert!(map.is_usable());

    map.set_progressive_processing(true);
    assert_eq!(map.progressive_step(), 0);
    assert!(!map.is_usable());
    assert!(map.needs_compute());

    let mut cmd = device.command_buffer();
    map.generate_cubemap(&mut cmd).unwrap();
    let resampled = cmd
        .dispatches()
        .filter(|d| d.state == Kernel::CubemapFromLatLong.state_label())
        .count();
    assert_eq!(resampled, 6);
}

#[test]
fn finished_generation_records_nothing() {
    let (_tmp, manager) = workspace();
    let device = RecordingDevice::new(GraphicsApi::Null);
    let mut map = init(&device, small_config());
    map.load(Path::new("sky.pkim"), &manager).unwrap();

    let mut samples = 0;
    for _ in 0..3 {
        let mut cmd = device.command_buffer();
        map.generate_cubemap(&mut cmd).unwrap();
        if let Some(filter) = cmd
            .dispatches()
            .find(|d| d.state == Kernel::FilterCubemap.state_label())
        {
            samples += word(&filter.buffers[0], 3);
        };
    }
    assert_eq!(samples, 64);
    assert_eq!(map.progressive_step(), 1);

    let mut idle = device.command_buffer();
    map.generate_cubemap(&mut idle).unwrap();
    assert!(idle.commands().is_empty());
    assert!(map.is_usable());
}

#[test]
fn single_texel_source_blurs_down_to_a_single_texel_face() {
    let texels = [0.25f32, 0.5, 0.75, 1.0]
        .into_iter()
        .flat_map(f32::to_le_bytes)
        .collect();
    let (_tmp, manager) = workspace_with(Image::single(PixelFormat::Float32Rgba, 1, 1, texels));
    let device = RecordingDevice::new(GraphicsApi::Null);
    let mut map = init(&device, small_config());
    map.load(Path::new("sky.pkim"), &manager).unwrap();

    let mut cmd = device.command_buffer();
    map.generate_cubemap(&mut cmd).unwrap();
    assert!(map.is_usable());
    let dispatches: Vec<_> = cmd.dispatches().cloned().collect();

    // The last background mip is 1x1 and is never blurred from, so its
    // padded face carries no margin.
    let last = map.background_mip_count() - 1;
    assert_eq!(last, 4);
    assert_eq!(blur_radius(last, 5, 16), 0);

    // It is blurred from the 2x2 level above it.
    let radius = texel_range_from_angle(blur_angle(last - 1, 5), 2);
    let blurred: Vec<_> = by_state(&dispatches, Kernel::BlurFace.state_label())
        .into_iter()
        .filter(|d| word(&d.buffers[0], 0) == 1)
        .collect();
    assert_eq!(blurred.len(), 6);
    for dispatch in blurred {
        assert_eq!(dispatch.groups, [1, 1, 1]);
        assert_eq!(word(&dispatch.buffers[0], 1), radius);
        assert_eq!(dispatch.storage[0].1, 1);
    }

    let rendered: Vec<_> = by_state(&dispatches, Kernel::RenderFace.state_label())
        .into_iter()
        .filter(|d| word(&d.buffers[0], 1) == last)
        .collect();
    assert_eq!(rendered.len(), 6);
    assert_eq!(rendered[0].storage[0].1, 2 + 2 * radius);
}

#[test]
#[cfg(feature = "write-codec")]
fn cache_round_trip_skips_generation() {
    let (tmp, manager) = workspace();
    let cache = tmp.path().join("cache");
    let config = small_config().with_cache_path(&cache);

    let device = RecordingDevice::new(GraphicsApi::Null);
    let mut map = init(&device, config.clone());
    map.load(Path::new("sky.pkim"), &manager).unwrap();

    let mut cmd = device.command_buffer();
    map.update_cubemap(&mut cmd, &manager).unwrap();
    assert!(!map.needs_compute());

    // Readbacks are still in flight: nothing to export yet.
    let mut idle = device.command_buffer();
    map.update_cubemap(&mut idle, &manager).unwrap();
    assert!(!cache.join("sky.pkim.cube.pkim").exists());

    cmd.submit();
    map.update_cubemap(&mut idle, &manager).unwrap();
    assert!(idle.commands().is_empty());
    assert!(cache.join("sky.pkim.cube.pkim").exists());
    assert!(cache.join("sky.pkim.ibl.pkim").exists());

    let cube = manager.load_image(&cache.join("sky.pkim.cube.pkim")).unwrap();
    assert!(cube.cubemap);
    assert_eq!(cube.mipmap_count(), 6 * 5);
    assert_eq!(cube.format, PixelFormat::Float16Rgba);
    let ibl = manager.load_image(&cache.join("sky.pkim.ibl.pkim")).unwrap();
    assert_eq!(ibl.mipmap_count(), 6 * 4);
    assert_eq!(ibl.frames[0].mipmaps[1].width, 4);

    let device = RecordingDevice::new(GraphicsApi::Null);
    let mut cached = init(&device, config);
    cached.load(Path::new("sky.pkim"), &manager).unwrap();
    assert!(cached.is_usable());
    assert!(!cached.needs_compute());
    assert_eq!(cached.ibl_cubemap_constant_set().label(), "IBL Constant Set");

    let mut cmd = device.command_buffer();
    cached.update_cubemap(&mut cmd, &manager).unwrap();
    assert_eq!(cmd.dispatches().count(), 0);
}

#[test]
#[cfg(feature = "write-codec")]
fn cache_of_another_size_is_a_miss() {
    let (tmp, manager) = workspace();
    let cache = tmp.path().join("cache");

    let device = RecordingDevice::new(GraphicsApi::Null);
    let mut map = init(&device, small_config().with_cache_path(&cache));
    map.load(Path::new("sky.pkim"), &manager).unwrap();
    let mut cmd = device.command_buffer();
    map.update_cubemap(&mut cmd, &manager).unwrap();
    cmd.submit();
    map.update_cubemap(&mut cmd, &manager).unwrap();
    assert!(cache.join("sky.pkim.ibl.pkim").exists());

    let larger = EnvironmentMapConfig {
        max_face_size: 32,
        ..small_config()
    }
    .with_cache_path(&cache);
    let mut map = init(&device, larger);
    map.load(Path::new("sky.pkim"), &manager).unwrap();
    assert!(map.needs_compute());
    assert!(!map.is_usable());
}

#[test]
fn rotation_is_written_to_the_shared_buffer() {
    let device = RecordingDevice::new(GraphicsApi::Null);
    let map = init(&device, small_config());

    map.set_rotation(90.0).unwrap();
    let bytes = device.buffer_contents(map.rotation_buffer()).unwrap();
    assert_eq!(bytes.len(), 32);
    let values: Vec<f32> = (0..8).map(|i| float(&bytes, i)).collect();
    assert!(values[0].abs() < 1e-6);
    assert!((values[1] + 1.0).abs() < 1e-6);
    assert!((values[4] - 1.0).abs() < 1e-6);
    assert!(values[5].abs() < 1e-6);
    assert_eq!([values[2], values[3], values[6], values[7]], [0.0; 4]);
}

#[test]
fn unsupported_half_float_falls_back_to_rgba8() {
    let device = RecordingDevice::new(GraphicsApi::Null);
    device.mark_unsupported(PixelFormat::Float16Rgba);
    let map = init(&device, small_config());
    assert_eq!(map.output_format(), PixelFormat::Unorm8Rgba);

    let device = RecordingDevice::new(GraphicsApi::Null);
    let map = init(&device, small_config());
    assert_eq!(map.output_format(), PixelFormat::Float16Rgba);
}

#[test]
fn allocation_failures_abort_init() {
    let device = RecordingDevice::new(GraphicsApi::Null);
    device.fail_on("IBL Render Target");
    let result = EnvironmentMap::init(Arc::new(device.clone()), &WgslKernelLoader, small_config());
    assert!(result.is_err());

    device.clear_failures();
    device.fail_on("Filter Compute State");
    let result = EnvironmentMap::init(Arc::new(device), &WgslKernelLoader, small_config());
    assert!(result.is_err());
}

#[test]
fn dispatch_resource_failures_leave_the_state_alone() {
    let (_tmp, manager) = workspace();
    let device = RecordingDevice::new(GraphicsApi::Null);
    let mut map = init(&device, small_config());
    map.load(Path::new("sky.pkim"), &manager).unwrap();

    device.fail_on("Filter Cubemap Constant Set");
    let mut cmd = device.command_buffer();
    assert!(map.generate_cubemap(&mut cmd).is_err());
    assert_eq!(map.progressive_step(), 0);
    assert!(map.needs_compute());
    assert!(!map.is_usable());
}

struct MissingKernels;

impl ShaderLoader for MissingKernels {
    fn load_compute(
        &self,
        kernel: Kernel,
        _api: GraphicsApi,
        _params: KernelParams,
    ) -> anyhow::Result<ShaderProgram> {
        anyhow::bail!("{} not shipped", kernel.entry_point())
    }
}

#[test]
fn missing_kernels_fail_init() {
    let device = RecordingDevice::new(GraphicsApi::Null);
    let err = EnvironmentMap::init(Arc::new(device), &MissingKernels, small_config())
        .err()
        .unwrap();
    assert!(matches!(err, EnvMapError::Kernel { .. }));
}

#[test]
fn missing_sources_are_load_errors() {
    let tmp = tempdir().unwrap();
    let manager = DiskResourceManager::new(tmp.path());
    let device = RecordingDevice::new(GraphicsApi::Null);
    let mut map = init(&device, small_config());

    let err = map.load(Path::new("nowhere.pkim"), &manager).unwrap_err();
    assert!(matches!(err, EnvMapError::Load { .. }));
    assert!(!map.is_valid());
    assert_eq!(map.path(), None);

    let mut cmd = device.command_buffer();
    assert!(matches!(
        map.generate_cubemap(&mut cmd),
        Err(EnvMapError::NoSource)
    ));
}
