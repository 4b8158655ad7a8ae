//! Blur footprint and dispatch-size helpers.

/// Value of pi the blur heuristic was tuned with.
pub const PI: f32 = 3.14159;

/// Number of mips down to 1x1 for a power-of-two face.
pub fn mip_count_for(face_size: u32) -> u32 {
    face_size.max(1).ilog2() + 1
}

/// Thread groups needed to cover `size` texels.
pub fn dispatch_groups(size: u32, thread_group_size: u32) -> u32 {
    size.div_ceil(thread_group_size).max(1)
}

/// Texel footprint of a cone of half-angle `angle` (radians) measured at
/// the first texel of a face edge, next to a corner, where the cube
/// projection is the most stretched.
///
/// A 1x1 (or empty) face has no neighbourhood and yields 0.
pub fn texel_range_from_angle(angle: f32, face_size: u32) -> u32 {
    if face_size <= 1 {
        return 0;
    }

    // First texel center on the seam, in [-1, 1].
    let edge = ((0.5 / face_size as f32) - 0.5) * 2.0;

    let ray = normalize([edge, edge, 1.0]);
    let f = [0.0, edge, 1.0];
    let c = dot(ray, normalize(f)).clamp(-1.0, 1.0).acos();
    let b = c - angle;
    let d = b.tan() * length(f);
    let x = 1.0 - d as f64;

    // Saturating cast: cones wider than the corner give a footprint past
    // the seam, never a negative one.
    (x * face_size as f64 * 0.5) as u32
}

/// Blur cone half-angle used when filtering `src_level` into the next mip.
///
/// Grows from 1% of a quarter turn for the first mip to the full quarter
/// turn on the next-to-last mip.
pub fn blur_angle(src_level: u32, mip_count: u32) -> f32 {
    let span = mip_count.saturating_sub(2).max(1) as f32;
    let t = (src_level as f32 / span).min(1.0);
    (PI / 2.0) * lerp(0.01, 1.0, t.powf(1.8))
}

/// Blur radius (in texels of the level being read) applied to `src_level`.
pub fn blur_radius(src_level: u32, mip_count: u32, max_face_size: u32) -> u32 {
    let face_size = (max_face_size >> src_level).max(1);
    texel_range_from_angle(blur_angle(src_level, mip_count), face_size)
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn length(v: [f32; 3]) -> f32 {
    dot(v, v).sqrt()
}

fn normalize(v: [f32; 3]) -> [f32; 3] {
    let len = length(v);
    [v[0] / len, v[1] / len, v[2] / len]
}
