//! Per-backend binding slot assignment.
//!
//! Descriptions are authored without binding indices. Before generating
//! source for a backend, [`reset_bindings`] clears every index and
//! [`generate_bindings_for_api`] assigns contiguous, backend-appropriate
//! slots.

use super::description::{ConstantDesc, ShaderBindings};
use super::stage::GraphicsApi;

/// Clears every binding index and push-constant offset.
pub fn reset_bindings(bindings: &mut ShaderBindings) {
    for set in &mut bindings.constant_sets {
        set.per_set_binding = 0;
        for constant in &mut set.constants {
            constant.set_per_block_binding(0);
            if let ConstantDesc::Sampler {
                per_stage_sampler_binding,
                ..
            } = constant
            {
                *per_stage_sampler_binding = 0;
            }
        }
    }
    for pc in &mut bindings.push_constants {
        pc.per_block_binding = 0;
        pc.byte_offset = 0;
    }
}

/// Assigns binding slots for `api`. Null and Orbis keep reset indices.
pub fn generate_bindings_for_api(api: GraphicsApi, bindings: &mut ShaderBindings) {
    match api {
        GraphicsApi::OpenGL | GraphicsApi::OpenGLES => generate_gl(bindings),
        GraphicsApi::Vulkan => generate_vulkan(bindings),
        GraphicsApi::D3D11 | GraphicsApi::D3D12 => generate_d3d(bindings),
        GraphicsApi::Metal => generate_metal(bindings),
        GraphicsApi::Null | GraphicsApi::Orbis => {}
    }
}

// One global namespace per resource kind.
fn generate_gl(bindings: &mut ShaderBindings) {
    let mut uniform_blocks = 0;
    let mut storage_blocks = 0;
    let mut images = 0;
    let mut samplers = 0;

    for set in &mut bindings.constant_sets {
        for constant in &mut set.constants {
            match constant {
                ConstantDesc::ConstantBuffer(cb) => {
                    cb.per_block_binding = uniform_blocks;
                    uniform_blocks += 1;
                }
                ConstantDesc::RawBuffer {
                    per_block_binding, ..
                } => {
                    *per_block_binding = storage_blocks;
                    storage_blocks += 1;
                }
                ConstantDesc::TextureStorage {
                    per_block_binding, ..
                } => {
                    *per_block_binding = images;
                    images += 1;
                }
                ConstantDesc::Sampler {
                    per_block_binding,
                    per_stage_sampler_binding,
                    ..
                } => {
                    *per_block_binding = samplers;
                    *per_stage_sampler_binding = samplers;
                    samplers += 1;
                }
            }
        }
    }
    for pc in &mut bindings.push_constants {
        pc.per_block_binding = uniform_blocks;
        uniform_blocks += 1;
    }
}

fn generate_vulkan(bindings: &mut ShaderBindings) {
    for (set_index, set) in bindings.constant_sets.iter_mut().enumerate() {
        set.per_set_binding = set_index as u32;
        for (binding, constant) in set.constants.iter_mut().enumerate() {
            constant.set_per_block_binding(binding as u32);
        }
    }
    let mut offset = 0;
    for (index, pc) in bindings.push_constants.iter_mut().enumerate() {
        pc.per_block_binding = index as u32;
        pc.byte_offset = offset;
        offset += pc.tight_size();
    }
}

// b: constant buffers, t: read-only resources, u: read-write, s: samplers.
fn generate_d3d(bindings: &mut ShaderBindings) {
    let mut b = 0;
    let mut t = 0;
    let mut u = 0;
    let mut s = 0;

    for set in &mut bindings.constant_sets {
        for constant in &mut set.constants {
            match constant {
                ConstantDesc::ConstantBuffer(cb) => {
                    cb.per_block_binding = b;
                    b += 1;
                }
                ConstantDesc::RawBuffer {
                    read_only,
                    per_block_binding,
                    ..
                }
                | ConstantDesc::TextureStorage {
                    read_only,
                    per_block_binding,
                    ..
                } => {
                    if *read_only {
                        *per_block_binding = t;
                        t += 1;
                    } else {
                        *per_block_binding = u;
                        u += 1;
                    }
                }
                ConstantDesc::Sampler {
                    per_block_binding,
                    per_stage_sampler_binding,
                    ..
                } => {
                    *per_block_binding = t;
                    t += 1;
                    *per_stage_sampler_binding = s;
                    s += 1;
                }
            }
        }
    }
    for pc in &mut bindings.push_constants {
        pc.per_block_binding = b;
        b += 1;
    }
}

// Argument buffers: one buffer slot per set, push constants after them.
fn generate_metal(bindings: &mut ShaderBindings) {
    let set_count = bindings.constant_sets.len() as u32;
    for (set_index, set) in bindings.constant_sets.iter_mut().enumerate() {
        set.per_set_binding = set_index as u32;
        for (binding, constant) in set.constants.iter_mut().enumerate() {
            constant.set_per_block_binding(binding as u32);
        }
    }
    for (index, pc) in bindings.push_constants.iter_mut().enumerate() {
        pc.per_block_binding = set_count + index as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::{
        ConstantBufferDesc, ConstantSetLayout, PushConstantBuffer, SamplerType, ShaderStageMask,
        VarType,
    };

    fn bindings() -> ShaderBindings {
        let mut set0 = ConstantSetLayout::new(ShaderStageMask::COMPUTE);
        set0.add_constant_buffer(ConstantBufferDesc::new("A").with_constant("x", VarType::Float))
            .add_sampler("Input", SamplerType::Single)
            .add_texture_storage("Out", false, None);
        let mut set1 = ConstantSetLayout::new(ShaderStageMask::COMPUTE);
        set1.add_raw_buffer("Data", true)
            .add_constant_buffer(ConstantBufferDesc::new("B").with_constant("y", VarType::Uint))
            .add_sampler("Other", SamplerType::Cube);
        ShaderBindings {
            constant_sets: vec![set0, set1],
            push_constants: vec![
                PushConstantBuffer::new("P0", ShaderStageMask::COMPUTE)
                    .with_constant("a", VarType::Float4),
                PushConstantBuffer::new("P1", ShaderStageMask::COMPUTE)
                    .with_constant("b", VarType::Uint),
            ],
            ..Default::default()
        }
    }

    fn block_bindings(b: &ShaderBindings) -> Vec<Vec<u32>> {
        b.constant_sets
            .iter()
            .map(|s| s.constants.iter().map(ConstantDesc::per_block_binding).collect())
            .collect()
    }

    #[test]
    fn gl_uses_global_counters_per_kind() {
        let mut b = bindings();
        generate_bindings_for_api(GraphicsApi::OpenGL, &mut b);
        assert_eq!(block_bindings(&b), vec![vec![0, 0, 0], vec![0, 1, 1]]);
        assert_eq!(b.push_constants[0].per_block_binding, 2);
        assert_eq!(b.push_constants[1].per_block_binding, 3);
    }

    #[test]
    fn vulkan_is_positional_with_packed_push_constants() {
        let mut b = bindings();
        generate_bindings_for_api(GraphicsApi::Vulkan, &mut b);
        assert_eq!(b.constant_sets[1].per_set_binding, 1);
        assert_eq!(block_bindings(&b), vec![vec![0, 1, 2], vec![0, 1, 2]]);
        assert_eq!(b.push_constants[0].byte_offset, 0);
        assert_eq!(b.push_constants[1].byte_offset, 16);
    }

    #[test]
    fn d3d_splits_register_spaces() {
        let mut b = bindings();
        generate_bindings_for_api(GraphicsApi::D3D11, &mut b);
        // A=b0 Input=t0 Out=u0 | Data=t1 B=b1 Other=t2
        assert_eq!(block_bindings(&b), vec![vec![0, 0, 0], vec![1, 1, 2]]);
        match &b.constant_sets[1].constants[2] {
            ConstantDesc::Sampler {
                per_stage_sampler_binding,
                ..
            } => assert_eq!(*per_stage_sampler_binding, 1),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(b.push_constants[0].per_block_binding, 2);
    }

    #[test]
    fn metal_push_constants_follow_sets_and_reset_clears() {
        let mut b = bindings();
        generate_bindings_for_api(GraphicsApi::Metal, &mut b);
        assert_eq!(b.push_constants[1].per_block_binding, 3);
        reset_bindings(&mut b);
        assert_eq!(block_bindings(&b), vec![vec![0, 0, 0], vec![0, 0, 0]]);
        assert_eq!(b.push_constants[1].per_block_binding, 0);
        assert_eq!(b.constant_sets[1].per_set_binding, 0);
    }
}
