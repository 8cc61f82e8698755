//! GPU-side data layouts. Field order and padding must match the WGSL structs
//! in the bake and impostor pipelines.

use glam::Mat4;
use octahedral::{ImpostorInstance, WorldVertex};

/// Vertex of the flattened bake scene.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug)]
pub struct BakeVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    /// Linear RGBA.
    pub color: [f32; 4],
}

impl From<&WorldVertex> for BakeVertex {
    fn from(v: &WorldVertex) -> Self {
        Self {
            position: v.position.to_array(),
            normal: v.normal.to_array(),
            color: v.color,
        }
    }
}

/// Per-view uniform of the bake pass.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug)]
pub struct BakeUniformStd140 {
    pub view_proj: Mat4,      // 64 B
    /// xyz: unit light direction, w: ambient term.
    pub light: [f32; 4],      // +16 -> 80
}

const _: [(); 80] = [(); core::mem::size_of::<BakeUniformStd140>()];

/// Per-instance vertex data of the impostor pipeline.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug, PartialEq)]
pub struct ImpostorInstanceRaw {
    pub position: [f32; 3],
    pub scale: f32,
    /// Lattice indices of the three sprites to blend.
    pub face_indices: [u32; 3],
    pub face_weights: [f32; 3],
}

const _: [(); 40] = [(); core::mem::size_of::<ImpostorInstanceRaw>()];

impl From<&ImpostorInstance> for ImpostorInstanceRaw {
    fn from(inst: &ImpostorInstance) -> Self {
        Self {
            position: inst.position.to_array(),
            scale: inst.scale,
            face_indices: inst.sampling.face.indices,
            face_weights: inst.sampling.face.weights,
        }
    }
}

/// Per-batch uniform of the impostor pipeline.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug)]
pub struct ImpostorParamsStd140 {
    pub view_proj: Mat4,          // 64 B
    pub camera_right: [f32; 3],   // +12
    /// Sprites per atlas side (N+1), as float for the shader.
    pub sprites_per_side: f32,    // +4  -> 80
    pub camera_up: [f32; 3],      // +12
    /// Non-zero draws the flat placeholder marker instead of the atlas.
    pub placeholder: u32,         // +4  -> 96
    /// Sprite edge in normalised atlas units.
    pub cell_uv: f32,             // +4
    pub alpha_cutoff: f32,        // +4
    pub _pad: [f32; 2],           // +8  -> 112
}

const _: [(); 112] = [(); core::mem::size_of::<ImpostorParamsStd140>()];

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn instance_conversion_carries_the_blend() {
        let mut inst = ImpostorInstance::new(Vec3::new(1.0, 2.0, 3.0), 4.5);
        inst.sampling.face.indices = [7, 8, 16];
        inst.sampling.face.weights = [0.5, 0.25, 0.25];
        let raw = ImpostorInstanceRaw::from(&inst);
        assert_eq!(raw.position, [1.0, 2.0, 3.0]);
        assert_eq!(raw.scale, 4.5);
        assert_eq!(raw.face_indices, [7, 8, 16]);
        assert_eq!(raw.face_weights, [0.5, 0.25, 0.25]);
        assert_eq!(bytemuck::bytes_of(&raw).len(), 40);
    }
}
