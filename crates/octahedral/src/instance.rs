//! Per-instance view state, refreshed once per frame from the camera.

use crate::sampling::{FaceSample, SamplingCache};
use glam::Vec3;

/// Angular slack so a move of exactly the threshold still resamples.
const THRESHOLD_SLACK_RAD: f32 = 1e-5;

/// Last sampled view direction and the sprite blend derived from it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingState {
    /// `None` until the first update.
    pub last_direction: Option<Vec3>,
    pub face: FaceSample,
}

impl Default for SamplingState {
    fn default() -> Self {
        Self {
            last_direction: None,
            face: FaceSample::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpostorInstance {
    pub position: Vec3,
    /// World radius of the billboard; matches the source bounding sphere.
    pub scale: f32,
    pub sampling: SamplingState,
}

impl ImpostorInstance {
    pub fn new(position: Vec3, scale: f32) -> Self {
        Self {
            position,
            scale,
            sampling: SamplingState::default(),
        }
    }

    /// Resamples the sprite blend if the direction to `camera_pos` moved by
    /// at least `threshold_rad` since the last resample. Returns `true`
    /// when the blend changed and GPU instance data must be re-uploaded.
    ///
    /// No allocation.
    pub fn update_view(&mut self, camera_pos: Vec3, cache: &SamplingCache, threshold_rad: f32) -> bool {
        let Some(dir) = (camera_pos - self.position).try_normalize() else {
            // Camera sits on the instance; keep whatever we had.
            return false;
        };

        if let Some(last) = self.sampling.last_direction {
            // acos(dot) loses precision for small angles.
            let moved = dir.cross(last).length().atan2(dir.dot(last));
            if moved + THRESHOLD_SLACK_RAD < threshold_rad {
                return false;
            }
        }

        cache.sample_into(dir, &mut self.sampling.face);
        self.sampling.last_direction = Some(dir);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{OctahedralMesh, OctahedronType};
    use glam::{Quat, Vec3};
    use std::sync::Arc;

    fn cache() -> SamplingCache {
        SamplingCache::build(Arc::new(OctahedralMesh::build(OctahedronType::Hemi, 8).unwrap()))
    }

    /// Camera position at `deg` degrees around Y from a reference azimuth.
    fn orbit(deg: f32) -> Vec3 {
        Quat::from_rotation_y(deg.to_radians()) * Vec3::new(10.0, 6.0, 3.0)
    }

    #[test]
    fn first_frame_always_samples() {
        let cache = cache();
        let mut inst = ImpostorInstance::new(Vec3::ZERO, 1.0);
        assert!(inst.update_view(orbit(0.0), &cache, 0.5f32.to_radians()));
        assert!(inst.sampling.last_direction.is_some());
        let sum: f32 = inst.sampling.face.weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn small_moves_are_ignored() {
        let cache = cache();
        let threshold = 0.5f32.to_radians();
        let mut inst = ImpostorInstance::new(Vec3::ZERO, 1.0);
        inst.update_view(orbit(0.0), &cache, threshold);
        let before = inst.sampling;

        assert!(!inst.update_view(orbit(0.2), &cache, threshold));
        assert_eq!(inst.sampling, before);
    }

    #[test]
    fn large_moves_resample() {
        let cache = cache();
        let threshold = 0.5f32.to_radians();
        let mut inst = ImpostorInstance::new(Vec3::ZERO, 1.0);
        inst.update_view(orbit(0.0), &cache, threshold);
        let before = inst.sampling;

        assert!(inst.update_view(orbit(40.0), &cache, threshold));
        assert_ne!(inst.sampling.last_direction, before.last_direction);
        assert_ne!(inst.sampling.face, before.face);
    }

    #[test]
    fn moves_of_exactly_the_threshold_resample() {
        let cache = cache();
        let origin = Vec3::new(1.0, 2.0, -3.0);
        let bases = [
            Vec3::new(0.3, 0.8, 0.5),
            Vec3::new(-0.9, 0.1, 0.4),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.2, -0.7, -0.6),
            Vec3::new(-0.5, 0.5, -0.7),
        ];

        for deg in [0.5f32, 1.0, 2.0, 5.0, 10.0, 30.0] {
            let threshold = deg.to_radians();
            for base in bases {
                let base = base.normalize();
                let axis = base.any_orthonormal_vector();

                let mut at = ImpostorInstance::new(origin, 1.0);
                at.update_view(origin + base * 7.0, &cache, threshold);
                let moved = Quat::from_axis_angle(axis, threshold) * base;
                assert!(
                    at.update_view(origin + moved * 7.0, &cache, threshold),
                    "{deg} deg move from {base:?} was skipped"
                );

                let mut under = ImpostorInstance::new(origin, 1.0);
                under.update_view(origin + base * 7.0, &cache, threshold);
                let moved = Quat::from_axis_angle(axis, threshold * 0.99) * base;
                assert!(
                    !under.update_view(origin + moved * 7.0, &cache, threshold),
                    "sub-{deg} deg move from {base:?} resampled"
                );
            }
        }
    }

    #[test]
    fn sampling_is_relative_to_the_instance() {
        let cache = cache();
        let mut a = ImpostorInstance::new(Vec3::ZERO, 1.0);
        let mut b = ImpostorInstance::new(Vec3::new(100.0, 0.0, 0.0), 1.0);
        a.update_view(Vec3::Y * 5.0, &cache, 0.0);
        b.update_view(Vec3::new(100.0, 5.0, 0.0), &cache, 0.0);
        assert_eq!(a.sampling.face, b.sampling.face);
    }

    #[test]
    fn camera_on_the_instance_keeps_state() {
        let cache = cache();
        let mut inst = ImpostorInstance::new(Vec3::ONE, 1.0);
        assert!(!inst.update_view(Vec3::ONE, &cache, 0.1));
        assert_eq!(inst.sampling, SamplingState::default());
    }
}
