//! Source meshes and their isolated, normalised bake copies.

use crate::error::BakeError;
use glam::{Mat3, Mat4, Vec3};
use std::sync::atomic::{AtomicU64, Ordering};

/// Radius of the sphere every baked mesh is scaled to fit.
pub const REFERENCE_RADIUS: f32 = 1.0;

/// Stable identity of a source mesh; part of the atlas cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(u64);

impl MeshId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for MeshId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mesh#{}", self.0)
    }
}

/// One renderable: indexed triangles, flat colour, and a model transform.
#[derive(Debug, Clone)]
pub struct MeshPart {
    pub positions: Vec<Vec3>,
    /// Per-vertex normals; derived from faces when absent.
    pub normals: Vec<Vec3>,
    pub indices: Vec<u32>,
    /// Linear RGBA.
    pub color: [f32; 4],
    pub transform: Mat4,
}

impl MeshPart {
    pub fn new(positions: Vec<Vec3>, indices: Vec<u32>) -> Self {
        Self {
            positions,
            normals: Vec::new(),
            indices,
            color: [0.8, 0.8, 0.8, 1.0],
            transform: Mat4::IDENTITY,
        }
    }

    pub fn with_normals(mut self, normals: Vec<Vec3>) -> Self {
        self.normals = normals;
        self
    }

    pub fn with_color(mut self, color: [f32; 4]) -> Self {
        self.color = color;
        self
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    fn indices_in_range(&self) -> bool {
        let n = self.positions.len() as u32;
        self.indices.iter().all(|&i| i < n)
    }

    /// Area-weighted smooth normals.
    fn compute_vertex_normals(&mut self) {
        let mut acc = vec![Vec3::ZERO; self.positions.len()];
        for tri in self.indices.chunks_exact(3) {
            let (a, b, c) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
            let n = (self.positions[b] - self.positions[a])
                .cross(self.positions[c] - self.positions[a]);
            acc[a] += n;
            acc[b] += n;
            acc[c] += n;
        }
        self.normals = acc
            .into_iter()
            .map(|n| n.try_normalize().unwrap_or(Vec3::Y))
            .collect();
    }
}

/// A mesh or group of meshes, always handled as a composite.
#[derive(Debug, Clone)]
pub struct SourceMesh {
    pub(crate) id: MeshId,
    pub parts: Vec<MeshPart>,
}

impl SourceMesh {
    pub fn new(parts: Vec<MeshPart>) -> Self {
        Self {
            id: MeshId::next(),
            parts,
        }
    }

    #[inline]
    pub fn id(&self) -> MeshId {
        self.id
    }

    pub fn triangle_count(&self) -> usize {
        self.parts.iter().map(MeshPart::triangle_count).sum()
    }
}

impl From<MeshPart> for SourceMesh {
    fn from(part: MeshPart) -> Self {
        SourceMesh::new(vec![part])
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    /// Box-centred sphere enclosing `points`.
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let first = *points.first()?;
        let (min, max) = points
            .iter()
            .fold((first, first), |(lo, hi), p| (lo.min(*p), hi.max(*p)));
        let center = (min + max) * 0.5;
        let radius = points
            .iter()
            .map(|p| p.distance_squared(center))
            .fold(0.0f32, f32::max)
            .sqrt();
        Some(Self { center, radius })
    }

    pub fn transformed(&self, m: &Mat4) -> Self {
        let max_scale = m
            .x_axis
            .truncate()
            .length()
            .max(m.y_axis.truncate().length())
            .max(m.z_axis.truncate().length());
        Self {
            center: m.transform_point3(self.center),
            radius: self.radius * max_scale,
        }
    }

    pub fn union(&self, other: &Self) -> Self {
        let d = self.center.distance(other.center);
        if d + other.radius <= self.radius {
            return *self;
        }
        if d + self.radius <= other.radius {
            return *other;
        }
        let radius = (d + self.radius + other.radius) * 0.5;
        let center = self.center + (other.center - self.center) / d * (radius - self.radius);
        Self { center, radius }
    }
}

/// Scene vertex after part and group transforms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub color: [f32; 4],
}

/// Private, normalised copy of a source mesh. Each part is recentred on its
/// own bounding sphere and the whole group is scaled into
/// [`REFERENCE_RADIUS`] around the origin; `transform` of every part already
/// includes the group normalisation.
#[derive(Debug, Clone)]
pub struct BakeScene {
    pub mesh_id: MeshId,
    pub parts: Vec<MeshPart>,
    /// Combined world-space bounds before normalisation.
    pub source_bounds: BoundingSphere,
    pub group_transform: Mat4,
}

impl BakeScene {
    pub fn isolate(source: &SourceMesh) -> Result<Self, BakeError> {
        let mut parts = Vec::with_capacity(source.parts.len());
        let mut bounds: Option<BoundingSphere> = None;

        for (k, part) in source.parts.iter().enumerate() {
            if part.triangle_count() == 0 {
                continue;
            }
            if !part.indices_in_range() {
                log::warn!("{}: part {k} has out-of-range indices; skipped", source.id);
                continue;
            }
            let Some(local) = BoundingSphere::from_points(&part.positions) else {
                continue;
            };

            let mut part = part.clone();
            if part.normals.len() != part.positions.len() {
                part.compute_vertex_normals();
            }
            for p in &mut part.positions {
                *p -= local.center;
            }
            part.transform *= Mat4::from_translation(local.center);

            let world = BoundingSphere {
                center: Vec3::ZERO,
                radius: local.radius,
            }
            .transformed(&part.transform);
            bounds = Some(bounds.map_or(world, |b| b.union(&world)));
            parts.push(part);
        }

        let source_bounds = bounds.ok_or(BakeError::EmptyMesh(source.id.get()))?;
        let scale = if source_bounds.radius > f32::EPSILON {
            REFERENCE_RADIUS / source_bounds.radius
        } else {
            1.0
        };
        let group_transform =
            Mat4::from_scale(Vec3::splat(scale)) * Mat4::from_translation(-source_bounds.center);

        for part in &mut parts {
            part.transform = group_transform * part.transform;
        }

        Ok(Self {
            mesh_id: source.id,
            parts,
            source_bounds,
            group_transform,
        })
    }

    pub fn triangle_count(&self) -> usize {
        self.parts.iter().map(MeshPart::triangle_count).sum()
    }

    /// Merges all parts into one world-space vertex/index list with
    /// per-vertex colour, ready for a single draw.
    pub fn flatten(&self) -> (Vec<WorldVertex>, Vec<u32>) {
        let mut vertices = Vec::with_capacity(self.parts.iter().map(|p| p.positions.len()).sum());
        let mut indices = Vec::with_capacity(self.triangle_count() * 3);
        for part in &self.parts {
            let base = vertices.len() as u32;
            let normal_mat = Mat3::from_mat4(part.transform).inverse().transpose();
            vertices.extend(part.positions.iter().zip(&part.normals).map(|(p, n)| WorldVertex {
                position: part.transform.transform_point3(*p),
                normal: (normal_mat * *n).normalize_or_zero(),
                color: part.color,
            }));
            indices.extend(part.indices.iter().map(|i| base + i));
        }
        (vertices, indices)
    }

    /// World-space positions after normalisation; used by tests and CPU
    /// fallbacks.
    pub fn world_positions(&self) -> impl Iterator<Item = Vec3> + '_ {
        self.parts
            .iter()
            .flat_map(|p| p.positions.iter().map(move |v| p.transform.transform_point3(*v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube(size: f32) -> MeshPart {
        let h = size * 0.5;
        let positions = vec![
            Vec3::new(-h, -h, -h),
            Vec3::new(h, -h, -h),
            Vec3::new(h, h, -h),
            Vec3::new(-h, h, -h),
            Vec3::new(-h, -h, h),
            Vec3::new(h, -h, h),
            Vec3::new(h, h, h),
            Vec3::new(-h, h, h),
        ];
        #[rustfmt::skip]
        let indices = vec![
            0, 2, 1, 0, 3, 2,  4, 5, 6, 4, 6, 7,
            0, 1, 5, 0, 5, 4,  3, 6, 2, 3, 7, 6,
            0, 4, 7, 0, 7, 3,  1, 2, 6, 1, 6, 5,
        ];
        MeshPart::new(positions, indices)
    }

    #[test]
    fn mesh_ids_are_unique() {
        let a = SourceMesh::from(cube(1.0));
        let b = SourceMesh::from(cube(1.0));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn isolation_fits_any_scale_into_the_reference_sphere() {
        for (size, offset) in [(0.01, Vec3::ZERO), (250.0, Vec3::new(1e3, -40.0, 7.0))] {
            let src = SourceMesh::from(cube(size).with_transform(Mat4::from_translation(offset)));
            let scene = BakeScene::isolate(&src).unwrap();
            for p in scene.world_positions() {
                assert!(p.length() <= REFERENCE_RADIUS + 1e-4, "{p:?}");
            }
            let max = scene.world_positions().map(|p| p.length()).fold(0.0, f32::max);
            assert!((max - REFERENCE_RADIUS).abs() < 1e-3);
            assert!((scene.source_bounds.center - offset).length() < 1e-2 * size.max(1.0));
        }
    }

    #[test]
    fn isolation_leaves_the_source_untouched() {
        let src = SourceMesh::from(cube(4.0).with_transform(Mat4::from_translation(Vec3::X * 3.0)));
        let before = src.parts[0].positions.clone();
        let scene = BakeScene::isolate(&src).unwrap();
        assert_eq!(src.parts[0].positions, before);
        assert!(src.parts[0].normals.is_empty());
        assert_eq!(scene.parts[0].normals.len(), 8);
        assert_eq!(scene.mesh_id, src.id());
    }

    #[test]
    fn groups_share_one_normalisation() {
        let left = cube(1.0).with_transform(Mat4::from_translation(Vec3::new(-5.0, 0.0, 0.0)));
        let right = cube(1.0).with_transform(Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0)));
        let scene = BakeScene::isolate(&SourceMesh::new(vec![left, right])).unwrap();
        let xs: Vec<f32> = scene.world_positions().map(|p| p.x).collect();
        let min = xs.iter().cloned().fold(f32::MAX, f32::min);
        let max = xs.iter().cloned().fold(f32::MIN, f32::max);
        assert!((min + max).abs() < 1e-4, "group is not centred");
        assert!(max <= REFERENCE_RADIUS + 1e-4);
    }

    #[test]
    fn empty_meshes_are_rejected() {
        let src = SourceMesh::new(vec![MeshPart::new(vec![Vec3::ZERO], vec![])]);
        assert!(matches!(BakeScene::isolate(&src), Err(BakeError::EmptyMesh(_))));

        let broken = SourceMesh::from(MeshPart::new(vec![Vec3::ZERO; 3], vec![0, 1, 9]));
        assert!(matches!(BakeScene::isolate(&broken), Err(BakeError::EmptyMesh(_))));
    }

    #[test]
    fn flatten_rebases_indices_per_part() {
        let a = cube(1.0).with_color([1.0, 0.0, 0.0, 1.0]);
        let b = cube(1.0).with_transform(Mat4::from_translation(Vec3::Y * 3.0));
        let scene = BakeScene::isolate(&SourceMesh::new(vec![a, b])).unwrap();
        let (vertices, indices) = scene.flatten();
        assert_eq!(vertices.len(), 16);
        assert_eq!(indices.len(), 72);
        assert_eq!(indices[36], 8);
        assert_eq!(vertices[0].color, [1.0, 0.0, 0.0, 1.0]);
        assert!(vertices.iter().all(|v| (v.normal.length() - 1.0).abs() < 1e-4));
        let world: Vec<Vec3> = scene.world_positions().collect();
        assert!(vertices.iter().zip(&world).all(|(v, w)| v.position == *w));
    }

    #[test]
    fn sphere_union_encloses_both() {
        let a = BoundingSphere { center: Vec3::ZERO, radius: 1.0 };
        let b = BoundingSphere { center: Vec3::X * 4.0, radius: 1.0 };
        let u = a.union(&b);
        assert!((u.center - Vec3::X * 2.0).length() < 1e-6);
        assert!((u.radius - 3.0).abs() < 1e-6);
        assert_eq!(a.union(&BoundingSphere { center: Vec3::ZERO, radius: 0.5 }), a);
    }
}
