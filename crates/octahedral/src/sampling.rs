//! Direction → atlas lookup.
//!
//! A [`SamplingCache`] tabulates, for each of the `N²` grid cells, the two
//! triangles tiling it (lattice vertex indices plus canonical UV corners).
//! [`SamplingCache::sample_into`] turns a view direction into three lattice
//! indices and barycentric blend weights without allocating.

use crate::error::ConfigError;
use crate::geometry::{sign_not_zero, OctahedralMesh, OctahedronType};
use glam::{Vec2, Vec3};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Shared guard against division by ~0 (direction projection, barycentric
/// denominators).
pub const EPSILON: f32 = 1e-9;

/// Upper clamp for in-cell coordinates; keeps points off the far edges.
const LOCAL_MAX: f32 = 0.999_999;

const THIRDS: [f32; 3] = [1.0 / 3.0; 3];

/// Cell split along its `(0,0)-(1,1)` diagonal.
pub const BACKSLASH_UVS: [[Vec2; 3]; 2] = [
    [Vec2::new(0.0, 0.0), Vec2::new(0.0, 1.0), Vec2::new(1.0, 1.0)],
    [Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0), Vec2::new(1.0, 0.0)],
];

/// Cell split along its `(0,1)-(1,0)` diagonal.
pub const SLASH_UVS: [[Vec2; 3]; 2] = [
    [Vec2::new(0.0, 0.0), Vec2::new(0.0, 1.0), Vec2::new(1.0, 0.0)],
    [Vec2::new(0.0, 1.0), Vec2::new(1.0, 1.0), Vec2::new(1.0, 0.0)],
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    /// Lattice indices into the octahedral mesh point arrays.
    pub vertices: [u32; 3],
    /// Corners in cell-local UV, matching `vertices` one to one.
    pub uvs: [Vec2; 3],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cell {
    pub is_backslash: bool,
    pub triangles: [Triangle; 2],
}

/// Result of a direction lookup. Weights are non-negative and sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceSample {
    pub indices: [u32; 3],
    pub weights: [f32; 3],
}

impl Default for FaceSample {
    fn default() -> Self {
        Self {
            indices: [0; 3],
            weights: THIRDS,
        }
    }
}

/// Maps a direction to its octahedral UV in `[0,1]²`; inverse of
/// [`crate::geometry::decode_oct_uv`].
///
/// Under HEMI, directions below the horizon are projected onto the horizon
/// at the same azimuth. Straight down has no azimuth and takes the +X
/// horizon, UV `(1, 0)`, matching directions just off the nadir towards +X.
pub fn encode_direction_to_oct_uv(dir: Vec3, oct_type: OctahedronType) -> Vec2 {
    let l1 = dir.x.abs() + dir.y.abs() + dir.z.abs();
    let p = dir / l1.max(EPSILON);

    let uv = match oct_type {
        OctahedronType::Full => {
            let (x, z) = if p.y < 0.0 {
                (
                    sign_not_zero(p.x) * (1.0 - p.z.abs()),
                    sign_not_zero(p.z) * (1.0 - p.x.abs()),
                )
            } else {
                (p.x, p.z)
            };
            Vec2::new(x * 0.5 + 0.5, z * 0.5 + 0.5)
        }
        OctahedronType::Hemi => {
            let (x, z) = if p.y < 0.0 {
                let h = p.x.abs() + p.z.abs();
                if h < EPSILON {
                    (1.0, 0.0)
                } else {
                    (p.x / h, p.z / h)
                }
            } else {
                (p.x, p.z)
            };
            Vec2::new((x + z + 1.0) * 0.5, (z - x + 1.0) * 0.5)
        }
    };

    uv.clamp(Vec2::ZERO, Vec2::ONE)
}

/// Barycentric weights of `p` in `tri`, clamped non-negative and
/// renormalised. Degenerate input yields equal thirds.
pub fn barycentric(p: Vec2, tri: &[Vec2; 3]) -> [f32; 3] {
    let v0 = tri[1] - tri[0];
    let v1 = tri[2] - tri[0];
    let v2 = p - tri[0];

    let den = v0.x * v1.y - v1.x * v0.y;
    if den.abs() < EPSILON {
        return THIRDS;
    }

    let w1 = (v2.x * v1.y - v1.x * v2.y) / den;
    let w2 = (v0.x * v2.y - v2.x * v0.y) / den;
    let w = [(1.0 - w1 - w2).max(0.0), w1.max(0.0), w2.max(0.0)];

    let sum = w[0] + w[1] + w[2];
    // Also catches NaN.
    if !(sum > 0.0) {
        return THIRDS;
    }
    [w[0] / sum, w[1] / sum, w[2] / sum]
}

/// Per-(type, grid size) lookup table. Immutable once built.
#[derive(Debug)]
pub struct SamplingCache {
    mesh: Arc<OctahedralMesh>,
    cells: Vec<Cell>,
}

impl SamplingCache {
    /// Walks the mesh index buffer cell by cell, in generation order.
    pub fn build(mesh: Arc<OctahedralMesh>) -> Self {
        let n = mesh.grid_size;
        let stride = mesh.stride();

        let cells = mesh
            .indices
            .chunks_exact(6)
            .take((n * n) as usize)
            .map(|idx| {
                let is_backslash = idx[1] == idx[0] + stride && idx[2] == idx[1] + 1;
                let uvs = if is_backslash { &BACKSLASH_UVS } else { &SLASH_UVS };
                Cell {
                    is_backslash,
                    triangles: [
                        Triangle {
                            vertices: [idx[0], idx[1], idx[2]],
                            uvs: uvs[0],
                        },
                        Triangle {
                            vertices: [idx[3], idx[4], idx[5]],
                            uvs: uvs[1],
                        },
                    ],
                }
            })
            .collect();

        Self { mesh, cells }
    }

    #[inline]
    pub fn mesh(&self) -> &Arc<OctahedralMesh> {
        &self.mesh
    }

    #[inline]
    pub fn grid_size(&self) -> u32 {
        self.mesh.grid_size
    }

    #[inline]
    pub fn octahedron_type(&self) -> OctahedronType {
        self.mesh.octahedron_type
    }

    #[inline]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    #[inline]
    pub fn cell(&self, row: u32, col: u32) -> &Cell {
        &self.cells[(row * self.grid_size() + col) as usize]
    }

    /// Hot path: writes the containing triangle and blend weights for `dir`
    /// into `out`.
    pub fn sample_into(&self, dir: Vec3, out: &mut FaceSample) {
        let n = self.grid_size();
        let max_cell = n as i64 - 1;
        let grid_uv = encode_direction_to_oct_uv(dir, self.octahedron_type()) * n as f32;

        // Clamp absorbs overshoot at uv == 1.
        let col = (grid_uv.x.floor() as i64).clamp(0, max_cell) as u32;
        let row = (grid_uv.y.floor() as i64).clamp(0, max_cell) as u32;
        let local = Vec2::new(
            (grid_uv.x - col as f32).clamp(0.0, LOCAL_MAX),
            (grid_uv.y - row as f32).clamp(0.0, LOCAL_MAX),
        );

        let cell = self.cell(row, col);
        let second = if cell.is_backslash {
            local.x > local.y
        } else {
            local.x + local.y > 1.0
        };
        let tri = &cell.triangles[second as usize];

        out.indices = tri.vertices;
        out.weights = barycentric(local, &tri.uvs);
    }

    pub fn sample(&self, dir: Vec3) -> FaceSample {
        let mut out = FaceSample::default();
        self.sample_into(dir, &mut out);
        out
    }

    /// Direction reconstructed from a sample by blending its lattice points.
    pub fn reconstruct(&self, sample: &FaceSample) -> Vec3 {
        let pts = &self.mesh.octahedron_points;
        let blended = sample
            .indices
            .iter()
            .zip(sample.weights)
            .fold(Vec3::ZERO, |acc, (&i, w)| acc + pts[i as usize] * w);
        blended.normalize_or_zero()
    }
}

/// Process-wide memo of sampling caches keyed by (type, grid size).
#[derive(Debug, Default)]
pub struct SamplingRegistry {
    caches: RwLock<HashMap<(OctahedronType, u32), Arc<SamplingCache>>>,
}

impl SamplingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared instance for callers that do not inject their own.
    pub fn global() -> &'static SamplingRegistry {
        static GLOBAL: OnceLock<SamplingRegistry> = OnceLock::new();
        GLOBAL.get_or_init(SamplingRegistry::new)
    }

    pub fn get_or_build(
        &self,
        oct_type: OctahedronType,
        grid_size: u32,
    ) -> Result<Arc<SamplingCache>, ConfigError> {
        let key = (oct_type, grid_size);
        if let Some(cache) = self.caches.read().get(&key) {
            return Ok(cache.clone());
        }

        let mesh = OctahedralMesh::build(oct_type, grid_size)?;
        let built = Arc::new(SamplingCache::build(Arc::new(mesh)));
        log::debug!("Built sampling cache for {oct_type} grid {grid_size}");

        // A racing builder may have published first; keep whichever landed.
        let mut caches = self.caches.write();
        Ok(caches.entry(key).or_insert(built).clone())
    }

    pub fn len(&self) -> usize {
        self.caches.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
