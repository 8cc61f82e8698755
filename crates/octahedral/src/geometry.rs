//! Octahedral direction grid.
//!
//! A planar `(N+1)×(N+1)` lattice on the XZ plane is folded onto a hemi- or
//! full octahedron and pushed out to a sphere of [`SPHERE_RADIUS`]. The planar
//! points address the atlas; the folded points are the bake/view directions.
//!
//! UV conventions (both in `[0,1]²`, `u` along +X / lattice columns, `v`
//! along +Z / lattice rows):
//!   HEMI: `x = u - v`, `z = u + v - 1`, `y = 1 - |x| - |z|`
//!   FULL: `x = 2u - 1`, `z = 2v - 1`, `y = 1 - |x| - |z|`, lower half folded
//!         outwards into the square's corners.

use crate::error::ConfigError;
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Radius of the sphere the folded lattice is projected onto.
pub const SPHERE_RADIUS: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum OctahedronType {
    /// Upper hemisphere only.
    Hemi = 0,
    /// Whole sphere.
    Full = 1,
}

impl fmt::Display for OctahedronType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OctahedronType::Hemi => "hemi",
            OctahedronType::Full => "full",
        };

        f.write_str(s)
    }
}

impl FromStr for OctahedronType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hemi" | "hemisphere" => Ok(OctahedronType::Hemi),
            "full" | "sphere" => Ok(OctahedronType::Full),
            other => match other.parse::<u32>() {
                Ok(v) => OctahedronType::try_from(v),
                Err(_) => Err(ConfigError::UnknownOctahedronType(other.to_owned())),
            },
        }
    }
}

impl TryFrom<u32> for OctahedronType {
    type Error = ConfigError;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(OctahedronType::Hemi),
            1 => Ok(OctahedronType::Full),
            other => Err(ConfigError::UnknownOctahedronType(other.to_string())),
        }
    }
}

/// `±1`, treating zero as positive (GLSL `signNotZero`).
#[inline(always)]
pub(crate) fn sign_not_zero(v: f32) -> f32 {
    if v >= 0.0 {
        1.0
    } else {
        -1.0
    }
}

/// Maps an octahedral UV in `[0,1]²` to a unit direction.
pub fn decode_oct_uv(uv: Vec2, oct_type: OctahedronType) -> Vec3 {
    let p = match oct_type {
        OctahedronType::Hemi => {
            let x = uv.x - uv.y;
            let z = -1.0 + uv.x + uv.y;
            Vec3::new(x, 1.0 - x.abs() - z.abs(), z)
        }
        OctahedronType::Full => {
            let u = uv.x * 2.0 - 1.0;
            let v = uv.y * 2.0 - 1.0;
            let y = 1.0 - u.abs() - v.abs();
            if y < 0.0 {
                Vec3::new(
                    sign_not_zero(u) * (1.0 - v.abs()),
                    y,
                    sign_not_zero(v) * (1.0 - u.abs()),
                )
            } else {
                Vec3::new(u, y, v)
            }
        }
    };
    // |p|₁ == 1 on every branch, so the length never collapses.
    p.normalize()
}

/// Diagonal orientation of grid cell `(row, col)`.
///
/// Cells are split along the diagonal parallel to the fold crease of the
/// quadrant they sit in, so no triangle straddles a crease. "Backslash" runs
/// from the cell's `(row, col)` corner to its `(row+1, col+1)` corner.
pub fn cell_is_backslash(row: u32, col: u32, grid_size: u32, oct_type: OctahedronType) -> bool {
    let half = grid_size as f32 / 2.0;
    let quadrant = (col as f32 / half).floor() as u32 + (row as f32 / half).floor() as u32;
    quadrant % 2 == oct_type as u32
}

/// Geometry of an octahedral impostor grid.
#[derive(Debug, Clone)]
pub struct OctahedralMesh {
    pub octahedron_type: OctahedronType,
    pub grid_size: u32,
    /// Planar lattice, centred on the origin in XZ, spanning a unit square.
    pub plane_points: Vec<Vec3>,
    /// Folded lattice at [`SPHERE_RADIUS`]; bake and view directions.
    pub octahedron_points: Vec<Vec3>,
    /// Unit normals, one per point.
    pub normals: Vec<Vec3>,
    /// Two CCW (seen from +Y) triangles per cell, row-major.
    pub indices: Vec<u32>,
}

/// Ray/mesh intersection against the folded surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// Index of the hit triangle (`indices[3*triangle..3*triangle+3]`).
    pub triangle: u32,
    pub distance: f32,
    pub point: Vec3,
}

impl OctahedralMesh {
    /// Builds the folded grid for `grid_size` cells per side.
    pub fn build(oct_type: OctahedronType, grid_size: u32) -> Result<Self, ConfigError> {
        if grid_size == 0 {
            return Err(ConfigError::GridSize(grid_size));
        }

        let n = grid_size;
        let stride = n + 1;
        let count = (stride * stride) as usize;

        let mut plane_points = Vec::with_capacity(count);
        for row in 0..=n {
            for col in 0..=n {
                plane_points.push(Vec3::new(
                    col as f32 / n as f32 - 0.5,
                    0.0,
                    row as f32 / n as f32 - 0.5,
                ));
            }
        }

        let mut indices = Vec::with_capacity((6 * n * n) as usize);
        for row in 0..n {
            for col in 0..n {
                let a = row * stride + col;
                let b = a + 1;
                let c = a + stride;
                let d = c + 1;

                if cell_is_backslash(row, col, n, oct_type) {
                    indices.extend_from_slice(&[a, c, d, a, d, b]);
                } else {
                    indices.extend_from_slice(&[a, c, b, c, d, b]);
                }
            }
        }

        let normals: Vec<Vec3> = plane_points
            .iter()
            .map(|p| decode_oct_uv(Vec2::new(p.x + 0.5, p.z + 0.5), oct_type))
            .collect();
        let octahedron_points = normals.iter().map(|n| *n * SPHERE_RADIUS).collect();

        Ok(Self {
            octahedron_type: oct_type,
            grid_size,
            plane_points,
            octahedron_points,
            normals,
            indices,
        })
    }

    #[inline]
    pub fn stride(&self) -> u32 {
        self.grid_size + 1
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.octahedron_points.len()
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    #[inline]
    pub fn lattice_index(&self, row: u32, col: u32) -> u32 {
        row * self.stride() + col
    }

    #[inline]
    pub fn row_col(&self, index: u32) -> (u32, u32) {
        (index / self.stride(), index % self.stride())
    }

    /// Unit view direction of lattice point `index`.
    #[inline]
    pub fn direction(&self, index: u32) -> Vec3 {
        self.normals[index as usize]
    }

    /// Closest front-or-back intersection of a ray with the folded surface
    /// (Möller–Trumbore). `dir` need not be normalised; distances are in
    /// units of `dir`.
    pub fn raycast(&self, origin: Vec3, dir: Vec3) -> Option<RayHit> {
        const EPS: f32 = 1e-7;
        let mut best: Option<RayHit> = None;

        for (t, tri) in self.indices.chunks_exact(3).enumerate() {
            let p0 = self.octahedron_points[tri[0] as usize];
            let p1 = self.octahedron_points[tri[1] as usize];
            let p2 = self.octahedron_points[tri[2] as usize];

            let e1 = p1 - p0;
            let e2 = p2 - p0;
            let h = dir.cross(e2);
            let det = e1.dot(h);
            if det.abs() < EPS {
                continue;
            }
            let inv = 1.0 / det;
            let s = origin - p0;
            let u = inv * s.dot(h);
            if !(0.0..=1.0).contains(&u) {
                continue;
            }
            let q = s.cross(e1);
            let v = inv * dir.dot(q);
            if v < 0.0 || u + v > 1.0 {
                continue;
            }
            let dist = inv * e2.dot(q);
            if dist <= EPS {
                continue;
            }
            if best.map_or(true, |b| dist < b.distance) {
                best = Some(RayHit {
                    triangle: t as u32,
                    distance: dist,
                    point: origin + dir * dist,
                });
            }
        }

        best
    }
}
