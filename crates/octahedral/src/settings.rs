//! Impostor configuration shared by the baker, the sampling cache and the
//! per-frame update.

use crate::error::ConfigError;
use crate::geometry::OctahedronType;
use serde::{Deserialize, Serialize};

pub const DEFAULT_GRID_SIZE: u32 = 12;
pub const DEFAULT_ATLAS_SIZE: u32 = 2048;
pub const DEFAULT_DIRECTION_THRESHOLD_DEG: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpostorSettings {
    /// Cells per side of the octahedral grid (N).
    pub grid_size: u32,
    /// Width and height of the square atlas, in pixels.
    pub atlas_size: u32,
    pub octahedron_type: OctahedronType,
    /// Minimum view-direction change, in radians, before an instance resamples.
    pub direction_threshold_rad: f32,
}

impl Default for ImpostorSettings {
    fn default() -> Self {
        Self {
            grid_size: DEFAULT_GRID_SIZE,
            atlas_size: DEFAULT_ATLAS_SIZE,
            octahedron_type: OctahedronType::Hemi,
            direction_threshold_rad: DEFAULT_DIRECTION_THRESHOLD_DEG.to_radians(),
        }
    }
}

impl ImpostorSettings {
    pub fn new(grid_size: u32, atlas_size: u32, octahedron_type: OctahedronType) -> Self {
        Self {
            grid_size,
            atlas_size,
            octahedron_type,
            ..Self::default()
        }
    }

    pub fn with_direction_threshold(mut self, radians: f32) -> Self {
        self.direction_threshold_rad = radians;
        self
    }

    /// One sprite per lattice point, including both edges.
    #[inline]
    pub fn sprites_per_side(&self) -> u32 {
        self.grid_size + 1
    }

    #[inline]
    pub fn cell_px(&self) -> u32 {
        self.atlas_size / self.sprites_per_side()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid_size == 0 {
            return Err(ConfigError::GridSize(self.grid_size));
        }
        if self.cell_px() == 0 {
            return Err(ConfigError::AtlasTooSmall {
                atlas_size: self.atlas_size,
                sprites_per_side: self.sprites_per_side(),
            });
        }
        if !self.direction_threshold_rad.is_finite() || self.direction_threshold_rad < 0.0 {
            return Err(ConfigError::DirectionThreshold(self.direction_threshold_rad));
        }
        Ok(())
    }
}
