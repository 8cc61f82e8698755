//! Error taxonomy for impostor construction and baking.
//!
//! Geometric degeneracy (zero-length directions, collapsed barycentric
//! triangles) is deliberately absent: those cases resolve to fallback values
//! at the call site and never surface as errors.

use thiserror::Error;

/// Invalid impostor configuration. Fatal to the call that triggered it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("grid size must be at least 1 (got {0})")]
    GridSize(u32),

    #[error("atlas of {atlas_size}px cannot hold {sprites_per_side}x{sprites_per_side} sprites")]
    AtlasTooSmall { atlas_size: u32, sprites_per_side: u32 },

    #[error("unknown octahedron type '{0}'")]
    UnknownOctahedronType(String),

    #[error("direction threshold must be finite and non-negative (got {0})")]
    DirectionThreshold(f32),
}

/// Failure of a single sprite render/read-back. Recovered by the baker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cell {index}: {reason}")]
pub struct CellError {
    pub index: u32,
    pub reason: String,
}

impl CellError {
    pub fn new(index: u32, reason: impl Into<String>) -> Self {
        Self { index, reason: reason.into() }
    }
}

/// Whole-bake failure, shared with every requester awaiting that bake.
#[derive(Debug, Error)]
pub enum BakeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("source mesh {0} has no triangles")]
    EmptyMesh(u64),

    #[error("failed to acquire an off-screen rendering surface: {0}")]
    Surface(String),

    #[error("renderer initialisation failed: {0}")]
    RendererInit(String),
}
