//! Octahedral impostors.
//!
//! A mesh is rendered from every point of an octahedral direction lattice
//! into one sprite atlas. At runtime each instance maps its view direction
//! back onto the lattice and blends the three nearest sprites.
//!
//! - [`geometry`]: the lattice itself, planar and folded onto the sphere.
//! - [`sampling`]: per-cell lookup tables mapping a direction to three
//!   weighted lattice points.
//! - [`bake`]: view planning and atlas compositing over an abstract
//!   rendering backend; [`soft`] is a CPU implementation of that backend.
//! - [`atlas`]: request deduplication and the completed-atlas cache.
//! - [`instance`]: per-frame direction update with hysteresis.
//!
//! Lattice conventions: `u` runs along +X (columns) and `v` along +Z (rows);
//! lattice index is `row * (N+1) + col`, and sprite `(row, col)` of the atlas
//! holds the view from that index.

pub mod atlas;
pub mod bake;
pub mod error;
pub mod geometry;
pub mod instance;
pub mod metrics;
pub mod sampling;
pub mod scene;
pub mod settings;
pub mod soft;

pub use atlas::{AtlasCache, AtlasEntry, AtlasHandle, AtlasKey, AtlasState, BakeResult};
pub use bake::{
    bake_atlas, plan_views, AtlasLayout, AtlasTexture, BakeBackend, BakeReport, BakeView,
    SamplerDesc, ViewRenderer,
};
pub use error::{BakeError, CellError, ConfigError};
pub use geometry::{decode_oct_uv, OctahedralMesh, OctahedronType, SPHERE_RADIUS};
pub use instance::{ImpostorInstance, SamplingState};
pub use metrics::BakeMetrics;
pub use sampling::{encode_direction_to_oct_uv, FaceSample, SamplingCache, SamplingRegistry};
pub use scene::{BakeScene, BoundingSphere, MeshId, MeshPart, SourceMesh, WorldVertex};
pub use settings::ImpostorSettings;
pub use soft::SoftwareBackend;
