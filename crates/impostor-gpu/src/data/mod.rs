//! Data structures shared between the CPU side and the WGSL shaders.

pub mod types;

pub use self::types::{BakeUniformStd140, BakeVertex, ImpostorInstanceRaw, ImpostorParamsStd140};
