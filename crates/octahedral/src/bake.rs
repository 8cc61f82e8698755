//! Atlas baking: one orthographic view per lattice point, composited into a
//! square sprite atlas.
//!
//! The rendering surface is abstract ([`BakeBackend`] / [`ViewRenderer`]) so
//! the same planner and compositor drive the wgpu backend, the software
//! rasteriser and test doubles.

use crate::error::{BakeError, CellError, ConfigError};
use crate::geometry::OctahedralMesh;
use crate::scene::{BakeScene, BoundingSphere, SourceMesh, REFERENCE_RADIUS};
use crate::settings::ImpostorSettings;
use async_trait::async_trait;
use glam::{Mat4, Vec2, Vec3};
use image::{imageops, RgbaImage};
use std::time::Instant;

/// Eye distance from the focus point, in reference radii.
pub const CAMERA_DISTANCE: f32 = 2.0 * REFERENCE_RADIUS;
const CAMERA_NEAR: f32 = CAMERA_DISTANCE - REFERENCE_RADIUS - 0.01;
const CAMERA_FAR: f32 = CAMERA_DISTANCE + REFERENCE_RADIUS + 0.01;

/// Sprite placement inside the atlas: one sprite per lattice point.
///
/// A grid of `N` cells has `N+1` lattice points per side, edges included, so
/// the atlas is split into `(N+1)²` sprites of `floor(atlas / (N+1))` pixels
/// rather than `N²` cells of `floor(atlas / N)`. Lattice index `i` lives at
/// row `i / (N+1)`, column `i % (N+1)`; the impostor shader addresses sprites
/// with the same stride. A grid size of 1 therefore bakes 4 sprites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasLayout {
    pub grid_size: u32,
    pub sprites_per_side: u32,
    pub cell_px: u32,
    pub atlas_size: u32,
}

impl AtlasLayout {
    pub fn new(grid_size: u32, atlas_size: u32) -> Result<Self, ConfigError> {
        if grid_size == 0 {
            return Err(ConfigError::GridSize(grid_size));
        }
        let sprites_per_side = grid_size + 1;
        let cell_px = atlas_size / sprites_per_side;
        if cell_px == 0 {
            return Err(ConfigError::AtlasTooSmall {
                atlas_size,
                sprites_per_side,
            });
        }
        Ok(Self {
            grid_size,
            sprites_per_side,
            cell_px,
            atlas_size,
        })
    }

    pub fn from_settings(settings: &ImpostorSettings) -> Result<Self, ConfigError> {
        Self::new(settings.grid_size, settings.atlas_size)
    }

    /// `(row, col)` of the sprite holding lattice point `index`.
    #[inline]
    pub fn sprite_of(&self, index: u32) -> (u32, u32) {
        (index / self.sprites_per_side, index % self.sprites_per_side)
    }

    /// Top-left pixel of sprite `(row, col)`.
    #[inline]
    pub fn pixel_origin(&self, row: u32, col: u32) -> (u32, u32) {
        (col * self.cell_px, row * self.cell_px)
    }

    /// Normalised atlas rectangle `(min, max)` of lattice point `index`.
    pub fn uv_rect(&self, index: u32) -> (Vec2, Vec2) {
        let (row, col) = self.sprite_of(index);
        let (x, y) = self.pixel_origin(row, col);
        let inv = 1.0 / self.atlas_size as f32;
        let min = Vec2::new(x as f32, y as f32) * inv;
        (min, min + Vec2::splat(self.cell_px as f32 * inv))
    }
}

/// Camera for one bake view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BakeView {
    /// Lattice index of the view direction.
    pub index: u32,
    pub row: u32,
    pub col: u32,
    /// Unit direction from the focus point towards the eye.
    pub direction: Vec3,
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Half width/height of the orthographic frustum.
    pub half_extent: f32,
}

impl BakeView {
    pub fn new(index: u32, row: u32, col: u32, direction: Vec3) -> Self {
        Self {
            index,
            row,
            col,
            direction,
            eye: direction * CAMERA_DISTANCE,
            target: Vec3::ZERO,
            up: bake_up(direction),
            half_extent: REFERENCE_RADIUS,
        }
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    /// Right-handed orthographic projection, depth in `[0,1]`.
    pub fn projection(&self) -> Mat4 {
        let h = self.half_extent;
        Mat4::orthographic_rh(-h, h, -h, h, CAMERA_NEAR, CAMERA_FAR)
    }

    pub fn view_proj(&self) -> Mat4 {
        self.projection() * self.view()
    }
}

/// Up vector that stays well-defined when looking along ±Y.
pub fn bake_up(direction: Vec3) -> Vec3 {
    if direction.y.abs() > 0.999 {
        Vec3::NEG_Z * direction.y.signum()
    } else {
        Vec3::Y
    }
}

/// One view per lattice point, both edges included: `(N+1)²` views.
pub fn plan_views(mesh: &OctahedralMesh) -> Vec<BakeView> {
    (0..mesh.vertex_count() as u32)
        .map(|index| {
            let (row, col) = mesh.row_col(index);
            BakeView::new(index, row, col, mesh.direction(index))
        })
        .collect()
}

/// Renders individual views of one prepared scene.
#[async_trait]
pub trait ViewRenderer: Send {
    /// Renders `view` and returns a `cell_px × cell_px` RGBA8 image, row 0 at
    /// the top. A failure affects this view only.
    async fn render_view(&mut self, view: &BakeView) -> Result<RgbaImage, CellError>;
}

/// Source of off-screen rendering surfaces.
#[async_trait]
pub trait BakeBackend: Send + Sync {
    /// Uploads `scene` and allocates surfaces for `cell_px` views. Failure
    /// here aborts the whole bake.
    async fn prepare(
        &self,
        scene: &BakeScene,
        cell_px: u32,
    ) -> Result<Box<dyn ViewRenderer>, BakeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    ClampToEdge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerDesc {
    pub address_mode: AddressMode,
    pub filter: FilterMode,
    pub mipmaps: bool,
}

impl SamplerDesc {
    pub const ATLAS: Self = Self {
        address_mode: AddressMode::ClampToEdge,
        filter: FilterMode::Linear,
        mipmaps: false,
    };
}

/// Finished atlas texture data.
#[derive(Debug, Clone)]
pub struct AtlasTexture {
    pub image: RgbaImage,
    pub layout: AtlasLayout,
    pub sampler: SamplerDesc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BakeReport {
    /// World-space bounding sphere of the source; every sprite frames it.
    pub source_bounds: BoundingSphere,
    pub rendered: u32,
    /// Lattice indices whose sprite was left transparent.
    pub failed: Vec<u32>,
}

/// Bakes `source` from every lattice direction of `mesh` into an atlas of
/// `atlas_size` pixels.
pub async fn bake_atlas(
    backend: &dyn BakeBackend,
    source: &SourceMesh,
    mesh: &OctahedralMesh,
    atlas_size: u32,
) -> Result<(AtlasTexture, BakeReport), BakeError> {
    let layout = AtlasLayout::new(mesh.grid_size, atlas_size)?;
    let scene = BakeScene::isolate(source)?;
    let started = Instant::now();

    log::info!(
        "Baking {} ({} tris): {} views, {}px sprites, {}px atlas",
        source.id(),
        scene.triangle_count(),
        mesh.vertex_count(),
        layout.cell_px,
        layout.atlas_size
    );

    let mut renderer = backend.prepare(&scene, layout.cell_px).await?;
    let mut image = RgbaImage::new(layout.atlas_size, layout.atlas_size);
    let mut report = BakeReport {
        source_bounds: scene.source_bounds,
        rendered: 0,
        failed: Vec::new(),
    };

    for view in plan_views(mesh) {
        let sprite = match renderer.render_view(&view).await {
            Ok(sprite) if sprite.dimensions() == (layout.cell_px, layout.cell_px) => sprite,
            Ok(sprite) => {
                log::warn!(
                    "Cell {} returned {:?}, expected {}px; left blank",
                    view.index,
                    sprite.dimensions(),
                    layout.cell_px
                );
                report.failed.push(view.index);
                continue;
            }
            Err(e) => {
                log::warn!("{e}; left blank");
                report.failed.push(view.index);
                continue;
            }
        };

        let (x, y) = layout.pixel_origin(view.row, view.col);
        imageops::replace(&mut image, &sprite, x as i64, y as i64);
        report.rendered += 1;
    }
    // Surfaces and uploaded geometry go away with the renderer.
    drop(renderer);

    log::info!(
        "Baked {} in {:.1} ms ({} sprites, {} blank)",
        source.id(),
        started.elapsed().as_secs_f64() * 1e3,
        report.rendered,
        report.failed.len()
    );

    Ok((
        AtlasTexture {
            image,
            layout,
            sampler: SamplerDesc::ATLAS,
        },
        report,
    ))
}
