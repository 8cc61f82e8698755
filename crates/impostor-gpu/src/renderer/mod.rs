//! Off-screen rendering: the bake backend and a preview renderer that draws
//! impostor batches into a texture and reads it back.

pub mod atlas;
pub mod bake;
pub mod context;
pub mod pipelines;
pub mod readback;
pub mod targets;

use self::{
    atlas::GpuAtlas,
    context::GfxContext,
    pipelines::impostor::{ImpostorBatch, ImpostorPipeline, ALPHA_CUTOFF},
    readback::Readback,
    targets::Targets,
};
use crate::{camera::Camera, data::types::ImpostorParamsStd140 as ImpostorParams};
use anyhow::Result;
use image::RgbaImage;
use std::sync::Arc;

/// Parameter block for drawing `atlas` from `camera`. An atlas without a
/// layout selects placeholder mode.
pub fn impostor_params(camera: &Camera, atlas: &GpuAtlas) -> ImpostorParams {
    let (right, up) = camera.billboard_axes();
    let (sprites_per_side, cell_uv, placeholder) = match atlas.layout {
        Some(l) => (
            l.sprites_per_side as f32,
            l.cell_px as f32 / l.atlas_size as f32,
            0,
        ),
        None => (1.0, 1.0, 1),
    };
    ImpostorParams {
        view_proj: camera.view_proj(),
        camera_right: right.to_array(),
        sprites_per_side,
        camera_up: up.to_array(),
        placeholder,
        cell_uv,
        alpha_cutoff: ALPHA_CUTOFF,
        _pad: [0.0; 2],
    }
}

/// Owns the preview target and the impostor pipeline.
pub struct Renderer {
    pub gfx: Arc<GfxContext>,
    pub targets: Targets,
    pub impostors: ImpostorPipeline,
    readback: Readback,
}

impl Renderer {
    pub fn new(gfx: Arc<GfxContext>, width: u32, height: u32) -> Self {
        let targets = Targets::new(&gfx.device, width, height);
        let readback = Readback::new(&gfx.device, targets.width, targets.height);
        let impostors = ImpostorPipeline::new(&gfx.device);
        Self {
            gfx,
            targets,
            impostors,
            readback,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.targets = Targets::new(&self.gfx.device, width, height);
        self.readback = Readback::new(&self.gfx.device, self.targets.width, self.targets.height);
    }

    /// Draws `batches` over a transparent background and returns the frame.
    pub async fn render(&self, batches: &[&ImpostorBatch]) -> Result<RgbaImage> {
        let mut encoder = self
            .gfx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Preview Encoder"),
            });

        {
            let mut pass = self.targets.begin_clear_pass(&mut encoder, "Impostor Pass");
            for batch in batches {
                self.impostors.draw_batch(&mut pass, batch);
            }
        }

        self.readback.copy_from(&mut encoder, &self.targets.color_tex);
        self.gfx.queue.submit(std::iter::once(encoder.finish()));
        self.readback.read(&self.gfx.device).await
    }
}

#[cfg(test)]
mod tests {
    use super::bake::WgpuBakeBackend;
    use super::*;
    use crate::data::types::ImpostorInstanceRaw;
    use glam::Vec3;
    use octahedral::{
        bake_atlas, ImpostorInstance, MeshPart, OctahedralMesh, OctahedronType, SamplingCache,
        SourceMesh,
    };

    fn gpu() -> Option<Arc<GfxContext>> {
        match pollster::block_on(GfxContext::headless()) {
            Ok(gfx) => Some(Arc::new(gfx)),
            Err(e) => {
                eprintln!("skipping GPU test: {e}");
                None
            }
        }
    }

    fn triangle() -> SourceMesh {
        MeshPart::new(
            vec![Vec3::new(-1.0, 0.0, 0.0), Vec3::new(0.0, 1.2, 0.3), Vec3::new(0.8, 0.2, 1.0)],
            vec![0, 1, 2],
        )
        .with_color([0.9, 0.4, 0.1, 1.0])
        .into()
    }

    #[test]
    fn gpu_bake_fills_every_sprite() {
        let Some(gfx) = gpu() else { return };
        let backend = WgpuBakeBackend::new(gfx);
        let mesh = OctahedralMesh::build(OctahedronType::Full, 1).unwrap();
        let (atlas, report) =
            pollster::block_on(bake_atlas(&backend, &triangle(), &mesh, 128)).unwrap();

        assert_eq!(report.rendered, 4);
        let l = atlas.layout;
        for index in 0..4 {
            let (row, col) = l.sprite_of(index);
            let (x0, y0) = l.pixel_origin(row, col);
            let covered = (y0..y0 + l.cell_px)
                .flat_map(|y| (x0..x0 + l.cell_px).map(move |x| (x, y)))
                .any(|(x, y)| atlas.image.get_pixel(x, y)[3] > 0);
            assert!(covered, "sprite {index} is empty");
        }
    }

    #[test]
    fn preview_draws_baked_and_placeholder_impostors() {
        let Some(gfx) = gpu() else { return };
        let backend = WgpuBakeBackend::new(gfx.clone());
        let mesh = Arc::new(OctahedralMesh::build(OctahedronType::Hemi, 4).unwrap());
        let (atlas, _) =
            pollster::block_on(bake_atlas(&backend, &triangle(), &mesh, 256)).unwrap();
        let sampling = SamplingCache::build(mesh);

        let renderer = Renderer::new(gfx.clone(), 64, 64);
        let camera = Camera::new(Vec3::ZERO, 4.0, 1.0);
        let gpu_atlas = GpuAtlas::upload(&gfx.device, &gfx.queue, &atlas);

        let mut inst = ImpostorInstance::new(Vec3::ZERO, 1.0);
        inst.update_view(camera.position(), &sampling, 0.0);
        let mut batch = renderer.impostors.create_batch(&gfx.device, &gpu_atlas, 1);
        batch.write_params(&gfx.queue, &impostor_params(&camera, &gpu_atlas));
        batch.write_instances(&gfx.device, &gfx.queue, &[ImpostorInstanceRaw::from(&inst)]);

        let frame = pollster::block_on(renderer.render(&[&batch])).unwrap();
        assert_eq!(frame.dimensions(), (64, 64));
        assert_eq!(frame.get_pixel(0, 0)[3], 0);

        let placeholder = GpuAtlas::placeholder(&gfx.device, &gfx.queue);
        let mut pending = renderer.impostors.create_batch(&gfx.device, &placeholder, 1);
        pending.write_params(&gfx.queue, &impostor_params(&camera, &placeholder));
        pending.write_instances(&gfx.device, &gfx.queue, &[ImpostorInstanceRaw::from(&inst)]);
        let frame = pollster::block_on(renderer.render(&[&pending])).unwrap();
        let centre = frame.get_pixel(32, 32);
        assert!(centre[3] > 0 && centre[3] < 255);
    }
}
