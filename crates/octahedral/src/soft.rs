//! CPU reference rasteriser implementing [`BakeBackend`].
//!
//! Used where no GPU adapter is available (CI, headless servers) and as the
//! ground truth for the wgpu backend. Flat-coloured, Lambert-lit,
//! double-sided, depth-tested; no anti-aliasing.

use crate::bake::{BakeBackend, BakeView, ViewRenderer};
use crate::error::{BakeError, CellError};
use crate::scene::BakeScene;
use async_trait::async_trait;
use glam::Vec3;
use image::{Rgba, RgbaImage};

/// World-space light used for every bake view.
pub const BAKE_LIGHT_DIR: Vec3 = Vec3::new(0.4, 1.0, 0.3);
pub const BAKE_AMBIENT: f32 = 0.35;

#[derive(Debug, Clone, Copy)]
pub struct SoftwareBackend {
    pub light_dir: Vec3,
    pub ambient: f32,
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self {
            light_dir: BAKE_LIGHT_DIR.normalize(),
            ambient: BAKE_AMBIENT,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WorldTri {
    p: [Vec3; 3],
    n: [Vec3; 3],
    color: [f32; 4],
}

pub struct SoftwareRenderer {
    tris: Vec<WorldTri>,
    size: u32,
    light_dir: Vec3,
    ambient: f32,
    depth: Vec<f32>,
}

#[async_trait]
impl BakeBackend for SoftwareBackend {
    async fn prepare(
        &self,
        scene: &BakeScene,
        cell_px: u32,
    ) -> Result<Box<dyn ViewRenderer>, BakeError> {
        if cell_px == 0 {
            return Err(BakeError::Surface("zero-sized view".into()));
        }

        let (vertices, indices) = scene.flatten();
        let tris = indices
            .chunks_exact(3)
            .map(|idx| {
                let v = [0, 1, 2].map(|k| vertices[idx[k] as usize]);
                WorldTri {
                    p: v.map(|v| v.position),
                    n: v.map(|v| v.normal),
                    color: v[0].color,
                }
            })
            .collect();

        Ok(Box::new(SoftwareRenderer {
            tris,
            size: cell_px,
            light_dir: self.light_dir,
            ambient: self.ambient,
            depth: vec![f32::INFINITY; (cell_px * cell_px) as usize],
        }))
    }
}

#[inline]
fn edge(a: (f32, f32), b: (f32, f32), p: (f32, f32)) -> f32 {
    (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0)
}

#[async_trait]
impl ViewRenderer for SoftwareRenderer {
    async fn render_view(&mut self, view: &BakeView) -> Result<RgbaImage, CellError> {
        let size = self.size;
        let s = size as f32;
        let vp = view.view_proj();
        let mut out = RgbaImage::new(size, size);
        self.depth.fill(f32::INFINITY);

        for tri in &self.tris {
            let ndc = tri.p.map(|p| vp.project_point3(p));
            let scr = ndc.map(|v| ((v.x * 0.5 + 0.5) * s, (0.5 - v.y * 0.5) * s));

            let area = edge(scr[0], scr[1], scr[2]);
            if area.abs() < 1e-12 {
                continue;
            }

            let min_x = scr.iter().map(|p| p.0).fold(f32::MAX, f32::min).floor().max(0.0) as u32;
            let max_x = scr.iter().map(|p| p.0).fold(f32::MIN, f32::max).ceil().min(s) as u32;
            let min_y = scr.iter().map(|p| p.1).fold(f32::MAX, f32::min).floor().max(0.0) as u32;
            let max_y = scr.iter().map(|p| p.1).fold(f32::MIN, f32::max).ceil().min(s) as u32;

            for y in min_y..max_y {
                for x in min_x..max_x {
                    let p = (x as f32 + 0.5, y as f32 + 0.5);
                    let w0 = edge(scr[1], scr[2], p) / area;
                    let w1 = edge(scr[2], scr[0], p) / area;
                    let w2 = edge(scr[0], scr[1], p) / area;
                    if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                        continue;
                    }

                    let z = w0 * ndc[0].z + w1 * ndc[1].z + w2 * ndc[2].z;
                    let slot = (y * size + x) as usize;
                    if !(0.0..=1.0).contains(&z) || z >= self.depth[slot] {
                        continue;
                    }
                    self.depth[slot] = z;

                    let n = (tri.n[0] * w0 + tri.n[1] * w1 + tri.n[2] * w2).normalize_or_zero();
                    let lit = self.ambient + (1.0 - self.ambient) * n.dot(self.light_dir).abs();
                    let c = tri.color;
                    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
                    out.put_pixel(
                        x,
                        y,
                        Rgba([to_u8(c[0] * lit), to_u8(c[1] * lit), to_u8(c[2] * lit), to_u8(c[3])]),
                    );
                }
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{MeshPart, SourceMesh};

    fn quad_facing_up() -> SourceMesh {
        MeshPart::new(
            vec![
                Vec3::new(-1.0, 0.0, -1.0),
                Vec3::new(1.0, 0.0, -1.0),
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(-1.0, 0.0, 1.0),
            ],
            vec![0, 2, 1, 0, 3, 2],
        )
        .with_color([1.0, 0.0, 0.0, 1.0])
        .into()
    }

    async fn render(dir: Vec3, size: u32) -> RgbaImage {
        let scene = BakeScene::isolate(&quad_facing_up()).unwrap();
        let mut r = SoftwareBackend::default().prepare(&scene, size).await.unwrap();
        r.render_view(&BakeView::new(0, 0, 0, dir)).await.unwrap()
    }

    #[tokio::test]
    async fn top_view_covers_the_middle_of_the_sprite() {
        let img = render(Vec3::Y, 32).await;
        assert_eq!(img.dimensions(), (32, 32));
        let centre = img.get_pixel(16, 16);
        assert_eq!(centre[3], 255);
        assert!(centre[0] > 0 && centre[1] == 0 && centre[2] == 0);
        // The quad's circumscribed sphere is the reference sphere, so the
        // sprite corners stay empty.
        assert_eq!(img.get_pixel(0, 0)[3], 0);
    }

    #[tokio::test]
    async fn edge_on_view_is_empty_but_bottom_view_is_lit() {
        let side = render(Vec3::X, 32).await;
        assert!(side.pixels().all(|p| p[3] == 0));

        let below = render(Vec3::NEG_Y, 32).await;
        assert!(below.pixels().any(|p| p[3] == 255));
    }
}
