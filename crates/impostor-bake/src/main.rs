mod config;
mod obj;

use crate::config::Config;
use anyhow::{Context, Result};
use clap::Parser;
use glam::Vec3;
use impostor_gpu::{
    camera::Camera, data::ImpostorInstanceRaw, impostor_params, GfxContext, GpuAtlas, Renderer,
    WgpuBakeBackend,
};
use log::{info, warn};
use octahedral::{
    AtlasCache, AtlasEntry, BakeBackend, BakeMetrics, ImpostorInstance, ImpostorSettings,
    SamplingRegistry, SoftwareBackend, SourceMesh,
};
use prometheus::{Encoder, TextEncoder};
use rayon::prelude::*;
use serde::Serialize;
use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};
use walkdir::WalkDir;

const PREVIEW_SIZE: u32 = 512;

/// Layout sidecar written next to each atlas PNG.
#[derive(Debug, Serialize)]
struct AtlasMeta<'a> {
    source: &'a Path,
    octahedron_type: octahedral::OctahedronType,
    grid_size: u32,
    atlas_size: u32,
    /// Sprites per side (N+1); sprite (row, col) is lattice index row*(N+1)+col.
    sprites_per_side: u32,
    cell_px: u32,
    /// World-space bounding sphere the sprites were framed on.
    bounds_center: [f32; 3],
    bounds_radius: f32,
    rendered: u32,
    failed_cells: &'a [u32],
}

fn collect_inputs(input: &Path) -> Vec<PathBuf> {
    if input.is_file() {
        return vec![input.to_path_buf()];
    }
    let mut paths: Vec<PathBuf> = WalkDir::new(input)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| obj::is_obj(p))
        .collect();
    paths.sort();
    paths
}

fn output_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("mesh")
        .to_owned()
}

fn write_meta(path: &Path, source: &Path, entry: &AtlasEntry) -> Result<()> {
    let layout = entry.texture.layout;
    let bounds = entry.report.source_bounds;
    let meta = AtlasMeta {
        source,
        octahedron_type: entry.key.octahedron_type,
        grid_size: layout.grid_size,
        atlas_size: layout.atlas_size,
        sprites_per_side: layout.sprites_per_side,
        cell_px: layout.cell_px,
        bounds_center: bounds.center.to_array(),
        bounds_radius: bounds.radius,
        rendered: entry.report.rendered,
        failed_cells: &entry.report.failed,
    };
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &meta)?;
    Ok(())
}

/// Draws a 3×3 grid of impostors from an orbit camera.
fn write_preview(
    renderer: &Renderer,
    entry: &AtlasEntry,
    settings: &ImpostorSettings,
    path: &Path,
) -> Result<()> {
    let gfx = &renderer.gfx;
    let atlas = GpuAtlas::upload(&gfx.device, &gfx.queue, &entry.texture);
    let camera = Camera::new(Vec3::ZERO, 9.0, 1.0);

    let instances: Vec<ImpostorInstanceRaw> = (-1..=1)
        .flat_map(|x| (-1..=1).map(move |z| Vec3::new(x as f32, 0.0, z as f32) * 2.5))
        .map(|position| {
            let mut inst = ImpostorInstance::new(position, 1.0);
            inst.update_view(camera.position(), &entry.sampling, settings.direction_threshold_rad);
            ImpostorInstanceRaw::from(&inst)
        })
        .collect();

    let mut batch = renderer
        .impostors
        .create_batch(&gfx.device, &atlas, instances.len() as u32);
    batch.write_params(&gfx.queue, &impostor_params(&camera, &atlas));
    batch.write_instances(&gfx.device, &gfx.queue, &instances);

    let frame = pollster::block_on(renderer.render(&[&batch]))?;
    frame
        .save(path)
        .with_context(|| format!("saving {}", path.display()))?;
    Ok(())
}

fn process_one_mesh(
    path: &Path,
    mesh: &Arc<SourceMesh>,
    cache: &AtlasCache,
    preview: Option<&Renderer>,
    config: &Config,
    settings: &ImpostorSettings,
) -> Result<()> {
    let stem = output_stem(path);
    let png_path = config.output_dir.join(format!("{stem}_atlas.png"));
    let json_path = config.output_dir.join(format!("{stem}_atlas.json"));

    if png_path.exists() && !config.overwrite {
        info!("Skipping {} ({} exists)", path.display(), png_path.display());
        return Ok(());
    }

    info!("Processing {} -> {}", path.display(), png_path.display());
    let t0 = Instant::now();

    let entry = pollster::block_on(cache.get_or_bake(mesh, settings))
        .with_context(|| format!("baking {}", path.display()))?;

    entry
        .texture
        .image
        .save(&png_path)
        .with_context(|| format!("saving {}", png_path.display()))?;
    write_meta(&json_path, path, &entry)?;

    if let Some(renderer) = preview {
        let preview_path = config.output_dir.join(format!("{stem}_preview.png"));
        write_preview(renderer, &entry, settings, &preview_path)?;
    }

    info!(
        "Wrote {} ({} sprites, {} blank) in {:.2}s",
        png_path.display(),
        entry.report.rendered,
        entry.report.failed.len(),
        t0.elapsed().as_secs_f64()
    );
    Ok(())
}

fn write_metrics(path: &Path, metrics: &BakeMetrics) -> Result<()> {
    let mut buf = Vec::new();
    TextEncoder::new().encode(&metrics.registry.gather(), &mut buf)?;
    fs::write(path, buf).with_context(|| format!("writing {}", path.display()))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    let settings = config.settings();
    settings.validate()?;
    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("creating {}", config.output_dir.display()))?;

    let inputs = collect_inputs(&config.input);
    if inputs.is_empty() {
        warn!("No .obj files under {}", config.input.display());
        return Ok(());
    }

    // Parse in parallel; bakes share one device and run one after another.
    info!("Parsing {} OBJ files...", inputs.len());
    let meshes: Vec<(PathBuf, Arc<SourceMesh>)> = inputs
        .par_iter()
        .filter_map(|path| match obj::load(path) {
            Ok(mesh) => Some((path.clone(), Arc::new(mesh))),
            Err(err) => {
                warn!("Error loading {}: {:#}", path.display(), err);
                None
            }
        })
        .collect();

    let gfx = if config.cpu {
        None
    } else {
        match pollster::block_on(GfxContext::headless()) {
            Ok(gfx) => Some(Arc::new(gfx)),
            Err(err) => {
                warn!("{err:#}; baking on the CPU");
                None
            }
        }
    };

    let backend: Arc<dyn BakeBackend> = match &gfx {
        Some(gfx) => Arc::new(WgpuBakeBackend::new(gfx.clone())),
        None => Arc::new(SoftwareBackend::default()),
    };
    let metrics = Arc::new(BakeMetrics::new()?);
    let cache = AtlasCache::new(backend, Arc::new(SamplingRegistry::new()), metrics.clone());

    let preview = match (&gfx, config.preview) {
        (Some(gfx), true) => Some(Renderer::new(gfx.clone(), PREVIEW_SIZE, PREVIEW_SIZE)),
        (None, true) => {
            warn!("--preview needs a GPU; skipped");
            None
        }
        _ => None,
    };

    info!(
        "Baking {} meshes: {} grid {}, atlas {}px",
        meshes.len(),
        settings.octahedron_type,
        settings.grid_size,
        settings.atlas_size
    );

    let mut failures = 0usize;
    for (path, mesh) in &meshes {
        if let Err(err) =
            process_one_mesh(path, mesh, &cache, preview.as_ref(), &config, &settings)
        {
            failures += 1;
            warn!("Error processing {}: {:#}", path.display(), err);
        }
    }

    info!(
        "Done: {} atlases, {} failed, {} cells blank",
        cache.len(),
        failures,
        metrics.cells_failed_total.get()
    );

    if let Some(path) = &config.metrics_file {
        write_metrics(path, &metrics)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stems_name_the_outputs() {
        assert_eq!(output_stem(Path::new("assets/trees/Oak_01.obj")), "Oak_01");
        assert_eq!(output_stem(Path::new("/")), "mesh");
    }

    #[test]
    fn sidecar_describes_the_layout() {
        let mesh = Arc::new(
            obj::parse_obj("v -1 0 0\nv 0 1 0.3\nv 0.8 0.2 1\nf 1 2 3\n".as_bytes()).unwrap(),
        );
        let cache = AtlasCache::new(
            Arc::new(SoftwareBackend::default()),
            Arc::new(SamplingRegistry::new()),
            Arc::new(BakeMetrics::new().unwrap()),
        );
        let settings = ImpostorSettings::new(2, 96, octahedral::OctahedronType::Full);
        let entry = pollster::block_on(cache.get_or_bake(&mesh, &settings)).unwrap();

        let dir = std::env::temp_dir().join(format!("impostor-bake-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let json = dir.join("tri_atlas.json");
        write_meta(&json, Path::new("tri.obj"), &entry).unwrap();

        let v: serde_json::Value = serde_json::from_slice(&fs::read(&json).unwrap()).unwrap();
        assert_eq!(v["octahedron_type"], "full");
        assert_eq!(v["sprites_per_side"], 3);
        assert_eq!(v["cell_px"], 32);
        assert_eq!(v["rendered"], 9);
        let center: Vec<f64> = serde_json::from_value(v["bounds_center"].clone()).unwrap();
        assert!((center[0] + 0.1).abs() < 1e-5 && (center[1] - 0.5).abs() < 1e-5);
        assert!((center[2] - 0.5).abs() < 1e-5);
        fs::remove_dir_all(&dir).ok();
    }
}
