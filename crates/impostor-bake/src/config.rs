use clap::Parser;
use octahedral::settings::{DEFAULT_ATLAS_SIZE, DEFAULT_DIRECTION_THRESHOLD_DEG, DEFAULT_GRID_SIZE};
use octahedral::{ImpostorSettings, OctahedronType};
use std::path::PathBuf;

/// `impostor-bake` - renders octahedral impostor atlases for OBJ meshes.
///
/// Every mesh is rendered from each point of an octahedral direction grid;
/// the sprites land in one square atlas written as PNG next to a JSON file
/// describing its layout.
#[derive(Parser, Debug)]
#[command(name = "impostor-bake", version, about, long_about = None)]
pub struct Config {
    /// An `.obj` file, or a directory searched recursively for them.
    #[arg(long, env = "IMPOSTOR_INPUT")]
    pub input: PathBuf,

    /// Where `<stem>_atlas.png` and `<stem>_atlas.json` are written.
    #[arg(long, env = "IMPOSTOR_OUTPUT_DIR", default_value = "impostors")]
    pub output_dir: PathBuf,

    /// Cells per side of the direction grid; the atlas holds (N+1)² sprites.
    #[arg(long, env = "IMPOSTOR_GRID_SIZE", default_value_t = DEFAULT_GRID_SIZE)]
    pub grid_size: u32,

    /// Atlas width and height in pixels.
    #[arg(long, env = "IMPOSTOR_ATLAS_SIZE", default_value_t = DEFAULT_ATLAS_SIZE)]
    pub atlas_size: u32,

    /// `hemi` (upper hemisphere) or `full` (whole sphere).
    #[arg(long, env = "IMPOSTOR_OCTAHEDRON", default_value_t = OctahedronType::Hemi)]
    pub octahedron: OctahedronType,

    /// View-direction change, in degrees, before a preview instance resamples.
    #[arg(long, env = "IMPOSTOR_DIRECTION_THRESHOLD_DEG", default_value_t = DEFAULT_DIRECTION_THRESHOLD_DEG)]
    pub direction_threshold_deg: f32,

    /// Bake with the CPU rasteriser even if a GPU is available.
    #[arg(long, default_value_t = false)]
    pub cpu: bool,

    /// Also write `<stem>_preview.png`: a few impostors drawn with the GPU
    /// billboard pipeline.
    #[arg(long, default_value_t = false)]
    pub preview: bool,

    /// Re-bake meshes whose atlas already exists.
    #[arg(long, default_value_t = false)]
    pub overwrite: bool,

    /// Write bake metrics in Prometheus text format to this file on exit.
    #[arg(long, env = "IMPOSTOR_METRICS_FILE")]
    pub metrics_file: Option<PathBuf>,
}

impl Config {
    pub fn settings(&self) -> ImpostorSettings {
        ImpostorSettings::new(self.grid_size, self.atlas_size, self.octahedron)
            .with_direction_threshold(self.direction_threshold_deg.to_radians())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_library() {
        let config = Config::try_parse_from(["impostor-bake", "--input", "tree.obj"]).unwrap();
        let s = config.settings();
        assert_eq!(s.grid_size, ImpostorSettings::default().grid_size);
        assert_eq!(s.atlas_size, ImpostorSettings::default().atlas_size);
        assert_eq!(s.octahedron_type, OctahedronType::Hemi);
        assert!(!config.cpu && !config.preview);
    }

    #[test]
    fn octahedron_flag_parses_names_and_numbers() {
        for (arg, expected) in [("full", OctahedronType::Full), ("0", OctahedronType::Hemi)] {
            let config = Config::try_parse_from([
                "impostor-bake",
                "--input",
                "x.obj",
                "--octahedron",
                arg,
            ])
            .unwrap();
            assert_eq!(config.octahedron, expected);
        }
        assert!(Config::try_parse_from([
            "impostor-bake",
            "--input",
            "x.obj",
            "--octahedron",
            "cube",
        ])
        .is_err());
    }
}
