mod data;
mod errors;
mod etl;
mod geo;
mod osmpbf;
mod palette;

use std::env;
use std::fs::{create_dir_all, File};
use std::io;
use std::path::Path;

use log::info;
use serde::Deserialize;
use structured_logger::json::new_writer;
use structured_logger::Builder;

use crate::errors::{Error, ErrorKind, Result};
use crate::etl::draw_map::{CanvasConfig, DrawMapEtl, PngCompression, Styling};
use crate::etl::extract_rails::ExtractRailsEtl;
use crate::etl::Etl;
use crate::geo::Limits;
use crate::palette::Palette;

const DEFAULT_CONFIG_PATH: &str = "config/default.json";

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct UserConfig {
    /// Holds `raw/rails.osm.pbf`; the cache and the image are written below it.
    pub data_dir: String,
    pub limits: Limits,
    pub palette: Palette,
    pub canvas: CanvasConfig,
    pub styling: Styling,
    pub png_compression: PngCompression,
    /// Drop the cached network before extracting.
    pub rebuild_cache: bool,
}

impl Default for UserConfig {
    fn default() -> Self {
        UserConfig {
            data_dir: "data".to_string(),
            limits: Limits::default(),
            palette: Palette::default(),
            canvas: CanvasConfig::default(),
            styling: Styling::default(),
            png_compression: PngCompression::default(),
            rebuild_cache: false,
        }
    }
}

/// Reads the config at `path`, or the default location when no path is given.
/// Built-in defaults apply only when the default location does not exist.
fn load_user_config(path: Option<&str>) -> Result<UserConfig> {
    let path = match path {
        Some(path) => path,
        None => {
            if !Path::new(DEFAULT_CONFIG_PATH).try_exists()? {
                info!(path = DEFAULT_CONFIG_PATH; "No config file, using defaults");
                return Ok(UserConfig::default());
            }
            DEFAULT_CONFIG_PATH
        },
    };
    let file = File::open(path).map_err(|err| {
        Error::new(ErrorKind::Config, format!("Could not open config file {}: {}", path, err))
    })?;
    let config = serde_json::from_reader(io::BufReader::new(file))?;
    info!(path = path; "Loaded config");
    Ok(config)
}

fn setup_logging() {
    Builder::with_level("info")
        .with_target_writer("*", new_writer(io::stdout()))
        .init();
}

fn main() -> Result<()> {
    setup_logging();

    let config_path = env::args().nth(1);
    let user_config = load_user_config(config_path.as_deref())?;
    let data_dir = Path::new(&user_config.data_dir);
    create_dir_all(data_dir)?;

    let mut extract_rails = ExtractRailsEtl::new(&user_config);
    if user_config.rebuild_cache {
        extract_rails.clean(data_dir)?;
    }
    extract_rails.process(data_dir)?;

    DrawMapEtl::new(&user_config).process(data_dir)?;
    let output_path = DrawMapEtl::output_path(data_dir).display().to_string();
    info!(path = output_path.as_str(); "Map written");

    Ok(())
}
