//! Engine configuration.
//!
//! Collects the tree, LOD, source and fly-over settings in one TOML file.
//! Every section has defaults, so a partial file (or none at all) works.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::{info, warn};

use geotile_common::MAX_LEVEL;
use geotile_kernel::{CacheConfig, GlobeLodConfig, ProjectedLodConfig, TreeConfig};
use geotile_sources::{GlobeSourceConfig, ImagePyramidConfig, ProjectedSourceConfig};

/// Configuration file name.
pub const CONFIG_FILE: &str = "geotile.toml";

/// Upper bound on fetch workers per tree.
const MAX_WORKER_THREADS: usize = 64;

/// Which surface the fly-over drives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlyoverMode {
    /// 3D globe with coverage LOD
    #[default]
    Globe,
    /// 2D plate-carrée map with pixel-error LOD
    Map,
}

/// LOD evaluator settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodSettings {
    /// Globe evaluator
    pub globe: GlobeLodConfig,
    /// Map evaluator
    pub projected: ProjectedLodConfig,
}

/// Tile source settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Globe terrain
    pub globe: GlobeSourceConfig,
    /// Map terrain
    pub projected: ProjectedSourceConfig,
    /// Draped imagery
    pub imagery: ImagePyramidConfig,
}

/// Scripted camera path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlyoverConfig {
    /// Surface to fly over
    pub mode: FlyoverMode,
    /// Number of frames
    pub frames: u32,
    /// Camera distance from the globe center at the first frame (globe radii)
    pub start_distance: f64,
    /// Camera distance at the last frame
    pub end_distance: f64,
    /// Map half-height at the first frame (degrees)
    pub start_scale: f64,
    /// Map half-height at the last frame
    pub end_scale: f64,
    /// Longitude swept over the whole path (degrees)
    pub sweep_degrees: f64,
    /// Vertical view angle (degrees)
    pub view_angle: f64,
    /// Viewport width in pixels
    pub viewport_width: u32,
    /// Viewport height in pixels
    pub viewport_height: u32,
    /// Time each frame waits for fetch workers (milliseconds)
    pub frame_budget_ms: u64,
    /// Look up imagery for every displayed terrain patch
    pub drape_imagery: bool,
}

impl Default for FlyoverConfig {
    fn default() -> Self {
        Self {
            mode: FlyoverMode::Globe,
            frames: 240,
            start_distance: 4.0,
            end_distance: 1.05,
            start_scale: 90.0,
            end_scale: 0.5,
            sweep_degrees: 60.0,
            view_angle: 30.0,
            viewport_width: 1280,
            viewport_height: 720,
            frame_budget_ms: 16,
            drape_imagery: true,
        }
    }
}

/// Engine configuration parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker pool, cache and depth limits
    pub tree: TreeConfig,
    /// LOD evaluators
    pub lod: LodSettings,
    /// Tile sources
    pub sources: SourceSettings,
    /// Camera path
    pub flyover: FlyoverConfig,
}

impl EngineConfig {
    /// Load configuration from [`CONFIG_FILE`] in the working directory.
    pub fn load() -> Self {
        Self::load_from(CONFIG_FILE)
    }

    /// Load configuration from a specific path.
    /// Returns default config if file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("Config file {} not found, using defaults", path.display());
            return Self::default();
        }

        match fs::File::open(path) {
            Ok(mut file) => {
                let mut contents = String::new();
                if let Err(e) = file.read_to_string(&mut contents) {
                    warn!("Failed to read config file: {e}");
                    return Self::default();
                }
                match toml::from_str(&contents) {
                    Ok(config) => {
                        info!("Loaded config from {}", path.display());
                        config
                    },
                    Err(e) => {
                        warn!("Failed to parse config file: {e}");
                        Self::default()
                    },
                }
            },
            Err(e) => {
                warn!("Failed to open config file: {e}");
                Self::default()
            },
        }
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut file = fs::File::create(path)?;
        file.write_all(contents.as_bytes())?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Validate and clamp configuration values to sensible ranges.
    pub fn validate(&mut self) {
        // Tree
        let tree = &mut self.tree;
        tree.scheduler.num_threads = tree.scheduler.num_threads.clamp(1, MAX_WORKER_THREADS);
        tree.cache = CacheConfig::new(tree.cache.maximum.max(4), tree.cache.minimum);
        tree.max_level = tree.max_level.min(MAX_LEVEL);

        // LOD
        let globe = &mut self.lod.globe;
        globe.refine_coverage = globe.refine_coverage.clamp(0.0, 1.0);
        globe.max_level = globe.max_level.min(MAX_LEVEL);
        let projected = &mut self.lod.projected;
        projected.location_tolerance = projected.location_tolerance.max(0.01);
        projected.texture_tolerance = projected.texture_tolerance.max(0.01);
        projected.patch_size = projected.patch_size.clamp(8.0, 4096.0);
        projected.max_level = projected.max_level.min(MAX_LEVEL);

        // Sources
        let relief = &mut self.sources.globe.relief;
        relief.resolution = relief.resolution.clamp(1, 64);
        let relief = &mut self.sources.projected.relief;
        relief.resolution = relief.resolution.clamp(1, 64);
        let imagery = &mut self.sources.imagery;
        imagery.tile_size = imagery.tile_size.clamp(1, 1024);
        imagery.ocean_fraction = imagery.ocean_fraction.clamp(0.0, 1.0);

        // Fly-over
        let flyover = &mut self.flyover;
        flyover.frames = flyover.frames.clamp(1, 100_000);
        flyover.start_distance = flyover.start_distance.max(1.01);
        flyover.end_distance = flyover.end_distance.max(1.01);
        flyover.start_scale = flyover.start_scale.clamp(1e-4, 180.0);
        flyover.end_scale = flyover.end_scale.clamp(1e-4, 180.0);
        flyover.view_angle = flyover.view_angle.clamp(1.0, 120.0);
        flyover.viewport_width = flyover.viewport_width.clamp(64, 7680);
        flyover.viewport_height = flyover.viewport_height.clamp(64, 4320);
        flyover.frame_budget_ms = flyover.frame_budget_ms.min(10_000);
    }
}
