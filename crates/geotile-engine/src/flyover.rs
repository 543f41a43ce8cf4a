//! Headless fly-over: drives a tile tree along a scripted camera path.
//!
//! Each frame the camera moves, the terrain tree is updated, and (when
//! enabled) imagery is looked up for every displayed patch. Fetch workers get
//! a fixed time budget per frame, like a renderer running at a fixed rate.

use std::f64::consts::PI;
use std::time::{Duration, Instant};

use anyhow::Result;
use geotile_kernel::{
    unit_normal, CameraState, FrameStats, GlobeLod, LodEvaluator, ProjectedLod, TileSource, TileTree,
};
use geotile_sources::{GlobeSource, ImagePyramidSource, ProjectedSource};
use glam::{DVec2, DVec3};
use tracing::{debug, info, trace};

use crate::config::{EngineConfig, FlyoverConfig, FlyoverMode};

/// Latitude the path starts and ends at (degrees).
const PATH_LATITUDE: f64 = 20.0;

/// Frames between progress reports.
const REPORT_INTERVAL: u32 = 30;

/// Totals over a whole fly-over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlyoverReport {
    /// Frames run
    pub frames: u32,
    /// Largest display set
    pub peak_displayed: usize,
    /// Displayed nodes in the last frame
    pub final_displayed: usize,
    /// Deepest displayed level
    pub deepest_level: u32,
    /// Child fetches queued
    pub requested: usize,
    /// Child groups integrated
    pub attached: usize,
    /// Payloads released by the cache
    pub evicted: usize,
    /// Terrain patches that found imagery
    pub draped: usize,
}

impl FlyoverReport {
    fn add(&mut self, stats: &FrameStats) {
        self.frames += 1;
        self.peak_displayed = self.peak_displayed.max(stats.displayed);
        self.final_displayed = stats.displayed;
        self.requested += stats.requested;
        self.attached += stats.attached;
        self.evicted += stats.evicted;
    }
}

/// Path parameter of `frame`, from 0 at the first frame to 1 at the last.
fn progress(config: &FlyoverConfig, frame: u32) -> f64 {
    if config.frames <= 1 {
        return 1.0;
    }
    f64::from(frame.min(config.frames - 1)) / f64::from(config.frames - 1)
}

/// Geometric interpolation, so zooming feels uniform.
fn zoom(from: f64, to: f64, t: f64) -> f64 {
    from * (to / from).powf(t)
}

/// Camera for `frame` of the path.
#[must_use]
pub fn camera_at(config: &FlyoverConfig, frame: u32) -> CameraState {
    let t = progress(config, frame);
    let lon = config.sweep_degrees * (t - 0.5);
    let lat = PATH_LATITUDE * (PI * t).cos();
    let viewport = (config.viewport_width, config.viewport_height);
    match config.mode {
        FlyoverMode::Globe => {
            let distance = zoom(config.start_distance, config.end_distance, t);
            CameraState::look_at(unit_normal(lon, lat) * distance, DVec3::ZERO, DVec3::Z, config.view_angle, viewport)
        },
        FlyoverMode::Map => {
            let scale = zoom(config.start_scale, config.end_scale, t);
            CameraState::orthographic(DVec2::new(lon, lat), scale, viewport)
        },
    }
}

/// Runs the fly-over described by `config`.
pub fn run(config: &EngineConfig) -> Result<FlyoverReport> {
    let mut imagery = if config.flyover.drape_imagery {
        Some(TileTree::new(ImagePyramidSource::new(config.sources.imagery), config.tree)?)
    } else {
        None
    };

    let report = match config.flyover.mode {
        FlyoverMode::Globe => {
            let tree = TileTree::new(GlobeSource::new(config.sources.globe), config.tree)?;
            fly(tree, GlobeLod::new(config.lod.globe), imagery.as_mut(), &config.flyover)
        },
        FlyoverMode::Map => {
            let tree = TileTree::new(ProjectedSource::new(config.sources.projected), config.tree)?;
            fly(tree, ProjectedLod::new(config.lod.projected), imagery.as_mut(), &config.flyover)
        },
    };

    if let Some(imagery) = imagery {
        imagery.shut_down();
    }
    Ok(report)
}

fn fly<S, E>(
    mut tree: TileTree<S>,
    mut lod: E,
    mut imagery: Option<&mut TileTree<ImagePyramidSource>>,
    config: &FlyoverConfig,
) -> FlyoverReport
where
    S: TileSource,
    E: LodEvaluator,
{
    let budget = Duration::from_millis(config.frame_budget_ms);
    let started = Instant::now();
    let mut report = FlyoverReport::default();

    for frame in 0..config.frames {
        let camera = camera_at(config, frame);
        let stats = tree.update(&mut lod, &camera);
        report.add(&stats);

        let footprints: Vec<_> = tree.displayed().map(|n| *n.bounds()).collect();
        report.deepest_level = tree
            .displayed()
            .map(|n| n.level())
            .max()
            .unwrap_or(0)
            .max(report.deepest_level);
        if let Some(imagery) = imagery.as_deref_mut() {
            let draped = footprints
                .iter()
                .filter(|bounds| imagery.best_image_for_bounds(bounds).is_some())
                .count();
            report.draped += draped;
            debug!("Frame {frame}: {draped}/{} patches draped", footprints.len());
        }

        if frame % REPORT_INTERVAL == 0 {
            info!(
                "Frame {frame}: {} displayed, {} requested, {} pending, cache {}",
                stats.displayed,
                stats.requested,
                tree.scheduler().pending(),
                tree.cache().size()
            );
        } else {
            trace!("Frame {frame}: {stats:?}");
        }

        if !tree.wait_idle(budget) {
            trace!("Frame {frame}: workers still busy after {budget:?}");
        }
    }

    tree.shut_down();
    info!(
        "Fly-over finished: {} frames in {:.2?}, peak {} displayed, deepest level {}, {} requested, {} evicted, {} draped",
        report.frames,
        started.elapsed(),
        report.peak_displayed,
        report.deepest_level,
        report.requested,
        report.evicted,
        report.draped
    );
    report
}
