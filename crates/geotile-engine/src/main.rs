//! # Geotile Engine
//!
//! Headless driver for the geotile tile cache.
//!
//! Flies a scripted camera over a procedural globe (or a 2D map), letting the
//! tree refine, fetch and evict as it would under a renderer, and logs what
//! it does. Pass a config path as the first argument, otherwise
//! `geotile.toml` in the working directory is used if present.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

mod config;
mod flyover;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::EngineConfig;

/// Main entry point.
fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("geotile=info".parse()?))
        .init();

    info!("Geotile starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load_from(path),
        None => EngineConfig::load(),
    };
    config.validate();

    info!("Configuration loaded:");
    info!("  Mode: {:?}, {} frames", config.flyover.mode, config.flyover.frames);
    info!(
        "  Workers: {}, cache {}..{}",
        config.tree.scheduler.num_threads, config.tree.cache.minimum, config.tree.cache.maximum
    );

    let report = flyover::run(&config)?;
    info!(
        "Displayed {} nodes at the end, {} payloads evicted",
        report.final_displayed, report.evicted
    );

    info!("Geotile shutdown complete");
    Ok(())
}
