//! Synthetic image pyramid with sparse coverage.
//!
//! Stands in for an on-disk tile database. The pyramid has two hemisphere
//! roots, stops at a maximum depth, and leaves some quadrants empty ("ocean")
//! below a given level so that callers see real data holes.

use std::sync::Arc;

use geotile_common::{FetchError, GeoBounds, NodeId};
use geotile_kernel::{Raster, TileSource, TreeNode};
use glam::DVec2;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Image pyramid configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagePyramidConfig {
    /// Seed for the ocean layout
    pub seed: u64,
    /// Tile edge length in pixels
    pub tile_size: u32,
    /// Deepest level with imagery
    pub max_depth: u32,
    /// Share of quadrants left empty
    pub ocean_fraction: f64,
    /// First level that may be empty
    pub ocean_level: u32,
}

impl Default for ImagePyramidConfig {
    fn default() -> Self {
        Self {
            seed: 7,
            tile_size: 16,
            max_depth: 8,
            ocean_fraction: 0.25,
            ocean_level: 2,
        }
    }
}

/// Checkerboard imagery, one color per level.
pub struct ImagePyramidSource {
    config: ImagePyramidConfig,
}

impl ImagePyramidSource {
    /// Creates an image source.
    #[must_use]
    pub fn new(config: ImagePyramidConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ImagePyramidConfig {
        &self.config
    }

    /// Database file name the tile for `node` would be stored under.
    #[must_use]
    pub fn tile_name(node: &TreeNode) -> String {
        node.id().tile_file_name(node.level(), "png")
    }

    /// Whether the source leaves `node` empty.
    #[must_use]
    pub fn is_ocean(&self, node: &TreeNode) -> bool {
        if node.level() < self.config.ocean_level {
            return false;
        }
        let mut rng = fastrand::Rng::with_seed(self.config.seed ^ node.id().raw().wrapping_mul(0x9E37_79B9_7F4A_7C15));
        rng.f64() < self.config.ocean_fraction
    }

    fn paint(&self, node: &mut TreeNode, checker: u32) -> Result<(), FetchError> {
        let bounds = *node.bounds();
        let level = node.level();
        let kind = node.kind().name();
        let size = self.config.tile_size.max(1);

        let shade = 255 - (level * 24).min(200) as u8;
        let mut pixels = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let dark = ((x / checker) + (y / checker)) % 2 == 0;
                let v = if dark { shade / 2 } else { shade };
                pixels.extend_from_slice(&[v, v, 255 - v, 255]);
            }
        }
        let raster = Raster {
            width: size,
            height: size,
            pixels,
            origin: DVec2::new(bounds.lon.lo, bounds.lat.lo),
            spacing: DVec2::new(bounds.lon.width(), bounds.lat.width()) / f64::from(size),
        };

        let image = node.image_data_mut().map_err(|_| FetchError::WrongKind(kind))?;
        image.image = Some(Arc::new(raster));
        image.texture = None;
        Ok(())
    }
}

impl Default for ImagePyramidSource {
    fn default() -> Self {
        Self::new(ImagePyramidConfig::default())
    }
}

impl TileSource for ImagePyramidSource {
    fn roots(&self) -> Vec<TreeNode> {
        [false, true]
            .map(|east| TreeNode::image(NodeId::hemisphere(east), 0, GeoBounds::hemisphere(east)))
            .into()
    }

    /// Hemisphere roots get a flat placeholder; real tiles start at level 1.
    fn fetch_root(&self, root: &mut TreeNode) -> Result<(), FetchError> {
        self.paint(root, self.config.tile_size.max(1))
    }

    fn fetch_child(&self, _parent: &TreeNode, _index: usize, child: &mut TreeNode) -> Result<(), FetchError> {
        let no_data = FetchError::NoData {
            id: child.id(),
            level: child.level(),
        };
        if child.level() > self.config.max_depth {
            return Err(no_data);
        }
        if self.is_ocean(child) {
            trace!("{} is ocean", Self::tile_name(child));
            return Err(no_data);
        }
        self.paint(child, (self.config.tile_size / 4).max(1))?;
        debug!("Loaded {}", Self::tile_name(child));
        Ok(())
    }
}
