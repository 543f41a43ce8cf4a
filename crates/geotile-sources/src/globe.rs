//! Procedural terrain on a 3D globe.

use std::sync::Arc;

use geotile_common::{Bounds2, FetchError, GeoBounds, NodeId};
use geotile_kernel::{unit_normal, TerrainModel, TileSource, TreeNode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::relief::{Relief, ReliefConfig};

/// Globe source configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobeSourceConfig {
    /// Globe radius in world units
    pub radius: f64,
    /// Deepest level with data
    pub max_level: u32,
    /// Surface relief
    pub relief: ReliefConfig,
}

impl Default for GlobeSourceConfig {
    fn default() -> Self {
        Self {
            radius: 1.0,
            max_level: 24,
            relief: ReliefConfig::default(),
        }
    }
}

/// Terrain patches of a noisy sphere centered on the origin.
pub struct GlobeSource {
    config: GlobeSourceConfig,
    relief: Relief,
}

impl GlobeSource {
    /// Creates a globe source.
    #[must_use]
    pub fn new(config: GlobeSourceConfig) -> Self {
        Self {
            config,
            relief: Relief::new(config.relief),
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &GlobeSourceConfig {
        &self.config
    }

    fn build(&self, node: &mut TreeNode) -> Result<(), FetchError> {
        let bounds = *node.bounds();
        let level = node.level();
        let kind = node.kind().name();
        let grid = self.relief.sample(&bounds);
        let radius = self.config.radius;

        let points = grid
            .lat_long
            .iter()
            .zip(&grid.heights)
            .map(|(ll, h)| unit_normal(ll.x, ll.y) * radius * (1.0 + h))
            .collect();

        let terrain = node.terrain_data_mut().map_err(|_| FetchError::WrongKind(kind))?;
        terrain.model = Some(Arc::new(TerrainModel {
            points,
            lat_long: grid.lat_long,
            triangles: grid.triangles,
        }));
        terrain.graticule_level = level;
        terrain.error = grid.error * radius;
        terrain.projection_bounds = Bounds2::new(bounds.lon.lo, bounds.lon.hi, bounds.lat.lo, bounds.lat.hi);
        terrain.update_bounding_sphere();
        terrain.set_corner_normals(&bounds);
        Ok(())
    }
}

impl Default for GlobeSource {
    fn default() -> Self {
        Self::new(GlobeSourceConfig::default())
    }
}

impl TileSource for GlobeSource {
    fn initialize(&self) {
        info!(
            "Globe source ready (radius {}, max level {})",
            self.config.radius, self.config.max_level
        );
    }

    fn roots(&self) -> Vec<TreeNode> {
        vec![TreeNode::terrain(NodeId::ROOT, 0, GeoBounds::WORLD)]
    }

    fn fetch_root(&self, root: &mut TreeNode) -> Result<(), FetchError> {
        self.build(root)
    }

    fn fetch_child(&self, _parent: &TreeNode, index: usize, child: &mut TreeNode) -> Result<(), FetchError> {
        if child.level() > self.config.max_level {
            return Err(FetchError::NoData {
                id: child.id(),
                level: child.level(),
            });
        }
        self.build(child)?;
        debug!("Built globe patch {} (child {index})", child.id());
        Ok(())
    }
}
