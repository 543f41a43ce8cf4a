//! Terrain on a flat plate-carrée map.
//!
//! Projected coordinates are the geographic ones: x is longitude and y is
//! latitude, both in degrees. Heights are exaggerated into the same units so
//! the patch error can be compared with the on-screen pixel size.

use std::sync::Arc;

use geotile_common::{Bounds2, FetchError, GeoBounds, NodeId};
use geotile_kernel::{TerrainModel, TileSource, TreeNode};
use glam::DVec3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::relief::{Relief, ReliefConfig};

/// Projected source configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectedSourceConfig {
    /// Map units per globe radius of relief
    pub vertical_scale: f64,
    /// Deepest level with data
    pub max_level: u32,
    /// Surface relief
    pub relief: ReliefConfig,
}

impl Default for ProjectedSourceConfig {
    fn default() -> Self {
        Self {
            vertical_scale: 50.0,
            max_level: 24,
            relief: ReliefConfig::default(),
        }
    }
}

/// Height-mapped patches of a plate-carrée map.
pub struct ProjectedSource {
    config: ProjectedSourceConfig,
    relief: Relief,
}

impl ProjectedSource {
    /// Creates a projected source.
    #[must_use]
    pub fn new(config: ProjectedSourceConfig) -> Self {
        Self {
            config,
            relief: Relief::new(config.relief),
        }
    }

    fn build(&self, node: &mut TreeNode) -> Result<(), FetchError> {
        let bounds = *node.bounds();
        let level = node.level();
        let kind = node.kind().name();
        let grid = self.relief.sample(&bounds);
        let scale = self.config.vertical_scale;

        let points = grid
            .lat_long
            .iter()
            .zip(&grid.heights)
            .map(|(ll, h)| DVec3::new(ll.x, ll.y, h * scale))
            .collect();

        let terrain = node.terrain_data_mut().map_err(|_| FetchError::WrongKind(kind))?;
        terrain.model = Some(Arc::new(TerrainModel {
            points,
            lat_long: grid.lat_long,
            triangles: grid.triangles,
        }));
        terrain.graticule_level = level;
        terrain.error = grid.error * scale;
        terrain.projection_bounds = Bounds2::new(bounds.lon.lo, bounds.lon.hi, bounds.lat.lo, bounds.lat.hi);
        terrain.update_bounding_sphere();
        Ok(())
    }
}

impl Default for ProjectedSource {
    fn default() -> Self {
        Self::new(ProjectedSourceConfig::default())
    }
}

impl TileSource for ProjectedSource {
    fn roots(&self) -> Vec<TreeNode> {
        vec![TreeNode::terrain(NodeId::ROOT, 0, GeoBounds::WORLD)]
    }

    fn fetch_root(&self, root: &mut TreeNode) -> Result<(), FetchError> {
        self.build(root)
    }

    fn fetch_child(&self, _parent: &TreeNode, _index: usize, child: &mut TreeNode) -> Result<(), FetchError> {
        if child.level() > self.config.max_level {
            return Err(FetchError::NoData {
                id: child.id(),
                level: child.level(),
            });
        }
        self.build(child)?;
        debug!("Built map patch {}", child.id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_lies_in_its_footprint() {
        let source = ProjectedSource::default();
        let root = source.roots().remove(0);
        let mut child = root.child_template(1).expect("template");
        source.fetch_child(&root, 1, &mut child).expect("data");

        let terrain = child.terrain_data().expect("terrain");
        assert_eq!(terrain.projection_bounds, Bounds2::new(0.0, 180.0, -90.0, 0.0));
        let model = terrain.model.as_ref().expect("model");
        for p in &model.points {
            assert!((0.0..=180.0).contains(&p.x));
            assert!((-90.0..=0.0).contains(&p.y));
        }
    }

    #[test]
    fn test_error_uses_map_units() {
        let flat = ProjectedSource::new(ProjectedSourceConfig {
            vertical_scale: 1.0,
            ..ProjectedSourceConfig::default()
        });
        let tall = ProjectedSource::default();
        let mut a = flat.roots().remove(0);
        let mut b = tall.roots().remove(0);
        flat.fetch_root(&mut a).expect("root");
        tall.fetch_root(&mut b).expect("root");

        let ea = a.terrain_data().expect("terrain").error;
        let eb = b.terrain_data().expect("terrain").error;
        assert!(ea > 0.0);
        assert!((eb - 50.0 * ea).abs() < 1e-9);
    }
}
