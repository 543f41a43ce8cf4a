//! Drives a full `TileTree` over a unit globe with the coverage evaluator.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use geotile_common::{FetchError, GeoBounds, NodeId};
use geotile_kernel::prelude::*;
use glam::DVec3;

/// Unit sphere patches made of the footprint corners and center.
#[derive(Default)]
struct SphereSource {
    fetches: AtomicUsize,
}

fn fill(node: &mut TreeNode) -> Result<(), FetchError> {
    let bounds = *node.bounds();
    let terrain = node
        .terrain_data_mut()
        .map_err(|_| FetchError::WrongKind("image"))?;
    let mut points: Vec<DVec3> = bounds
        .corners()
        .iter()
        .map(|(lon, lat)| unit_normal(*lon, *lat))
        .collect();
    points.push(unit_normal(bounds.lon.mid(), bounds.lat.mid()));
    terrain.model = Some(Arc::new(TerrainModel {
        points,
        triangles: vec![[0, 1, 4], [1, 3, 4], [3, 2, 4], [2, 0, 4]],
        ..TerrainModel::default()
    }));
    terrain.update_bounding_sphere();
    terrain.set_corner_normals(&bounds);
    Ok(())
}

impl TileSource for SphereSource {
    fn roots(&self) -> Vec<TreeNode> {
        vec![TreeNode::terrain(NodeId::ROOT, 0, GeoBounds::WORLD)]
    }

    fn fetch_root(&self, root: &mut TreeNode) -> Result<(), FetchError> {
        fill(root)
    }

    fn fetch_child(&self, _parent: &TreeNode, _index: usize, child: &mut TreeNode) -> Result<(), FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        fill(child)
    }
}

fn run(tree: &mut TileTree<SphereSource>, lod: &mut GlobeLod, camera: &CameraState, frames: usize) -> FrameStats {
    let mut stats = FrameStats::default();
    for _ in 0..frames {
        stats = tree.update(lod, camera);
        assert!(tree.wait_idle(Duration::from_secs(5)));
    }
    stats
}

fn camera_over(lon: f64, lat: f64, distance: f64) -> CameraState {
    CameraState::look_at(unit_normal(lon, lat) * distance, DVec3::ZERO, DVec3::Z, 30.0, (800, 600))
}

#[test]
fn test_refinement_follows_the_camera() {
    let config = TreeConfig {
        scheduler: SchedulerConfig { num_threads: 2 },
        ..TreeConfig::default()
    };
    let mut tree = TileTree::new(SphereSource::default(), config).expect("tree");
    let mut lod = GlobeLod::new(GlobeLodConfig {
        refine_coverage: 0.3,
        max_level: 6,
    });
    let camera = camera_over(0.0, 10.0, 1.5);

    let stats = run(&mut tree, &mut lod, &camera, 12);
    assert!(stats.displayed > 0);
    assert_eq!(stats.requested, 0, "tree settles once every visible node is good enough");
    assert!(tree.scheduler().source().fetches.load(Ordering::SeqCst) > 0);

    let deepest = tree.displayed().map(TreeNode::level).max().expect("displayed");
    assert!(deepest >= 2);

    // Nothing on the hemisphere facing away from the camera is shown.
    let facing = unit_normal(0.0, 10.0);
    for node in tree.displayed() {
        let terrain = node.terrain_data().expect("terrain");
        assert!(terrain.corner_normals.iter().any(|n| n.dot(facing) >= 0.0));
        assert!(terrain.coverage > 0.0);
    }
}

#[test]
fn test_displayed_nodes_do_not_overlap() {
    let mut tree = TileTree::new(SphereSource::default(), TreeConfig::default()).expect("tree");
    let mut lod = GlobeLod::new(GlobeLodConfig {
        refine_coverage: 0.3,
        max_level: 5,
    });
    run(&mut tree, &mut lod, &camera_over(45.0, 30.0, 2.0), 10);

    let shown: Vec<&TreeNode> = tree.displayed().collect();
    for a in &shown {
        for b in &shown {
            assert!(!a.is_descendant_of(Some(b)));
        }
    }
}

#[test]
fn test_moving_away_coarsens_and_trims() {
    let config = TreeConfig {
        cache: CacheConfig::new(24, 12),
        ..TreeConfig::default()
    };
    let mut tree = TileTree::new(SphereSource::default(), config).expect("tree");
    let mut lod = GlobeLod::new(GlobeLodConfig {
        refine_coverage: 0.3,
        max_level: 8,
    });

    let near = run(&mut tree, &mut lod, &camera_over(0.0, 0.0, 1.2), 12);
    let far = run(&mut tree, &mut lod, &camera_over(0.0, 0.0, 20.0), 3);
    assert!(far.displayed <= near.displayed);
    assert!(tree.cache().size() <= 24);
    assert!(tree.displayed().all(TreeNode::has_data));
}
