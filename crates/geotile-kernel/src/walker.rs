//! Per-frame traversal of a tile quadtree.
//!
//! [`TileTree`] ties the pieces together: it owns the node arena, the fetch
//! scheduler for its source and the recency cache. Each call to
//! [`TileTree::update`] walks the tree from the roots, asks an
//! [`LodEvaluator`] what to do with every visited node, requests missing
//! children, integrates the ones that have arrived and rebuilds the set of
//! nodes to display. Every visited node that is not culled and has data is
//! touched in the cache, so loaded interior nodes stay as warm as the leaves
//! drawn below them.

use std::time::Duration;

use geotile_common::{GeoTileResult, SchedulerError, TreeError, TreeResult, MAX_LEVEL};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::cache::{CacheConfig, NodeCache};
use crate::camera::CameraState;
use crate::lod::{LodDecision, LodEvaluator};
use crate::scheduler::{FetchScheduler, SchedulerConfig};
use crate::source::TileSource;
use crate::tree::{CopyMode, NodeKey, NodeStatus, NodeStore, TreeNode};

/// Tree configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Worker pool settings
    pub scheduler: SchedulerConfig,
    /// Recency cache limits
    pub cache: CacheConfig,
    /// Deepest level the tree refines to, whatever the evaluator says
    pub max_level: u32,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            cache: CacheConfig::default(),
            max_level: MAX_LEVEL,
        }
    }
}

/// Counters for one [`TileTree::update`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Nodes evaluated
    pub visited: usize,
    /// Nodes in the display set
    pub displayed: usize,
    /// Subtrees skipped as out of view
    pub culled: usize,
    /// Child fetches queued
    pub requested: usize,
    /// Fetched child groups integrated into the tree
    pub attached: usize,
    /// Payloads released by the cache
    pub evicted: usize,
}

/// A quadtree fed by one [`TileSource`].
pub struct TileTree<S: TileSource> {
    pub(crate) config: TreeConfig,
    pub(crate) store: NodeStore,
    pub(crate) roots: Vec<NodeKey>,
    pub(crate) scheduler: FetchScheduler<S>,
    pub(crate) cache: NodeCache,
    displayed: Vec<NodeKey>,
    frame: u64,
}

impl<S: TileSource> TileTree<S> {
    /// Builds the roots of `source` and starts its worker pool.
    ///
    /// Roots are fetched synchronously. A root the source has no data for is
    /// kept, marked unavailable.
    pub fn new(source: S, config: TreeConfig) -> GeoTileResult<Self> {
        let scheduler = FetchScheduler::new(source, config.scheduler);
        scheduler.initialize(config.scheduler.num_threads)?;

        let mut store = NodeStore::new();
        let mut roots = Vec::new();
        for mut root in scheduler.source().roots() {
            if let Err(e) = scheduler.source().fetch_root(&mut root) {
                warn!("Root {} has no data: {e}", root.id());
                root.delete_data();
                root.mark_unavailable();
            }
            roots.push(store.insert_root(root));
        }
        info!("Tile tree created with {} root(s)", roots.len());

        Ok(Self {
            config,
            store,
            roots,
            scheduler,
            cache: NodeCache::new(config.cache),
            displayed: Vec::new(),
            frame: 0,
        })
    }

    /// Configuration the tree was created with.
    #[must_use]
    pub const fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Root keys, in the order the source listed them.
    #[must_use]
    pub fn roots(&self) -> &[NodeKey] {
        &self.roots
    }

    /// The node arena.
    #[must_use]
    pub const fn store(&self) -> &NodeStore {
        &self.store
    }

    /// The recency cache.
    #[must_use]
    pub const fn cache(&self) -> &NodeCache {
        &self.cache
    }

    /// The worker pool.
    #[must_use]
    pub const fn scheduler(&self) -> &FetchScheduler<S> {
        &self.scheduler
    }

    /// Number of completed updates.
    #[must_use]
    pub const fn frame(&self) -> u64 {
        self.frame
    }

    /// Keys of the nodes chosen by the last update.
    #[must_use]
    pub fn displayed_keys(&self) -> &[NodeKey] {
        &self.displayed
    }

    /// Nodes chosen by the last update, all of them with data.
    pub fn displayed(&self) -> impl Iterator<Item = &TreeNode> + '_ {
        self.displayed.iter().filter_map(|key| self.store.get(*key))
    }

    /// Waits for outstanding fetches; see [`FetchScheduler::wait_idle`].
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.scheduler.wait_idle(timeout)
    }

    /// Stops the worker pool. Further updates only use loaded data.
    pub fn shut_down(&self) {
        self.scheduler.shut_down();
    }

    /// Runs one frame: evaluates, refines and rebuilds the display set.
    pub fn update<E: LodEvaluator>(&mut self, evaluator: &mut E, camera: &CameraState) -> FrameStats {
        evaluator.begin_frame(camera);
        let freed_before = self.cache.freed();
        let mut stats = FrameStats::default();
        let mut displayed = Vec::new();
        let mut stack: Vec<NodeKey> = self.roots.iter().rev().copied().collect();

        while let Some(key) = stack.pop() {
            if let Err(e) = self.visit(key, evaluator, &mut stack, &mut displayed, &mut stats) {
                error!("Skipping node {key}: {e}");
            }
        }

        // Trim once the walk is done. A frame that touches more than the
        // cache maximum can still release some of its own nodes.
        self.cache.trim_if_over(&mut self.store);
        displayed.retain(|key| self.store.get(*key).is_some_and(TreeNode::has_data));
        stats.displayed = displayed.len();
        stats.evicted = self.cache.freed() - freed_before;
        self.displayed = displayed;
        self.frame += 1;
        trace!(
            "Frame {}: visited {}, displayed {}, culled {}, requested {}, attached {}, evicted {}",
            self.frame,
            stats.visited,
            stats.displayed,
            stats.culled,
            stats.requested,
            stats.attached,
            stats.evicted
        );
        stats
    }

    fn visit<E: LodEvaluator>(
        &mut self,
        key: NodeKey,
        evaluator: &E,
        stack: &mut Vec<NodeKey>,
        displayed: &mut Vec<NodeKey>,
        stats: &mut FrameStats,
    ) -> TreeResult<()> {
        stats.visited += 1;
        let node = self.store.node(key)?;
        let decision = evaluator.evaluate(node);
        if let Some(coverage) = evaluator.coverage(node) {
            if let Ok(terrain) = self.store.node_mut(key)?.terrain_data_mut() {
                terrain.coverage = coverage;
            }
        }

        if decision != LodDecision::Cull && self.store.node(key)?.has_data() {
            self.cache.touch(&mut self.store, key);
        }

        match decision {
            LodDecision::Cull => {
                stats.culled += 1;
                Ok(())
            },
            LodDecision::Keep => {
                self.display(key, displayed);
                Ok(())
            },
            LodDecision::Refine => self.refine(key, stack, displayed, stats),
        }
    }

    fn refine(
        &mut self,
        key: NodeKey,
        stack: &mut Vec<NodeKey>,
        displayed: &mut Vec<NodeKey>,
        stats: &mut FrameStats,
    ) -> TreeResult<()> {
        let node = self.store.node(key)?;
        if node.is_unavailable() || node.level() >= self.config.max_level.min(MAX_LEVEL) {
            self.display(key, displayed);
            return Ok(());
        }

        if node.status() == NodeStatus::Processing {
            match self.integrate(key, stats)? {
                Some(children) => push_children(stack, children),
                None => self.fallback(key, stack, displayed)?,
            }
            return Ok(());
        }

        if let Some(children) = node.children() {
            if self.children_loaded(children) {
                push_children(stack, children);
                return Ok(());
            }
        }

        self.request(key, stats)?;
        self.fallback(key, stack, displayed)
    }

    /// Queues a fetch of the children of `key`. Returns whether one was queued.
    pub(crate) fn request(&mut self, key: NodeKey, stats: &mut FrameStats) -> TreeResult<bool> {
        let node = self.store.node(key)?;
        match self.scheduler.request_children(key, node) {
            Ok(()) => {
                self.store.node_mut(key)?.set_status(NodeStatus::Processing);
                stats.requested += 1;
                Ok(true)
            },
            Err(SchedulerError::Stopped) => Ok(false),
            Err(e) => {
                warn!("Cannot refine node {}: {e}", node.id());
                Ok(false)
            },
        }
    }

    /// Attaches the fetched children of `key` if they have arrived.
    pub(crate) fn integrate(&mut self, key: NodeKey, stats: &mut FrameStats) -> TreeResult<Option<[NodeKey; 4]>> {
        let Some(fetched) = self.scheduler.take_requested(key) else {
            return Ok(None);
        };
        self.store.node_mut(key)?.set_status(NodeStatus::None);
        let children = match self.store.create_children(key) {
            Ok(children) => children,
            Err(TreeError::DepthLimit { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        for ((child, fetched), failed) in children.iter().zip(&fetched.children).zip(fetched.failed) {
            let child = self.store.node_mut(*child)?;
            child.copy_from(fetched, CopyMode::Shallow);
            if failed {
                child.mark_unavailable();
            }
        }
        stats.attached += 1;
        debug!(
            "Attached children of node {} ({} without data)",
            self.store.node(key)?.id(),
            fetched.failed_count()
        );
        Ok(Some(children))
    }

    /// Every child either has data or is known to have none.
    fn children_loaded(&self, children: [NodeKey; 4]) -> bool {
        children.iter().all(|c| {
            self.store
                .get(*c)
                .is_some_and(|n| n.has_data() || n.is_unavailable())
        })
    }

    /// Shows `key` while its children load, or whatever children are loaded
    /// when `key` itself has been evicted.
    fn fallback(&mut self, key: NodeKey, stack: &mut Vec<NodeKey>, displayed: &mut Vec<NodeKey>) -> TreeResult<()> {
        let node = self.store.node(key)?;
        if node.has_data() {
            self.display(key, displayed);
        } else if let Some(children) = node.children() {
            for child in children.into_iter().rev() {
                if self.store.node(child)?.has_data() {
                    stack.push(child);
                }
            }
        }
        Ok(())
    }

    fn display(&mut self, key: NodeKey, displayed: &mut Vec<NodeKey>) {
        if self.store.get(key).is_some_and(TreeNode::has_data) {
            displayed.push(key);
            self.cache.touch(&mut self.store, key);
        }
    }
}

fn push_children(stack: &mut Vec<NodeKey>, children: [NodeKey; 4]) {
    stack.extend(children.into_iter().rev());
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use geotile_common::{FetchError, GeoBounds, NodeId};

    use super::*;
    use crate::tree::TerrainModel;

    /// Source with data everywhere except the south-west quadrant below level 1.
    struct PatchySource;

    impl TileSource for PatchySource {
        fn roots(&self) -> Vec<TreeNode> {
            vec![TreeNode::terrain(NodeId::ROOT, 0, GeoBounds::WORLD)]
        }

        fn fetch_root(&self, root: &mut TreeNode) -> Result<(), FetchError> {
            root.terrain_data_mut()
                .map_err(|_| FetchError::WrongKind("image"))?
                .model = Some(Arc::new(TerrainModel::default()));
            Ok(())
        }

        fn fetch_child(&self, _parent: &TreeNode, index: usize, child: &mut TreeNode) -> Result<(), FetchError> {
            if child.level() > 1 && index == 0 {
                return Err(FetchError::NoData {
                    id: child.id(),
                    level: child.level(),
                });
            }
            child
                .terrain_data_mut()
                .map_err(|_| FetchError::WrongKind("image"))?
                .model = Some(Arc::new(TerrainModel::default()));
            Ok(())
        }
    }

    /// Source with data for every node.
    struct FullSource;

    impl TileSource for FullSource {
        fn roots(&self) -> Vec<TreeNode> {
            PatchySource.roots()
        }

        fn fetch_root(&self, root: &mut TreeNode) -> Result<(), FetchError> {
            PatchySource.fetch_root(root)
        }

        fn fetch_child(&self, _parent: &TreeNode, _index: usize, child: &mut TreeNode) -> Result<(), FetchError> {
            PatchySource.fetch_root(child)
        }
    }

    /// Refines everything above a fixed level.
    struct DepthLod {
        depth: u32,
        frames: usize,
    }

    impl LodEvaluator for DepthLod {
        fn begin_frame(&mut self, _camera: &CameraState) {
            self.frames += 1;
        }

        fn evaluate(&self, node: &TreeNode) -> LodDecision {
            if node.level() < self.depth {
                LodDecision::Refine
            } else {
                LodDecision::Keep
            }
        }
    }

    /// Culls the eastern half of the world.
    struct WestOnly;

    impl LodEvaluator for WestOnly {
        fn begin_frame(&mut self, _camera: &CameraState) {}

        fn evaluate(&self, node: &TreeNode) -> LodDecision {
            if node.lon_range().lo >= 0.0 {
                LodDecision::Cull
            } else if node.level() < 1 {
                LodDecision::Refine
            } else {
                LodDecision::Keep
            }
        }
    }

    fn tree(cache: CacheConfig) -> TileTree<PatchySource> {
        TileTree::new(
            PatchySource,
            TreeConfig {
                cache,
                ..TreeConfig::default()
            },
        )
        .expect("tree")
    }

    fn settle<E: LodEvaluator>(tree: &mut TileTree<PatchySource>, lod: &mut E, frames: usize) -> FrameStats {
        let camera = CameraState::default();
        let mut stats = FrameStats::default();
        for _ in 0..frames {
            stats = tree.update(lod, &camera);
            assert!(tree.wait_idle(Duration::from_secs(5)));
        }
        stats
    }

    #[test]
    fn test_first_frame_shows_root_while_children_load() {
        let mut tree = tree(CacheConfig::default());
        let mut lod = DepthLod { depth: 1, frames: 0 };
        let stats = tree.update(&mut lod, &CameraState::default());

        assert_eq!(lod.frames, 1);
        assert_eq!(stats.requested, 1);
        assert_eq!(tree.displayed_keys(), &tree.roots()[..]);
        assert_eq!(
            tree.store().node(tree.roots()[0]).expect("root").status(),
            NodeStatus::Processing
        );
    }

    #[test]
    fn test_children_replace_parent_once_loaded() {
        let mut tree = tree(CacheConfig::default());
        let mut lod = DepthLod { depth: 1, frames: 0 };
        settle(&mut tree, &mut lod, 1);
        let stats = settle(&mut tree, &mut lod, 1);

        assert_eq!(stats.attached, 1);
        assert_eq!(stats.displayed, 4);
        assert!(tree.displayed().all(|n| n.level() == 1));
        assert_eq!(
            tree.store().node(tree.roots()[0]).expect("root").status(),
            NodeStatus::None
        );
    }

    #[test]
    fn test_unavailable_children_are_not_displayed() {
        let mut tree = tree(CacheConfig::default());
        let mut lod = DepthLod { depth: 2, frames: 0 };
        let stats = settle(&mut tree, &mut lod, 4);

        // Four level-1 nodes each lose their south-west child.
        assert_eq!(stats.displayed, 12);
        assert_eq!(stats.requested, 0);
        let unavailable = tree
            .store()
            .iter()
            .filter(|(_, n)| n.is_unavailable())
            .count();
        assert_eq!(unavailable, 4);
    }

    #[test]
    fn test_culled_subtrees_are_skipped() {
        let mut tree = tree(CacheConfig::default());
        let stats = settle(&mut tree, &mut WestOnly, 3);

        assert_eq!(stats.displayed, 2);
        assert_eq!(stats.culled, 2);
        assert!(tree.displayed().all(|n| n.lon_range().hi <= 0.0));
    }

    #[test]
    fn test_evicted_children_are_fetched_again() {
        let mut tree = tree(CacheConfig::new(5, 0));
        let mut lod = DepthLod { depth: 1, frames: 0 };
        settle(&mut tree, &mut lod, 2);
        assert_eq!(tree.cache().size(), 5);

        // A full trim releases the whole cold sibling group; the root stays.
        tree.cache.trim_to_minimum(&mut tree.store);
        let root = tree.store().node(tree.roots()[0]).expect("root");
        assert!(root.has_data());
        for child in root.children().expect("children") {
            assert!(!tree.store().node(child).expect("child").has_data());
        }

        let stats = settle(&mut tree, &mut lod, 1);
        assert_eq!(stats.requested, 1);
        assert_eq!(stats.displayed, 1);

        let stats = settle(&mut tree, &mut lod, 1);
        assert_eq!(stats.attached, 1);
        assert_eq!(stats.displayed, 4);
        assert_eq!(tree.store().len(), 5);
    }

    #[test]
    fn test_small_cache_never_displays_freed_nodes() {
        let mut tree = tree(CacheConfig::new(4, 0));
        let stats = settle(&mut tree, &mut DepthLod { depth: 1, frames: 0 }, 2);
        assert_eq!(stats.evicted, 4);
        assert!(tree.displayed().all(TreeNode::has_data));
    }

    #[test]
    fn test_loaded_deep_view_survives_cache_pressure() {
        let mut tree = TileTree::new(
            FullSource,
            TreeConfig {
                cache: CacheConfig::new(16, 16),
                ..TreeConfig::default()
            },
        )
        .expect("tree");
        let mut lod = DepthLod { depth: 2, frames: 0 };
        let camera = CameraState::default();

        for _ in 0..3 {
            tree.update(&mut lod, &camera);
            assert!(tree.wait_idle(Duration::from_secs(5)));
        }
        // Root, 4 children and 16 leaves are touched each frame; the trim
        // after the walk only drops list entries, never a whole group.
        for frame in 0..6 {
            let stats = tree.update(&mut lod, &camera);
            assert_eq!(stats.displayed, 16, "frame {frame}");
            assert_eq!(stats.requested, 0, "frame {frame}");
            assert_eq!(stats.evicted, 0, "frame {frame}");
            assert!(tree.cache().size() <= 16);
            assert!(tree.wait_idle(Duration::from_secs(5)));
        }
        assert_eq!(tree.store().len(), 21);
        assert!(tree.store().iter().all(|(_, n)| n.has_data()));
    }

    #[test]
    fn test_interior_nodes_are_touched() {
        let mut tree = tree(CacheConfig::default());
        let mut lod = DepthLod { depth: 1, frames: 0 };
        settle(&mut tree, &mut lod, 3);

        // The refined root is not displayed but stays in the recency list.
        let root = tree.roots()[0];
        assert!(!tree.displayed_keys().contains(&root));
        assert!(tree.cache().contains(tree.store(), root));
        assert_eq!(tree.cache().size(), 5);
    }

    #[test]
    fn test_max_level_caps_refinement() {
        let mut tree = TileTree::new(
            PatchySource,
            TreeConfig {
                max_level: 0,
                ..TreeConfig::default()
            },
        )
        .expect("tree");
        let stats = settle(&mut tree, &mut DepthLod { depth: 5, frames: 0 }, 2);
        assert_eq!(stats.requested, 0);
        assert_eq!(stats.displayed, 1);
    }

    #[test]
    fn test_update_after_shut_down_uses_loaded_data() {
        let mut tree = tree(CacheConfig::default());
        tree.shut_down();
        let stats = settle(&mut tree, &mut DepthLod { depth: 1, frames: 0 }, 2);
        assert_eq!(stats.requested, 0);
        assert_eq!(stats.displayed, 1);
    }
}
