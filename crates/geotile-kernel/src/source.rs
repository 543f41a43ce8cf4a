//! Pluggable producers of node payloads.

use geotile_common::FetchError;

use crate::tree::TreeNode;

/// Strategy that knows how to populate quadtree nodes.
///
/// `fetch_child` is called concurrently from scheduler worker threads for
/// different requests, so implementations must be reentrant. The core cannot
/// detect a source that is not; it is a hard precondition of every source.
///
/// Fetch errors are soft. The core records the node as having no data and
/// never retries it; nothing is surfaced to the user.
pub trait TileSource: Send + Sync + 'static {
    /// Called once before the first fetch.
    fn initialize(&self) {}

    /// Called once when the owning scheduler shuts down.
    fn shut_down(&self) {}

    /// Empty root nodes of the tree this source feeds.
    ///
    /// Terrain sources have a single root; image sources have one root per
    /// hemisphere.
    fn roots(&self) -> Vec<TreeNode>;

    /// Populates a root synchronously on the calling thread.
    fn fetch_root(&self, root: &mut TreeNode) -> Result<(), FetchError>;

    /// Populates `child`, whose id, level and footprint are already set, from
    /// `parent`.
    fn fetch_child(&self, parent: &TreeNode, index: usize, child: &mut TreeNode) -> Result<(), FetchError>;
}
