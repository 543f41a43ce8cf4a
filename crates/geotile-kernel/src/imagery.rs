//! Imagery lookup for draping over terrain patches.

use geotile_common::{GeoBounds, TreeResult};
use tracing::error;

use crate::source::TileSource;
use crate::tree::{NodeKey, NodeStatus};
use crate::walker::{FrameStats, TileTree};

impl<S: TileSource> TileTree<S> {
    /// Deepest loaded node with data whose footprint contains `bounds`.
    ///
    /// Starts from the root containing `bounds` and follows the quadrant that
    /// contains it. When the path runs out of loaded nodes before `bounds`
    /// stops fitting in a quadrant, the missing children are requested so a
    /// later call can go deeper. The chosen node is touched in the cache.
    pub fn best_image_for_bounds(&mut self, bounds: &GeoBounds) -> Option<NodeKey> {
        match self.descend_to_bounds(bounds) {
            Ok(best) => {
                if let Some(key) = best {
                    self.cache.send_to_front(&mut self.store, key);
                }
                best
            },
            Err(e) => {
                error!("Image lookup for {bounds:?} failed: {e}");
                None
            },
        }
    }

    fn descend_to_bounds(&mut self, bounds: &GeoBounds) -> TreeResult<Option<NodeKey>> {
        let mut stats = FrameStats::default();
        let root = self
            .roots
            .iter()
            .copied()
            .find(|key| self.store.get(*key).is_some_and(|n| n.bounds().contains(bounds)));
        let Some(mut key) = root else {
            return Ok(None);
        };

        let mut best = None;
        loop {
            let node = self.store.node(key)?;
            if node.has_data() {
                best = Some(key);
            }
            let Some(index) = node.bounds().quadrant_containing(bounds) else {
                break;
            };
            if node.is_unavailable() || node.level() >= self.config.max_level {
                break;
            }

            let children = match (node.children(), node.status()) {
                (_, NodeStatus::Processing) => match self.integrate(key, &mut stats)? {
                    Some(children) => children,
                    None => break,
                },
                (Some(children), NodeStatus::None) => children,
                (None, NodeStatus::None) => {
                    self.request(key, &mut stats)?;
                    break;
                },
            };

            let child = self.store.node(children[index])?;
            if child.is_unavailable() {
                break;
            }
            if !child.has_data() {
                // Evicted; fetch the group again.
                self.request(key, &mut stats)?;
                break;
            }
            key = children[index];
        }
        Ok(best)
    }
}
