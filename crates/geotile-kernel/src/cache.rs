//! Least-recently-used node cache with sibling-group eviction.
//!
//! The recency list is intrusive: the links live in [`TreeNode`] and the cache
//! only holds the two ends and the length. When the list grows past
//! [`CacheConfig::maximum`] it is trimmed from the cold end down to
//! [`CacheConfig::minimum`]. A popped node only releases payloads when all
//! four members of its sibling group are out of the list, and then all four
//! are released together; otherwise nothing is freed for that node.
//!
//! The cache is not thread safe. It is only touched from the render thread.

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::tree::{NodeKey, NodeStore, TreeNode};

/// Default high-water mark of the recency list.
pub const DEFAULT_CACHE_MAXIMUM: usize = 500;

/// Default low-water mark of the recency list.
pub const DEFAULT_CACHE_MINIMUM: usize = 250;

/// Cache limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// List length that triggers a trim
    pub maximum: usize,
    /// List length a trim stops at
    pub minimum: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            maximum: DEFAULT_CACHE_MAXIMUM,
            minimum: DEFAULT_CACHE_MINIMUM,
        }
    }
}

impl CacheConfig {
    /// Creates limits, swapping them if given in the wrong order.
    #[must_use]
    pub fn new(maximum: usize, minimum: usize) -> Self {
        Self {
            maximum: maximum.max(minimum),
            minimum: minimum.min(maximum),
        }
    }
}

/// Recency list over the data-bearing nodes of a [`NodeStore`].
#[derive(Debug, Default)]
pub struct NodeCache {
    config: CacheConfig,
    newest: Option<NodeKey>,
    oldest: Option<NodeKey>,
    size: usize,
    freed: usize,
}

impl NodeCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Cache limits.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Number of nodes in the list.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Most recently touched node.
    #[must_use]
    pub const fn newest(&self) -> Option<NodeKey> {
        self.newest
    }

    /// Least recently touched node.
    #[must_use]
    pub const fn oldest(&self) -> Option<NodeKey> {
        self.oldest
    }

    /// Total payloads released since creation.
    #[must_use]
    pub const fn freed(&self) -> usize {
        self.freed
    }

    /// Whether `key` is currently in the list.
    #[must_use]
    pub fn contains(&self, store: &NodeStore, key: NodeKey) -> bool {
        self.newest == Some(key) || store.get(key).is_some_and(TreeNode::has_recency_links)
    }

    /// Keys in the list, newest first.
    #[must_use]
    pub fn keys(&self, store: &NodeStore) -> Vec<NodeKey> {
        let mut keys = Vec::with_capacity(self.size);
        let mut cursor = self.newest;
        while let Some(key) = cursor {
            keys.push(key);
            if keys.len() > self.size {
                error!("Recency list is longer than its recorded size {}", self.size);
                break;
            }
            cursor = store.get(key).and_then(|n| n.older);
        }
        keys
    }

    /// Moves `key` to the newest end, trimming if the list grows too long.
    pub fn send_to_front(&mut self, store: &mut NodeStore, key: NodeKey) {
        self.touch(store, key);
        self.trim_if_over(store);
    }

    /// Moves `key` to the newest end without trimming.
    ///
    /// The walker touches every node it visits this way and trims once the
    /// frame is done, so a group cannot be released while it is on the stack.
    pub fn touch(&mut self, store: &mut NodeStore, key: NodeKey) {
        if self.newest == Some(key) {
            return;
        }
        self.remove_node(store, key);

        let previous = self.newest;
        let Some(node) = store.get_mut(key) else {
            error!("send_to_front on unknown node {key}");
            return;
        };
        node.older = previous;
        node.newer = None;
        if let Some(prev) = previous.and_then(|p| store.get_mut(p)) {
            prev.newer = Some(key);
        }
        self.newest = Some(key);
        if self.oldest.is_none() {
            self.oldest = Some(key);
        }
        self.size += 1;
    }

    /// Trims to the minimum if the list is past the maximum.
    ///
    /// Returns the number of payloads released.
    pub fn trim_if_over(&mut self, store: &mut NodeStore) -> usize {
        if self.size > self.config.maximum {
            self.trim_to_minimum(store)
        } else {
            0
        }
    }

    /// Unlinks `key`; does nothing if it is not in the list.
    pub fn remove_node(&mut self, store: &mut NodeStore, key: NodeKey) {
        if !self.contains(store, key) {
            return;
        }
        let Some(node) = store.get_mut(key) else {
            return;
        };
        let older = node.older.take();
        let newer = node.newer.take();

        match older.and_then(|o| store.get_mut(o)) {
            Some(o) => o.newer = newer,
            None => self.oldest = newer,
        }
        match newer.and_then(|n| store.get_mut(n)) {
            Some(n) => n.older = older,
            None => self.newest = older,
        }
        self.size -= 1;
    }

    /// Pops cold nodes until the list is at the minimum.
    ///
    /// Returns the number of payloads released.
    pub fn trim_to_minimum(&mut self, store: &mut NodeStore) -> usize {
        let mut freed = 0;
        while self.size > self.config.minimum {
            let Some(oldest) = self.oldest else {
                break;
            };
            self.remove_node(store, oldest);
            freed += self.delete_data_from_siblings(store, oldest);
        }
        if freed > 0 {
            debug!("Cache trim released {freed} payloads, {} nodes remain", self.size);
        }
        freed
    }

    /// Releases the payloads of `key` and its siblings if none of them is in
    /// the list.
    ///
    /// Roots are never released by this path. Returns the number of payloads
    /// released.
    pub fn delete_data_from_siblings(&mut self, store: &mut NodeStore, key: NodeKey) -> usize {
        let Some(siblings) = store.siblings(key) else {
            return 0;
        };
        if siblings.iter().any(|s| self.contains(store, *s)) {
            return 0;
        }
        let mut freed = 0;
        for sibling in siblings {
            if let Some(node) = store.get_mut(sibling) {
                if node.has_data() {
                    node.delete_data();
                    freed += 1;
                }
            }
        }
        self.freed += freed;
        freed
    }

    /// Empties the list without releasing any payload.
    pub fn clear(&mut self, store: &mut NodeStore) {
        while let Some(key) = self.newest {
            self.remove_node(store, key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use geotile_common::{GeoBounds, NodeId};
    use proptest::prelude::*;

    use super::*;
    use crate::tree::TerrainModel;

    fn give_data(store: &mut NodeStore, key: NodeKey) {
        let node = store.get_mut(key).expect("node");
        node.terrain_data_mut().expect("terrain").model = Some(Arc::new(TerrainModel::default()));
    }

    fn roots(store: &mut NodeStore, n: usize) -> Vec<NodeKey> {
        (0..n)
            .map(|_| {
                let key = store.insert_root(TreeNode::terrain(NodeId::ROOT, 0, GeoBounds::WORLD));
                give_data(store, key);
                key
            })
            .collect()
    }

    /// Root, its 4 children and 16 grandchildren, all with data.
    fn two_level_tree(store: &mut NodeStore) -> (NodeKey, Vec<NodeKey>) {
        let root = roots(store, 1)[0];
        let mut leaves = Vec::new();
        for child in store.create_children(root).expect("children") {
            give_data(store, child);
            for grandchild in store.create_children(child).expect("grandchildren") {
                give_data(store, grandchild);
                leaves.push(grandchild);
            }
        }
        (root, leaves)
    }

    fn assert_list_consistent(cache: &NodeCache, store: &NodeStore) {
        let keys = cache.keys(store);
        assert_eq!(keys.len(), cache.size());
        assert_eq!(keys.first().copied(), cache.newest());
        assert_eq!(keys.last().copied(), cache.oldest());
        for pair in keys.windows(2) {
            assert_eq!(store.get(pair[1]).expect("node").newer, Some(pair[0]));
        }
    }

    #[test]
    fn test_send_to_front_orders_newest_first() {
        let mut store = NodeStore::new();
        let keys = roots(&mut store, 3);
        let mut cache = NodeCache::new(CacheConfig::new(10, 5));

        for key in &keys {
            cache.send_to_front(&mut store, *key);
        }
        cache.send_to_front(&mut store, keys[0]);

        assert_eq!(cache.keys(&store), vec![keys[0], keys[2], keys[1]]);
        assert_list_consistent(&cache, &store);
    }

    #[test]
    fn test_touch_defers_trim() {
        let mut store = NodeStore::new();
        let keys = roots(&mut store, 5);
        let mut cache = NodeCache::new(CacheConfig::new(4, 2));

        for key in &keys {
            cache.touch(&mut store, *key);
        }
        assert_eq!(cache.size(), 5);
        assert_list_consistent(&cache, &store);

        cache.trim_if_over(&mut store);
        assert_eq!(cache.keys(&store), vec![keys[4], keys[3]]);
        assert_eq!(cache.trim_if_over(&mut store), 0);
        assert_eq!(cache.size(), 2);
    }

    #[test]
    fn test_remove_node_absent_is_noop() {
        let mut store = NodeStore::new();
        let keys = roots(&mut store, 2);
        let mut cache = NodeCache::new(CacheConfig::default());

        cache.send_to_front(&mut store, keys[0]);
        cache.remove_node(&mut store, keys[1]);
        assert_eq!(cache.size(), 1);

        cache.remove_node(&mut store, keys[0]);
        cache.remove_node(&mut store, keys[0]);
        assert_eq!(cache.size(), 0);
        assert_eq!(cache.newest(), None);
        assert_eq!(cache.oldest(), None);
    }

    #[test]
    fn test_trim_without_full_sibling_group_frees_nothing() {
        let mut store = NodeStore::new();
        let keys = roots(&mut store, 5);
        let mut cache = NodeCache::new(CacheConfig::new(4, 2));

        for key in &keys {
            cache.send_to_front(&mut store, *key);
        }

        assert_eq!(cache.size(), 2);
        assert_eq!(cache.keys(&store), vec![keys[4], keys[3]]);
        assert!(keys.iter().all(|k| store.get(*k).expect("node").has_data()));
        assert_eq!(cache.freed(), 0);
    }

    #[test]
    fn test_cold_sibling_group_freed_together() {
        let mut store = NodeStore::new();
        let root = roots(&mut store, 1)[0];
        let children = store.create_children(root).expect("children");
        for child in children {
            give_data(&mut store, child);
        }
        let other = roots(&mut store, 1)[0];
        let mut cache = NodeCache::new(CacheConfig::new(4, 0));

        for child in children {
            cache.send_to_front(&mut store, child);
        }
        assert_eq!(cache.size(), 4);
        cache.send_to_front(&mut store, other);

        assert_eq!(cache.size(), 0);
        assert!(children.iter().all(|c| !store.get(*c).expect("node").has_data()));
        assert!(store.get(root).expect("root").has_data());
        assert!(store.get(other).expect("root").has_data());
        assert_eq!(cache.freed(), 4);
    }

    #[test]
    fn test_warm_sibling_blocks_release() {
        let mut store = NodeStore::new();
        let root = roots(&mut store, 1)[0];
        let children = store.create_children(root).expect("children");
        for child in children {
            give_data(&mut store, child);
        }
        let mut cache = NodeCache::new(CacheConfig::new(10, 0));
        cache.send_to_front(&mut store, children[1]);

        assert_eq!(cache.delete_data_from_siblings(&mut store, children[0]), 0);
        assert!(store.get(children[0]).expect("node").has_data());

        cache.remove_node(&mut store, children[1]);
        assert_eq!(cache.delete_data_from_siblings(&mut store, children[0]), 4);
    }

    #[test]
    fn test_root_never_released() {
        let mut store = NodeStore::new();
        let root = roots(&mut store, 1)[0];
        let mut cache = NodeCache::new(CacheConfig::default());
        assert_eq!(cache.delete_data_from_siblings(&mut store, root), 0);
        assert!(store.get(root).expect("root").has_data());
    }

    #[test]
    fn test_clear_keeps_payloads() {
        let mut store = NodeStore::new();
        let keys = roots(&mut store, 3);
        let mut cache = NodeCache::new(CacheConfig::default());
        for key in &keys {
            cache.send_to_front(&mut store, *key);
        }
        cache.clear(&mut store);
        assert_eq!(cache.size(), 0);
        assert!(keys.iter().all(|k| !cache.contains(&store, *k)));
        assert!(keys.iter().all(|k| store.get(*k).expect("node").has_data()));
    }

    proptest! {
        #[test]
        fn prop_list_walk_matches_size(ops in proptest::collection::vec((0usize..12, any::<bool>()), 0..200)) {
            let mut store = NodeStore::new();
            let keys = roots(&mut store, 12);
            let mut cache = NodeCache::new(CacheConfig::new(1000, 500));

            for (index, touch) in ops {
                if touch {
                    cache.send_to_front(&mut store, keys[index]);
                } else {
                    cache.remove_node(&mut store, keys[index]);
                }
                assert_list_consistent(&cache, &store);
            }
        }

        #[test]
        fn prop_sibling_groups_freed_atomically(
            touches in proptest::collection::vec(0usize..16, 1..300),
            maximum in 2usize..12,
            minimum in 0usize..6,
        ) {
            let mut store = NodeStore::new();
            let (root, leaves) = two_level_tree(&mut store);
            let mut cache = NodeCache::new(CacheConfig::new(maximum, minimum));

            for index in touches {
                cache.send_to_front(&mut store, leaves[index]);
                prop_assert!(cache.size() <= cache.config().maximum);
                for group in leaves.chunks(4) {
                    let emptied = group
                        .iter()
                        .filter(|k| !store.get(**k).expect("leaf").has_data())
                        .count();
                    prop_assert!(emptied == 0 || emptied == 4);
                }
            }
            prop_assert!(store.get(root).expect("root").has_data());
        }
    }
}
