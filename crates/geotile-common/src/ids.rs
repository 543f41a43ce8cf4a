//! Quadtree node identifiers.
//!
//! A [`NodeId`] packs the root-to-node path into the low bits of a `u64`.
//! Bit 0 selects the hemisphere root of image trees (0 = west, 1 = east);
//! terrain trees have a single root with id 0. A node at level `L` stores its
//! 2-bit quadrant index at bit positions `2L-1` and `2L`, so the path to a node
//! at level `L` occupies the low `2L+1` bits.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Deepest level whose id can be encoded exactly.
///
/// A node at this level cannot have children: the child's quadrant bits would
/// fall off the top of the `u64`.
pub const MAX_LEVEL: u32 = 31;

/// Bit-packed path from a root to a quadtree node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Id of the terrain root and of the western image hemisphere.
    pub const ROOT: Self = Self(0);

    /// Creates an id from a raw value (for deserialization).
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Root id of an image hemisphere.
    #[must_use]
    pub const fn hemisphere(east: bool) -> Self {
        Self(east as u64)
    }

    /// Id of the child at `index` one level below `child_level - 1`.
    ///
    /// Returns `None` when `index` is not a quadrant or `child_level` cannot be
    /// encoded.
    #[must_use]
    pub const fn child(self, child_level: u32, index: usize) -> Option<Self> {
        if index > 3 || child_level == 0 || child_level > MAX_LEVEL {
            return None;
        }
        Some(Self(self.0 | ((index as u64) << (2 * child_level - 1))))
    }

    /// Quadrant index this node occupies within its parent.
    ///
    /// Returns `None` for roots (level 0) and for levels beyond [`MAX_LEVEL`].
    #[must_use]
    pub const fn quadrant(self, level: u32) -> Option<usize> {
        if level == 0 || level > MAX_LEVEL {
            return None;
        }
        Some(((self.0 >> (2 * level - 1)) & 3) as usize)
    }

    /// Mask covering the path bits of a node at `level`.
    #[must_use]
    pub const fn path_mask(level: u32) -> u64 {
        if level >= MAX_LEVEL {
            u64::MAX >> (63 - 2 * MAX_LEVEL)
        } else {
            (1u64 << (2 * level + 1)) - 1
        }
    }

    /// Whether the node `(self, level)` lies strictly below `(ancestor, ancestor_level)`.
    #[must_use]
    pub const fn is_descendant_of(self, level: u32, ancestor: Self, ancestor_level: u32) -> bool {
        if level <= ancestor_level {
            return false;
        }
        self.0 & Self::path_mask(ancestor_level) == ancestor.0
    }

    /// Quadrant indices from the root down to `level`, root-most first.
    #[must_use]
    pub fn path(self, level: u32) -> Vec<usize> {
        (1..=level.min(MAX_LEVEL))
            .filter_map(|l| self.quadrant(l))
            .collect()
    }

    /// File name used by tile databases for this node.
    #[must_use]
    pub fn tile_file_name(self, level: u32, ext: &str) -> String {
        format!("tile_{level}_{}.{ext}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
