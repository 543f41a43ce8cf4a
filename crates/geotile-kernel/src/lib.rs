//! # Geotile Kernel
//!
//! Multi-resolution quadtree tile cache and its asynchronous refinement
//! pipeline.
//!
//! This crate provides:
//! - Terrain and image quadtree nodes stored in an arena
//! - The `TileSource` trait that produces node payloads
//! - A worker pool that fetches children off the render thread
//! - Camera-driven level-of-detail evaluation (3D globe and 2D map)
//! - The per-frame tree walker
//! - An LRU node cache with sibling-group eviction
//!
//! ## Frame Flow
//!
//! Every frame the walker snapshots the camera, scores each visited node,
//! and either culls it, displays it, or refines it. Refining queues a fetch
//! on the scheduler; the results are picked up on a later frame and attached
//! to the tree. Displayed nodes are moved to the front of the cache, and
//! nodes that fall off its cold end release their payloads one sibling group
//! at a time.
//!
//! ## Threading
//!
//! The tree, the walker and the cache live on the render thread. Worker
//! threads only see detached copies of the nodes they fetch for.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod cache;
pub mod camera;
pub mod imagery;
pub mod lod;
pub mod scheduler;
pub mod source;
pub mod tree;
pub mod walker;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::cache::*;
    pub use crate::camera::*;
    pub use crate::lod::*;
    pub use crate::scheduler::*;
    pub use crate::source::*;
    pub use crate::tree::*;
    pub use crate::walker::*;
}

pub use prelude::*;
