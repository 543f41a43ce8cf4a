//! Error types for geotile.

use thiserror::Error;

use crate::ids::NodeId;

/// Top-level error type for geotile operations.
#[derive(Debug, Error)]
pub enum GeoTileError {
    /// Structural misuse of the quadtree
    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    /// A tile source could not produce data
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Background scheduler errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Structural (programmer) errors on the quadtree.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// A root node was asked for its index within its parent
    #[error("Node {id} is a root and has no child index")]
    RootHasNoIndex {
        /// Node id
        id: NodeId,
    },

    /// Child index outside `0..=3`
    #[error("Child index {index} out of range 0..=3")]
    ChildIndexOutOfRange {
        /// Requested index
        index: usize,
    },

    /// Payload accessed as the wrong node kind
    #[error("Node is {actual}, expected {expected}")]
    WrongKind {
        /// Expected kind
        expected: &'static str,
        /// Actual kind
        actual: &'static str,
    },

    /// The node id cannot encode another level
    #[error("Node {id} at level {level} cannot encode children")]
    DepthLimit {
        /// Node id
        id: NodeId,
        /// Node level
        level: u32,
    },

    /// A node key that does not belong to the store
    #[error("Unknown node key {0}")]
    UnknownNode(usize),
}

/// Data-unavailable errors reported by tile sources.
///
/// These are expected and never fatal: the affected node simply has no payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The source has no data for this region or depth
    #[error("No data for node {id} at level {level}")]
    NoData {
        /// Node id
        id: NodeId,
        /// Node level
        level: u32,
    },

    /// The source was handed a node of the wrong kind
    #[error("Source cannot populate {0} nodes")]
    WrongKind(&'static str),
}

/// Fetch scheduler errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Requests were issued before `initialize`
    #[error("Scheduler not initialized")]
    NotInitialized,

    /// The scheduler has been shut down
    #[error("Scheduler stopped")]
    Stopped,

    /// The request names a node whose children cannot exist
    #[error("Request rejected: {0}")]
    Rejected(#[from] TreeError),

    /// A worker thread could not be spawned
    #[error("Failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Result type alias for geotile operations.
pub type GeoTileResult<T> = Result<T, GeoTileError>;

/// Result type for quadtree operations.
pub type TreeResult<T> = Result<T, TreeError>;
