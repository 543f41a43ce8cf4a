//! # Geotile Sources
//!
//! Reference [`TileSource`](geotile_kernel::TileSource) implementations:
//! - `GlobeSource`: procedural terrain on a 3D globe
//! - `ProjectedSource`: the same relief on a plate-carrée map
//! - `ImagePyramidSource`: sparse synthetic imagery with hemisphere roots
//!
//! All of them are deterministic for a given configuration and reentrant, so
//! any number of fetch workers can share one instance.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod globe;
pub mod image;
pub mod projected;
pub mod relief;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::globe::*;
    pub use crate::image::*;
    pub use crate::projected::*;
    pub use crate::relief::*;
}

pub use prelude::*;
