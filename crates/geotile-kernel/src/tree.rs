//! Quadtree nodes and the arena that owns them.
//!
//! Every node of every tree lives in a [`NodeStore`] and is addressed by a
//! [`NodeKey`]. Parent, child and recency links are keys into the same store,
//! so the only owner of a node is the store itself.
//!
//! ## Payloads
//!
//! A node carries either terrain geometry ([`TerrainData`]) or imagery
//! ([`ImageData`]). Payloads are reference counted so that a shallow copy can
//! share them with a detached node handed to a worker thread. Deleting a
//! payload keeps the node in the tree: eviction empties nodes, it never
//! unlinks them.

use std::fmt;
use std::sync::Arc;

use geotile_common::{Bounds2, GeoBounds, GeoRange, NodeId, TreeError, TreeResult, MAX_LEVEL};
use glam::{DVec2, DVec3};
use tracing::{error, warn};

/// Index of a node inside a [`NodeStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(u32);

impl NodeKey {
    /// Returns the position of the node in its store.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Fetch status of a node's children.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NodeStatus {
    /// No request outstanding.
    #[default]
    None,
    /// Children have been requested and not yet integrated.
    Processing,
}

/// How payloads are carried over by [`TreeNode::copy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    /// Share the payload with the source node.
    Shallow,
    /// Clone the payload into a fresh allocation.
    Deep,
}

/// Geometry of a terrain patch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TerrainModel {
    /// Vertex positions in world space.
    pub points: Vec<DVec3>,
    /// `(lon, lat)` in degrees for each vertex.
    pub lat_long: Vec<DVec2>,
    /// Triangle vertex indices.
    pub triangles: Vec<[u32; 3]>,
}

/// Raster imagery for one image tile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Raster {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// RGBA8 pixels, row-major from the south-west corner
    pub pixels: Vec<u8>,
    /// `(lon_min, lat_min)` of the tile
    pub origin: DVec2,
    /// Degrees per pixel along longitude and latitude
    pub spacing: DVec2,
}

impl Raster {
    /// `(lon_max, lat_max)` of the tile.
    #[must_use]
    pub fn extent_max(&self) -> DVec2 {
        self.origin + self.spacing * DVec2::new(f64::from(self.width), f64::from(self.height))
    }
}

/// Opaque handle to a texture derived from a raster by the renderer.
///
/// Sources never create one. The renderer sets it after uploading the raster
/// and the tree drops it together with the raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

/// Bounding sphere of a terrain patch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoundingSphere {
    /// Center in world space
    pub center: DVec3,
    /// Radius in world units
    pub radius: f64,
}

impl BoundingSphere {
    /// Whether `point` is inside the sphere.
    #[must_use]
    pub fn contains(&self, point: DVec3) -> bool {
        self.center.distance(point) <= self.radius
    }
}

/// Terrain payload and metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TerrainData {
    /// Patch geometry
    pub model: Option<Arc<TerrainModel>>,
    /// Bounding sphere of the model
    pub bounding_sphere: BoundingSphere,
    /// Unit normals at the four footprint corners, in quadrant order
    pub corner_normals: [DVec3; 4],
    /// Footprint in projected coordinates
    pub projection_bounds: Bounds2,
    /// Graticule subdivision level the model was built at
    pub graticule_level: u32,
    /// Maximum deviation from a higher-resolution reference
    pub error: f64,
    /// Screen coverage from the last frame it was evaluated
    pub coverage: f64,
}

impl TerrainData {
    /// Recomputes the bounding sphere from the model points.
    pub fn update_bounding_sphere(&mut self) {
        let Some(model) = self.model.as_ref() else {
            return;
        };
        if model.points.is_empty() {
            return;
        }
        let (min, max) = model.points.iter().fold(
            (DVec3::splat(f64::MAX), DVec3::splat(f64::MIN)),
            |(lo, hi), p| (lo.min(*p), hi.max(*p)),
        );
        let center = 0.5 * (min + max);
        let radius = model
            .points
            .iter()
            .map(|p| p.distance(center))
            .fold(0.0, f64::max);
        self.bounding_sphere = BoundingSphere { center, radius };
    }

    /// Sets the corner normals to the outward sphere normals of `bounds`.
    pub fn set_corner_normals(&mut self, bounds: &GeoBounds) {
        self.corner_normals = bounds.corners().map(|(lon, lat)| unit_normal(lon, lat));
    }
}

/// Outward unit normal of the sphere at `(lon, lat)` degrees.
///
/// The globe is z-up with longitude 0 on the +x axis.
#[must_use]
pub fn unit_normal(lon: f64, lat: f64) -> DVec3 {
    let (lon, lat) = (lon.to_radians(), lat.to_radians());
    DVec3::new(lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin())
}

/// Image payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageData {
    /// Raster imagery
    pub image: Option<Arc<Raster>>,
    /// Texture the renderer derived from `image`; `None` until it uploads one
    pub texture: Option<TextureHandle>,
}

/// Payload kind of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Terrain geometry
    Terrain(TerrainData),
    /// Draped imagery
    Image(ImageData),
}

impl NodeKind {
    /// Name of the kind, for diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Terrain(_) => "terrain",
            Self::Image(_) => "image",
        }
    }

    fn empty_like(&self) -> Self {
        match self {
            Self::Terrain(_) => Self::Terrain(TerrainData::default()),
            Self::Image(_) => Self::Image(ImageData::default()),
        }
    }

    fn copy(&self, mode: CopyMode) -> Self {
        match (self, mode) {
            (Self::Terrain(t), CopyMode::Shallow) => Self::Terrain(t.clone()),
            (Self::Terrain(t), CopyMode::Deep) => Self::Terrain(TerrainData {
                model: t.model.as_ref().map(|m| Arc::new(TerrainModel::clone(m))),
                ..t.clone()
            }),
            (Self::Image(i), CopyMode::Shallow) => Self::Image(i.clone()),
            (Self::Image(i), CopyMode::Deep) => Self::Image(ImageData {
                image: i.image.as_ref().map(|r| Arc::new(Raster::clone(r))),
                texture: i.texture,
            }),
        }
    }
}

/// A node of a terrain or image quadtree.
#[derive(Debug, Clone)]
pub struct TreeNode {
    id: NodeId,
    level: u32,
    bounds: GeoBounds,
    kind: NodeKind,
    unavailable: bool,
    status: NodeStatus,
    parent: Option<NodeKey>,
    children: Option<[NodeKey; 4]>,
    pub(crate) older: Option<NodeKey>,
    pub(crate) newer: Option<NodeKey>,
}

impl TreeNode {
    fn with_kind(id: NodeId, level: u32, bounds: GeoBounds, kind: NodeKind) -> Self {
        Self {
            id,
            level,
            bounds,
            kind,
            unavailable: false,
            status: NodeStatus::None,
            parent: None,
            children: None,
            older: None,
            newer: None,
        }
    }

    /// Creates an empty terrain node.
    #[must_use]
    pub fn terrain(id: NodeId, level: u32, bounds: GeoBounds) -> Self {
        Self::with_kind(id, level, bounds, NodeKind::Terrain(TerrainData::default()))
    }

    /// Creates an empty image node.
    #[must_use]
    pub fn image(id: NodeId, level: u32, bounds: GeoBounds) -> Self {
        Self::with_kind(id, level, bounds, NodeKind::Image(ImageData::default()))
    }

    /// Detached, empty child of the same kind covering quadrant `index`.
    ///
    /// Id, level and footprint are filled in; payload is left for the source.
    pub fn child_template(&self, index: usize) -> TreeResult<Self> {
        if index > 3 {
            return Err(TreeError::ChildIndexOutOfRange { index });
        }
        let level = self.level + 1;
        let id = self.id.child(level, index).ok_or(TreeError::DepthLimit {
            id: self.id,
            level: self.level,
        })?;
        Ok(Self::with_kind(
            id,
            level,
            self.bounds.quadrant(index),
            self.kind.empty_like(),
        ))
    }

    /// Detached templates for all four children, in quadrant order.
    pub fn child_templates(&self) -> TreeResult<[Self; 4]> {
        Ok([
            self.child_template(0)?,
            self.child_template(1)?,
            self.child_template(2)?,
            self.child_template(3)?,
        ])
    }

    /// Quadtree path id.
    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// Depth in the tree (0 = root).
    #[must_use]
    pub const fn level(&self) -> u32 {
        self.level
    }

    /// Geographic footprint.
    #[must_use]
    pub const fn bounds(&self) -> &GeoBounds {
        &self.bounds
    }

    /// Longitude range in degrees.
    #[must_use]
    pub const fn lon_range(&self) -> GeoRange {
        self.bounds.lon
    }

    /// Latitude range in degrees.
    #[must_use]
    pub const fn lat_range(&self) -> GeoRange {
        self.bounds.lat
    }

    /// Parent key, `None` for roots.
    #[must_use]
    pub const fn parent(&self) -> Option<NodeKey> {
        self.parent
    }

    /// Keys of the four children, if created.
    #[must_use]
    pub const fn children(&self) -> Option<[NodeKey; 4]> {
        self.children
    }

    /// Key of child `index`, `None` if children have not been created.
    pub fn child(&self, index: usize) -> TreeResult<Option<NodeKey>> {
        if index > 3 {
            error!("Child index {index} requested on node {}", self.id);
            return Err(TreeError::ChildIndexOutOfRange { index });
        }
        Ok(self.children.map(|c| c[index]))
    }

    /// Fetch status of the children.
    #[must_use]
    pub const fn status(&self) -> NodeStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: NodeStatus) {
        self.status = status;
    }

    /// Whether the source reported no data for this node.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        self.unavailable
    }

    /// Marks the node as having no data at its source.
    pub fn mark_unavailable(&mut self) {
        self.unavailable = true;
    }

    /// Whether the node is linked into a recency list.
    ///
    /// A node that is alone in the list has no links; callers that need exact
    /// membership ask the cache.
    #[must_use]
    pub const fn has_recency_links(&self) -> bool {
        self.older.is_some() || self.newer.is_some()
    }

    /// Payload kind.
    #[must_use]
    pub const fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Terrain payload.
    pub fn terrain_data(&self) -> TreeResult<&TerrainData> {
        match &self.kind {
            NodeKind::Terrain(t) => Ok(t),
            other => Err(wrong_kind("terrain", other)),
        }
    }

    /// Mutable terrain payload.
    pub fn terrain_data_mut(&mut self) -> TreeResult<&mut TerrainData> {
        match &mut self.kind {
            NodeKind::Terrain(t) => Ok(t),
            other => Err(wrong_kind("terrain", other)),
        }
    }

    /// Image payload.
    pub fn image_data(&self) -> TreeResult<&ImageData> {
        match &self.kind {
            NodeKind::Image(i) => Ok(i),
            other => Err(wrong_kind("image", other)),
        }
    }

    /// Mutable image payload.
    pub fn image_data_mut(&mut self) -> TreeResult<&mut ImageData> {
        match &mut self.kind {
            NodeKind::Image(i) => Ok(i),
            other => Err(wrong_kind("image", other)),
        }
    }

    /// Whether the payload is present.
    #[must_use]
    pub fn has_data(&self) -> bool {
        match &self.kind {
            NodeKind::Terrain(t) => t.model.is_some(),
            NodeKind::Image(i) => i.image.is_some(),
        }
    }

    /// Drops the payload, keeping the node in its tree.
    pub fn delete_data(&mut self) {
        match &mut self.kind {
            NodeKind::Terrain(t) => t.model = None,
            NodeKind::Image(i) => {
                i.image = None;
                i.texture = None;
            },
        }
    }

    /// Index of this node within its parent.
    pub fn which_child(&self) -> TreeResult<usize> {
        self.id.quadrant(self.level).ok_or_else(|| {
            error!("which_child called on root node {}", self.id);
            TreeError::RootHasNoIndex { id: self.id }
        })
    }

    /// Whether this node lies strictly below `other`.
    #[must_use]
    pub fn is_descendant_of(&self, other: Option<&TreeNode>) -> bool {
        other.is_some_and(|o| self.id.is_descendant_of(self.level, o.id, o.level))
    }

    /// Detached copy with the same id, footprint and payload.
    ///
    /// Tree structure, recency links and fetch status are not copied.
    #[must_use]
    pub fn copy(&self, mode: CopyMode) -> Self {
        let mut node = Self::with_kind(self.id, self.level, self.bounds, self.kind.copy(mode));
        node.unavailable = self.unavailable;
        node
    }

    /// Overwrites id, footprint and payload with those of `other`.
    ///
    /// Tree structure, recency links and fetch status are left untouched.
    pub fn copy_from(&mut self, other: &TreeNode, mode: CopyMode) {
        self.id = other.id;
        self.level = other.level;
        self.bounds = other.bounds;
        self.kind = other.kind.copy(mode);
        self.unavailable = other.unavailable;
    }
}

fn wrong_kind(expected: &'static str, actual: &NodeKind) -> TreeError {
    error!("Node accessed as {expected} but holds {}", actual.name());
    TreeError::WrongKind {
        expected,
        actual: actual.name(),
    }
}

/// Arena owning every node of one or more quadtrees.
#[derive(Debug, Default)]
pub struct NodeStore {
    nodes: Vec<TreeNode>,
    depth_warned: bool,
}

impl NodeStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a root node, clearing any structural links it carries.
    pub fn insert_root(&mut self, node: TreeNode) -> NodeKey {
        self.push(node, None)
    }

    fn push(&mut self, mut node: TreeNode, parent: Option<NodeKey>) -> NodeKey {
        let key = NodeKey(self.nodes.len() as u32);
        node.parent = parent;
        node.children = None;
        node.older = None;
        node.newer = None;
        node.status = NodeStatus::None;
        self.nodes.push(node);
        key
    }

    /// Number of nodes in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Gets a node by key.
    #[must_use]
    pub fn get(&self, key: NodeKey) -> Option<&TreeNode> {
        self.nodes.get(key.index())
    }

    /// Gets a mutable node by key.
    pub fn get_mut(&mut self, key: NodeKey) -> Option<&mut TreeNode> {
        self.nodes.get_mut(key.index())
    }

    /// Gets a node by key, reporting unknown keys as errors.
    pub fn node(&self, key: NodeKey) -> TreeResult<&TreeNode> {
        self.get(key).ok_or(TreeError::UnknownNode(key.index()))
    }

    /// Gets a mutable node by key, reporting unknown keys as errors.
    pub fn node_mut(&mut self, key: NodeKey) -> TreeResult<&mut TreeNode> {
        self.nodes
            .get_mut(key.index())
            .ok_or(TreeError::UnknownNode(key.index()))
    }

    /// Iterates over all nodes with their keys.
    pub fn iter(&self) -> impl Iterator<Item = (NodeKey, &TreeNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeKey(i as u32), n))
    }

    /// Creates the four children of `key`, or returns the existing ones.
    ///
    /// Fails with [`TreeError::DepthLimit`] when the node is at
    /// [`MAX_LEVEL`]; nothing is created in that case and a warning is logged
    /// the first time it happens.
    pub fn create_children(&mut self, key: NodeKey) -> TreeResult<[NodeKey; 4]> {
        let node = self.node(key)?;
        if let Some(children) = node.children {
            return Ok(children);
        }
        if node.level >= MAX_LEVEL {
            let (id, level) = (node.id, node.level);
            if !self.depth_warned {
                self.depth_warned = true;
                warn!("Node {id} reached level {MAX_LEVEL}; deeper ids cannot be encoded, refinement stops here");
            }
            return Err(TreeError::DepthLimit { id, level });
        }
        let templates = node.child_templates()?;
        let children = templates.map(|child| self.push(child, Some(key)));
        self.node_mut(key)?.children = Some(children);
        Ok(children)
    }

    /// Index of `key` within its parent.
    pub fn which_child(&self, key: NodeKey) -> TreeResult<usize> {
        self.node(key)?.which_child()
    }

    /// Whether `key` lies strictly below `ancestor`.
    #[must_use]
    pub fn is_descendant_of(&self, key: NodeKey, ancestor: Option<NodeKey>) -> bool {
        match self.get(key) {
            Some(node) => node.is_descendant_of(ancestor.and_then(|a| self.get(a))),
            None => false,
        }
    }

    /// Siblings of `key`, including itself; `None` for roots.
    #[must_use]
    pub fn siblings(&self, key: NodeKey) -> Option<[NodeKey; 4]> {
        let parent = self.get(key)?.parent?;
        self.get(parent)?.children
    }
}
