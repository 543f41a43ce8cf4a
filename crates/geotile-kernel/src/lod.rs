//! Level-of-detail evaluation.
//!
//! An evaluator snapshots camera-derived parameters once per frame in
//! [`LodEvaluator::begin_frame`] and then scores every visited node against
//! them. Two evaluators are provided: [`GlobeLod`] estimates the fraction of
//! the view a terrain patch covers on a 3D globe, [`ProjectedLod`] compares a
//! patch's error and size with the pixel size of a 2D map view.

use geotile_common::Bounds2;
use glam::DVec3;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::camera::CameraState;
use crate::tree::{TerrainData, TreeNode};

/// Default deepest level any evaluator refines to.
pub const DEFAULT_MAX_LEVEL: u32 = 20;

/// Ternary LOD outcome for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LodDecision {
    /// Needs more detail: request or descend into children
    Refine,
    /// Good at the current resolution: display it, stop descending
    Keep,
    /// Out of view: skip the whole subtree
    Cull,
}

/// Scores nodes against a per-frame camera snapshot.
pub trait LodEvaluator {
    /// Snapshots camera-derived parameters for the coming frame.
    fn begin_frame(&mut self, camera: &CameraState);

    /// Decides what to do with `node` this frame.
    fn evaluate(&self, node: &TreeNode) -> LodDecision;

    /// Screen coverage of `node`, for evaluators that measure one.
    fn coverage(&self, _node: &TreeNode) -> Option<f64> {
        None
    }
}

fn terrain_of(node: &TreeNode) -> Option<&TerrainData> {
    match node.terrain_data() {
        Ok(terrain) => Some(terrain),
        Err(e) => {
            error!("Cannot evaluate node {}: {e}", node.id());
            None
        },
    }
}

/// Configuration of [`GlobeLod`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobeLodConfig {
    /// Coverage above which a node is refined
    pub refine_coverage: f64,
    /// Deepest level to refine to
    pub max_level: u32,
}

impl Default for GlobeLodConfig {
    fn default() -> Self {
        Self {
            refine_coverage: 0.1,
            max_level: DEFAULT_MAX_LEVEL,
        }
    }
}

/// Coverage-driven evaluator for a 3D globe centered on the origin.
#[derive(Debug, Clone)]
pub struct GlobeLod {
    config: GlobeLodConfig,
    camera: CameraState,
    forward_normal: DVec3,
    tan_h: f64,
    tan_v: f64,
}

impl GlobeLod {
    /// Creates an evaluator; call [`LodEvaluator::begin_frame`] before use.
    #[must_use]
    pub fn new(config: GlobeLodConfig) -> Self {
        let mut lod = Self {
            config,
            camera: CameraState::default(),
            forward_normal: DVec3::Z,
            tan_h: 0.0,
            tan_v: 0.0,
        };
        lod.snapshot(&CameraState::default());
        lod
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &GlobeLodConfig {
        &self.config
    }

    fn snapshot(&mut self, camera: &CameraState) {
        self.camera = camera.clone();
        self.forward_normal = camera.position.normalize_or_zero();
        self.tan_h = camera.tan_half_horizontal();
        self.tan_v = camera.tan_half_vertical();
    }

    /// Unit vector from the globe center to the camera.
    #[must_use]
    pub const fn forward_normal(&self) -> DVec3 {
        self.forward_normal
    }

    /// Approximate fraction of the view covered by `node`, in `[0, 1]`.
    ///
    /// Nodes whose four corners all face away from the camera are on the far
    /// side of the globe and score exactly zero without any sphere tests.
    #[must_use]
    pub fn node_coverage(&self, node: &TreeNode) -> f64 {
        let Some(terrain) = terrain_of(node) else {
            return 0.0;
        };
        if terrain
            .corner_normals
            .iter()
            .all(|n| n.dot(self.forward_normal) < 0.0)
        {
            return 0.0;
        }

        let sphere = terrain.bounding_sphere;
        let r = sphere.radius;
        if sphere.contains(self.camera.position) {
            return 1.0;
        }

        let rel = sphere.center - self.camera.position;
        let f = rel.dot(self.camera.forward);
        if f + r <= 0.0 {
            return 0.0;
        }
        let x = rel.dot(self.camera.right);
        let y = rel.dot(self.camera.up);

        // Signed distance from the center to each side plane, outward positive.
        let (cos_h, sin_h) = side_plane(self.tan_h);
        let (cos_v, sin_v) = side_plane(self.tan_v);
        if x * cos_h - f * sin_h > r
            || -x * cos_h - f * sin_h > r
            || y * cos_v - f * sin_v > r
            || -y * cos_v - f * sin_v > r
        {
            return 0.0;
        }

        // Sphere straddles the camera plane.
        if f <= r {
            return 1.0;
        }

        let half_w = f * self.tan_h;
        let half_h = f * self.tan_v;
        let left = (x + half_w).clamp(-r, r);
        let right = (half_w - x).clamp(-r, r);
        let down = (y + half_h).clamp(-r, r);
        let up = (half_h - y).clamp(-r, r);
        let width = (left + right).max(0.0);
        let height = (up + down).max(0.0);
        let coverage = width * height / (4.0 * f * f * self.tan_h * self.tan_v);
        coverage.clamp(0.0, 1.0)
    }
}

fn side_plane(tan_half: f64) -> (f64, f64) {
    let angle = tan_half.atan();
    (angle.cos(), angle.sin())
}

impl Default for GlobeLod {
    fn default() -> Self {
        Self::new(GlobeLodConfig::default())
    }
}

impl LodEvaluator for GlobeLod {
    fn begin_frame(&mut self, camera: &CameraState) {
        self.snapshot(camera);
    }

    fn evaluate(&self, node: &TreeNode) -> LodDecision {
        let coverage = self.node_coverage(node);
        if coverage <= 0.0 {
            LodDecision::Cull
        } else if node.level() >= self.config.max_level || coverage <= self.config.refine_coverage {
            LodDecision::Keep
        } else {
            LodDecision::Refine
        }
    }

    fn coverage(&self, node: &TreeNode) -> Option<f64> {
        Some(self.node_coverage(node))
    }
}

/// Configuration of [`ProjectedLod`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectedLodConfig {
    /// Allowed geometric error, in pixels
    pub location_tolerance: f64,
    /// Allowed texel stretch, in texels per pixel
    pub texture_tolerance: f64,
    /// Texture edge length of one patch, in texels
    pub patch_size: f64,
    /// Deepest level to refine to
    pub max_level: u32,
}

impl Default for ProjectedLodConfig {
    fn default() -> Self {
        Self {
            location_tolerance: 50.0,
            texture_tolerance: 1.0,
            patch_size: 256.0,
            max_level: DEFAULT_MAX_LEVEL,
        }
    }
}

/// Pixel-error evaluator for a 2D map projection.
#[derive(Debug, Clone)]
pub struct ProjectedLod {
    config: ProjectedLodConfig,
    pixel_size: f64,
    camera_bounds: Bounds2,
}

impl ProjectedLod {
    /// Creates an evaluator; call [`LodEvaluator::begin_frame`] before use.
    #[must_use]
    pub fn new(config: ProjectedLodConfig) -> Self {
        Self {
            config,
            pixel_size: 1.0,
            camera_bounds: Bounds2::default(),
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ProjectedLodConfig {
        &self.config
    }

    /// World units per screen pixel this frame.
    #[must_use]
    pub const fn pixel_size(&self) -> f64 {
        self.pixel_size
    }

    /// Visible region this frame, in projected coordinates.
    #[must_use]
    pub const fn camera_bounds(&self) -> &Bounds2 {
        &self.camera_bounds
    }

    /// Whether a geometric error is below the location tolerance.
    #[must_use]
    pub fn location_error_ok(&self, error: f64) -> bool {
        error < self.config.location_tolerance * self.pixel_size
    }

    /// Whether a patch is small enough for its texture resolution.
    #[must_use]
    pub fn texture_error_ok(&self, bounds: &Bounds2) -> bool {
        bounds.width().max(bounds.height())
            < self.config.patch_size * self.config.texture_tolerance * self.pixel_size
    }
}

impl Default for ProjectedLod {
    fn default() -> Self {
        Self::new(ProjectedLodConfig::default())
    }
}

impl LodEvaluator for ProjectedLod {
    fn begin_frame(&mut self, camera: &CameraState) {
        let height = f64::from(camera.viewport.1.max(1));
        self.pixel_size = 2.0 * camera.parallel_scale / height;
        let half_h = camera.parallel_scale;
        let half_w = half_h * camera.aspect();
        self.camera_bounds = Bounds2::from_center(camera.position.x, camera.position.y, half_w, half_h);
    }

    fn evaluate(&self, node: &TreeNode) -> LodDecision {
        let Some(terrain) = terrain_of(node) else {
            return LodDecision::Cull;
        };
        if !terrain.projection_bounds.intersects(&self.camera_bounds) {
            return LodDecision::Cull;
        }
        let detailed = self.location_error_ok(terrain.error)
            && self.texture_error_ok(&terrain.projection_bounds);
        if detailed || node.level() >= self.config.max_level {
            LodDecision::Keep
        } else {
            LodDecision::Refine
        }
    }
}

#[cfg(test)]
mod tests {
    use geotile_common::{GeoBounds, NodeId};
    use glam::DVec2;

    use super::*;
    use crate::tree::BoundingSphere;

    fn patch(bounds: GeoBounds, center: DVec3, radius: f64) -> TreeNode {
        let mut node = TreeNode::terrain(NodeId::ROOT, 1, bounds);
        let terrain = node.terrain_data_mut().expect("terrain");
        terrain.set_corner_normals(&bounds);
        terrain.bounding_sphere = BoundingSphere { center, radius };
        node
    }

    fn globe_camera(position: DVec3) -> GlobeLod {
        let mut lod = GlobeLod::default();
        lod.begin_frame(&CameraState::look_at(position, DVec3::ZERO, DVec3::Z, 30.0, (800, 800)));
        lod
    }

    #[test]
    fn test_far_side_is_culled_exactly() {
        let lod = globe_camera(DVec3::new(5.0, 0.0, 0.0));
        // Centered on lon 180; the sphere would be in view if it were tested.
        let node = patch(GeoBounds::from_degrees(150.0, 180.0, -10.0, 10.0), DVec3::ZERO, 100.0);
        for n in node.terrain_data().expect("terrain").corner_normals {
            assert!(n.dot(lod.forward_normal()) < 0.0);
        }
        assert_eq!(lod.node_coverage(&node), 0.0);
        assert_eq!(lod.evaluate(&node), LodDecision::Cull);
    }

    #[test]
    fn test_camera_inside_sphere() {
        let lod = globe_camera(DVec3::new(1.01, 0.0, 0.0));
        let node = patch(GeoBounds::from_degrees(-10.0, 10.0, -10.0, 10.0), DVec3::X, 0.5);
        assert_eq!(lod.node_coverage(&node), 1.0);
        assert_eq!(lod.evaluate(&node), LodDecision::Refine);
    }

    #[test]
    fn test_behind_camera_is_culled() {
        let lod = globe_camera(DVec3::new(3.0, 0.0, 0.0));
        let node = patch(GeoBounds::from_degrees(-10.0, 10.0, -10.0, 10.0), DVec3::new(6.0, 0.0, 0.0), 0.5);
        assert_eq!(lod.node_coverage(&node), 0.0);
    }

    #[test]
    fn test_outside_side_plane_is_culled() {
        let lod = globe_camera(DVec3::new(3.0, 0.0, 0.0));
        let node = patch(GeoBounds::from_degrees(-10.0, 10.0, -10.0, 10.0), DVec3::new(0.0, 50.0, 0.0), 1.0);
        assert_eq!(lod.node_coverage(&node), 0.0);
    }

    #[test]
    fn test_coverage_shrinks_with_distance() {
        let bounds = GeoBounds::from_degrees(-10.0, 10.0, -10.0, 10.0);
        let node = patch(bounds, DVec3::X, 0.2);
        let near = globe_camera(DVec3::new(2.0, 0.0, 0.0)).node_coverage(&node);
        let far = globe_camera(DVec3::new(20.0, 0.0, 0.0)).node_coverage(&node);
        assert!(near > far);
        assert!(far > 0.0);
        assert!(near <= 1.0);
    }

    #[test]
    fn test_max_level_keeps() {
        let mut lod = GlobeLod::new(GlobeLodConfig {
            refine_coverage: 0.0,
            max_level: 1,
        });
        lod.begin_frame(&CameraState::look_at(DVec3::new(2.0, 0.0, 0.0), DVec3::ZERO, DVec3::Z, 30.0, (800, 800)));
        let node = patch(GeoBounds::from_degrees(-10.0, 10.0, -10.0, 10.0), DVec3::X, 0.2);
        assert_eq!(lod.evaluate(&node), LodDecision::Keep);
    }

    fn projected(error: f64, bounds: Bounds2) -> TreeNode {
        let mut node = TreeNode::terrain(NodeId::ROOT, 2, GeoBounds::WORLD);
        let terrain = node.terrain_data_mut().expect("terrain");
        terrain.error = error;
        terrain.projection_bounds = bounds;
        node
    }

    fn unit_pixel_lod() -> ProjectedLod {
        let mut lod = ProjectedLod::default();
        lod.begin_frame(&CameraState::orthographic(DVec2::ZERO, 300.0, (600, 600)));
        lod
    }

    #[test]
    fn test_location_tolerance() {
        let lod = unit_pixel_lod();
        assert!((lod.pixel_size() - 1.0).abs() < f64::EPSILON);
        assert!(lod.location_error_ok(10.0));
        assert!(!lod.location_error_ok(60.0));

        let small = Bounds2::new(0.0, 10.0, 0.0, 10.0);
        assert_eq!(lod.evaluate(&projected(10.0, small)), LodDecision::Keep);
        assert_eq!(lod.evaluate(&projected(60.0, small)), LodDecision::Refine);
    }

    #[test]
    fn test_texture_tolerance() {
        let lod = unit_pixel_lod();
        let wide = Bounds2::new(-200.0, 200.0, 0.0, 10.0);
        assert!(!lod.texture_error_ok(&wide));
        assert_eq!(lod.evaluate(&projected(0.0, wide)), LodDecision::Refine);
    }

    #[test]
    fn test_projected_cull_outside_view() {
        let lod = unit_pixel_lod();
        let away = Bounds2::new(1000.0, 1010.0, 1000.0, 1010.0);
        assert_eq!(lod.evaluate(&projected(0.0, away)), LodDecision::Cull);
    }

    #[test]
    fn test_image_node_is_not_scored() {
        let lod = unit_pixel_lod();
        let node = TreeNode::image(NodeId::hemisphere(false), 0, GeoBounds::hemisphere(false));
        assert_eq!(lod.evaluate(&node), LodDecision::Cull);
        assert_eq!(lod.coverage(&node), None);
    }
}
