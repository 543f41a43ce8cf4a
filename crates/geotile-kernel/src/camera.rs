//! Per-frame camera snapshot consumed by LOD evaluation.
//!
//! The interactive camera lives outside this crate. Each frame the caller
//! captures its state into a [`CameraState`], which is treated as read-only
//! for the rest of the frame.

use glam::{DVec2, DVec3};

/// Default vertical view angle in degrees.
pub const DEFAULT_VIEW_ANGLE: f64 = 30.0;

/// Default viewport size in pixels.
pub const DEFAULT_VIEWPORT: (u32, u32) = (1280, 720);

/// Snapshot of the camera for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraState {
    /// Camera position in world space (projected space for 2D views, z up).
    pub position: DVec3,
    /// Unit view direction.
    pub forward: DVec3,
    /// Unit right vector.
    pub right: DVec3,
    /// Unit up vector.
    pub up: DVec3,
    /// Vertical view angle in degrees (perspective views).
    pub view_angle: f64,
    /// Half the view height in world units (parallel views).
    pub parallel_scale: f64,
    /// Viewport size in pixels (width, height).
    pub viewport: (u32, u32),
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            position: DVec3::new(0.0, 0.0, 1.0),
            forward: DVec3::NEG_Z,
            right: DVec3::X,
            up: DVec3::Y,
            view_angle: DEFAULT_VIEW_ANGLE,
            parallel_scale: 1.0,
            viewport: DEFAULT_VIEWPORT,
        }
    }
}

impl CameraState {
    /// Perspective camera at `position` looking at `target`.
    ///
    /// `up_hint` only needs to be roughly up; the basis is re-orthogonalized.
    #[must_use]
    pub fn look_at(position: DVec3, target: DVec3, up_hint: DVec3, view_angle: f64, viewport: (u32, u32)) -> Self {
        let forward = (target - position).normalize_or_zero();
        let mut right = forward.cross(up_hint).normalize_or_zero();
        if right == DVec3::ZERO {
            right = forward.any_orthonormal_vector();
        }
        let up = right.cross(forward);
        Self {
            position,
            forward,
            right,
            up,
            view_angle,
            parallel_scale: 1.0,
            viewport,
        }
    }

    /// Parallel camera over a 2D map, centered on `center`.
    #[must_use]
    pub fn orthographic(center: DVec2, parallel_scale: f64, viewport: (u32, u32)) -> Self {
        Self {
            position: center.extend(1.0),
            parallel_scale,
            viewport,
            ..Self::default()
        }
    }

    /// Viewport width over height.
    #[must_use]
    pub fn aspect(&self) -> f64 {
        let (w, h) = self.viewport;
        if h == 0 {
            1.0
        } else {
            f64::from(w) / f64::from(h)
        }
    }

    /// Tangent of half the vertical view angle.
    #[must_use]
    pub fn tan_half_vertical(&self) -> f64 {
        (0.5 * self.view_angle).to_radians().tan()
    }

    /// Tangent of half the horizontal view angle.
    #[must_use]
    pub fn tan_half_horizontal(&self) -> f64 {
        self.tan_half_vertical() * self.aspect()
    }
}
