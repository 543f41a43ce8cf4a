//! Geographic and projected footprints of quadtree nodes.

use serde::{Deserialize, Serialize};

/// Closed interval of degrees along one geographic axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoRange {
    /// Lower bound in degrees
    pub lo: f64,
    /// Upper bound in degrees
    pub hi: f64,
}

impl GeoRange {
    /// Full longitude range.
    pub const LONGITUDE: Self = Self::new(-180.0, 180.0);

    /// Full latitude range.
    pub const LATITUDE: Self = Self::new(-90.0, 90.0);

    /// Creates a new range.
    #[must_use]
    pub const fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    /// Midpoint of the range.
    #[must_use]
    pub fn mid(&self) -> f64 {
        0.5 * (self.lo + self.hi)
    }

    /// Extent of the range in degrees.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.hi - self.lo
    }

    /// Lower (`upper == false`) or upper half, split at the midpoint.
    #[must_use]
    pub fn half(&self, upper: bool) -> Self {
        let mid = self.mid();
        if upper {
            Self::new(mid, self.hi)
        } else {
            Self::new(self.lo, mid)
        }
    }

    /// Whether `other` lies inside this range.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        other.lo >= self.lo && other.hi <= self.hi
    }

    /// Whether the value lies inside this range.
    #[must_use]
    pub fn contains_value(&self, value: f64) -> bool {
        value >= self.lo && value <= self.hi
    }
}

/// Longitude/latitude footprint of a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    /// Longitude range in degrees
    pub lon: GeoRange,
    /// Latitude range in degrees
    pub lat: GeoRange,
}

impl GeoBounds {
    /// The whole globe.
    pub const WORLD: Self = Self::new(GeoRange::LONGITUDE, GeoRange::LATITUDE);

    /// Creates new bounds.
    #[must_use]
    pub const fn new(lon: GeoRange, lat: GeoRange) -> Self {
        Self { lon, lat }
    }

    /// Creates bounds from `[lon_lo, lon_hi, lat_lo, lat_hi]`.
    #[must_use]
    pub const fn from_degrees(lon_lo: f64, lon_hi: f64, lat_lo: f64, lat_hi: f64) -> Self {
        Self::new(GeoRange::new(lon_lo, lon_hi), GeoRange::new(lat_lo, lat_hi))
    }

    /// Western (`east == false`) or eastern hemisphere.
    #[must_use]
    pub fn hemisphere(east: bool) -> Self {
        Self::new(GeoRange::LONGITUDE.half(east), GeoRange::LATITUDE)
    }

    /// Quadrant `index` of these bounds.
    ///
    /// Bit 0 of the index selects the eastern longitude half, bit 1 the
    /// northern latitude half: 0 = SW, 1 = SE, 2 = NW, 3 = NE.
    #[must_use]
    pub fn quadrant(&self, index: usize) -> Self {
        Self::new(self.lon.half(index & 1 != 0), self.lat.half(index & 2 != 0))
    }

    /// Whether `other` lies inside these bounds.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        self.lon.contains(&other.lon) && self.lat.contains(&other.lat)
    }

    /// Quadrant index of these bounds that fully contains `other`, if any.
    #[must_use]
    pub fn quadrant_containing(&self, other: &Self) -> Option<usize> {
        (0..4).find(|&i| self.quadrant(i).contains(other))
    }

    /// Corner coordinates as `(lon, lat)`, in quadrant order.
    #[must_use]
    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.lon.lo, self.lat.lo),
            (self.lon.hi, self.lat.lo),
            (self.lon.lo, self.lat.hi),
            (self.lon.hi, self.lat.hi),
        ]
    }
}

/// Axis-aligned box in projected (map) coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds2 {
    /// Minimum x
    pub x_min: f64,
    /// Maximum x
    pub x_max: f64,
    /// Minimum y
    pub y_min: f64,
    /// Maximum y
    pub y_max: f64,
}

impl Bounds2 {
    /// Creates a new box.
    #[must_use]
    pub const fn new(x_min: f64, x_max: f64, y_min: f64, y_max: f64) -> Self {
        Self {
            x_min,
            x_max,
            y_min,
            y_max,
        }
    }

    /// Creates a box from its center and half extents.
    #[must_use]
    pub fn from_center(cx: f64, cy: f64, half_width: f64, half_height: f64) -> Self {
        Self::new(cx - half_width, cx + half_width, cy - half_height, cy + half_height)
    }

    /// Width of the box.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    /// Height of the box.
    #[must_use]
    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    /// Checks if this box overlaps another.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.x_min <= other.x_max
            && self.x_max >= other.x_min
            && self.y_min <= other.y_max
            && self.y_max >= other.y_min
    }
}
