//! Procedural relief and patch sampling shared by the terrain sources.

use geotile_common::GeoBounds;
use geotile_kernel::unit_normal;
use glam::DVec2;
use noise::{NoiseFn, Perlin};
use serde::{Deserialize, Serialize};

/// Relief generator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliefConfig {
    /// Noise seed
    pub seed: u32,
    /// Peak height as a fraction of the globe radius
    pub amplitude: f64,
    /// Noise frequency over the unit sphere (larger = rougher)
    pub frequency: f64,
    /// Grid cells along each side of a patch
    pub resolution: u32,
}

impl Default for ReliefConfig {
    fn default() -> Self {
        Self {
            seed: 12345,
            amplitude: 0.02,
            frequency: 3.0,
            resolution: 8,
        }
    }
}

/// Smooth height field over the sphere.
///
/// Noise is sampled at the unit-sphere position of each coordinate, so the
/// field has no seam at the antimeridian and no pinch at the poles.
pub struct Relief {
    config: ReliefConfig,
    terrain_noise: Perlin,
    detail_noise: Perlin,
}

impl Relief {
    /// Creates a height field.
    #[must_use]
    pub fn new(config: ReliefConfig) -> Self {
        Self {
            config,
            terrain_noise: Perlin::new(config.seed),
            detail_noise: Perlin::new(config.seed.wrapping_add(1)),
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ReliefConfig {
        &self.config
    }

    /// Height at `(lon, lat)` degrees, in globe radii.
    #[must_use]
    pub fn height(&self, lon: f64, lat: f64) -> f64 {
        let p = unit_normal(lon, lat) * self.config.frequency;
        let base = self.terrain_noise.get([p.x, p.y, p.z]);
        let detail = self.detail_noise.get([p.x * 4.0, p.y * 4.0, p.z * 4.0]) * 0.25;
        self.config.amplitude * (base + detail)
    }

    /// Samples a regular grid over `bounds`.
    #[must_use]
    pub fn sample(&self, bounds: &GeoBounds) -> PatchGrid {
        let n = self.config.resolution.max(1);
        let side = n + 1;
        let lons = axis(bounds.lon.lo, bounds.lon.hi, n);
        let lats = axis(bounds.lat.lo, bounds.lat.hi, n);

        let mut lat_long = Vec::with_capacity((side * side) as usize);
        let mut heights = Vec::with_capacity((side * side) as usize);
        for lat in &lats {
            for lon in &lons {
                heights.push(self.height(*lon, *lat));
                lat_long.push(DVec2::new(*lon, *lat));
            }
        }

        let mut triangles = Vec::with_capacity((2 * n * n) as usize);
        let mut error: f64 = 0.0;
        for j in 0..n {
            for i in 0..n {
                let a = j * side + i;
                let (b, c) = (a + 1, a + side);
                let d = c + 1;
                triangles.push([a, b, d]);
                triangles.push([a, d, c]);

                // Deviation of the true surface from the cell's bilinear
                // center, i.e. from a grid twice as fine.
                let lon = 0.5 * (lons[i as usize] + lons[i as usize + 1]);
                let lat = 0.5 * (lats[j as usize] + lats[j as usize + 1]);
                let approx = [a, b, c, d]
                    .iter()
                    .map(|k| heights[*k as usize])
                    .sum::<f64>()
                    / 4.0;
                error = error.max((self.height(lon, lat) - approx).abs());
            }
        }

        PatchGrid {
            lat_long,
            heights,
            triangles,
            error,
        }
    }
}

/// `n + 1` evenly spaced values from `lo` to exactly `hi`.
fn axis(lo: f64, hi: f64, n: u32) -> Vec<f64> {
    (0..=n)
        .map(|i| if i == n { hi } else { lo + (hi - lo) * f64::from(i) / f64::from(n) })
        .collect()
}

/// Heights sampled over one patch footprint.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchGrid {
    /// `(lon, lat)` of each sample, row-major from the south-west corner
    pub lat_long: Vec<DVec2>,
    /// Height of each sample, in globe radii
    pub heights: Vec<f64>,
    /// Two triangles per grid cell
    pub triangles: Vec<[u32; 3]>,
    /// Largest deviation from a grid twice as fine, in globe radii
    pub error: f64,
}
