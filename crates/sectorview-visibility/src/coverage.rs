//! Density-aware coverage modulation.
//!
//! A sector box is often mostly empty. Each sector carries the fraction of its
//! box that geometry fills when projected onto the three axis planes. At draw
//! time the factor for the plane facing the camera becomes a keep probability,
//! realized as an ordered 4×4 dither so a half-filled box covers about half of
//! its pixels. Boxes that are small on screen always keep every fragment so
//! they never vanish.
//!
//! The same math runs in the coverage shader; keep both in sync.

use glam::Vec3;

/// Projected screen fraction at which the coverage factor applies in full.
/// Smaller boxes blend linearly toward full coverage.
pub const FULL_MODULATION_FRACTION: f32 = 0.05;

/// Fraction of a sector box filled by geometry, per axis plane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoverageFactors {
    /// Filled fraction when viewed along Z.
    pub xy: f32,
    /// Filled fraction when viewed along Y.
    pub xz: f32,
    /// Filled fraction when viewed along X.
    pub yz: f32,
}

impl CoverageFactors {
    pub const FULL: Self = Self {
        xy: 1.0,
        xz: 1.0,
        yz: 1.0,
    };

    /// Factors clamped into `[0, 1]`. NaN becomes full coverage.
    pub fn new(xy: f32, xz: f32, yz: f32) -> Self {
        let clamp = |v: f32| if v.is_nan() { 1.0 } else { v.clamp(0.0, 1.0) };
        Self {
            xy: clamp(xy),
            xz: clamp(xz),
            yz: clamp(yz),
        }
    }

    pub fn uniform(factor: f32) -> Self {
        Self::new(factor, factor, factor)
    }

    /// Factor for the plane most perpendicular to `view_dir` (model space).
    pub fn for_view(&self, view_dir: Vec3) -> f32 {
        let a = view_dir.abs();
        if a.x >= a.y && a.x >= a.z {
            self.yz
        } else if a.y >= a.z {
            self.xz
        } else {
            self.xy
        }
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.xy, self.xz, self.yz]
    }
}

impl Default for CoverageFactors {
    fn default() -> Self {
        Self::FULL
    }
}

/// Probability of keeping a fragment of a sector with coverage `factor` whose
/// bounding sphere covers `projected_fraction` of the view height squared.
pub fn keep_probability(factor: f32, projected_fraction: f32) -> f32 {
    let strength = (projected_fraction / FULL_MODULATION_FRACTION).clamp(0.0, 1.0);
    1.0 + (factor - 1.0) * strength
}

/// Approximate squared share of the view occupied by a sphere of `radius` at
/// `distance` from the camera.
///
/// `scale` is `tan(fov_y / 2)` for perspective views and the half height for
/// orthographic ones. A camera inside the sphere sees it fill the view.
pub fn projected_fraction(radius: f32, distance: f32, scale: f32, orthographic: bool) -> f32 {
    if scale <= 0.0 {
        return 1.0;
    }
    let f = if orthographic {
        radius / scale
    } else {
        if distance <= radius {
            return 1.0;
        }
        radius / ((distance * distance - radius * radius).sqrt() * scale)
    };
    (f * f).clamp(0.0, 1.0)
}

const BAYER_4X4: [u8; 16] = [0, 8, 2, 10, 12, 4, 14, 6, 3, 11, 1, 9, 15, 7, 13, 5];

/// Ordered-dither threshold for a pixel, in `(0, 1)`.
pub fn dither_threshold(x: u32, y: u32) -> f32 {
    let index = ((y % 4) * 4 + (x % 4)) as usize;
    (f32::from(BAYER_4X4[index]) + 0.5) / 16.0
}

/// Whether a fragment at pixel `(x, y)` survives `keep` probability.
pub fn keeps_fragment(x: u32, y: u32, keep: f32) -> bool {
    dither_threshold(x, y) < keep
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dominant_axis_selection() {
        let f = CoverageFactors::new(0.1, 0.2, 0.3);
        assert_eq!(f.for_view(Vec3::new(-5.0, 1.0, 1.0)), 0.3);
        assert_eq!(f.for_view(Vec3::new(0.5, 2.0, -1.0)), 0.2);
        assert_eq!(f.for_view(Vec3::new(0.0, 0.0, -1.0)), 0.1);
    }

    #[test]
    fn test_factors_clamped() {
        let f = CoverageFactors::new(-1.0, 2.0, f32::NAN);
        assert_eq!(f.to_array(), [0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_small_boxes_keep_everything() {
        assert_eq!(keep_probability(0.0, 0.0), 1.0);
        assert!((keep_probability(0.0, FULL_MODULATION_FRACTION * 0.5) - 0.5).abs() < 1e-6);
        assert_eq!(keep_probability(0.25, 1.0), 0.25);
    }

    #[test]
    fn test_projected_fraction() {
        assert_eq!(projected_fraction(2.0, 1.0, 0.5, false), 1.0);
        let far = projected_fraction(1.0, 1000.0, 0.5, false);
        assert!(far > 0.0 && far < 1e-4);
        assert_eq!(projected_fraction(1.0, 0.0, 2.0, true), 0.25);
    }

    #[test]
    fn test_dither_keeps_expected_share() {
        for (keep, expected) in [(0.0, 0), (0.25, 4), (0.5, 8), (1.0, 16)] {
            let kept = (0..4)
                .flat_map(|y| (0..4).map(move |x| (x, y)))
                .filter(|&(x, y)| keeps_fragment(x, y, keep))
                .count();
            assert_eq!(kept, expected, "keep = {keep}");
        }
    }

    #[test]
    fn test_dither_pattern_repeats() {
        assert_eq!(dither_threshold(1, 2), dither_threshold(5, 6));
    }
}
