//! Axis-aligned bounds of sector boxes.

use glam::Vec3;

/// An axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Half-size along each axis.
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// `true` when `min <= max` on every axis and all values are finite.
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min.cmple(self.max).all()
    }

    /// The eight corners, indexed like the unit cube (`x = i & 1`, ...).
    pub fn corners(&self) -> [Vec3; 8] {
        std::array::from_fn(|i| {
            Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corners_match_unit_cube_order() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::new(2.0, 3.0, 4.0));
        let corners = aabb.corners();
        assert_eq!(corners[0], Vec3::ZERO);
        assert_eq!(corners[1], Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(corners[2], Vec3::new(0.0, 3.0, 0.0));
        assert_eq!(corners[4], Vec3::new(0.0, 0.0, 4.0));
        assert_eq!(corners[7], Vec3::new(2.0, 3.0, 4.0));
    }

    #[test]
    fn test_validity() {
        assert!(Aabb::new(Vec3::ZERO, Vec3::ONE).is_valid());
        assert!(Aabb::new(Vec3::ONE, Vec3::ONE).is_valid());
        assert!(!Aabb::new(Vec3::ONE, Vec3::ZERO).is_valid());
        assert!(!Aabb::new(Vec3::ZERO, Vec3::new(f32::NAN, 1.0, 1.0)).is_valid());
        assert!(!Aabb::new(Vec3::NEG_INFINITY, Vec3::ONE).is_valid());
    }

    #[test]
    fn test_center_and_extents() {
        let a = Aabb::new(Vec3::new(-2.0, -3.0, -4.0), Vec3::new(4.0, 3.0, 4.0));
        assert_eq!(a.center(), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(a.extents(), Vec3::new(3.0, 3.0, 4.0));
    }
}
