//! User clip planes applied during the coverage pass.

use glam::Vec3;
use sectorview_config::MAX_CLIP_PLANES;

use crate::error::VisibilityError;

/// Half-space `normal · p + constant >= 0`. Points on the negative side are
/// outside the plane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClipPlane {
    pub normal: Vec3,
    pub constant: f32,
}

impl ClipPlane {
    pub fn new(normal: Vec3, constant: f32) -> Self {
        Self { normal, constant }
    }

    /// Plane through `point` keeping the side `normal` points to.
    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        Self::new(normal, -normal.dot(point))
    }

    /// `[nx, ny, nz, constant]`, the config file layout.
    pub fn from_array(v: [f32; 4]) -> Self {
        Self::new(Vec3::new(v[0], v[1], v[2]), v[3])
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.normal.x, self.normal.y, self.normal.z, self.constant]
    }

    pub fn signed_distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p) + self.constant
    }

    pub fn is_outside(&self, p: Vec3) -> bool {
        self.signed_distance(p) < 0.0
    }
}

/// Active clip configuration consumed by the next render.
///
/// In union mode a point is clipped when it is outside any plane. In
/// intersection mode it is clipped only when outside every plane.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClippingState {
    planes: Vec<ClipPlane>,
    intersection: bool,
}

impl ClippingState {
    /// No clipping.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(planes: &[ClipPlane], intersection: bool) -> Result<Self, VisibilityError> {
        if planes.len() > MAX_CLIP_PLANES {
            return Err(VisibilityError::TooManyClipPlanes {
                count: planes.len(),
                max: MAX_CLIP_PLANES,
            });
        }
        Ok(Self {
            planes: planes.to_vec(),
            intersection,
        })
    }

    pub fn planes(&self) -> &[ClipPlane] {
        &self.planes
    }

    pub fn is_intersection(&self) -> bool {
        self.intersection
    }

    pub fn is_enabled(&self) -> bool {
        !self.planes.is_empty()
    }

    pub fn is_clipped(&self, p: Vec3) -> bool {
        if self.planes.is_empty() {
            return false;
        }
        if self.intersection {
            self.planes.iter().all(|plane| plane.is_outside(p))
        } else {
            self.planes.iter().any(|plane| plane.is_outside(p))
        }
    }

    /// Planes padded to the fixed shader array, plus `(count, intersection)`.
    pub fn to_gpu(&self) -> ([[f32; 4]; MAX_CLIP_PLANES], [u32; 4]) {
        let mut planes = [[0.0; 4]; MAX_CLIP_PLANES];
        for (slot, plane) in planes.iter_mut().zip(&self.planes) {
            *slot = plane.to_array();
        }
        let params = [self.planes.len() as u32, u32::from(self.intersection), 0, 0];
        (planes, params)
    }
}
