//! Camera for view and projection matrix generation.

use glam::{Mat4, Quat, Vec3};

/// A camera that generates view and projection matrices for rendering.
#[derive(Debug, Clone)]
pub struct Camera {
    /// World-space position.
    pub position: Vec3,
    /// Rotation as a unit quaternion.
    pub rotation: Quat,
    /// Projection parameters.
    pub projection: Projection,
    /// Near clip plane distance (always positive).
    pub near: f32,
    /// Far clip plane distance (always positive, > near).
    pub far: f32,
}

/// Projection type for the camera.
#[derive(Debug, Clone)]
pub enum Projection {
    Perspective {
        /// Vertical field of view in radians.
        fov_y: f32,
        /// Width / height.
        aspect_ratio: f32,
    },
    Orthographic {
        half_width: f32,
        half_height: f32,
    },
}

impl Camera {
    /// Perspective camera at the origin looking down -Z.
    pub fn perspective(fov_y: f32, aspect_ratio: f32, near: f32, far: f32) -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            projection: Projection::Perspective {
                fov_y,
                aspect_ratio,
            },
            near,
            far,
        }
    }

    /// Orthographic camera at the origin looking down -Z, seeing
    /// `2 * half_width` by `2 * half_height` world units.
    pub fn orthographic(half_width: f32, half_height: f32, near: f32, far: f32) -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            projection: Projection::Orthographic {
                half_width,
                half_height,
            },
            near,
            far,
        }
    }

    /// Move the camera to `position` and aim it at `target`.
    ///
    /// Falls back to +Z as the up vector when `up` is parallel to the view
    /// direction. A `target` equal to `position` leaves the rotation unchanged.
    pub fn look_at(mut self, position: Vec3, target: Vec3, up: Vec3) -> Self {
        self.position = position;
        let dir = target - position;
        if dir.length_squared() <= f32::EPSILON {
            return self;
        }
        let up = if dir.normalize().cross(up).length_squared() < 1e-8 {
            Vec3::Z
        } else {
            up
        };
        let view = Mat4::look_at_rh(position, target, up);
        self.rotation = Quat::from_mat4(&view.inverse()).normalize();
        self
    }

    /// Compute the view matrix (inverse of camera transform).
    pub fn view_matrix(&self) -> Mat4 {
        (Mat4::from_translation(self.position) * Mat4::from_quat(self.rotation)).inverse()
    }

    /// Compute the projection matrix with reverse-Z.
    pub fn projection_matrix(&self) -> Mat4 {
        match &self.projection {
            Projection::Perspective {
                fov_y,
                aspect_ratio,
            } => {
                // near/far swapped: near maps to z=1, far to z=0
                Mat4::perspective_rh(*fov_y, *aspect_ratio, self.far, self.near)
            }
            Projection::Orthographic {
                half_width,
                half_height,
            } => Mat4::orthographic_rh(
                -*half_width,
                *half_width,
                -*half_height,
                *half_height,
                self.far,
                self.near,
            ),
        }
    }

    /// Compute the combined view-projection matrix.
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::perspective(std::f32::consts::FRAC_PI_4, 1.0, 0.1, 1000.0)
    }
}
