//! Coverage pass backends.
//!
//! A backend owns the off-screen target, one uploaded instance set per proxy
//! group, and the read-back path. The prioritizer only talks to the trait, so
//! the wgpu pass and the CPU rasterizer are interchangeable.

mod gpu;
mod software;

pub use gpu::{COVERAGE_SHADER_SOURCE, GpuCoverageBackend};
pub use software::SoftwareCoverageBackend;

use glam::{Mat4, Vec3};
use sectorview_config::{BackendKind, PrioritizerConfig};
use sectorview_render::{Camera, Projection};

use crate::clipping::ClippingState;
use crate::error::VisibilityError;
use crate::model::ModelKey;
use crate::proxy::{CoverageProxyBuilder, ProxyGroup};

/// Camera state consumed by one coverage render.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoverageView {
    pub view_projection: Mat4,
    pub camera_position: Vec3,
    /// Far plane distance, the depth quantization range.
    pub far: f32,
    /// `tan(fov_y / 2)` for perspective, half height for orthographic.
    pub projection_scale: f32,
    pub orthographic: bool,
}

impl CoverageView {
    pub fn from_camera(camera: &Camera) -> Self {
        let (projection_scale, orthographic) = match camera.projection {
            Projection::Perspective { fov_y, .. } => ((fov_y * 0.5).tan(), false),
            Projection::Orthographic { half_height, .. } => (half_height, true),
        };
        Self {
            view_projection: camera.view_projection_matrix(),
            camera_position: camera.position,
            far: camera.far,
            projection_scale,
            orthographic,
        }
    }
}

/// Renders proxy groups into an encoded RGBA8 target and reads it back.
pub trait CoverageBackend {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Create or replace the instance data of `group`.
    fn upload_group(&mut self, group: &ProxyGroup) -> Result<(), VisibilityError>;

    /// Free the instance data of `key`. Unknown keys are ignored.
    fn release_group(&mut self, key: &ModelKey);

    /// `(width, height)` of the coverage target.
    fn target_size(&self) -> (u32, u32);

    /// Reallocate the coverage target. No-op for an unchanged size.
    fn resize_target(&mut self, width: u32, height: u32) -> Result<(), VisibilityError>;

    /// Clear to the background and draw every group of `scene`, using the
    /// transform each group currently has.
    fn render(
        &mut self,
        view: &CoverageView,
        scene: &CoverageProxyBuilder,
        clipping: &ClippingState,
    ) -> Result<(), VisibilityError>;

    /// Copy the last render into `dst` as tightly packed RGBA8 rows, top row
    /// first. `dst` must hold at least `width * height * 4` bytes.
    fn read_pixels(&mut self, dst: &mut [u8]) -> Result<(), VisibilityError>;

    /// Allocate the diagnostics surface. Fails if one already exists.
    fn create_debug_surface(&mut self, width: u32, height: u32) -> Result<(), VisibilityError>;

    fn has_debug_surface(&self) -> bool;

    /// Draw the scene into the diagnostics surface with display colors.
    /// No-op without a surface.
    fn render_debug(
        &mut self,
        view: &CoverageView,
        scene: &CoverageProxyBuilder,
        clipping: &ClippingState,
    ) -> Result<(), VisibilityError>;

    /// Read the diagnostics surface into `dst`, returning its size.
    fn read_debug_pixels(&mut self, dst: &mut Vec<u8>) -> Result<(u32, u32), VisibilityError>;

    /// Number of backend allocations currently alive.
    fn live_resources(&self) -> usize;

    /// Free everything. Later calls fail with [`VisibilityError::Released`].
    fn release(&mut self);
}

/// Build the backend selected by `config`.
///
/// `Auto` prefers the GPU and falls back to the CPU rasterizer when no
/// adapter can be opened.
pub fn create_backend(
    config: &PrioritizerConfig,
) -> Result<Box<dyn CoverageBackend + Send>, VisibilityError> {
    let (width, height) = (config.target_width, config.target_height);
    match config.backend {
        BackendKind::Gpu => Ok(Box::new(GpuCoverageBackend::new(width, height)?)),
        BackendKind::Software => Ok(Box::new(SoftwareCoverageBackend::new(width, height)?)),
        BackendKind::Auto => match GpuCoverageBackend::new(width, height) {
            Ok(backend) => Ok(Box::new(backend)),
            Err(VisibilityError::Gpu(err)) => {
                log::warn!("GPU coverage backend unavailable ({err}), using software rasterizer");
                Ok(Box::new(SoftwareCoverageBackend::new(width, height)?))
            }
            Err(err) => Err(err),
        },
    }
}

/// Display color for a global id in diagnostics output, darkened with depth.
pub(crate) fn debug_color(global_id: u32, depth: u8) -> [u8; 4] {
    // Same hash as the debug fragment shader.
    let h = global_id.wrapping_mul(2_654_435_761);
    let shade = 1.0 - 0.6 * f32::from(depth) / 255.0;
    let channel = |shift: u32| ((((h >> shift) & 0xff) as f32 * 0.75 + 64.0) * shade) as u8;
    [channel(0), channel(8), channel(16), 255]
}
