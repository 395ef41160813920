//! Off-screen color + depth render target.
//!
//! Depth uses reverse-Z (near maps to 1.0, far to 0.0), matching
//! [`Camera::projection_matrix`](crate::Camera::projection_matrix).

/// A color texture paired with a same-sized depth buffer.
pub struct OffscreenTarget {
    pub color: wgpu::Texture,
    pub color_view: wgpu::TextureView,
    pub depth: wgpu::Texture,
    pub depth_view: wgpu::TextureView,
    pub format: wgpu::TextureFormat,
    label: String,
    width: u32,
    height: u32,
}

impl OffscreenTarget {
    /// 32-bit float depth for reverse-Z.
    pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

    /// Reverse-Z clear value: 0.0 is the far plane.
    pub const DEPTH_CLEAR_VALUE: f32 = 0.0;

    /// Reverse-Z comparison: closer fragments have larger depth.
    pub const DEPTH_COMPARE: wgpu::CompareFunction = wgpu::CompareFunction::GreaterEqual;

    /// Create a target whose color texture can be copied back to the host.
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Self {
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };

        let color = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&format!("{label}-color")),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&format!("{label}-depth")),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });

        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());

        log::debug!("Created off-screen target '{label}' ({width}x{height}, {format:?})");

        Self {
            color,
            color_view,
            depth,
            depth_view,
            format,
            label: label.to_string(),
            width,
            height,
        }
    }

    /// Recreate the textures at a new size. No-op if the size is unchanged.
    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if self.width == width && self.height == height {
            return;
        }
        self.destroy();
        let label = self.label.clone();
        let format = self.format;
        *self = Self::new(device, &label, width, height, format);
    }

    /// Release both textures immediately instead of waiting for drop.
    pub fn destroy(&self) {
        self.color.destroy();
        self.depth.destroy();
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(width, height)` in pixels.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
