//! Headless GPU device initialization.
//!
//! Provides [`RenderContext`], which owns the wgpu instance, adapter, device,
//! and queue used for off-screen work, and [`RenderContextError`] for clear
//! diagnostics when initialization fails.

/// Error type for render context initialization and resource limits.
#[derive(Debug, thiserror::Error)]
pub enum RenderContextError {
    /// No compatible GPU adapter found.
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    /// Failed to request GPU device.
    #[error("failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    /// A texture request exceeds what the device supports.
    #[error("texture of {width}x{height} exceeds device limit of {max}")]
    TextureTooLarge { width: u32, height: u32, max: u32 },
}

/// Owns all GPU state needed for off-screen rendering. There is no surface:
/// every pass renders into textures and results are read back to the host.
pub struct RenderContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl RenderContext {
    /// Initialize a headless GPU context.
    ///
    /// `allow_fallback` permits a software adapter (e.g. llvmpipe/WARP) when no
    /// hardware adapter exists.
    pub async fn new_headless(allow_fallback: bool) -> Result<Self, RenderContextError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = match instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
        {
            Ok(adapter) => adapter,
            Err(_) if allow_fallback => instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::LowPower,
                    compatible_surface: None,
                    force_fallback_adapter: true,
                })
                .await
                .map_err(|_| RenderContextError::NoAdapter)?,
            Err(_) => return Err(RenderContextError::NoAdapter),
        };

        let info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?}, {:?})",
            info.name,
            info.backend,
            info.device_type
        );

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("sectorview-device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                memory_hints: wgpu::MemoryHints::MemoryUsage,
                experimental_features: wgpu::ExperimentalFeatures::default(),
                trace: wgpu::Trace::Off,
            })
            .await?;

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }

    /// Check that a `width`×`height` 2D texture fits the device limits.
    pub fn check_texture_size(&self, width: u32, height: u32) -> Result<(), RenderContextError> {
        check_texture_size(&self.device.limits(), width, height)
    }
}

/// Validate texture dimensions against a set of device limits.
pub fn check_texture_size(
    limits: &wgpu::Limits,
    width: u32,
    height: u32,
) -> Result<(), RenderContextError> {
    let max = limits.max_texture_dimension_2d;
    if width == 0 || height == 0 || width > max || height > max {
        return Err(RenderContextError::TextureTooLarge { width, height, max });
    }
    Ok(())
}

/// Initialize a headless GPU context synchronously using `pollster`.
pub fn init_headless_context_blocking(
    allow_fallback: bool,
) -> Result<RenderContext, RenderContextError> {
    pollster::block_on(RenderContext::new_headless(allow_fallback))
}
