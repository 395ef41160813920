//! wgpu coverage pass rendering into a small off-screen target.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use rustc_hash::FxHashMap;
use sectorview_config::MAX_CLIP_PLANES;
use sectorview_render::{
    BufferAllocator, MeshBuffer, OffscreenEncoder, OffscreenTarget, ReadbackBuffer,
    RenderContext, RenderPassBuilder, VertexPosition, init_headless_context_blocking,
};

use super::{CoverageBackend, CoverageView};
use crate::clipping::ClippingState;
use crate::error::VisibilityError;
use crate::model::ModelKey;
use crate::proxy::{CoverageProxyBuilder, ProxyGroup, ProxyInstance};

/// WGSL source for the coverage and diagnostics programs.
pub const COVERAGE_SHADER_SOURCE: &str = include_str!("coverage.wgsl");

/// Linear RGBA8 so encoded bytes survive the write unchanged.
const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Camera, depth range and clip state. Matches `ViewUniform` in the shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct ViewUniform {
    view_proj: [[f32; 4]; 4],
    /// xyz: camera position, w: far.
    camera_position: [f32; 4],
    /// x: projection scale, y: orthographic flag.
    projection: [f32; 4],
    clip_planes: [[f32; 4]; MAX_CLIP_PLANES],
    /// x: plane count, y: intersection flag.
    clip_params: [u32; 4],
}

static_assertions::assert_eq_size!(ViewUniform, [u8; 240]);

impl ViewUniform {
    fn new(view: &CoverageView, clipping: &ClippingState) -> Self {
        let (clip_planes, clip_params) = clipping.to_gpu();
        Self {
            view_proj: view.view_projection.to_cols_array_2d(),
            camera_position: view.camera_position.extend(view.far).to_array(),
            projection: [
                view.projection_scale,
                if view.orthographic { 1.0 } else { 0.0 },
                0.0,
                0.0,
            ],
            clip_planes,
            clip_params,
        }
    }
}

/// Model transform of one proxy group.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct GroupUniform {
    transform: [[f32; 4]; 4],
    inverse_transform: [[f32; 4]; 4],
}

impl GroupUniform {
    fn new(transform: &Mat4) -> Self {
        Self {
            transform: transform.to_cols_array_2d(),
            inverse_transform: transform.inverse().to_cols_array_2d(),
        }
    }
}

/// GPU copy of one proxy group.
struct GpuGroup {
    instances: wgpu::Buffer,
    instance_count: u32,
    uniform: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

impl GpuGroup {
    fn destroy(&self) {
        self.instances.destroy();
        self.uniform.destroy();
    }
}

struct DebugSurface {
    target: OffscreenTarget,
    readback: ReadbackBuffer,
}

/// GPU state that exists until [`CoverageBackend::release`].
struct GpuState {
    context: RenderContext,
    pipeline: wgpu::RenderPipeline,
    debug_pipeline: wgpu::RenderPipeline,
    group_layout: wgpu::BindGroupLayout,
    view_buffer: wgpu::Buffer,
    view_bind_group: wgpu::BindGroup,
    cube: MeshBuffer,
    target: OffscreenTarget,
    readback: ReadbackBuffer,
    debug: Option<DebugSurface>,
    groups: FxHashMap<ModelKey, GpuGroup>,
}

/// Coverage backend drawing instanced proxy boxes with wgpu.
pub struct GpuCoverageBackend {
    state: Option<GpuState>,
    size: (u32, u32),
}

fn uniform_layout_entry(
    visibility: wgpu::ShaderStages,
    size: usize,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: std::num::NonZeroU64::new(size as u64),
        },
        count: None,
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    shader: &wgpu::ShaderModule,
    layout: &wgpu::PipelineLayout,
    label: &str,
    fragment_entry: &str,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers: &[VertexPosition::layout(), ProxyInstance::layout()],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            front_face: wgpu::FrontFace::Ccw,
            // The camera may sit inside a sector box.
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: OffscreenTarget::DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: OffscreenTarget::DEPTH_COMPARE,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some(fragment_entry),
            targets: &[Some(wgpu::ColorTargetState {
                format: TARGET_FORMAT,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview_mask: None,
        cache: None,
    })
}

fn check_size(
    context: &RenderContext,
    what: &'static str,
    width: u32,
    height: u32,
) -> Result<(), VisibilityError> {
    context
        .check_texture_size(width, height)
        .map_err(|e| VisibilityError::ResourceExhausted {
            what,
            reason: e.to_string(),
        })
}

impl GpuCoverageBackend {
    /// Open a headless device and allocate a `width`×`height` target.
    pub fn new(width: u32, height: u32) -> Result<Self, VisibilityError> {
        Self::with_context(init_headless_context_blocking(true)?, width, height)
    }

    /// Build on an existing context, taking ownership of it.
    pub fn with_context(
        context: RenderContext,
        width: u32,
        height: u32,
    ) -> Result<Self, VisibilityError> {
        check_size(&context, "coverage target", width, height)?;
        let device = &context.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("coverage-shader"),
            source: wgpu::ShaderSource::Wgsl(COVERAGE_SHADER_SOURCE.into()),
        });

        let view_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("coverage-view-bgl"),
            entries: &[uniform_layout_entry(
                wgpu::ShaderStages::VERTEX_FRAGMENT,
                std::mem::size_of::<ViewUniform>(),
            )],
        });
        let group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("coverage-group-bgl"),
            entries: &[uniform_layout_entry(
                wgpu::ShaderStages::VERTEX,
                std::mem::size_of::<GroupUniform>(),
            )],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("coverage-pipeline-layout"),
            bind_group_layouts: &[&view_layout, &group_layout],
            immediate_size: 0,
        });
        let pipeline = create_pipeline(
            device,
            &shader,
            &pipeline_layout,
            "coverage-pipeline",
            "fs_main",
        );
        let debug_pipeline = create_pipeline(
            device,
            &shader,
            &pipeline_layout,
            "coverage-debug-pipeline",
            "fs_debug",
        );

        let allocator = BufferAllocator::new(device);
        let view_buffer =
            allocator.create_uniform_buffer("coverage-view-uniform", &ViewUniform::zeroed());
        let view_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("coverage-view-bind-group"),
            layout: &view_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: view_buffer.as_entire_binding(),
            }],
        });
        let cube = allocator.create_unit_cube("coverage-cube");

        let target = OffscreenTarget::new(device, "coverage", width, height, TARGET_FORMAT);
        let mut readback = ReadbackBuffer::new("coverage-readback");
        readback.ensure_capacity(device, width, height);

        log::info!("GPU coverage backend ready ({width}x{height})");

        Ok(Self {
            state: Some(GpuState {
                context,
                pipeline,
                debug_pipeline,
                group_layout,
                view_buffer,
                view_bind_group,
                cube,
                target,
                readback,
                debug: None,
                groups: FxHashMap::default(),
            }),
            size: (width, height),
        })
    }

    fn state(&self) -> Result<&GpuState, VisibilityError> {
        self.state.as_ref().ok_or(VisibilityError::Released)
    }

    fn state_mut(&mut self) -> Result<&mut GpuState, VisibilityError> {
        self.state.as_mut().ok_or(VisibilityError::Released)
    }
}

impl GpuState {
    fn write_uniforms(
        &self,
        view: &CoverageView,
        scene: &CoverageProxyBuilder,
        clipping: &ClippingState,
    ) {
        let queue = &self.context.queue;
        queue.write_buffer(
            &self.view_buffer,
            0,
            bytemuck::bytes_of(&ViewUniform::new(view, clipping)),
        );
        for group in scene.groups() {
            if let Some(gpu) = self.groups.get(&group.key) {
                queue.write_buffer(
                    &gpu.uniform,
                    0,
                    bytemuck::bytes_of(&GroupUniform::new(&group.transform)),
                );
            }
        }
    }

    /// Record and submit one pass over `scene` into `target`, then queue the
    /// copy into `readback`.
    fn draw(
        &self,
        scene: &CoverageProxyBuilder,
        pipeline: &wgpu::RenderPipeline,
        target: &OffscreenTarget,
        readback: &ReadbackBuffer,
        label: &'static str,
    ) -> Result<(), VisibilityError> {
        let mut encoder = OffscreenEncoder::new(&self.context.device, label);
        {
            let builder = RenderPassBuilder::new().label(label);
            let Some(mut pass) = encoder.begin_render_pass(&builder, target) else {
                return Ok(());
            };
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &self.view_bind_group, &[]);
            self.cube.bind(&mut pass);
            for group in scene.groups() {
                match self.groups.get(&group.key) {
                    Some(gpu) => {
                        pass.set_bind_group(1, &gpu.bind_group, &[]);
                        pass.set_vertex_buffer(1, gpu.instances.slice(..));
                        self.cube.draw_instanced(&mut pass, gpu.instance_count);
                    }
                    None if group.instances.is_empty() => {}
                    None => log::warn!("Proxy group '{}' was never uploaded; skipping", group.key),
                }
            }
        }
        if !encoder.copy_to_readback(target, readback) {
            encoder.submit(&self.context.queue);
            return Err(VisibilityError::ResourceExhausted {
                what: "read-back buffer",
                reason: format!("no room for {}x{}", target.width(), target.height()),
            });
        }
        encoder.submit(&self.context.queue);
        Ok(())
    }
}

impl CoverageBackend for GpuCoverageBackend {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn upload_group(&mut self, group: &ProxyGroup) -> Result<(), VisibilityError> {
        let state = self.state_mut()?;
        if let Some(old) = state.groups.remove(&group.key) {
            old.destroy();
        }
        if group.instances.is_empty() {
            return Ok(());
        }

        let device = &state.context.device;
        let allocator = BufferAllocator::new(device);
        let label = format!("coverage-group-{}", group.key);
        let instances = allocator.create_instance_buffer(&label, &group.instances);
        let uniform =
            allocator.create_uniform_buffer(&label, &GroupUniform::new(&group.transform));
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&label),
            layout: &state.group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform.as_entire_binding(),
            }],
        });
        log::debug!(
            "Uploaded {} proxies for model '{}'",
            group.instances.len(),
            group.key
        );
        state.groups.insert(
            group.key.clone(),
            GpuGroup {
                instances,
                instance_count: group.instance_count(),
                uniform,
                bind_group,
            },
        );
        Ok(())
    }

    fn release_group(&mut self, key: &ModelKey) {
        if let Some(state) = self.state.as_mut()
            && let Some(group) = state.groups.remove(key)
        {
            group.destroy();
        }
    }

    fn target_size(&self) -> (u32, u32) {
        self.size
    }

    fn resize_target(&mut self, width: u32, height: u32) -> Result<(), VisibilityError> {
        if self.size == (width, height) {
            return Ok(());
        }
        let state = self.state_mut()?;
        check_size(&state.context, "coverage target", width, height)?;
        let device = &state.context.device;
        state.target.resize(device, width, height);
        state.readback.ensure_capacity(device, width, height);
        self.size = (width, height);
        Ok(())
    }

    fn render(
        &mut self,
        view: &CoverageView,
        scene: &CoverageProxyBuilder,
        clipping: &ClippingState,
    ) -> Result<(), VisibilityError> {
        let state = self.state()?;
        state.write_uniforms(view, scene, clipping);
        state.draw(
            scene,
            &state.pipeline,
            &state.target,
            &state.readback,
            "coverage-pass",
        )
    }

    fn read_pixels(&mut self, dst: &mut [u8]) -> Result<(), VisibilityError> {
        let (width, height) = self.size;
        let state = self.state()?;
        state
            .readback
            .read_into(&state.context.device, width, height, dst)?;
        Ok(())
    }

    fn create_debug_surface(&mut self, width: u32, height: u32) -> Result<(), VisibilityError> {
        let state = self.state_mut()?;
        if state.debug.is_some() {
            return Err(VisibilityError::DebugSurfaceExists);
        }
        check_size(&state.context, "debug surface", width, height)?;
        let device = &state.context.device;
        let target = OffscreenTarget::new(device, "coverage-debug", width, height, TARGET_FORMAT);
        let mut readback = ReadbackBuffer::new("coverage-debug-readback");
        readback.ensure_capacity(device, width, height);
        state.debug = Some(DebugSurface { target, readback });
        Ok(())
    }

    fn has_debug_surface(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| state.debug.is_some())
    }

    fn render_debug(
        &mut self,
        view: &CoverageView,
        scene: &CoverageProxyBuilder,
        clipping: &ClippingState,
    ) -> Result<(), VisibilityError> {
        let state = self.state()?;
        let Some(debug) = state.debug.as_ref() else {
            return Ok(());
        };
        state.write_uniforms(view, scene, clipping);
        state.draw(
            scene,
            &state.debug_pipeline,
            &debug.target,
            &debug.readback,
            "coverage-debug-pass",
        )
    }

    fn read_debug_pixels(&mut self, dst: &mut Vec<u8>) -> Result<(u32, u32), VisibilityError> {
        let state = self.state()?;
        let debug = state
            .debug
            .as_ref()
            .ok_or_else(|| VisibilityError::ResourceExhausted {
                what: "debug surface",
                reason: "no debug surface was created".into(),
            })?;
        let (width, height) = debug.target.size();
        dst.resize((width * height * 4) as usize, 0);
        debug
            .readback
            .read_into(&state.context.device, width, height, dst)?;
        Ok((width, height))
    }

    fn live_resources(&self) -> usize {
        let Some(state) = self.state.as_ref() else {
            return 0;
        };
        // view uniform, cube vertex + index, target color + depth
        let fixed = 5 + usize::from(state.readback.is_allocated());
        let debug = state
            .debug
            .as_ref()
            .map_or(0, |d| 2 + usize::from(d.readback.is_allocated()));
        fixed + debug + state.groups.len() * 2
    }

    fn release(&mut self) {
        let Some(mut state) = self.state.take() else {
            return;
        };
        for group in state.groups.values() {
            group.destroy();
        }
        state.groups.clear();
        if let Some(mut debug) = state.debug.take() {
            debug.target.destroy();
            debug.readback.destroy();
        }
        state.target.destroy();
        state.readback.destroy();
        state.cube.destroy();
        state.view_buffer.destroy();
        log::debug!("GPU coverage backend released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{BACKGROUND, decode_sample};
    use crate::id_space::SectorIdSpace;
    use crate::model::{CadModel, SectorMetadata};
    use glam::Vec3;
    use sectorview_render::{Aabb, Camera};

    fn create_test_backend(width: u32, height: u32) -> Option<GpuCoverageBackend> {
        GpuCoverageBackend::new(width, height).ok()
    }

    #[test]
    fn test_uniform_layout_matches_shader() {
        assert_eq!(std::mem::size_of::<GroupUniform>(), 128);
        assert!(COVERAGE_SHADER_SOURCE.contains("array<vec4<f32>, 8>"));
        assert_eq!(MAX_CLIP_PLANES, 8);
    }

    #[test]
    fn test_view_uniform_packs_far_and_clip_state() {
        let camera = Camera::perspective(1.0, 1.0, 0.5, 321.0);
        let clipping = ClippingState::new(
            &[crate::clipping::ClipPlane::new(Vec3::Y, 2.0)],
            true,
        )
        .unwrap();
        let uniform = ViewUniform::new(&CoverageView::from_camera(&camera), &clipping);
        assert_eq!(uniform.camera_position[3], 321.0);
        assert_eq!(uniform.clip_params, [1, 1, 0, 0]);
        assert_eq!(uniform.clip_planes[0], [0.0, 1.0, 0.0, 2.0]);
        assert_eq!(uniform.projection[1], 0.0);
    }

    #[test]
    fn test_gpu_render_matches_encoding() {
        let Some(mut backend) = create_test_backend(32, 32) else {
            return;
        };
        let mut ids = SectorIdSpace::new();
        let mut scene = CoverageProxyBuilder::new();
        let model = CadModel::new(
            "a",
            vec![SectorMetadata::solid(Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0)))],
            Mat4::IDENTITY,
        );
        scene.set_models(&[model], &mut ids).unwrap();
        for group in scene.groups() {
            backend.upload_group(group).unwrap();
        }

        let camera = Camera::perspective(std::f32::consts::FRAC_PI_3, 1.0, 0.1, 100.0)
            .look_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y);
        backend
            .render(&CoverageView::from_camera(&camera), &scene, &ClippingState::none())
            .unwrap();
        let mut pixels = vec![0; 32 * 32 * 4];
        backend.read_pixels(&mut pixels).unwrap();

        assert_eq!(&pixels[0..4], &BACKGROUND);
        let center = (16 * 32 + 16) * 4;
        let sample = decode_sample([
            pixels[center],
            pixels[center + 1],
            pixels[center + 2],
            pixels[center + 3],
        ])
        .unwrap();
        assert_eq!(sample.global_id, 0);
    }

    #[test]
    fn test_gpu_release_frees_everything() {
        let Some(mut backend) = create_test_backend(8, 8) else {
            return;
        };
        backend.create_debug_surface(16, 16).unwrap();
        assert!(matches!(
            backend.create_debug_surface(16, 16),
            Err(VisibilityError::DebugSurfaceExists)
        ));
        assert!(backend.live_resources() > 0);
        backend.release();
        assert_eq!(backend.live_resources(), 0);
        assert!(!backend.has_debug_surface());
        backend.release();
    }

    #[test]
    fn test_gpu_rejects_oversized_target() {
        let Some(mut backend) = create_test_backend(8, 8) else {
            return;
        };
        assert!(matches!(
            backend.resize_target(1 << 20, 8),
            Err(VisibilityError::ResourceExhausted { .. })
        ));
        assert_eq!(backend.target_size(), (8, 8));
    }
}
