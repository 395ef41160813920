//! Render pass and command encoding helpers for off-screen targets.
//!
//! [`RenderPassBuilder`] holds the clear configuration of a pass and
//! [`OffscreenEncoder`] owns one command encoder from recording to submit.

use crate::readback::ReadbackBuffer;
use crate::target::OffscreenTarget;

/// Opaque white, the usual "nothing drawn here" color for id buffers.
pub const WHITE: wgpu::Color = wgpu::Color {
    r: 1.0,
    g: 1.0,
    b: 1.0,
    a: 1.0,
};

/// Builder for the clear/load behavior of a pass over an [`OffscreenTarget`].
#[derive(Debug, Clone)]
pub struct RenderPassBuilder {
    clear_color: wgpu::Color,
    depth_clear: Option<f32>,
    label: Option<&'static str>,
}

impl Default for RenderPassBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderPassBuilder {
    /// Clear to white and to the reverse-Z far plane.
    pub fn new() -> Self {
        Self {
            clear_color: WHITE,
            depth_clear: Some(OffscreenTarget::DEPTH_CLEAR_VALUE),
            label: None,
        }
    }

    /// Set the clear color for the color attachment.
    pub fn clear_color(mut self, color: wgpu::Color) -> Self {
        self.clear_color = color;
        self
    }

    /// Set the depth clear value.
    pub fn depth_clear(mut self, value: f32) -> Self {
        self.depth_clear = Some(value);
        self
    }

    /// Render without a depth attachment.
    pub fn without_depth(mut self) -> Self {
        self.depth_clear = None;
        self
    }

    /// Set debug label for the render pass.
    pub fn label(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }

    fn begin<'encoder>(
        &self,
        encoder: &'encoder mut wgpu::CommandEncoder,
        target: &'encoder OffscreenTarget,
    ) -> wgpu::RenderPass<'encoder> {
        let color_attachment = wgpu::RenderPassColorAttachment {
            view: &target.color_view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(self.clear_color),
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        };

        let depth_stencil_attachment =
            self.depth_clear
                .map(|clear_value| wgpu::RenderPassDepthStencilAttachment {
                    view: &target.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(clear_value),
                        store: wgpu::StoreOp::Discard,
                    }),
                    stencil_ops: None,
                });

        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: self.label,
            color_attachments: &[Some(color_attachment)],
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        })
    }
}

/// Owns a command encoder for one batch of off-screen work.
pub struct OffscreenEncoder {
    encoder: Option<wgpu::CommandEncoder>,
}

impl OffscreenEncoder {
    pub fn new(device: &wgpu::Device, label: &str) -> Self {
        let encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(label),
        });
        Self {
            encoder: Some(encoder),
        }
    }

    /// Begin a render pass over `target`. Returns `None` once submitted.
    pub fn begin_render_pass<'a>(
        &'a mut self,
        builder: &RenderPassBuilder,
        target: &'a OffscreenTarget,
    ) -> Option<wgpu::RenderPass<'a>> {
        let encoder = self.encoder.as_mut()?;
        Some(builder.begin(encoder, target))
    }

    /// Record a copy of the target's color texture into `readback`.
    ///
    /// Returns `false` if the buffer is too small or the encoder was submitted.
    pub fn copy_to_readback(&mut self, target: &OffscreenTarget, readback: &ReadbackBuffer) -> bool {
        match self.encoder.as_mut() {
            Some(encoder) => readback.record_copy(encoder, &target.color),
            None => false,
        }
    }

    /// Finish and submit the recorded commands.
    pub fn submit(mut self, queue: &wgpu::Queue) -> Option<wgpu::SubmissionIndex> {
        let encoder = self.encoder.take()?;
        Some(queue.submit([encoder.finish()]))
    }
}

impl Drop for OffscreenEncoder {
    fn drop(&mut self) {
        if self.encoder.is_some() {
            log::warn!("OffscreenEncoder dropped without submit(); recorded work discarded");
        }
    }
}
