//! Synchronous texture → host read-back.
//!
//! wgpu requires `bytes_per_row` of a texture copy to be a multiple of
//! [`wgpu::COPY_BYTES_PER_ROW_ALIGNMENT`]; [`ReadbackBuffer`] handles the
//! padding and strips it again when copying into a tightly packed slice.

use std::sync::mpsc;

/// Bytes per pixel of the 8-bit RGBA formats this module reads back.
pub const BYTES_PER_PIXEL: u32 = 4;

/// Read-back failures.
#[derive(Debug, thiserror::Error)]
pub enum ReadbackError {
    /// The staging buffer could not be mapped.
    #[error("failed to map read-back buffer: {0}")]
    Map(#[from] wgpu::BufferAsyncError),

    /// Waiting for the GPU failed (device lost or timeout).
    #[error("waiting for GPU completion failed: {0}")]
    Poll(String),

    /// The map callback was dropped without being called.
    #[error("read-back map callback never completed")]
    CallbackDropped,

    /// The staging buffer is smaller than the requested region.
    #[error("read-back buffer holds {capacity} bytes, {needed} required")]
    BufferTooSmall { capacity: u64, needed: u64 },

    /// The destination slice cannot hold the unpadded pixels.
    #[error("destination holds {actual} bytes, {needed} required")]
    DestinationTooSmall { actual: usize, needed: usize },
}

/// Row pitch in bytes for a copy of `width` pixels, padded to the copy alignment.
pub fn padded_bytes_per_row(width: u32, bytes_per_pixel: u32) -> u32 {
    let unpadded = width * bytes_per_pixel;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// A `MAP_READ` staging buffer that grows to fit the largest target seen and
/// never shrinks.
pub struct ReadbackBuffer {
    buffer: Option<wgpu::Buffer>,
    capacity: u64,
    label: String,
}

impl ReadbackBuffer {
    pub fn new(label: &str) -> Self {
        Self {
            buffer: None,
            capacity: 0,
            label: label.to_string(),
        }
    }

    /// Bytes required for a padded `width`×`height` RGBA8 copy.
    pub fn required_size(width: u32, height: u32) -> u64 {
        u64::from(padded_bytes_per_row(width, BYTES_PER_PIXEL)) * u64::from(height)
    }

    /// Make sure a `width`×`height` copy fits. Returns `true` if a new buffer
    /// was allocated.
    pub fn ensure_capacity(&mut self, device: &wgpu::Device, width: u32, height: u32) -> bool {
        let needed = Self::required_size(width, height);
        if self.buffer.is_some() && needed <= self.capacity {
            return false;
        }
        if let Some(old) = self.buffer.take() {
            old.destroy();
        }
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&self.label),
            size: needed,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        log::debug!(
            "Grew read-back buffer '{}' from {} to {} bytes",
            self.label,
            self.capacity,
            needed
        );
        self.buffer = Some(buffer);
        self.capacity = needed;
        true
    }

    /// Record a full-texture copy of `texture` into this buffer.
    ///
    /// Returns `false` without recording anything if the buffer is too small.
    pub fn record_copy(&self, encoder: &mut wgpu::CommandEncoder, texture: &wgpu::Texture) -> bool {
        let (width, height) = (texture.width(), texture.height());
        let Some(buffer) = self.buffer.as_ref() else {
            return false;
        };
        if Self::required_size(width, height) > self.capacity {
            return false;
        }

        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row(width, BYTES_PER_PIXEL)),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        true
    }

    /// Block until the GPU finished the copy of a `width`×`height` region and
    /// write its tightly packed RGBA8 rows into `dst`.
    pub fn read_into(
        &self,
        device: &wgpu::Device,
        width: u32,
        height: u32,
        dst: &mut [u8],
    ) -> Result<(), ReadbackError> {
        let needed_bytes = Self::required_size(width, height);
        let buffer = match self.buffer.as_ref() {
            Some(buffer) if needed_bytes <= self.capacity => buffer,
            _ => {
                return Err(ReadbackError::BufferTooSmall {
                    capacity: self.capacity,
                    needed: needed_bytes,
                });
            }
        };
        let row_bytes = (width * BYTES_PER_PIXEL) as usize;
        let needed = row_bytes * height as usize;
        if dst.len() < needed {
            return Err(ReadbackError::DestinationTooSmall {
                actual: dst.len(),
                needed,
            });
        }

        let slice = buffer.slice(..needed_bytes);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| ReadbackError::Poll(e.to_string()))?;
        rx.recv().map_err(|_| ReadbackError::CallbackDropped)??;

        {
            let mapped = slice.get_mapped_range();
            let padded = padded_bytes_per_row(width, BYTES_PER_PIXEL) as usize;
            for (row, out) in dst[..needed].chunks_exact_mut(row_bytes).enumerate() {
                let start = row * padded;
                out.copy_from_slice(&mapped[start..start + row_bytes]);
            }
        }
        buffer.unmap();
        Ok(())
    }

    /// Current allocation in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Whether a GPU buffer is currently allocated.
    pub fn is_allocated(&self) -> bool {
        self.buffer.is_some()
    }

    /// Free the staging buffer.
    pub fn destroy(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            buffer.destroy();
        }
        self.capacity = 0;
    }
}
