//! Headless wgpu plumbing: device setup, off-screen targets, render passes,
//! mesh buffers, texture read-back, and camera/bounds math.

pub mod bounds;
pub mod buffer;
pub mod camera;
pub mod gpu;
pub mod pass;
pub mod readback;
pub mod target;

pub use bounds::Aabb;
pub use buffer::{
    BufferAllocator, IndexData, MeshBuffer, UNIT_CUBE_CORNERS, UNIT_CUBE_INDICES, VertexPosition,
};
pub use camera::{Camera, Projection};
pub use gpu::{RenderContext, RenderContextError, init_headless_context_blocking};
pub use pass::{OffscreenEncoder, RenderPassBuilder, WHITE};
pub use readback::{ReadbackBuffer, ReadbackError, padded_bytes_per_row};
pub use target::OffscreenTarget;
