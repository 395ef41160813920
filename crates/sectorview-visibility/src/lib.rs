//! GPU-assisted sector visibility prioritizer.
//!
//! Every registered CAD model is decomposed into sectors. Each sector is drawn
//! as a bounding-box proxy into a small off-screen target, with its global id
//! and distance packed into the pixel color. Reading the pixels back and
//! accumulating a center-weighted score per id yields a ranked list of the
//! sectors that matter most for the current view, which a streaming scheduler
//! uses to decide what to fetch next.
//!
//! The entry point is [`VisibilityPrioritizer`]; [`VisibilityWorker`] runs one
//! on a dedicated thread.

pub mod aggregator;
pub mod backend;
pub mod clipping;
pub mod coverage;
pub mod encoding;
pub mod error;
pub mod id_space;
pub mod model;
pub mod prioritizer;
pub mod proxy;
pub mod worker;


pub use aggregator::{PrioritizedSector, QueryStats, VisibilityAggregator, screen_weight};
pub use backend::{
    CoverageBackend, CoverageView, GpuCoverageBackend, SoftwareCoverageBackend, create_backend,
};
pub use clipping::{ClipPlane, ClippingState};
pub use coverage::CoverageFactors;
pub use encoding::{BACKGROUND, DecodedSample, MAX_ENCODABLE_ID, decode_sample, encode_sample};
pub use error::VisibilityError;
pub use id_space::{ResolvedSector, SectorIdSpace};
pub use model::{CadModel, ModelKey, SectorMetadata, SectorNode, flatten_sectors};
pub use prioritizer::VisibilityPrioritizer;
pub use proxy::{CoverageProxyBuilder, ProxyGroup, ProxyInstance, SceneDiff};
pub use worker::VisibilityWorker;
