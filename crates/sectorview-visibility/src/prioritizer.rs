//! The public facade tying id allocation, proxies, rendering and
//! aggregation together.

use sectorview_config::PrioritizerConfig;
use sectorview_render::Camera;

use crate::aggregator::{PrioritizedSector, QueryStats, VisibilityAggregator};
use crate::backend::{CoverageBackend, CoverageView, create_backend};
use crate::clipping::{ClipPlane, ClippingState};
use crate::encoding::BYTES_PER_SAMPLE;
use crate::error::VisibilityError;
use crate::id_space::SectorIdSpace;
use crate::model::CadModel;
use crate::proxy::{CoverageProxyBuilder, SceneDiff};

/// Ranks sectors of the registered models by how much of the view they
/// cover.
///
/// Not reentrant: every operation takes `&mut self`. Use
/// [`VisibilityWorker`](crate::VisibilityWorker) to share one between threads.
pub struct VisibilityPrioritizer {
    backend: Box<dyn CoverageBackend + Send>,
    ids: SectorIdSpace,
    proxies: CoverageProxyBuilder,
    clipping: ClippingState,
    aggregator: VisibilityAggregator,
    /// Host copy of the coverage target. Grows, never shrinks.
    pixels: Vec<u8>,
    released: bool,
}

impl VisibilityPrioritizer {
    pub fn new(backend: Box<dyn CoverageBackend + Send>) -> Self {
        log::info!(
            "Visibility prioritizer using {} backend ({}x{})",
            backend.name(),
            backend.target_size().0,
            backend.target_size().1
        );
        Self {
            backend,
            ids: SectorIdSpace::new(),
            proxies: CoverageProxyBuilder::new(),
            clipping: ClippingState::none(),
            aggregator: VisibilityAggregator::new(),
            pixels: Vec::new(),
            released: false,
        }
    }

    /// Build the configured backend and apply the initial clip planes and
    /// debug surface.
    pub fn from_config(config: &PrioritizerConfig) -> Result<Self, VisibilityError> {
        let mut prioritizer = Self::new(create_backend(config)?);
        if !config.clip_planes.is_empty() {
            let planes: Vec<ClipPlane> = config
                .clip_planes
                .iter()
                .copied()
                .map(ClipPlane::from_array)
                .collect();
            prioritizer.set_clipping(Some(&planes), config.clip_intersection)?;
        }
        if config.debug_surface {
            prioritizer
                .create_debug_surface(config.debug_surface_width, config.debug_surface_height)?;
        }
        Ok(prioritizer)
    }

    /// Make `models` the registered set.
    ///
    /// New models are uploaded, missing ones released, and changed
    /// transforms take effect on the next query without a re-upload.
    pub fn set_models(&mut self, models: &[CadModel]) -> Result<SceneDiff, VisibilityError> {
        let diff = self.proxies.set_models(models, &mut self.ids)?;
        for key in &diff.removed {
            self.backend.release_group(key);
        }
        for key in &diff.added {
            if let Some(group) = self.proxies.group(key) {
                self.backend.upload_group(group)?;
            }
        }
        Ok(diff)
    }

    /// Replace the clip configuration. `None` disables clipping.
    pub fn set_clipping(
        &mut self,
        planes: Option<&[ClipPlane]>,
        clip_intersection: bool,
    ) -> Result<(), VisibilityError> {
        self.clipping = match planes {
            Some(planes) => ClippingState::new(planes, clip_intersection)?,
            None => ClippingState::none(),
        };
        log::debug!(
            "Clipping: {} planes, intersection = {}",
            self.clipping.planes().len(),
            clip_intersection
        );
        Ok(())
    }

    pub fn clipping(&self) -> &ClippingState {
        &self.clipping
    }

    /// Allocate the diagnostics surface, rendered on every query.
    ///
    /// Only one may exist per prioritizer.
    pub fn create_debug_surface(&mut self, width: u32, height: u32) -> Result<(), VisibilityError> {
        if self.backend.has_debug_surface() {
            return Err(VisibilityError::DebugSurfaceExists);
        }
        self.backend.create_debug_surface(width, height)
    }

    /// Copy the diagnostics image of the last query into `dst`.
    pub fn read_debug_surface(&mut self, dst: &mut Vec<u8>) -> Result<(u32, u32), VisibilityError> {
        self.backend.read_debug_pixels(dst)
    }

    /// Change the coverage target resolution.
    pub fn resize_target(&mut self, width: u32, height: u32) -> Result<(), VisibilityError> {
        self.backend.resize_target(width, height)
    }

    pub fn target_size(&self) -> (u32, u32) {
        self.backend.target_size()
    }

    /// Render the coverage pass for `camera` and rank every sector it
    /// touches, highest priority first.
    pub fn order_sectors_by_visibility(
        &mut self,
        camera: &Camera,
    ) -> Result<Vec<PrioritizedSector>, VisibilityError> {
        let view = CoverageView::from_camera(camera);
        if self.backend.has_debug_surface() {
            self.backend.render_debug(&view, &self.proxies, &self.clipping)?;
        }
        self.backend.render(&view, &self.proxies, &self.clipping)?;

        let (width, height) = self.backend.target_size();
        let needed = width as usize * height as usize * BYTES_PER_SAMPLE;
        self.grow_pixels(needed)?;
        self.backend.read_pixels(&mut self.pixels[..needed])?;

        let ranked = self
            .aggregator
            .aggregate(&self.pixels[..needed], width, height, &self.ids);
        let stats = self.aggregator.stats();
        log::trace!(
            "Coverage query: {} of {} pixels hit, {} sectors",
            stats.pixels_hit,
            stats.pixels_scanned,
            stats.sectors_hit
        );
        Ok(ranked)
    }

    fn grow_pixels(&mut self, needed: usize) -> Result<(), VisibilityError> {
        if self.pixels.len() >= needed {
            return Ok(());
        }
        self.pixels
            .try_reserve_exact(needed - self.pixels.len())
            .map_err(|e| VisibilityError::ResourceExhausted {
                what: "pixel buffer",
                reason: e.to_string(),
            })?;
        self.pixels.resize(needed, 0);
        Ok(())
    }

    /// Counters from the last query.
    pub fn last_stats(&self) -> QueryStats {
        self.aggregator.stats()
    }

    pub fn model_count(&self) -> usize {
        self.proxies.len()
    }

    pub fn sector_count(&self) -> usize {
        self.proxies.instance_count()
    }

    /// Backend allocations currently alive.
    pub fn live_resources(&self) -> usize {
        self.backend.live_resources()
    }

    /// Release all GPU and host resources.
    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.proxies.clear(&mut self.ids);
        self.backend.release();
        self.pixels = Vec::new();
        log::debug!("Visibility prioritizer disposed");
    }
}

impl Drop for VisibilityPrioritizer {
    fn drop(&mut self) {
        self.release();
    }
}
