//! Read-back pixels → ranked sector list.

use crate::encoding::{BYTES_PER_SAMPLE, decode_sample};
use crate::error::VisibilityError;
use crate::id_space::SectorIdSpace;
use crate::model::ModelKey;

/// A sector with its share of the visible, center-weighted screen area.
#[derive(Clone, Debug, PartialEq)]
pub struct PrioritizedSector {
    pub model: ModelKey,
    pub sector_id: u32,
    /// Normalized weight; all priorities of one query sum to 1.
    pub priority: f32,
    /// Closest quantized distance seen for this sector.
    pub min_depth: u8,
}

/// Counters describing the most recent aggregation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueryStats {
    pub pixels_scanned: usize,
    pub pixels_hit: usize,
    pub sectors_hit: usize,
    /// Pixels dropped because their id did not resolve. Not part of
    /// `pixels_hit`.
    pub skipped_samples: usize,
}

/// Center-weighted importance of a pixel at normalized offset `(rx, ry)`.
///
/// Pixels near the middle of the view count up to about twice as much as
/// the corners, matching where a user's attention tends to be.
pub fn screen_weight(rx: f64, ry: f64) -> f64 {
    let r2 = rx * rx + ry * ry;
    0.5 * (2.5 - r2) + (-r2.sqrt()).exp()
}

/// Accumulates per-sector weights from one frame of encoded pixels.
///
/// Scratch storage is indexed by global id and reused between frames. It
/// only grows.
#[derive(Debug, Default)]
pub struct VisibilityAggregator {
    weights: Vec<f64>,
    hits: Vec<u32>,
    min_depth: Vec<u8>,
    touched: Vec<u32>,
    unresolved: Vec<u32>,
    column_weights: Vec<f64>,
    stats: QueryStats,
}

impl VisibilityAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rank every sector present in `pixels`, a tightly packed RGBA8 image of
    /// `width` × `height`.
    ///
    /// Samples whose id no longer resolves indicate a bookkeeping bug. They
    /// trip a debug assertion and are otherwise skipped with an error log.
    pub fn aggregate(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        ids: &SectorIdSpace,
    ) -> Vec<PrioritizedSector> {
        self.reset(ids.issued() as usize);
        let (w, h) = (width as usize, height as usize);
        let rows = pixels.chunks_exact(w.max(1) * BYTES_PER_SAMPLE).take(h);

        self.column_weights.clear();
        self.column_weights
            .extend((0..w).map(|x| normalized_offset(x, w)));

        for (y, row) in rows.enumerate() {
            let ry = normalized_offset(y, h);
            for (x, px) in row.chunks_exact(BYTES_PER_SAMPLE).enumerate() {
                self.stats.pixels_scanned += 1;
                let Some(sample) = decode_sample([px[0], px[1], px[2], px[3]]) else {
                    continue;
                };
                let id = sample.global_id as usize;
                if id >= self.weights.len() {
                    if !self.unresolved.contains(&sample.global_id) {
                        self.unresolved.push(sample.global_id);
                        report_unresolved(&VisibilityError::OutOfRange {
                            global_id: sample.global_id,
                        });
                    }
                    self.stats.skipped_samples += 1;
                    continue;
                }
                self.stats.pixels_hit += 1;
                if self.hits[id] == 0 {
                    self.touched.push(sample.global_id);
                    self.min_depth[id] = sample.depth;
                } else {
                    self.min_depth[id] = self.min_depth[id].min(sample.depth);
                }
                self.hits[id] += 1;
                self.weights[id] += screen_weight(self.column_weights[x], ry);
            }
        }

        self.touched.sort_unstable_by(|&a, &b| {
            self.weights[b as usize]
                .total_cmp(&self.weights[a as usize])
                .then(a.cmp(&b))
        });

        let mut ranked = Vec::with_capacity(self.touched.len());
        let mut total = 0.0;
        for &global_id in &self.touched {
            match ids.resolve(global_id) {
                Ok(resolved) => {
                    let weight = self.weights[global_id as usize];
                    total += weight;
                    ranked.push((resolved, weight, self.min_depth[global_id as usize]));
                }
                Err(err) => {
                    report_unresolved(&err);
                    let hits = self.hits[global_id as usize] as usize;
                    self.stats.pixels_hit -= hits;
                    self.stats.skipped_samples += hits;
                }
            }
        }
        self.stats.sectors_hit = ranked.len();

        ranked
            .into_iter()
            .map(|(resolved, weight, min_depth)| PrioritizedSector {
                model: resolved.model,
                sector_id: resolved.local_id,
                priority: (weight / total) as f32,
                min_depth,
            })
            .collect()
    }

    /// Counters from the last [`aggregate`](Self::aggregate) call.
    pub fn stats(&self) -> QueryStats {
        self.stats
    }

    /// Slots currently allocated for per-sector accumulation.
    pub fn capacity(&self) -> usize {
        self.weights.len()
    }

    fn reset(&mut self, id_count: usize) {
        for &id in &self.touched {
            self.weights[id as usize] = 0.0;
            self.hits[id as usize] = 0;
        }
        self.touched.clear();
        self.unresolved.clear();
        if self.weights.len() < id_count {
            self.weights.resize(id_count, 0.0);
            self.hits.resize(id_count, 0);
            self.min_depth.resize(id_count, u8::MAX);
        }
        self.stats = QueryStats::default();
    }
}

/// Pixel center mapped to `[-1, 1]` around the middle of the axis.
fn normalized_offset(index: usize, extent: usize) -> f64 {
    (index as f64 + 0.5) / extent as f64 * 2.0 - 1.0
}

fn report_unresolved(err: &VisibilityError) {
    debug_assert!(false, "unresolvable coverage sample: {err}");
    log::error!("Skipping coverage sample: {err}");
}
