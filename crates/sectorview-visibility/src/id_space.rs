//! Global sector id allocation.
//!
//! Every model receives a contiguous block of global ids when it is first
//! registered. Offsets only move forward, and a removed model's block is kept
//! as a retired entry so a stale id can be told apart from garbage. Ids are
//! therefore never reused within one prioritizer.

use std::sync::Arc;

use crate::encoding::MAX_ENCODABLE_ID;
use crate::error::VisibilityError;
use crate::model::ModelKey;

#[derive(Clone, Debug)]
struct IdRange {
    model: ModelKey,
    offset: u32,
    count: u32,
    /// Local id per position in the range; `None` maps position to itself.
    local_ids: Option<Arc<[u32]>>,
    retired: bool,
}

impl IdRange {
    fn end(&self) -> u32 {
        self.offset + self.count
    }
}

/// A global id mapped back to its model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedSector {
    pub model: ModelKey,
    pub local_id: u32,
}

/// Append-only registry of id ranges, ordered by offset.
#[derive(Debug, Default)]
pub struct SectorIdSpace {
    ranges: Vec<IdRange>,
    next_offset: u32,
}

impl SectorIdSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `sector_count` ids for `model` and return the first one.
    ///
    /// Fails without side effects when the encoding has no room left.
    pub fn register_model(
        &mut self,
        model: ModelKey,
        sector_count: u32,
    ) -> Result<u32, VisibilityError> {
        self.register_model_with_ids(model, sector_count, None)
    }

    /// Like [`register_model`](Self::register_model), but resolved ids report
    /// `local_ids[position]` instead of the position inside the range.
    pub fn register_model_with_ids(
        &mut self,
        model: ModelKey,
        sector_count: u32,
        local_ids: Option<Arc<[u32]>>,
    ) -> Result<u32, VisibilityError> {
        debug_assert!(
            local_ids
                .as_ref()
                .is_none_or(|ids| ids.len() == sector_count as usize),
            "local id table does not match the sector count"
        );
        self.check_capacity(u64::from(sector_count))?;
        let offset = self.next_offset;
        self.ranges.push(IdRange {
            model,
            offset,
            count: sector_count,
            local_ids,
            retired: false,
        });
        self.next_offset += sector_count;
        log::debug!("Registered {sector_count} sector ids at offset {offset}");
        Ok(offset)
    }

    /// Fail if `requested` more ids would not fit.
    pub fn check_capacity(&self, requested: u64) -> Result<(), VisibilityError> {
        let available = self.remaining();
        if requested > available {
            return Err(VisibilityError::IdSpaceExhausted {
                requested,
                available,
            });
        }
        Ok(())
    }

    /// Ids that can still be issued.
    pub fn remaining(&self) -> u64 {
        u64::from(MAX_ENCODABLE_ID) + 1 - u64::from(self.next_offset)
    }

    /// Retire the live range of `model`. Its ids stay allocated.
    ///
    /// Returns `false` if the model has no live range.
    pub fn retire_model(&mut self, model: &ModelKey) -> bool {
        match self
            .ranges
            .iter_mut()
            .find(|r| !r.retired && &r.model == model)
        {
            Some(range) => {
                range.retired = true;
                true
            }
            None => false,
        }
    }

    /// Map a global id back to `(model, local id)`.
    pub fn resolve(&self, global_id: u32) -> Result<ResolvedSector, VisibilityError> {
        let range = self
            .find(global_id)
            .ok_or(VisibilityError::OutOfRange { global_id })?;
        if range.retired {
            return Err(VisibilityError::OrphanedRange {
                global_id,
                model: range.model.clone(),
            });
        }
        let position = global_id - range.offset;
        let local_id = match &range.local_ids {
            Some(ids) => ids
                .get(position as usize)
                .copied()
                .ok_or(VisibilityError::OutOfRange { global_id })?,
            None => position,
        };
        Ok(ResolvedSector {
            model: range.model.clone(),
            local_id,
        })
    }

    fn find(&self, global_id: u32) -> Option<&IdRange> {
        // Ranges are sorted by offset; zero-length ranges share the offset of
        // their successor and sort before it, so the last candidate wins.
        let idx = self.ranges.partition_point(|r| r.offset <= global_id);
        let range = self.ranges.get(idx.checked_sub(1)?)?;
        (global_id < range.end()).then_some(range)
    }

    /// `(offset, count)` of the live range of `model`.
    pub fn live_range(&self, model: &ModelKey) -> Option<(u32, u32)> {
        self.ranges
            .iter()
            .find(|r| !r.retired && &r.model == model)
            .map(|r| (r.offset, r.count))
    }

    /// One past the largest id ever issued.
    pub fn issued(&self) -> u32 {
        self.next_offset
    }

    /// Number of retired ranges.
    pub fn retired_count(&self) -> usize {
        self.ranges.iter().filter(|r| r.retired).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ModelKey {
        ModelKey::from(name)
    }

    #[test]
    fn test_offsets_are_contiguous() {
        let mut ids = SectorIdSpace::new();
        assert_eq!(ids.register_model(key("a"), 10).unwrap(), 0);
        assert_eq!(ids.register_model(key("b"), 5).unwrap(), 10);
        assert_eq!(ids.register_model(key("c"), 1).unwrap(), 15);
        assert_eq!(ids.issued(), 16);
    }

    #[test]
    fn test_resolve_across_ranges() {
        let mut ids = SectorIdSpace::new();
        ids.register_model(key("a"), 10).unwrap();
        ids.register_model(key("b"), 5).unwrap();

        let first = ids.resolve(0).unwrap();
        assert_eq!(first.model, key("a"));
        assert_eq!(first.local_id, 0);

        let last_a = ids.resolve(9).unwrap();
        assert_eq!((last_a.model, last_a.local_id), (key("a"), 9));

        let b = ids.resolve(12).unwrap();
        assert_eq!((b.model, b.local_id), (key("b"), 2));
    }

    #[test]
    fn test_out_of_range() {
        let mut ids = SectorIdSpace::new();
        ids.register_model(key("a"), 3).unwrap();
        assert!(matches!(
            ids.resolve(3),
            Err(VisibilityError::OutOfRange { global_id: 3 })
        ));
        assert!(matches!(
            SectorIdSpace::new().resolve(0),
            Err(VisibilityError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_empty_ranges_do_not_shadow() {
        let mut ids = SectorIdSpace::new();
        ids.register_model(key("empty"), 0).unwrap();
        ids.register_model(key("a"), 4).unwrap();
        ids.register_model(key("empty-2"), 0).unwrap();
        ids.register_model(key("b"), 2).unwrap();

        assert_eq!(ids.resolve(0).unwrap().model, key("a"));
        assert_eq!(ids.resolve(4).unwrap().model, key("b"));
        assert!(ids.resolve(6).is_err());
    }

    #[test]
    fn test_retired_range_is_orphaned_not_reused() {
        let mut ids = SectorIdSpace::new();
        ids.register_model(key("a"), 4).unwrap();
        assert!(ids.retire_model(&key("a")));
        assert!(!ids.retire_model(&key("a")));

        match ids.resolve(2) {
            Err(VisibilityError::OrphanedRange { global_id, model }) => {
                assert_eq!(global_id, 2);
                assert_eq!(model, key("a"));
            }
            other => panic!("expected orphaned range, got {other:?}"),
        }

        // Re-adding the same key gets fresh ids.
        assert_eq!(ids.register_model(key("a"), 4).unwrap(), 4);
        assert_eq!(ids.resolve(5).unwrap().local_id, 1);
        assert_eq!(ids.live_range(&key("a")), Some((4, 4)));
        assert_eq!(ids.retired_count(), 1);
    }

    #[test]
    fn test_sparse_local_ids_resolve_through_table() {
        let mut ids = SectorIdSpace::new();
        ids.register_model(key("dense"), 2).unwrap();
        let table: Arc<[u32]> = vec![0, 10, 20].into();
        let offset = ids
            .register_model_with_ids(key("sparse"), 3, Some(table))
            .unwrap();
        assert_eq!(offset, 2);

        let resolved = ids.resolve(offset + 2).unwrap();
        assert_eq!((resolved.model, resolved.local_id), (key("sparse"), 20));
        assert_eq!(ids.resolve(offset + 1).unwrap().local_id, 10);
        assert_eq!(ids.resolve(1).unwrap().local_id, 1);
        assert!(ids.resolve(offset + 3).is_err());
    }

    #[test]
    fn test_exhaustion_leaves_state_untouched() {
        let mut ids = SectorIdSpace::new();
        ids.register_model(key("big"), MAX_ENCODABLE_ID).unwrap();
        assert_eq!(ids.remaining(), 1);
        let err = ids.register_model(key("more"), 2).unwrap_err();
        assert!(matches!(
            err,
            VisibilityError::IdSpaceExhausted {
                requested: 2,
                available: 1
            }
        ));
        assert_eq!(ids.issued(), MAX_ENCODABLE_ID);
        assert_eq!(ids.register_model(key("last"), 1).unwrap(), MAX_ENCODABLE_ID);
    }
}
