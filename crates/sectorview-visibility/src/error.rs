//! Error type shared by every stage of the prioritizer.

use sectorview_render::{ReadbackError, RenderContextError};

use crate::model::ModelKey;

/// Prioritizer failure.
///
/// `OutOfRange` and `OrphanedRange` are internal invariant violations: ids
/// produced by a session always resolve within that session.
/// Malformed models, a second debug surface and too many clip planes are
/// caller mistakes, see
/// [`is_programmer_error`](Self::is_programmer_error).
#[derive(Debug, thiserror::Error)]
pub enum VisibilityError {
    /// A decoded id lies outside every issued range.
    #[error("sector id {global_id} is not inside any registered id range")]
    OutOfRange { global_id: u32 },

    /// A decoded id lies in the range of a model that was removed.
    #[error("sector id {global_id} belongs to the retired range of model '{model}'")]
    OrphanedRange { global_id: u32, model: ModelKey },

    /// Registering more sectors would exceed what the pixel encoding can carry.
    #[error("cannot register {requested} sectors: only {available} encodable ids remain")]
    IdSpaceExhausted { requested: u64, available: u64 },

    /// Two nodes of one sector tree carry the same id.
    #[error("model '{model}' has more than one sector with id {sector_id}")]
    DuplicateSectorId { model: ModelKey, sector_id: u32 },

    /// A sector box is inverted or not finite.
    #[error("sector {sector_id} of model '{model}' has invalid bounds")]
    InvalidSectorBounds { model: ModelKey, sector_id: u32 },

    /// A debug surface was requested twice on one instance.
    #[error("a debug surface already exists on this prioritizer")]
    DebugSurfaceExists,

    /// More clip planes than the coverage program supports.
    #[error("{count} clip planes requested, at most {max} supported")]
    TooManyClipPlanes { count: usize, max: usize },

    /// A render target, staging buffer, or host buffer could not be allocated.
    #[error("out of resources allocating {what}: {reason}")]
    ResourceExhausted { what: &'static str, reason: String },

    /// The GPU → host copy failed.
    #[error("pixel read-back failed: {0}")]
    Readback(#[from] ReadbackError),

    /// GPU initialization failed.
    #[error(transparent)]
    Gpu(#[from] RenderContextError),

    /// The backend was already released.
    #[error("coverage backend has been released")]
    Released,

    /// The worker thread could not be started.
    #[error("failed to spawn visibility worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// The worker thread exited before answering.
    #[error("visibility worker is no longer running")]
    WorkerDisconnected,
}

impl VisibilityError {
    /// `true` for misuse of the API, as opposed to runtime failures.
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Self::DebugSurfaceExists
                | Self::DuplicateSectorId { .. }
                | Self::InvalidSectorBounds { .. }
                | Self::TooManyClipPlanes { .. }
                | Self::Released
        )
    }

    /// `true` for ids that cannot be mapped back to a live model.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::OutOfRange { .. } | Self::OrphanedRange { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(VisibilityError::DebugSurfaceExists.is_programmer_error());
        assert!(!VisibilityError::DebugSurfaceExists.is_invariant_violation());
        assert!(VisibilityError::OutOfRange { global_id: 3 }.is_invariant_violation());
        let exhausted = VisibilityError::ResourceExhausted {
            what: "render target",
            reason: "too large".into(),
        };
        assert!(!exhausted.is_programmer_error());
        assert!(!exhausted.is_invariant_violation());
    }

    #[test]
    fn test_orphaned_message_names_model() {
        let err = VisibilityError::OrphanedRange {
            global_id: 12,
            model: ModelKey::from("plant/rev-3"),
        };
        assert!(err.to_string().contains("plant/rev-3"));
    }
}
