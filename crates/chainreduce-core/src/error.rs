//! Error types for the reduction pipeline.

use thiserror::Error;

use crate::event::EventOrd;

/// Errors that can occur while reducing entities.
#[derive(Debug, Error)]
pub enum ReduceError {
    #[error("store error: {0}")]
    Store(String),

    #[error("ground truth error: {0}")]
    GroundTruth(String),

    #[error("version conflict saving {entity} '{id}'")]
    Conflict { entity: &'static str, id: String },

    #[error("unknown event kind '{kind}' for {entity}")]
    UnknownKind { entity: &'static str, kind: String },

    #[error("revert of an event never applied to {entity} '{id}' at {ord}")]
    UnmatchedRevert {
        entity: &'static str,
        id: String,
        ord: EventOrd,
    },

    #[error("invariant violated for {entity} '{id}': {reason}")]
    Invariant {
        entity: &'static str,
        id: String,
        reason: String,
    },

    #[error("task '{task}' is already running")]
    TaskRunning { task: String },

    #[error("serialization error: {0}")]
    Serde(String),

    #[error("{0}")]
    Other(String),
}

impl ReduceError {
    /// Returns `true` for infrastructure errors worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_) | Self::GroundTruth(_))
    }

    /// Returns `true` if the error is a stale-version save (reload and re-fold).
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns `true` if the error poisons a single entity's processing.
    ///
    /// Fatal errors quarantine the id: nothing is persisted for it and the
    /// batch continues with the remaining ids.
    pub fn is_fatal_for_entity(&self) -> bool {
        matches!(self, Self::UnmatchedRevert { .. } | Self::Invariant { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ReduceError::Store("down".into()).is_transient());
        assert!(ReduceError::GroundTruth("timeout".into()).is_transient());
        assert!(!ReduceError::Other("misc".into()).is_transient());

        let conflict = ReduceError::Conflict {
            entity: "balance",
            id: "0xToken:0xOwner".into(),
        };
        assert!(conflict.is_conflict());
        assert!(!conflict.is_fatal_for_entity());

        let unmatched = ReduceError::UnmatchedRevert {
            entity: "balance",
            id: "0xToken:0xOwner".into(),
            ord: EventOrd::new(14, 3, 0),
        };
        assert!(unmatched.is_fatal_for_entity());
        assert!(!unmatched.is_transient());
    }
}
