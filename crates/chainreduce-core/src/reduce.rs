//! The reducer — a generic, idempotent fold of revocable events into entity
//! state.
//!
//! Dispatch is two-level: first on [`EventStatus`] (PENDING and CONFIRMED
//! apply forward, REVERTED applies in reverse), then on the event kind inside
//! the domain's [`Reducer::apply`] / [`Reducer::unapply`] match. The window
//! bookkeeping (dedup by identity, sorted insertion, removal by identity)
//! lives here and is written once for all domains.

use std::fmt;
use std::hash::Hash;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::entity::EntityState;
use crate::error::ReduceError;
use crate::event::{EntityEvent, EventStatus};

// ─── Reducer ──────────────────────────────────────────────────────────────────

/// Per-domain reduction rules: the event enum, the value it folds into, and
/// the delta functions.
///
/// `apply` and `unapply` must be atomic — on error the value is left
/// unchanged — and `unapply` must exactly invert `apply` for every kind, so
/// that reverting a windowed event restores the prior value.
pub trait Reducer: Send + Sync + 'static {
    type Id: Clone
        + Eq
        + Ord
        + Hash
        + fmt::Display
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    type Event: EntityEvent<Id = Self::Id> + fmt::Debug + Serialize + DeserializeOwned + 'static;

    type Value: Clone
        + Default
        + PartialEq
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    /// Entity name used in logs, error context, and storage keys.
    const ENTITY: &'static str;

    /// Fold the event's effect into the value (forward path).
    fn apply(value: &mut Self::Value, event: &Self::Event) -> Result<(), ReduceError>;

    /// Remove the event's effect from the value (reverse path).
    fn unapply(value: &mut Self::Value, event: &Self::Event) -> Result<(), ReduceError>;

    /// Whether the value has reached its tombstone state (e.g. zero quantity).
    fn is_tombstone(_value: &Self::Value) -> bool {
        false
    }
}

// ─── Outcome ──────────────────────────────────────────────────────────────────

/// What a single [`EntityState::reduce`] call did. All three are success
/// paths; duplicates and compacted re-deliveries are never errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOutcome {
    /// The event's effect was folded in (or reverted out).
    Applied,
    /// Same identity already present in the window — strict no-op.
    Duplicate,
    /// Ordering key at or below the compaction watermark — ignored.
    AlreadyCompacted,
}

// ─── Fold ─────────────────────────────────────────────────────────────────────

impl<R: Reducer> EntityState<R> {
    /// Fold one event into this entity.
    ///
    /// Idempotent: re-delivering an event already in the window (same
    /// ordering key and kind) is a no-op, as is any delivery — forward or
    /// revert — at or below the compaction watermark. Reverting an event
    /// that is above the watermark but was never applied is an invariant
    /// violation and fatal for this id.
    pub fn reduce(&mut self, event: &R::Event) -> Result<ReduceOutcome, ReduceError> {
        if let Some(mark) = self.compacted_through {
            if event.ord() <= mark {
                debug!(
                    entity = R::ENTITY,
                    id = %self.id,
                    ord = %event.ord(),
                    status = %event.status(),
                    kind = event.kind(),
                    "event at or below compaction watermark ignored"
                );
                return Ok(ReduceOutcome::AlreadyCompacted);
            }
        }

        match event.status() {
            EventStatus::Pending | EventStatus::Confirmed => {
                if self.revertable.iter().any(|e| e.is_same(event)) {
                    return Ok(ReduceOutcome::Duplicate);
                }
                R::apply(&mut self.value, event)?;
                // Out-of-order arrivals land at their sorted position.
                let at = self.revertable.partition_point(|e| e.ord() <= event.ord());
                self.revertable.insert(at, event.clone());
                self.touch();
                Ok(ReduceOutcome::Applied)
            }
            EventStatus::Reverted => {
                match self.revertable.iter().position(|e| e.is_same(event)) {
                    Some(at) => {
                        R::unapply(&mut self.value, event)?;
                        self.revertable.remove(at);
                        self.touch();
                        Ok(ReduceOutcome::Applied)
                    }
                    None => Err(ReduceError::UnmatchedRevert {
                        entity: R::ENTITY,
                        id: self.id.to_string(),
                        ord: event.ord(),
                    }),
                }
            }
        }
    }

    pub(crate) fn touch(&mut self) {
        self.deleted = R::is_tombstone(&self.value);
        self.updated_at = Utc::now();
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
