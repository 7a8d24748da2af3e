//! Materialized entity state — the value, its revertable window, and the
//! bookkeeping that makes reduction idempotent and reorg-safe.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{EntityEvent, EventOrd};
use crate::reduce::Reducer;

/// A materialized entity of domain `R`.
///
/// Invariants maintained by [`reduce`](EntityState::reduce) and
/// [`compact`](EntityState::compact):
/// - `value` equals the fold of `revertable` over the compacted base;
/// - `revertable` is sorted by ordering key with no duplicate identities;
/// - every entry's ordering key is above `compacted_through`.
#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "", deserialize = ""))]
pub struct EntityState<R: Reducer> {
    pub id: R::Id,
    pub value: R::Value,
    /// Recently applied events, still inside the revert window (oldest first).
    pub revertable: Vec<R::Event>,
    /// Highest ordering key ever compacted into the base value.
    pub compacted_through: Option<EventOrd>,
    /// Tombstone flag, refreshed from the domain rule after every fold step.
    pub deleted: bool,
    /// Optimistic-concurrency counter; bumped by the store on save.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl<R: Reducer> EntityState<R> {
    /// Zero-value template for an id the store has never seen.
    pub fn template(id: R::Id) -> Self {
        Self {
            id,
            value: R::Value::default(),
            revertable: Vec::new(),
            compacted_through: None,
            deleted: false,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// Returns `true` if the entity has never been persisted.
    pub fn is_new(&self) -> bool {
        self.version == 0
    }

    /// Block number of the most recent event this entity has absorbed,
    /// whether still revertable or already compacted.
    pub fn last_block(&self) -> Option<u64> {
        self.revertable
            .last()
            .map(|e| e.ord().block_number)
            .or(self.compacted_through.map(|m| m.block_number))
    }
}

impl<R: Reducer> Clone for EntityState<R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            value: self.value.clone(),
            revertable: self.revertable.clone(),
            compacted_through: self.compacted_through,
            deleted: self.deleted,
            version: self.version,
            updated_at: self.updated_at,
        }
    }
}

impl<R: Reducer> fmt::Debug for EntityState<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityState")
            .field("entity", &R::ENTITY)
            .field("id", &self.id)
            .field("value", &self.value)
            .field("revertable", &self.revertable.len())
            .field("compacted_through", &self.compacted_through)
            .field("deleted", &self.deleted)
            .field("version", &self.version)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{confirmed, TallyReducer};

    #[test]
    fn template_is_zero_valued() {
        let state = EntityState::<TallyReducer>::template("acct-1".into());
        assert_eq!(state.value.total, 0);
        assert!(state.revertable.is_empty());
        assert!(state.compacted_through.is_none());
        assert!(state.is_new());
        assert!(!state.deleted);
        assert_eq!(state.last_block(), None);
    }

    #[test]
    fn serde_roundtrip() {
        let mut state = EntityState::<TallyReducer>::template("acct-1".into());
        state.reduce(&confirmed("acct-1", 5, 0, 7)).unwrap();

        let json = serde_json::to_string(&state).unwrap();
        let back: EntityState<TallyReducer> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "acct-1");
        assert_eq!(back.value.total, 7);
        assert_eq!(back.revertable.len(), 1);
        assert_eq!(back.last_block(), Some(5));
    }
}
