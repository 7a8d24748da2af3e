//! Persistence seams — entity snapshots, the durable event log, task cursors.
//!
//! Backends live in `chainreduce-storage`; the reduction services only ever
//! talk to these traits.

use async_trait::async_trait;

use crate::entity::EntityState;
use crate::error::ReduceError;
use crate::reduce::Reducer;

// ─── EntityStore ──────────────────────────────────────────────────────────────

/// Keyed snapshot store for reduced entities.
///
/// `save` enforces optimistic concurrency: the stored version must equal
/// `state.version` (0 meaning "no row yet"), the write lands with the version
/// bumped by one, and the passed state's `version` is bumped to match. On a
/// mismatch the call fails with [`ReduceError::Conflict`] and writes nothing;
/// the caller reloads and refolds.
#[async_trait]
pub trait EntityStore<R: Reducer>: Send + Sync {
    async fn load(&self, id: &R::Id) -> Result<Option<EntityState<R>>, ReduceError>;

    async fn save(&self, state: &mut EntityState<R>) -> Result<(), ReduceError>;

    async fn delete(&self, id: &R::Id) -> Result<(), ReduceError>;
}

// ─── EventHistory ─────────────────────────────────────────────────────────────

/// Append-mostly durable log of every event the reducer has seen.
///
/// Rows are keyed by event identity (entity id + ordering key + kind), so
/// re-appending a delivery replaces the previous row rather than duplicating
/// it. Appending a REVERTED delivery overwrites the forward row under the
/// same identity, which masks it from `events_for` — the log always returns
/// the surviving (PENDING or CONFIRMED) events only, in ascending order.
#[async_trait]
pub trait EventHistory<R: Reducer>: Send + Sync {
    async fn append(&self, events: &[R::Event]) -> Result<(), ReduceError>;

    /// Surviving events for one entity, ascending by ordering key.
    async fn events_for(&self, id: &R::Id) -> Result<Vec<R::Event>, ReduceError>;

    /// Distinct entity ids in the log, ascending, strictly after `after`
    /// when given. Drives full-reduction sweeps and their resume cursor.
    async fn ids_after(&self, after: Option<&R::Id>) -> Result<Vec<R::Id>, ReduceError>;
}

// ─── TaskStore ────────────────────────────────────────────────────────────────

/// Progress cursors for long-running background tasks, keyed by task name.
///
/// The cursor is an opaque string (the services store a JSON-encoded entity
/// id). A missing row means the task starts from the beginning. Method names
/// stay distinct from [`EntityStore`]'s so one backend can implement both.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn load_cursor(&self, task: &str) -> Result<Option<String>, ReduceError>;

    async fn save_cursor(&self, task: &str, cursor: &str) -> Result<(), ReduceError>;

    async fn delete_cursor(&self, task: &str) -> Result<(), ReduceError>;
}
