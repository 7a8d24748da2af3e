//! Full reduce service — rebuilds entity state from the durable history.
//!
//! The repair path for anything the incremental path got wrong or missed:
//! fold every surviving event for an id into a fresh template, compact
//! against the current head, and save over the stored row (carrying its
//! version so the optimistic check still guards against a concurrent
//! incremental write).

use std::sync::Arc;

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::ReduceConfig;
use crate::entity::EntityState;
use crate::error::ReduceError;
use crate::event::EntityEvent;
use crate::head::HeadSource;
use crate::listener::{ListenerSet, ReduceListener};
use crate::reduce::Reducer;
use crate::retry::RetryPolicy;
use crate::store::{EntityStore, EventHistory};

/// What a single rebuild did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// The rebuilt state differed from the stored row and was saved.
    Saved,
    /// The rebuilt state matched the stored row; nothing written.
    Unchanged,
    /// No history and no stored row for this id.
    Empty,
    /// A fatal reduction error; the stored row was left alone.
    Quarantined,
}

/// Accounting for a whole-log sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub entities: usize,
    pub saved: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub quarantined: Vec<String>,
}

pub struct FullReduceService<R: Reducer, S, H, HS> {
    store: Arc<S>,
    history: Arc<H>,
    head: Arc<HS>,
    config: ReduceConfig,
    policy: RetryPolicy,
    listeners: ListenerSet<R>,
}

impl<R, S, H, HS> FullReduceService<R, S, H, HS>
where
    R: Reducer,
    S: EntityStore<R>,
    H: EventHistory<R>,
    HS: HeadSource,
{
    pub fn new(store: Arc<S>, history: Arc<H>, head: Arc<HS>, config: ReduceConfig) -> Self {
        let policy = RetryPolicy::new(config.retry_config());
        Self {
            store,
            history,
            head,
            config,
            policy,
            listeners: ListenerSet::new(),
        }
    }

    /// Register a listener. Call before the service starts rebuilding.
    pub fn add_listener(&mut self, listener: Arc<dyn ReduceListener<R>>) {
        self.listeners.push(listener);
    }

    /// Rebuild one entity from its surviving history.
    ///
    /// An id with neither history nor a stored row is skipped. An id whose
    /// history has all been reverted away rebuilds to the tombstone template,
    /// which overwrites (and flags) the stored row.
    pub async fn rebuild_one(&self, id: &R::Id) -> Result<RebuildOutcome, ReduceError> {
        let events = self.history.events_for(id).await?;
        let head = self.head.head_block_number().await?;

        let mut attempt: u32 = 0;
        loop {
            let existing = self.store.load(id).await?;
            if events.is_empty() && existing.is_none() {
                return Ok(RebuildOutcome::Empty);
            }

            let mut state = EntityState::template(id.clone());
            if let Some(prev) = &existing {
                state.version = prev.version;
            }

            for event in &events {
                match state.reduce(event) {
                    Ok(_) => {}
                    Err(ReduceError::UnknownKind { kind, .. }) => {
                        warn!(
                            entity = R::ENTITY,
                            id = %id,
                            ord = %event.ord(),
                            kind,
                            "unknown event kind skipped during rebuild"
                        );
                    }
                    Err(e) if e.is_fatal_for_entity() => {
                        error!(
                            entity = R::ENTITY,
                            id = %id,
                            error = %e,
                            "rebuild hit a reduction invariant violation"
                        );
                        return Ok(RebuildOutcome::Quarantined);
                    }
                    Err(e) => return Err(e),
                }
            }
            state.compact(
                head,
                self.config.confirmation_depth,
                self.config.max_revertable_events,
            );
            // A fold of zero surviving events never runs touch; recompute the
            // tombstone flag for the rebuilt row explicitly.
            state.touch();

            if let Some(prev) = &existing {
                if state.value == prev.value
                    && state.deleted == prev.deleted
                    && state.compacted_through == prev.compacted_through
                    && same_window(&state.revertable, &prev.revertable)
                {
                    return Ok(RebuildOutcome::Unchanged);
                }
            }

            match self.store.save(&mut state).await {
                Ok(()) => {
                    self.listeners.notify(&state).await;
                    return Ok(RebuildOutcome::Saved);
                }
                Err(e)
                    if (e.is_conflict() || e.is_transient())
                        && self.policy.should_retry(attempt + 1) =>
                {
                    attempt += 1;
                    warn!(
                        entity = R::ENTITY,
                        id = %id,
                        attempt,
                        error = %e,
                        "rebuild save failed, retrying"
                    );
                    if let Some(delay) = self.policy.next_delay(attempt) {
                        sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Rebuild every entity in the history, ascending by id, optionally
    /// starting strictly after `from`. Per-id failures are counted and do
    /// not stop the sweep.
    pub async fn sweep(&self, from: Option<&R::Id>) -> Result<SweepReport, ReduceError> {
        let ids = self.history.ids_after(from).await?;
        let mut report = SweepReport::default();

        for id in &ids {
            report.entities += 1;
            match self.rebuild_one(id).await {
                Ok(RebuildOutcome::Saved) => report.saved += 1,
                Ok(RebuildOutcome::Unchanged) => report.unchanged += 1,
                Ok(RebuildOutcome::Empty) => {}
                Ok(RebuildOutcome::Quarantined) => report.quarantined.push(id.to_string()),
                Err(e) => {
                    error!(entity = R::ENTITY, id = %id, error = %e, "rebuild failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            entity = R::ENTITY,
            entities = report.entities,
            saved = report.saved,
            unchanged = report.unchanged,
            failed = report.failed,
            "full reduce sweep finished"
        );
        Ok(report)
    }
}

/// Window equality by event identity.
fn same_window<E: EntityEvent>(a: &[E], b: &[E]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.is_same(y))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
