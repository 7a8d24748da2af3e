//! Incremental reduce service — folds live feed batches into entity state.
//!
//! For each batch: append every event to the durable history, group by
//! entity id, fold each group in ordering-key order, compact against the
//! batch head, then save under optimistic concurrency. A lost save race
//! reloads and refolds; the fold is idempotent, so refolding is always safe.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::config::ReduceConfig;
use crate::entity::EntityState;
use crate::error::ReduceError;
use crate::event::EntityEvent;
use crate::listener::{ListenerSet, ReduceListener};
use crate::metrics::ReduceMetrics;
use crate::reduce::{ReduceOutcome, Reducer};
use crate::retry::RetryPolicy;
use crate::store::{EntityStore, EventHistory};

// ─── Batch envelope ───────────────────────────────────────────────────────────

/// One feed delivery: a slice of events plus the authoritative chain head at
/// the moment the batch was cut.
///
/// Compaction depth is always measured against this head, never against the
/// newest event an entity happens to hold — a quiet entity must still
/// compact.
#[derive(Debug, Clone)]
pub struct EventBatch<E> {
    pub events: Vec<E>,
    pub head: u64,
}

/// Per-batch accounting, also merged into the service metrics.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub seen: usize,
    pub applied: usize,
    pub duplicates: usize,
    pub compacted: usize,
    pub unknown: usize,
    pub saved: usize,
    pub deleted: usize,
    pub conflicts: usize,
    pub listener_failures: usize,
    /// Ids abandoned after a fatal reduction error, nothing persisted.
    pub quarantined: Vec<String>,
    /// Ids whose persist failed after retries. The events are already in the
    /// durable history, so the caller retries just these ids.
    pub failed: Vec<String>,
}

// ─── Service ──────────────────────────────────────────────────────────────────

/// The incremental reduction service.
pub struct IncrementalReduceService<R: Reducer, S, H> {
    store: Arc<S>,
    history: Arc<H>,
    config: ReduceConfig,
    policy: RetryPolicy,
    listeners: ListenerSet<R>,
    metrics: Arc<Mutex<ReduceMetrics>>,
}

impl<R, S, H> IncrementalReduceService<R, S, H>
where
    R: Reducer,
    S: EntityStore<R>,
    H: EventHistory<R>,
{
    pub fn new(store: Arc<S>, history: Arc<H>, config: ReduceConfig) -> Self {
        let policy = RetryPolicy::new(config.retry_config());
        Self {
            store,
            history,
            config,
            policy,
            listeners: ListenerSet::new(),
            metrics: Arc::new(Mutex::new(ReduceMetrics::default())),
        }
    }

    /// Register a listener. Call before the service starts reducing.
    pub fn add_listener(&mut self, listener: Arc<dyn ReduceListener<R>>) {
        self.listeners.push(listener);
    }

    pub fn config(&self) -> &ReduceConfig {
        &self.config
    }

    /// Returns a snapshot of current metrics.
    pub fn metrics(&self) -> ReduceMetrics {
        self.metrics.lock().unwrap().clone()
    }

    /// Reduce one batch. Entity groups are processed in id order; events
    /// inside a group in ordering-key order, whatever order they arrived in.
    pub async fn reduce_batch(
        &self,
        batch: &EventBatch<R::Event>,
    ) -> Result<BatchReport, ReduceError> {
        let mut report = BatchReport {
            seen: batch.events.len(),
            ..BatchReport::default()
        };
        if batch.events.is_empty() {
            return Ok(report);
        }

        // The durable log comes first: state can always be rebuilt from it.
        self.history.append(&batch.events).await?;

        let mut groups: BTreeMap<R::Id, Vec<&R::Event>> = BTreeMap::new();
        for event in &batch.events {
            groups.entry(event.entity_id()).or_default().push(event);
        }

        for (id, mut events) in groups {
            events.sort_by_key(|e| e.ord());
            if let Err(e) = self.reduce_entity(&id, &events, batch.head, &mut report).await {
                error!(
                    entity = R::ENTITY,
                    id = %id,
                    error = %e,
                    "entity reduction failed, rest of the batch continues"
                );
                report.failed.push(id.to_string());
            }
        }

        let mut metrics = self.metrics.lock().unwrap();
        metrics.events_seen += report.seen as u64;
        metrics.events_applied += report.applied as u64;
        metrics.events_duplicate += report.duplicates as u64;
        metrics.events_compacted += report.compacted as u64;
        metrics.events_unknown += report.unknown as u64;
        metrics.entities_saved += report.saved as u64;
        metrics.entities_deleted += report.deleted as u64;
        metrics.save_conflicts += report.conflicts as u64;
        metrics.entities_quarantined += report.quarantined.len() as u64;
        metrics.entities_failed += report.failed.len() as u64;
        metrics.listener_failures += report.listener_failures as u64;
        drop(metrics);

        debug!(
            entity = R::ENTITY,
            seen = report.seen,
            applied = report.applied,
            saved = report.saved,
            quarantined = report.quarantined.len(),
            failed = report.failed.len(),
            "batch reduced"
        );
        Ok(report)
    }

    async fn reduce_entity(
        &self,
        id: &R::Id,
        events: &[&R::Event],
        head: u64,
        report: &mut BatchReport,
    ) -> Result<(), ReduceError> {
        let mut attempt: u32 = 0;
        loop {
            let mut state = match self.store.load(id).await? {
                Some(state) => state,
                None => EntityState::template(id.clone()),
            };

            let mut applied = 0usize;
            let mut duplicates = 0usize;
            let mut compacted = 0usize;
            let mut unknown = 0usize;

            for event in events {
                match state.reduce(event) {
                    Ok(ReduceOutcome::Applied) => applied += 1,
                    Ok(ReduceOutcome::Duplicate) => duplicates += 1,
                    Ok(ReduceOutcome::AlreadyCompacted) => compacted += 1,
                    Err(ReduceError::UnknownKind { kind, .. }) => {
                        warn!(
                            entity = R::ENTITY,
                            id = %id,
                            ord = %event.ord(),
                            kind,
                            "unknown event kind skipped"
                        );
                        unknown += 1;
                    }
                    Err(e) if e.is_fatal_for_entity() => {
                        error!(
                            entity = R::ENTITY,
                            id = %id,
                            error = %e,
                            "reduction invariant violated, entity quarantined"
                        );
                        report.quarantined.push(id.to_string());
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            }

            let dropped = state.compact(
                head,
                self.config.confirmation_depth,
                self.config.max_revertable_events,
            );

            if applied == 0 && dropped == 0 {
                report.duplicates += duplicates;
                report.compacted += compacted;
                report.unknown += unknown;
                return Ok(());
            }

            match self.store.save(&mut state).await {
                Ok(()) => {
                    report.applied += applied;
                    report.duplicates += duplicates;
                    report.compacted += compacted;
                    report.unknown += unknown;
                    report.saved += 1;
                    if state.deleted {
                        report.deleted += 1;
                    }
                    report.listener_failures += self.listeners.notify(&state).await as usize;
                    debug!(
                        entity = R::ENTITY,
                        id = %state.id,
                        version = state.version,
                        window = state.revertable.len(),
                        "entity saved"
                    );
                    return Ok(());
                }
                Err(e)
                    if (e.is_conflict() || e.is_transient())
                        && self.policy.should_retry(attempt + 1) =>
                {
                    attempt += 1;
                    if e.is_conflict() {
                        report.conflicts += 1;
                    }
                    warn!(
                        entity = R::ENTITY,
                        id = %id,
                        attempt,
                        error = %e,
                        "save failed, reloading and retrying"
                    );
                    if let Some(delay) = self.policy.next_delay(attempt) {
                        sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
