//! Reconciliation checker — verifies reduced values against ground truth.
//!
//! Observations of saved entities are buffered by block number and verified
//! only once their block is `confirmation_depth` below the head, so a value
//! is never flagged invalid just because a pending reorg is about to rewrite
//! it. Observations too far behind the head are not worth verifying at all
//! and are dropped. The buffer is drained under the lock, verification runs
//! after the lock is released.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use crate::config::CheckerConfig;
use crate::entity::EntityState;
use crate::error::ReduceError;
use crate::head::{CachedHead, HeadSource};
use crate::listener::ReduceListener;
use crate::metrics::CheckerMetrics;
use crate::reduce::Reducer;
use crate::retry::{RetryConfig, RetryPolicy};

// ─── Ground truth ─────────────────────────────────────────────────────────────

/// Source of the externally observable value for an entity, e.g. an on-chain
/// balance call at the latest block.
#[async_trait]
pub trait GroundTruthSource<R: Reducer>: Send + Sync {
    async fn actual_value(&self, id: &R::Id) -> Result<R::Value, ReduceError>;
}

// ─── Checker ──────────────────────────────────────────────────────────────────

struct Observed<R: Reducer> {
    value: R::Value,
    updated_at: DateTime<Utc>,
}

/// Result of one release pass.
#[derive(Debug, Clone, Default)]
pub struct CheckSummary {
    pub released_blocks: usize,
    pub checked: usize,
    pub invalid: usize,
}

pub struct ReconcileChecker<R: Reducer, G, HS> {
    truth: Arc<G>,
    head: CachedHead<HS>,
    config: CheckerConfig,
    policy: RetryPolicy,
    buffer: Mutex<BTreeMap<u64, HashMap<R::Id, Observed<R>>>>,
    metrics: Arc<Mutex<CheckerMetrics>>,
}

impl<R, G, HS> ReconcileChecker<R, G, HS>
where
    R: Reducer,
    G: GroundTruthSource<R>,
    HS: HeadSource,
{
    pub fn new(truth: Arc<G>, head: HS, config: CheckerConfig) -> Self {
        let head = CachedHead::new(head, config.head_refresh());
        Self {
            truth,
            head,
            config,
            policy: RetryPolicy::new(RetryConfig::default()),
            buffer: Mutex::new(BTreeMap::new()),
            metrics: Arc::new(Mutex::new(CheckerMetrics::default())),
        }
    }

    /// Returns a snapshot of current metrics.
    pub fn metrics(&self) -> CheckerMetrics {
        self.metrics.lock().unwrap().clone()
    }

    /// Number of distinct blocks currently buffered.
    pub fn pending_blocks(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    /// Buffer one observation of a reduced entity.
    ///
    /// Re-observations of the same id at the same block keep the newest by
    /// `updated_at`. When the buffer exceeds its block capacity the oldest
    /// block is verified immediately, confirmed or not.
    pub async fn offer(
        &self,
        id: R::Id,
        value: R::Value,
        at_block: u64,
        updated_at: DateTime<Utc>,
    ) -> Result<(), ReduceError> {
        self.metrics.lock().unwrap().incoming += 1;

        let head = self.head.head_block_number().await?;
        if head.saturating_sub(at_block) >= self.config.stale_after {
            debug!(
                entity = R::ENTITY,
                id = %id,
                at_block,
                head,
                "observation too stale to verify, dropped"
            );
            self.metrics.lock().unwrap().stale_skipped += 1;
            return Ok(());
        }

        let overflow = {
            let mut buffer = self.buffer.lock().unwrap();
            let slot = buffer.entry(at_block).or_default();
            let replace = match slot.get(&id) {
                Some(prev) => {
                    updated_at > prev.updated_at
                        || (updated_at == prev.updated_at && value != prev.value)
                }
                None => true,
            };
            if replace {
                slot.insert(id, Observed { value, updated_at });
            }

            let mut overflow = Vec::new();
            while buffer.len() > self.config.buffer_capacity {
                if let Some(oldest) = buffer.pop_first() {
                    overflow.push(oldest);
                }
            }
            overflow
        };

        for (block, entries) in overflow {
            warn!(
                entity = R::ENTITY,
                block,
                "checker buffer full, verifying oldest block early"
            );
            self.metrics.lock().unwrap().force_released += 1;
            self.verify_block(block, entries).await;
        }
        Ok(())
    }

    /// Verify every buffered block at or below `head - confirmation_depth`.
    pub async fn release(&self) -> Result<CheckSummary, ReduceError> {
        let head = self.head.head_block_number().await?;
        let boundary = head.saturating_sub(self.config.confirmation_depth);

        let released: BTreeMap<u64, HashMap<R::Id, Observed<R>>> = {
            let mut buffer = self.buffer.lock().unwrap();
            let keep = buffer.split_off(&boundary.saturating_add(1));
            std::mem::replace(&mut *buffer, keep)
        };

        let mut summary = CheckSummary {
            released_blocks: released.len(),
            ..CheckSummary::default()
        };
        for (block, entries) in released {
            let (checked, invalid) = self.verify_block(block, entries).await;
            summary.checked += checked;
            summary.invalid += invalid;
        }
        Ok(summary)
    }

    /// Release on a fixed period until the returned handle is aborted.
    pub fn run_every(self: Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()>
    where
        G: 'static,
        HS: 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = self.release().await {
                    warn!(entity = R::ENTITY, error = %e, "reconcile release failed");
                }
            }
        })
    }

    /// Fetch ground truth, retrying transient failures with backoff.
    async fn fetch_truth(&self, id: &R::Id) -> Result<R::Value, ReduceError> {
        let mut attempt: u32 = 0;
        loop {
            match self.truth.actual_value(id).await {
                Ok(actual) => return Ok(actual),
                Err(e) if e.is_transient() && self.policy.should_retry(attempt + 1) => {
                    attempt += 1;
                    debug!(
                        entity = R::ENTITY,
                        id = %id,
                        attempt,
                        error = %e,
                        "ground truth lookup failed, retrying"
                    );
                    if let Some(delay) = self.policy.next_delay(attempt) {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn verify_block(&self, block: u64, entries: HashMap<R::Id, Observed<R>>) -> (usize, usize) {
        let mut checked = 0usize;
        let mut invalid = 0usize;
        for (id, observed) in entries {
            let actual = match self.fetch_truth(&id).await {
                Ok(actual) => actual,
                Err(e) => {
                    warn!(
                        entity = R::ENTITY,
                        id = %id,
                        error = %e,
                        "ground truth lookup failed, observation dropped"
                    );
                    self.metrics.lock().unwrap().truth_failures += 1;
                    continue;
                }
            };
            checked += 1;
            if observed.value != actual {
                invalid += 1;
                error!(
                    entity = R::ENTITY,
                    id = %id,
                    block,
                    reduced = ?observed.value,
                    actual = ?actual,
                    "reduced value does not match ground truth"
                );
            }
        }
        let mut metrics = self.metrics.lock().unwrap();
        metrics.checked += checked as u64;
        metrics.invalid += invalid as u64;
        (checked, invalid)
    }
}

// ─── Feed ─────────────────────────────────────────────────────────────────────

/// Listener adapter: routes every saved entity into the checker as an
/// observation at the entity's newest absorbed block.
pub struct CheckerFeed<R: Reducer, G, HS> {
    checker: Arc<ReconcileChecker<R, G, HS>>,
}

impl<R: Reducer, G, HS> CheckerFeed<R, G, HS> {
    pub fn new(checker: Arc<ReconcileChecker<R, G, HS>>) -> Self {
        Self { checker }
    }
}

#[async_trait]
impl<R, G, HS> ReduceListener<R> for CheckerFeed<R, G, HS>
where
    R: Reducer,
    G: GroundTruthSource<R>,
    HS: HeadSource,
{
    async fn on_entity(&self, state: &EntityState<R>) -> Result<(), ReduceError> {
        let at_block = match state.last_block() {
            Some(block) => block,
            None => return Ok(()),
        };
        self.checker
            .offer(state.id.clone(), state.value.clone(), at_block, state.updated_at)
            .await
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::config::ReduceConfig;
    use crate::head::FixedHead;
    use crate::incremental::{EventBatch, IncrementalReduceService};
    use crate::testutil::{confirmed, MapStore, TallyReducer, TallyValue, VecHistory};

    struct MapTruth {
        values: Mutex<HashMap<String, TallyValue>>,
        calls: AtomicU32,
    }

    impl MapTruth {
        fn new() -> Self {
            Self {
                values: Mutex::new(HashMap::new()),
                calls: AtomicU32::new(0),
            }
        }

        fn set(&self, id: &str, total: i64, entries: u64) {
            self.values
                .lock()
                .unwrap()
                .insert(id.to_string(), TallyValue { total, entries });
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl GroundTruthSource<TallyReducer> for MapTruth {
        async fn actual_value(&self, id: &String) -> Result<TallyValue, ReduceError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(self
                .values
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .unwrap_or_default())
        }
    }

    fn checker(
        head: u64,
        config: CheckerConfig,
    ) -> (Arc<ReconcileChecker<TallyReducer, MapTruth, FixedHead>>, Arc<MapTruth>) {
        let truth = Arc::new(MapTruth::new());
        (
            Arc::new(ReconcileChecker::new(truth.clone(), FixedHead(head), config)),
            truth,
        )
    }

    #[tokio::test]
    async fn releases_only_confirmed_blocks() {
        let (checker, truth) = checker(20, CheckerConfig::default());
        truth.set("a", 1, 1);
        truth.set("b", 2, 1);

        for (id, block, total) in [("a", 5u64, 1i64), ("b", 8, 2), ("c", 9, 3)] {
            checker
                .offer(id.into(), TallyValue { total, entries: 1 }, block, Utc::now())
                .await
                .unwrap();
        }

        // head 20, depth 12: blocks 5 and 8 are confirmable, 9 is not.
        let summary = checker.release().await.unwrap();

        assert_eq!(summary.released_blocks, 2);
        assert_eq!(summary.checked, 2);
        assert_eq!(summary.invalid, 0);
        assert_eq!(checker.pending_blocks(), 1);
    }

    #[tokio::test]
    async fn mismatch_is_flagged_invalid() {
        let (checker, truth) = checker(20, CheckerConfig::default());
        truth.set("a", 999, 1);

        checker
            .offer("a".into(), TallyValue { total: 1, entries: 1 }, 5, Utc::now())
            .await
            .unwrap();
        let summary = checker.release().await.unwrap();

        assert_eq!(summary.checked, 1);
        assert_eq!(summary.invalid, 1);
        assert_eq!(checker.metrics().invalid, 1);
    }

    #[tokio::test]
    async fn stale_observations_are_dropped() {
        let config = CheckerConfig {
            stale_after: 20,
            ..CheckerConfig::default()
        };
        let (checker, _) = checker(100, config);

        checker
            .offer("a".into(), TallyValue::default(), 70, Utc::now())
            .await
            .unwrap();

        assert_eq!(checker.pending_blocks(), 0);
        let metrics = checker.metrics();
        assert_eq!(metrics.incoming, 1);
        assert_eq!(metrics.stale_skipped, 1);
    }

    #[tokio::test]
    async fn re_observation_keeps_the_newest() {
        let (checker, truth) = checker(20, CheckerConfig::default());
        truth.set("a", 7, 2);

        let first = Utc::now();
        let second = first + chrono::Duration::seconds(1);
        checker
            .offer("a".into(), TallyValue { total: 3, entries: 1 }, 5, first)
            .await
            .unwrap();
        checker
            .offer("a".into(), TallyValue { total: 7, entries: 2 }, 5, second)
            .await
            .unwrap();
        // An older echo after the newer one changes nothing.
        checker
            .offer("a".into(), TallyValue { total: 3, entries: 1 }, 5, first)
            .await
            .unwrap();

        let summary = checker.release().await.unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.invalid, 0, "the newest observation is the one verified");
    }

    #[tokio::test]
    async fn overflow_verifies_the_oldest_block_early() {
        let config = CheckerConfig {
            buffer_capacity: 2,
            ..CheckerConfig::default()
        };
        // head 10 and depth 12 mean nothing is confirmable yet.
        let (checker, truth) = checker(10, config);
        truth.set("a", 1, 1);

        for (id, block) in [("a", 1u64), ("b", 2), ("c", 3)] {
            checker
                .offer(id.into(), TallyValue { total: 1, entries: 1 }, block, Utc::now())
                .await
                .unwrap();
        }

        assert_eq!(checker.pending_blocks(), 2);
        assert_eq!(checker.metrics().force_released, 1);
        assert_eq!(truth.calls(), 1, "only the evicted block was verified");
    }

    /// Truth source that fails the first `failures` lookups, then answers.
    struct FlakyTruth {
        failures: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakyTruth {
        fn new(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl GroundTruthSource<TallyReducer> for FlakyTruth {
        async fn actual_value(&self, _id: &String) -> Result<TallyValue, ReduceError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let left = self.failures.load(Ordering::Relaxed);
            if left > 0 {
                self.failures.store(left - 1, Ordering::Relaxed);
                return Err(ReduceError::GroundTruth("node unreachable".into()));
            }
            Ok(TallyValue::default())
        }
    }

    #[tokio::test]
    async fn truth_failure_retries_then_drops_the_observation() {
        let truth = Arc::new(FlakyTruth::new(u32::MAX));
        let checker = Arc::new(ReconcileChecker::new(
            truth.clone(),
            FixedHead(20),
            CheckerConfig::default(),
        ));
        checker
            .offer("a".into(), TallyValue::default(), 5, Utc::now())
            .await
            .unwrap();

        let summary = checker.release().await.unwrap();

        assert_eq!(summary.checked, 0);
        assert_eq!(summary.invalid, 0);
        assert_eq!(checker.metrics().truth_failures, 1);
        // One initial attempt plus the default three retries.
        assert_eq!(truth.calls.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn transient_truth_failure_recovers() {
        let truth = Arc::new(FlakyTruth::new(1));
        let checker = Arc::new(ReconcileChecker::new(
            truth.clone(),
            FixedHead(20),
            CheckerConfig::default(),
        ));
        checker
            .offer("a".into(), TallyValue::default(), 5, Utc::now())
            .await
            .unwrap();

        let summary = checker.release().await.unwrap();

        assert_eq!(summary.checked, 1);
        assert_eq!(summary.invalid, 0);
        assert_eq!(checker.metrics().truth_failures, 0);
        assert_eq!(truth.calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn feed_offers_saved_entities() {
        let (checker, truth) = checker(20, CheckerConfig::default());
        truth.set("a", 5, 1);

        let store = Arc::new(MapStore::new());
        let history = Arc::new(VecHistory::new());
        let mut service =
            IncrementalReduceService::<TallyReducer, _, _>::new(store, history, ReduceConfig::default());
        service.add_listener(Arc::new(CheckerFeed::new(checker.clone())));

        service
            .reduce_batch(&EventBatch {
                events: vec![confirmed("a", 5, 0, 5)],
                head: 5,
            })
            .await
            .unwrap();

        assert_eq!(checker.pending_blocks(), 1);
        let summary = checker.release().await.unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.invalid, 0);
    }
}
