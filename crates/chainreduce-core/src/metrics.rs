//! Counter snapshots exposed by the services.
//!
//! Services hold these behind `Arc<Mutex<_>>` and hand out clones through a
//! `metrics()` accessor, so a caller never observes a half-updated set.

/// Counters kept by the reduce services.
#[derive(Debug, Clone, Default)]
pub struct ReduceMetrics {
    /// Events taken off the feed, everything else included.
    pub events_seen: u64,
    /// Events whose effect was folded in or reverted out.
    pub events_applied: u64,
    /// Strict no-ops: identity already present in the window.
    pub events_duplicate: u64,
    /// Deliveries at or below the compaction watermark.
    pub events_compacted: u64,
    /// Events whose kind the domain does not recognize, skipped.
    pub events_unknown: u64,
    pub entities_saved: u64,
    pub entities_deleted: u64,
    pub save_conflicts: u64,
    /// Entity ids abandoned mid-batch after a fatal reduction error.
    pub entities_quarantined: u64,
    /// Entity ids whose persist still failed once retries ran out.
    pub entities_failed: u64,
    pub listener_failures: u64,
}

/// Counters kept by the reconciliation checker.
#[derive(Debug, Clone, Default)]
pub struct CheckerMetrics {
    /// Observations accepted into the buffer.
    pub incoming: u64,
    /// Observations verified against ground truth.
    pub checked: u64,
    /// Verified observations that did not match ground truth.
    pub invalid: u64,
    /// Observations too far behind the head to be worth verifying.
    pub stale_skipped: u64,
    /// Blocks released early because the buffer hit capacity.
    pub force_released: u64,
    /// Ground-truth lookups that failed; their observations are dropped.
    pub truth_failures: u64,
}
