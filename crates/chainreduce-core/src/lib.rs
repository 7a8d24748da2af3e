//! chainreduce-core — reorg-tolerant reduction of chain events into entity
//! state.
//!
//! # Architecture
//!
//! ```text
//! EventBatch → IncrementalReduceService ──┐
//!              FullReduceService ─────────┼── EntityState::reduce / compact
//!              TaskReduceService ─────────┘        │
//!                  │                               ├── EntityStore   (snapshots, optimistic saves)
//!                  │                               ├── EventHistory  (durable log, rebuild source)
//!                  └── ReducePool (id-hash fan-out)└── ListenerSet   (downstream notifications)
//!
//! ReconcileChecker (buffered by block, verified past the confirmation depth)
//! ```
//!
//! A domain plugs in by implementing [`Reducer`] (and [`EntityEvent`] for its
//! event envelope); everything else — dedup, revert matching, window
//! compaction, optimistic saves, rebuilds, reconciliation — is generic.

pub mod checker;
pub mod config;
pub mod entity;
pub mod error;
pub mod event;
pub mod full;
pub mod head;
pub mod incremental;
pub mod listener;
pub mod metrics;
pub mod pool;
pub mod reduce;
pub mod retry;
pub mod store;
pub mod task;
pub mod window;

#[cfg(test)]
pub(crate) mod testutil;

pub use checker::{CheckSummary, CheckerFeed, GroundTruthSource, ReconcileChecker};
pub use config::{CheckerConfig, ReduceConfig};
pub use entity::EntityState;
pub use error::ReduceError;
pub use event::{EntityEvent, EventOrd, EventStatus};
pub use full::{FullReduceService, RebuildOutcome, SweepReport};
pub use head::{CachedHead, FixedHead, HeadSource};
pub use incremental::{BatchReport, EventBatch, IncrementalReduceService};
pub use listener::{ListenerSet, ReduceListener};
pub use metrics::{CheckerMetrics, ReduceMetrics};
pub use pool::ReducePool;
pub use reduce::{ReduceOutcome, Reducer};
pub use retry::{RetryConfig, RetryPolicy};
pub use store::{EntityStore, EventHistory, TaskStore};
pub use task::{TaskReduceService, TaskReport};
