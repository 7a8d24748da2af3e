//! Service configuration types.

use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;
use std::time::Duration;

/// Configuration shared by the reduce services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReduceConfig {
    /// Number of blocks below the head after which an event can no longer
    /// be reverted. Typical values: 12 (Ethereum PoS), 64 (Ethereum safe),
    /// 1 (fast chains).
    pub confirmation_depth: u64,
    /// Hard cap on the revertable window length per entity. Overflow is
    /// compacted oldest-first regardless of block age.
    pub max_revertable_events: usize,
    /// Number of reduction workers. Events for one entity always land on
    /// the same worker.
    pub worker_count: usize,
    /// Maximum events handed to the workers per chunk.
    pub batch_size: usize,
    /// Per-worker queue depth before the dispatcher blocks.
    pub queue_depth: usize,
    /// Retries for an optimistic save that lost the race.
    pub save_retries: u32,
    /// Initial backoff before the first save retry (milliseconds).
    pub save_backoff_ms: u64,
}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self {
            confirmation_depth: 12,
            max_revertable_events: 500,
            worker_count: 4,
            batch_size: 500,
            queue_depth: 16,
            save_retries: 3,
            save_backoff_ms: 50,
        }
    }
}

impl ReduceConfig {
    /// Set the confirmation depth in blocks.
    pub fn confirmation_depth(mut self, depth: u64) -> Self {
        self.confirmation_depth = depth;
        self
    }

    /// Set the hard cap on the revertable window length.
    pub fn max_revertable_events(mut self, max: usize) -> Self {
        self.max_revertable_events = max;
        self
    }

    /// Set the number of reduction workers.
    pub fn worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    /// Set the maximum events per worker chunk.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the per-worker queue depth.
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Set the retry count for optimistic saves that lost the race.
    pub fn save_retries(mut self, retries: u32) -> Self {
        self.save_retries = retries;
        self
    }

    /// Retry policy configuration for optimistic saves.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.save_retries,
            initial_backoff: Duration::from_millis(self.save_backoff_ms),
            ..RetryConfig::default()
        }
    }
}

/// Configuration for the reconciliation checker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckerConfig {
    /// Blocks below the head after which an observation is safe to verify.
    pub confirmation_depth: u64,
    /// Blocks below the head after which an observation is too stale to be
    /// worth verifying — counted, then dropped.
    pub stale_after: u64,
    /// Maximum number of distinct blocks buffered before the oldest is
    /// force-released.
    pub buffer_capacity: usize,
    /// How long a fetched head stays fresh (milliseconds).
    pub head_refresh_ms: u64,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            confirmation_depth: 12,
            stale_after: 20,
            buffer_capacity: 64,
            head_refresh_ms: 2000,
        }
    }
}

impl CheckerConfig {
    /// Set the confirmation depth in blocks.
    pub fn confirmation_depth(mut self, depth: u64) -> Self {
        self.confirmation_depth = depth;
        self
    }

    /// Set how many blocks past confirmation a buffered block may wait.
    pub fn stale_after(mut self, blocks: u64) -> Self {
        self.stale_after = blocks;
        self
    }

    /// Set the buffered-block capacity.
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn head_refresh(&self) -> Duration {
        Duration::from_millis(self.head_refresh_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduce_defaults() {
        let config = ReduceConfig::default();
        assert_eq!(config.confirmation_depth, 12);
        assert_eq!(config.max_revertable_events, 500);
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.retry_config().max_retries, 3);
    }

    #[test]
    fn checker_defaults() {
        let config = CheckerConfig::default();
        assert_eq!(config.confirmation_depth, 12);
        assert_eq!(config.stale_after, 20);
        assert_eq!(config.head_refresh(), Duration::from_millis(2000));
    }

    #[test]
    fn fluent_reduce_config() {
        let config = ReduceConfig::default()
            .confirmation_depth(6)
            .worker_count(8)
            .batch_size(100)
            .queue_depth(32)
            .max_revertable_events(1000)
            .save_retries(5);
        assert_eq!(config.confirmation_depth, 6);
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.queue_depth, 32);
        assert_eq!(config.max_revertable_events, 1000);
        assert_eq!(config.retry_config().max_retries, 5);
    }

    #[test]
    fn fluent_checker_config() {
        let config = CheckerConfig::default()
            .confirmation_depth(3)
            .stale_after(10)
            .buffer_capacity(8);
        assert_eq!(config.confirmation_depth, 3);
        assert_eq!(config.stale_after, 10);
        assert_eq!(config.buffer_capacity, 8);
    }
}
