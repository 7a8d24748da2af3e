//! Chain head observation.
//!
//! Compaction and reconciliation depths are always measured against the
//! authoritative chain head, never against the newest event an entity
//! happens to have seen — a quiet entity must still compact.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::ReduceError;

/// Source of the authoritative chain head block number.
#[async_trait]
pub trait HeadSource: Send + Sync {
    async fn head_block_number(&self) -> Result<u64, ReduceError>;
}

/// A constant head, for tests and replays where the head is known up front.
pub struct FixedHead(pub u64);

#[async_trait]
impl HeadSource for FixedHead {
    async fn head_block_number(&self) -> Result<u64, ReduceError> {
        Ok(self.0)
    }
}

/// Caches an inner source's answer for a fixed interval.
///
/// The checker asks for the head on every released block; this keeps that
/// from turning into one upstream call per block.
pub struct CachedHead<S> {
    inner: S,
    ttl: Duration,
    last: Mutex<Option<(Instant, u64)>>,
}

impl<S: HeadSource> CachedHead<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            last: Mutex::new(None),
        }
    }
}

#[async_trait]
impl<S: HeadSource> HeadSource for CachedHead<S> {
    async fn head_block_number(&self) -> Result<u64, ReduceError> {
        if let Some((at, head)) = *self.last.lock().unwrap() {
            if at.elapsed() < self.ttl {
                return Ok(head);
            }
        }
        let head = self.inner.head_block_number().await?;
        *self.last.lock().unwrap() = Some((Instant::now(), head));
        Ok(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counting(AtomicU32);

    #[async_trait]
    impl HeadSource for Counting {
        async fn head_block_number(&self) -> Result<u64, ReduceError> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(42)
        }
    }

    #[tokio::test]
    async fn fixed_head_returns_its_value() {
        assert_eq!(FixedHead(7).head_block_number().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn cached_head_reuses_a_fresh_answer() {
        let cached = CachedHead::new(Counting(AtomicU32::new(0)), Duration::from_secs(3600));
        assert_eq!(cached.head_block_number().await.unwrap(), 42);
        assert_eq!(cached.head_block_number().await.unwrap(), 42);
        assert_eq!(cached.inner.0.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn zero_ttl_refreshes_every_call() {
        let cached = CachedHead::new(Counting(AtomicU32::new(0)), Duration::ZERO);
        cached.head_block_number().await.unwrap();
        cached.head_block_number().await.unwrap();
        assert_eq!(cached.inner.0.load(Ordering::Relaxed), 2);
    }
}
