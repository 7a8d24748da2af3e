//! Downstream notification of reduced entity changes.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::entity::EntityState;
use crate::error::ReduceError;
use crate::reduce::Reducer;

/// Trait for downstream consumers of reduced state.
///
/// Called once per changed entity after its state has been durably saved (or
/// deleted, when the reduction reached a tombstone). The passed state is the
/// post-save snapshot, version included.
#[async_trait]
pub trait ReduceListener<R: Reducer>: Send + Sync {
    async fn on_entity(&self, state: &EntityState<R>) -> Result<(), ReduceError>;
}

/// Ordered set of listeners sharing one notification fan-out.
pub struct ListenerSet<R: Reducer> {
    listeners: Vec<Arc<dyn ReduceListener<R>>>,
}

impl<R: Reducer> ListenerSet<R> {
    pub fn new() -> Self {
        Self { listeners: vec![] }
    }

    pub fn push(&mut self, listener: Arc<dyn ReduceListener<R>>) {
        self.listeners.push(listener);
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Notify every listener in registration order.
    ///
    /// The save has already happened, so a listener failure cannot roll it
    /// back: failures are logged and counted, and later listeners still run.
    /// Returns the number of failed listeners.
    pub async fn notify(&self, state: &EntityState<R>) -> u64 {
        let mut failed = 0;
        for listener in &self.listeners {
            if let Err(e) = listener.on_entity(state).await {
                failed += 1;
                warn!(
                    entity = R::ENTITY,
                    id = %state.id,
                    error = %e,
                    "reduce listener failed"
                );
            }
        }
        failed
    }
}

impl<R: Reducer> Default for ListenerSet<R> {
    fn default() -> Self {
        Self::new()
    }
}
