//! Reduction worker pool — same-id serialization over parallel workers.
//!
//! Routing hashes the entity id onto a fixed set of workers, so every event
//! for one id lands on the same worker and is reduced serially, while
//! different ids reduce in parallel. That keeps optimistic-save conflicts an
//! exception (a concurrent full reduce) instead of the steady state.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::ReduceError;
use crate::event::EntityEvent;
use crate::incremental::{EventBatch, IncrementalReduceService};
use crate::reduce::Reducer;
use crate::store::{EntityStore, EventHistory};

pub struct ReducePool<R: Reducer> {
    senders: Vec<mpsc::Sender<EventBatch<R::Event>>>,
    handles: Vec<JoinHandle<()>>,
    chunk_size: usize,
}

impl<R: Reducer> ReducePool<R> {
    /// Spawn the configured number of workers over a shared service.
    pub fn spawn<S, H>(service: Arc<IncrementalReduceService<R, S, H>>) -> Self
    where
        S: EntityStore<R> + 'static,
        H: EventHistory<R> + 'static,
    {
        let workers = service.config().worker_count.max(1);
        let queue_depth = service.config().queue_depth.max(1);
        let chunk_size = service.config().batch_size.max(1);

        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let (tx, mut rx) = mpsc::channel::<EventBatch<R::Event>>(queue_depth);
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                while let Some(batch) = rx.recv().await {
                    if let Err(e) = service.reduce_batch(&batch).await {
                        error!(entity = R::ENTITY, worker, error = %e, "worker batch failed");
                    }
                }
            }));
            senders.push(tx);
        }
        info!(entity = R::ENTITY, workers, "reduce pool started");
        Self {
            senders,
            handles,
            chunk_size,
        }
    }

    /// Partition a batch across the workers, chunked to the configured batch
    /// size. Blocks when a worker's queue is full.
    pub async fn submit(&self, batch: EventBatch<R::Event>) -> Result<(), ReduceError> {
        let EventBatch { events, head } = batch;
        let mut per_worker: Vec<Vec<R::Event>> =
            (0..self.senders.len()).map(|_| Vec::new()).collect();
        for event in events {
            let slot = worker_index(&event.entity_id(), self.senders.len());
            per_worker[slot].push(event);
        }

        for (slot, events) in per_worker.into_iter().enumerate() {
            for chunk in events.chunks(self.chunk_size) {
                self.senders[slot]
                    .send(EventBatch {
                        events: chunk.to_vec(),
                        head,
                    })
                    .await
                    .map_err(|_| ReduceError::Other("reduce worker stopped".into()))?;
            }
        }
        Ok(())
    }

    /// Close the queues and wait for every worker to drain its backlog.
    pub async fn shutdown(self) {
        drop(self.senders);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!(entity = R::ENTITY, "reduce pool stopped");
    }
}

fn worker_index<I: Hash>(id: &I, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

// ─── Tests ────────────────────────────────────────────────────────────────────
