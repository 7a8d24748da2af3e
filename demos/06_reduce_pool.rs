//! Fanning batches out across hash-routed reduce workers.
//!
//! Events for the same entity always land on the same worker, so per-entity
//! ordering survives the parallelism. Metrics come from the shared service.
//!
//! Run with: cargo run --example 06_reduce_pool

use std::sync::Arc;

use chainreduce_core::{
    EventBatch, EventOrd, EventStatus, IncrementalReduceService, ReduceConfig, ReducePool,
};
use chainreduce_market::{BalanceEvent, BalanceId, BalanceKind, BalanceReducer};
use chainreduce_storage::MemoryStore;

fn transfer(owner: &str, block: u64, log: u32, amount: u128) -> BalanceEvent {
    BalanceEvent {
        id: BalanceId::new("0xUSDC", owner),
        ord: EventOrd::new(block, log, 0),
        status: EventStatus::Confirmed,
        kind: BalanceKind::TransferIn,
        amount,
        counterparty: None,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryStore::<BalanceReducer>::new());
    let config = ReduceConfig::default().worker_count(4).queue_depth(8);
    let service = Arc::new(IncrementalReduceService::new(
        store.clone(),
        store.clone(),
        config,
    ));

    let pool = ReducePool::spawn(service.clone());
    let owners = ["0xAlice", "0xBob", "0xCarol", "0xDave", "0xErin"];
    for block in 100..110 {
        let events = owners
            .iter()
            .enumerate()
            .map(|(log, owner)| transfer(owner, block, log as u32, 10))
            .collect();
        pool.submit(EventBatch { events, head: block }).await?;
    }
    pool.shutdown().await;

    let metrics = service.metrics();
    println!(
        "reduced {} events into {} saves, {} conflicts",
        metrics.events_applied, metrics.entities_saved, metrics.save_conflicts
    );
    println!("entities persisted: {}", store.entity_count());

    Ok(())
}
