//! Repairing drifted snapshots from the durable event log.
//!
//! Writes a deliberately wrong balance row, rebuilds it from history with
//! the full reduce service, then runs the cursor-checkpointed task sweep
//! over every id in the log.
//!
//! Run with: cargo run --example 05_full_rebuild_task

use std::sync::Arc;

use chainreduce_core::{
    EntityState, EntityStore, EventHistory, EventOrd, EventStatus, FixedHead, FullReduceService,
    ReduceConfig, TaskReduceService, TaskStore,
};
use chainreduce_market::{BalanceEvent, BalanceId, BalanceKind, BalanceReducer};
use chainreduce_storage::MemoryStore;

fn transfer(owner: &str, block: u64, amount: u128) -> BalanceEvent {
    BalanceEvent {
        id: BalanceId::new("0xUSDC", owner),
        ord: EventOrd::new(block, 0, 0),
        status: EventStatus::Confirmed,
        kind: BalanceKind::TransferIn,
        amount,
        counterparty: None,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryStore::<BalanceReducer>::new());
    store
        .append(&[transfer("0xAlice", 100, 1_000), transfer("0xBob", 101, 500)])
        .await?;

    // A buggy writer left Alice's snapshot wrong.
    let alice = BalanceId::new("0xUSDC", "0xAlice");
    let mut wrong = EntityState::<BalanceReducer>::template(alice.clone());
    wrong.value.amount = 9_999_999;
    store.save(&mut wrong).await?;

    let full = Arc::new(FullReduceService::new(
        store.clone(),
        store.clone(),
        Arc::new(FixedHead(105)),
        ReduceConfig::default(),
    ));

    let outcome = full.rebuild_one(&alice).await?;
    let repaired = store.load(&alice).await?.unwrap();
    println!(
        "alice rebuilt ({outcome:?}): {} at version {}",
        repaired.value.amount, repaired.version
    );

    // The sweep covers every id in the log and checkpoints after each.
    let sweep = TaskReduceService::new(full, store.clone(), store.clone());
    let report = sweep.run().await?;
    println!(
        "swept {} entities, saved {}, cursor parked at {:?}",
        report.entities,
        report.saved,
        store.load_cursor(sweep.task_name()).await?
    );

    Ok(())
}
