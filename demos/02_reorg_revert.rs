//! Undoing a reorged-out transfer.
//!
//! The upstream client re-delivers a dropped event as REVERTED under the
//! same ordering key; the reducer applies the exact inverse. Duplicate
//! deliveries in between are no-ops.
//!
//! Run with: cargo run --example 02_reorg_revert

use std::sync::Arc;

use chainreduce_core::{
    EntityStore, EventBatch, EventOrd, EventStatus, IncrementalReduceService, ReduceConfig,
};
use chainreduce_market::{BalanceEvent, BalanceId, BalanceKind, BalanceReducer};
use chainreduce_storage::MemoryStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryStore::<BalanceReducer>::new());
    let service =
        IncrementalReduceService::new(store.clone(), store.clone(), ReduceConfig::default());

    let id = BalanceId::new("0xUSDC", "0xAlice");
    let deposit = BalanceEvent {
        id: id.clone(),
        ord: EventOrd::new(100, 3, 0),
        status: EventStatus::Confirmed,
        kind: BalanceKind::TransferIn,
        amount: 1_000,
        counterparty: Some("0xFaucet".into()),
    };

    service
        .reduce_batch(&EventBatch {
            events: vec![deposit.clone()],
            head: 100,
        })
        .await?;
    let state = store.load(&id).await?.unwrap();
    println!("after deposit:     {}", state.value.amount);

    // The client retries the batch; same identity, strict no-op.
    let report = service
        .reduce_batch(&EventBatch {
            events: vec![deposit.clone()],
            head: 100,
        })
        .await?;
    println!("re-delivery:       {} duplicate(s), {} saved", report.duplicates, report.saved);

    // A reorg drops block 100; the deposit comes back as REVERTED.
    let mut revert = deposit;
    revert.status = EventStatus::Reverted;
    service
        .reduce_batch(&EventBatch {
            events: vec![revert],
            head: 102,
        })
        .await?;
    let state = store.load(&id).await?.unwrap();
    println!("after revert:      {}", state.value.amount);

    Ok(())
}
