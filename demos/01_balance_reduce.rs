//! Incremental reduction of ERC-20 transfers into balances.
//!
//! Feeds one authoritative batch through the incremental service over the
//! in-memory backend and prints the resulting balances.
//!
//! Run with: cargo run --example 01_balance_reduce

use std::sync::Arc;

use chainreduce_core::{
    EntityStore, EventBatch, EventOrd, EventStatus, IncrementalReduceService, ReduceConfig,
};
use chainreduce_market::{BalanceEvent, BalanceId, BalanceKind, BalanceReducer};
use chainreduce_storage::MemoryStore;

fn transfer(owner: &str, kind: BalanceKind, block: u64, log: u32, amount: u128) -> BalanceEvent {
    BalanceEvent {
        id: BalanceId::new("0xUSDC", owner),
        ord: EventOrd::new(block, log, 0),
        status: EventStatus::Confirmed,
        kind,
        amount,
        counterparty: None,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryStore::<BalanceReducer>::new());
    let service =
        IncrementalReduceService::new(store.clone(), store.clone(), ReduceConfig::default());

    let report = service
        .reduce_batch(&EventBatch {
            events: vec![
                transfer("0xAlice", BalanceKind::TransferIn, 100, 0, 1_000),
                transfer("0xBob", BalanceKind::TransferIn, 100, 1, 500),
                transfer("0xAlice", BalanceKind::TransferOut, 101, 0, 250),
            ],
            head: 101,
        })
        .await?;

    println!(
        "applied {} events, saved {} entities",
        report.applied, report.saved
    );

    for owner in ["0xAlice", "0xBob"] {
        let id = BalanceId::new("0xUSDC", owner);
        if let Some(state) = store.load(&id).await? {
            println!("  {owner}: {} (version {})", state.value.amount, state.version);
        }
    }

    Ok(())
}
