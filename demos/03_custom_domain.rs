//! Plugging a custom domain into the engine.
//!
//! Defines a per-pair trade volume reducer from scratch and runs it through
//! the same incremental service the built-in market domains use. The only
//! domain code is the event envelope and the apply/unapply pair.
//!
//! Run with: cargo run --example 03_custom_domain

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use chainreduce_core::{
    EntityEvent, EntityStore, EventBatch, EventOrd, EventStatus, IncrementalReduceService,
    ReduceConfig, ReduceError, Reducer,
};
use chainreduce_storage::MemoryStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TradeEvent {
    pair: String,
    ord: EventOrd,
    status: EventStatus,
    base_amount: u128,
    quote_amount: u128,
}

impl EntityEvent for TradeEvent {
    type Id = String;

    fn entity_id(&self) -> String {
        self.pair.clone()
    }

    fn ord(&self) -> EventOrd {
        self.ord
    }

    fn status(&self) -> EventStatus {
        self.status
    }

    fn kind(&self) -> &'static str {
        "TRADE"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Volume {
    trades: u64,
    base: u128,
    quote: u128,
}

struct VolumeReducer;

impl Reducer for VolumeReducer {
    type Id = String;
    type Event = TradeEvent;
    type Value = Volume;

    const ENTITY: &'static str = "volume";

    fn apply(value: &mut Volume, event: &TradeEvent) -> Result<(), ReduceError> {
        value.trades += 1;
        value.base += event.base_amount;
        value.quote += event.quote_amount;
        Ok(())
    }

    fn unapply(value: &mut Volume, event: &TradeEvent) -> Result<(), ReduceError> {
        value.trades -= 1;
        value.base -= event.base_amount;
        value.quote -= event.quote_amount;
        Ok(())
    }
}

fn trade(block: u64, log: u32, base_amount: u128, quote_amount: u128) -> TradeEvent {
    TradeEvent {
        pair: "WETH/USDC".into(),
        ord: EventOrd::new(block, log, 0),
        status: EventStatus::Confirmed,
        base_amount,
        quote_amount,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryStore::<VolumeReducer>::new());
    let service =
        IncrementalReduceService::new(store.clone(), store.clone(), ReduceConfig::default());

    service
        .reduce_batch(&EventBatch {
            events: vec![trade(50, 0, 2, 6_400), trade(50, 7, 1, 3_180), trade(51, 2, 3, 9_660)],
            head: 51,
        })
        .await?;

    let volume = store.load(&"WETH/USDC".to_string()).await?.unwrap().value;
    println!(
        "WETH/USDC: {} trades, {} WETH / {} USDC",
        volume.trades, volume.base, volume.quote
    );
    println!("as stored: {}", serde_json::to_string_pretty(&volume)?);

    Ok(())
}
