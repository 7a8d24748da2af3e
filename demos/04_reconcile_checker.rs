//! Double-checking reduced balances against a ground-truth source.
//!
//! The checker buffers observations per block and verifies them once they
//! sink past the confirmation depth; drifted values are flagged, never
//! silently patched.
//!
//! Run with: cargo run --example 04_reconcile_checker

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use chainreduce_core::{
    CheckerConfig, FixedHead, GroundTruthSource, ReconcileChecker, ReduceError,
};
use chainreduce_market::{Balance, BalanceId, BalanceReducer};

/// Stand-in for an archive-node balance query.
struct NodeBalances {
    answers: HashMap<BalanceId, u128>,
}

#[async_trait]
impl GroundTruthSource<BalanceReducer> for NodeBalances {
    async fn actual_value(&self, id: &BalanceId) -> Result<Balance, ReduceError> {
        // Unknown accounts read as zero, like a real node query.
        let amount = self.answers.get(id).copied().unwrap_or(0);
        Ok(Balance { amount })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let alice = BalanceId::new("0xUSDC", "0xAlice");
    let bob = BalanceId::new("0xUSDC", "0xBob");

    let truth = Arc::new(NodeBalances {
        answers: HashMap::from([(alice.clone(), 1_000), (bob.clone(), 500)]),
    });
    let checker = Arc::new(ReconcileChecker::new(
        truth,
        FixedHead(120),
        CheckerConfig::default(),
    ));

    // Alice's reduced balance matches the node; Bob's drifted by 25.
    checker.offer(alice, Balance { amount: 1_000 }, 104, Utc::now()).await?;
    checker.offer(bob, Balance { amount: 525 }, 105, Utc::now()).await?;

    // Head 120 minus depth 12 releases everything up to block 108.
    let summary = checker.release().await?;
    println!(
        "released {} blocks: {} checked, {} invalid",
        summary.released_blocks, summary.checked, summary.invalid
    );
    println!("still buffered: {} blocks", checker.pending_blocks());

    Ok(())
}
