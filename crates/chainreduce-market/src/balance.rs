//! ERC-20 balance reduction, one entity per token + owner pair.

use serde::{Deserialize, Serialize};
use std::fmt;

use chainreduce_core::{EntityEvent, EventOrd, EventStatus, ReduceError, Reducer};

/// Key of one owner's balance in one token contract.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BalanceId {
    pub token: String,
    pub owner: String,
}

impl BalanceId {
    pub fn new(token: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            owner: owner.into(),
        }
    }
}

impl fmt::Display for BalanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.token, self.owner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BalanceKind {
    TransferIn,
    TransferOut,
}

/// A decoded transfer touching one side of a balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceEvent {
    pub id: BalanceId,
    pub ord: EventOrd,
    pub status: EventStatus,
    pub kind: BalanceKind,
    pub amount: u128,
    /// The other side of the transfer, when known.
    pub counterparty: Option<String>,
}

impl EntityEvent for BalanceEvent {
    type Id = BalanceId;

    fn entity_id(&self) -> BalanceId {
        self.id.clone()
    }

    fn ord(&self) -> EventOrd {
        self.ord
    }

    fn status(&self) -> EventStatus {
        self.status
    }

    fn kind(&self) -> &'static str {
        match self.kind {
            BalanceKind::TransferIn => "TRANSFER_IN",
            BalanceKind::TransferOut => "TRANSFER_OUT",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub amount: u128,
}

pub struct BalanceReducer;

impl Reducer for BalanceReducer {
    type Id = BalanceId;
    type Event = BalanceEvent;
    type Value = Balance;

    const ENTITY: &'static str = "balance";

    fn apply(value: &mut Balance, event: &BalanceEvent) -> Result<(), ReduceError> {
        value.amount = match event.kind {
            BalanceKind::TransferIn => value
                .amount
                .checked_add(event.amount)
                .ok_or_else(|| invariant(event, "balance overflow"))?,
            BalanceKind::TransferOut => value
                .amount
                .checked_sub(event.amount)
                .ok_or_else(|| invariant(event, "balance underflow"))?,
        };
        Ok(())
    }

    fn unapply(value: &mut Balance, event: &BalanceEvent) -> Result<(), ReduceError> {
        value.amount = match event.kind {
            BalanceKind::TransferIn => value
                .amount
                .checked_sub(event.amount)
                .ok_or_else(|| invariant(event, "balance underflow on revert"))?,
            BalanceKind::TransferOut => value
                .amount
                .checked_add(event.amount)
                .ok_or_else(|| invariant(event, "balance overflow on revert"))?,
        };
        Ok(())
    }
}

fn invariant(event: &BalanceEvent, reason: &str) -> ReduceError {
    ReduceError::Invariant {
        entity: BalanceReducer::ENTITY,
        id: event.id.to_string(),
        reason: reason.into(),
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
