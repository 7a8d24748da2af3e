//! Item (token + tokenId) supply reduction.
//!
//! Mints and burns move the on-chain supply; lazy mints are tracked on their
//! own total until the chain catches up. An item with no supply at all is a
//! tombstone.

use serde::{Deserialize, Serialize};
use std::fmt;

use chainreduce_core::{EntityEvent, EventOrd, EventStatus, ReduceError, Reducer};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId {
    pub token: String,
    /// Token id as a decimal string; uint256 does not fit a machine word.
    pub token_id: String,
}

impl ItemId {
    pub fn new(token: impl Into<String>, token_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            token_id: token_id.into(),
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.token, self.token_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemKind {
    Mint,
    Burn,
    /// Supply promised off chain by the mint coordinator.
    LazyMint,
    /// Lazy supply consumed, usually by the matching on-chain mint.
    LazyBurn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemEvent {
    pub id: ItemId,
    pub ord: EventOrd,
    pub status: EventStatus,
    pub kind: ItemKind,
    pub supply: u128,
}

impl EntityEvent for ItemEvent {
    type Id = ItemId;

    fn entity_id(&self) -> ItemId {
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
            ItemKind::Mint => "MINT",
            ItemKind::Burn => "BURN",
            ItemKind::LazyMint => "LAZY_MINT",
            ItemKind::LazyBurn => "LAZY_BURN",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Supply minted on chain and not yet burned.
    pub supply: u128,
    /// Supply promised by lazy mints, not yet on chain.
    pub lazy_supply: u128,
}

impl Item {
    pub fn total_supply(&self) -> u128 {
        self.supply.saturating_add(self.lazy_supply)
    }
}

pub struct ItemReducer;

impl Reducer for ItemReducer {
    type Id = ItemId;
    type Event = ItemEvent;
    type Value = Item;

    const ENTITY: &'static str = "item";

    fn apply(value: &mut Item, event: &ItemEvent) -> Result<(), ReduceError> {
        match event.kind {
            ItemKind::Mint => {
                value.supply = value
                    .supply
                    .checked_add(event.supply)
                    .ok_or_else(|| invariant(event, "supply overflow"))?;
            }
            ItemKind::Burn => {
                value.supply = value
                    .supply
                    .checked_sub(event.supply)
                    .ok_or_else(|| invariant(event, "supply underflow"))?;
            }
            ItemKind::LazyMint => {
                value.lazy_supply = value
                    .lazy_supply
                    .checked_add(event.supply)
                    .ok_or_else(|| invariant(event, "lazy supply overflow"))?;
            }
            ItemKind::LazyBurn => {
                value.lazy_supply = value
                    .lazy_supply
                    .checked_sub(event.supply)
                    .ok_or_else(|| invariant(event, "lazy supply underflow"))?;
            }
        }
        Ok(())
    }

    fn unapply(value: &mut Item, event: &ItemEvent) -> Result<(), ReduceError> {
        match event.kind {
            ItemKind::Mint => {
                value.supply = value
                    .supply
                    .checked_sub(event.supply)
                    .ok_or_else(|| invariant(event, "supply underflow on revert"))?;
            }
            ItemKind::Burn => {
                value.supply = value
                    .supply
                    .checked_add(event.supply)
                    .ok_or_else(|| invariant(event, "supply overflow on revert"))?;
            }
            ItemKind::LazyMint => {
                value.lazy_supply = value
                    .lazy_supply
                    .checked_sub(event.supply)
                    .ok_or_else(|| invariant(event, "lazy supply underflow on revert"))?;
            }
            ItemKind::LazyBurn => {
                value.lazy_supply = value
                    .lazy_supply
                    .checked_add(event.supply)
                    .ok_or_else(|| invariant(event, "lazy supply overflow on revert"))?;
            }
        }
        Ok(())
    }

    fn is_tombstone(value: &Item) -> bool {
        value.supply == 0 && value.lazy_supply == 0
    }
}

fn invariant(event: &ItemEvent, reason: &str) -> ReduceError {
    ReduceError::Invariant {
        entity: ItemReducer::ENTITY,
        id: event.id.to_string(),
        reason: reason.into(),
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
