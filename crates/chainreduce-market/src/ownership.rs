//! NFT ownership reduction, one entity per token + tokenId + owner.
//!
//! On-chain quantity and the lazy (not-yet-minted) running total are folded
//! separately; the ownership disappears when both reach zero.

use serde::{Deserialize, Serialize};
use std::fmt;

use chainreduce_core::{EntityEvent, EventOrd, EventStatus, ReduceError, Reducer};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OwnershipId {
    pub token: String,
    /// Token id as a decimal string; uint256 does not fit a machine word.
    pub token_id: String,
    pub owner: String,
}

impl OwnershipId {
    pub fn new(
        token: impl Into<String>,
        token_id: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            token_id: token_id.into(),
            owner: owner.into(),
        }
    }
}

impl fmt::Display for OwnershipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.token, self.token_id, self.owner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OwnershipKind {
    TransferIn,
    TransferOut,
    /// Off-chain mint credit acknowledged by the mint coordinator.
    LazyCredit,
    /// Lazy quantity consumed, usually by an on-chain mint of the same unit.
    LazyDebit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipEvent {
    pub id: OwnershipId,
    pub ord: EventOrd,
    pub status: EventStatus,
    pub kind: OwnershipKind,
    pub quantity: u128,
}

impl EntityEvent for OwnershipEvent {
    type Id = OwnershipId;

    fn entity_id(&self) -> OwnershipId {
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
            OwnershipKind::TransferIn => "TRANSFER_IN",
            OwnershipKind::TransferOut => "TRANSFER_OUT",
            OwnershipKind::LazyCredit => "LAZY_CREDIT",
            OwnershipKind::LazyDebit => "LAZY_DEBIT",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    /// Quantity held on chain.
    pub quantity: u128,
    /// Quantity promised by lazy mints, not yet on chain.
    pub lazy: u128,
}

impl Ownership {
    pub fn total(&self) -> u128 {
        self.quantity.saturating_add(self.lazy)
    }
}

pub struct OwnershipReducer;

impl Reducer for OwnershipReducer {
    type Id = OwnershipId;
    type Event = OwnershipEvent;
    type Value = Ownership;

    const ENTITY: &'static str = "ownership";

    fn apply(value: &mut Ownership, event: &OwnershipEvent) -> Result<(), ReduceError> {
        match event.kind {
            OwnershipKind::TransferIn => {
                value.quantity = value
                    .quantity
                    .checked_add(event.quantity)
                    .ok_or_else(|| invariant(event, "quantity overflow"))?;
            }
            OwnershipKind::TransferOut => {
                value.quantity = value
                    .quantity
                    .checked_sub(event.quantity)
                    .ok_or_else(|| invariant(event, "quantity underflow"))?;
            }
            OwnershipKind::LazyCredit => {
                value.lazy = value
                    .lazy
                    .checked_add(event.quantity)
                    .ok_or_else(|| invariant(event, "lazy overflow"))?;
            }
            OwnershipKind::LazyDebit => {
                value.lazy = value
                    .lazy
                    .checked_sub(event.quantity)
                    .ok_or_else(|| invariant(event, "lazy underflow"))?;
            }
        }
        Ok(())
    }

    fn unapply(value: &mut Ownership, event: &OwnershipEvent) -> Result<(), ReduceError> {
        match event.kind {
            OwnershipKind::TransferIn => {
                value.quantity = value
                    .quantity
                    .checked_sub(event.quantity)
                    .ok_or_else(|| invariant(event, "quantity underflow on revert"))?;
            }
            OwnershipKind::TransferOut => {
                value.quantity = value
                    .quantity
                    .checked_add(event.quantity)
                    .ok_or_else(|| invariant(event, "quantity overflow on revert"))?;
            }
            OwnershipKind::LazyCredit => {
                value.lazy = value
                    .lazy
                    .checked_sub(event.quantity)
                    .ok_or_else(|| invariant(event, "lazy underflow on revert"))?;
            }
            OwnershipKind::LazyDebit => {
                value.lazy = value
                    .lazy
                    .checked_add(event.quantity)
                    .ok_or_else(|| invariant(event, "lazy overflow on revert"))?;
            }
        }
        Ok(())
    }

    fn is_tombstone(value: &Ownership) -> bool {
        value.quantity == 0 && value.lazy == 0
    }
}

fn invariant(event: &OwnershipEvent, reason: &str) -> ReduceError {
    ReduceError::Invariant {
        entity: OwnershipReducer::ENTITY,
        id: event.id.to_string(),
        reason: reason.into(),
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chainreduce_core::EntityState;

    fn id() -> OwnershipId {
        OwnershipId::new("0xToken", "42", "0xOwner")
    }

    fn event(kind: OwnershipKind, block: u64, quantity: u128) -> OwnershipEvent {
        OwnershipEvent {
            id: id(),
            ord: EventOrd::new(block, 0, 0),
            status: EventStatus::Confirmed,
            kind,
            quantity,
        }
    }

    #[test]
    fn on_chain_and_lazy_totals_fold_separately() {
        let mut state = EntityState::<OwnershipReducer>::template(id());
        state.reduce(&event(OwnershipKind::LazyCredit, 1, 10)).unwrap();
        state.reduce(&event(OwnershipKind::TransferIn, 2, 3)).unwrap();
        state.reduce(&event(OwnershipKind::LazyDebit, 3, 3)).unwrap();

        assert_eq!(state.value.quantity, 3);
        assert_eq!(state.value.lazy, 7);
        assert_eq!(state.value.total(), 10);
    }

    #[test]
    fn empties_to_a_tombstone() {
        let mut state = EntityState::<OwnershipReducer>::template(id());
        state.reduce(&event(OwnershipKind::TransferIn, 1, 2)).unwrap();
        assert!(!state.deleted);

        state.reduce(&event(OwnershipKind::TransferOut, 2, 2)).unwrap();
        assert!(state.deleted);
        assert_eq!(state.value.total(), 0);
    }

    #[test]
    fn transferring_out_more_than_held_is_fatal() {
        let mut state = EntityState::<OwnershipReducer>::template(id());
        state.reduce(&event(OwnershipKind::TransferIn, 1, 1)).unwrap();

        let err = state
            .reduce(&event(OwnershipKind::TransferOut, 2, 5))
            .unwrap_err();
        assert!(err.is_fatal_for_entity());
        assert_eq!(state.value.quantity, 1);
    }

    #[test]
    fn reverted_transfer_restores_both_sides() {
        let mut state = EntityState::<OwnershipReducer>::template(id());
        let incoming = event(OwnershipKind::TransferIn, 1, 4);
        state.reduce(&incoming).unwrap();

        let mut revert = incoming;
        revert.status = EventStatus::Reverted;
        state.reduce(&revert).unwrap();

        assert_eq!(state.value.quantity, 0);
        assert!(state.deleted);
    }
}
