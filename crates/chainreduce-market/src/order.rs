//! Order fill and cancel reduction.
//!
//! The order book itself lives off chain; this entity folds the on-chain
//! facts about one order hash (how much was placed, how much has filled,
//! whether a cancel landed) and derives the status from the folded value.
//! Orders are never tombstoned, a fully filled or cancelled row is still
//! worth reading.

use serde::{Deserialize, Serialize};
use std::fmt;

use chainreduce_core::{EntityEvent, EventOrd, EventStatus, ReduceError, Reducer};

/// Order hash, as emitted by the exchange contract.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    /// Order observed on chain with its make amount.
    Placed,
    /// Partial or full fill of the make side.
    Fill,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub id: OrderId,
    pub ord: EventOrd,
    pub status: EventStatus,
    pub kind: OrderKind,
    /// Make amount for `Placed`, filled amount for `Fill`, unused for `Cancel`.
    pub amount: u128,
}

impl EntityEvent for OrderEvent {
    type Id = OrderId;

    fn entity_id(&self) -> OrderId {
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
            OrderKind::Placed => "PLACED",
            OrderKind::Fill => "FILL",
            OrderKind::Cancel => "CANCEL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Active,
    Filled,
    Cancelled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Active => "ACTIVE",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Total make amount observed for this order hash.
    pub make: u128,
    /// Amount filled so far.
    pub fill: u128,
    /// Number of cancel events observed. A count, not a flag, so a revert
    /// of one cancel leaves any others standing.
    pub cancels: u64,
}

impl Order {
    pub fn status(&self) -> OrderStatus {
        if self.cancels > 0 {
            OrderStatus::Cancelled
        } else if self.make > 0 && self.fill >= self.make {
            OrderStatus::Filled
        } else {
            OrderStatus::Active
        }
    }

    pub fn remaining(&self) -> u128 {
        self.make.saturating_sub(self.fill)
    }
}

pub struct OrderReducer;

impl Reducer for OrderReducer {
    type Id = OrderId;
    type Event = OrderEvent;
    type Value = Order;

    const ENTITY: &'static str = "order";

    fn apply(value: &mut Order, event: &OrderEvent) -> Result<(), ReduceError> {
        match event.kind {
            OrderKind::Placed => {
                value.make = value
                    .make
                    .checked_add(event.amount)
                    .ok_or_else(|| invariant(event, "make overflow"))?;
            }
            OrderKind::Fill => {
                value.fill = value
                    .fill
                    .checked_add(event.amount)
                    .ok_or_else(|| invariant(event, "fill overflow"))?;
            }
            OrderKind::Cancel => {
                value.cancels = value
                    .cancels
                    .checked_add(1)
                    .ok_or_else(|| invariant(event, "cancel overflow"))?;
            }
        }
        Ok(())
    }

    fn unapply(value: &mut Order, event: &OrderEvent) -> Result<(), ReduceError> {
        match event.kind {
            OrderKind::Placed => {
                value.make = value
                    .make
                    .checked_sub(event.amount)
                    .ok_or_else(|| invariant(event, "make underflow on revert"))?;
            }
            OrderKind::Fill => {
                value.fill = value
                    .fill
                    .checked_sub(event.amount)
                    .ok_or_else(|| invariant(event, "fill underflow on revert"))?;
            }
            OrderKind::Cancel => {
                value.cancels = value
                    .cancels
                    .checked_sub(1)
                    .ok_or_else(|| invariant(event, "cancel underflow on revert"))?;
            }
        }
        Ok(())
    }
}

fn invariant(event: &OrderEvent, reason: &str) -> ReduceError {
    ReduceError::Invariant {
        entity: OrderReducer::ENTITY,
        id: event.id.to_string(),
        reason: reason.into(),
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chainreduce_core::EntityState;

    fn id() -> OrderId {
        OrderId::new("0xabc123")
    }

    fn event(kind: OrderKind, block: u64, amount: u128) -> OrderEvent {
        OrderEvent {
            id: id(),
            ord: EventOrd::new(block, 0, 0),
            status: EventStatus::Confirmed,
            kind,
            amount,
        }
    }

    #[test]
    fn fills_accumulate_until_the_order_is_filled() {
        let mut state = EntityState::<OrderReducer>::template(id());
        state.reduce(&event(OrderKind::Placed, 1, 100)).unwrap();
        state.reduce(&event(OrderKind::Fill, 2, 40)).unwrap();

        assert_eq!(state.value.status(), OrderStatus::Active);
        assert_eq!(state.value.remaining(), 60);

        state.reduce(&event(OrderKind::Fill, 3, 60)).unwrap();
        assert_eq!(state.value.status(), OrderStatus::Filled);
        assert_eq!(state.value.remaining(), 0);
    }

    #[test]
    fn cancel_wins_over_fill() {
        let mut state = EntityState::<OrderReducer>::template(id());
        state.reduce(&event(OrderKind::Placed, 1, 100)).unwrap();
        state.reduce(&event(OrderKind::Fill, 2, 100)).unwrap();
        state.reduce(&event(OrderKind::Cancel, 3, 0)).unwrap();

        assert_eq!(state.value.status(), OrderStatus::Cancelled);
    }

    #[test]
    fn reverted_cancel_reactivates_the_order() {
        let mut state = EntityState::<OrderReducer>::template(id());
        state.reduce(&event(OrderKind::Placed, 1, 100)).unwrap();

        let cancel = event(OrderKind::Cancel, 2, 0);
        state.reduce(&cancel).unwrap();
        assert_eq!(state.value.status(), OrderStatus::Cancelled);

        let mut revert = cancel;
        revert.status = EventStatus::Reverted;
        state.reduce(&revert).unwrap();

        assert_eq!(state.value.status(), OrderStatus::Active);
    }

    #[test]
    fn a_filled_order_is_never_a_tombstone() {
        let mut state = EntityState::<OrderReducer>::template(id());
        state.reduce(&event(OrderKind::Placed, 1, 10)).unwrap();
        state.reduce(&event(OrderKind::Fill, 2, 10)).unwrap();

        assert!(!state.deleted);
    }

    #[test]
    fn unplaced_order_with_fills_stays_active_until_placed() {
        // Fills can land before the placement when logs arrive out of batch
        // order; folding is order independent so the end state matches.
        let mut state = EntityState::<OrderReducer>::template(id());
        state.reduce(&event(OrderKind::Fill, 2, 30)).unwrap();
        assert_eq!(state.value.status(), OrderStatus::Active);

        state.reduce(&event(OrderKind::Placed, 1, 30)).unwrap();
        assert_eq!(state.value.status(), OrderStatus::Filled);
    }
}
