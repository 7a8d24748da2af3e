//! chainreduce-market — marketplace entity reducers.
//!
//! Four entities cover the marketplace read model: ERC-20 [`Balance`]s,
//! per-owner NFT [`Ownership`]s, per-token [`Item`] supply, and exchange
//! [`Order`]s. Each implements [`chainreduce_core::Reducer`] and plugs into
//! the generic reduce services unchanged.

pub mod balance;
pub mod item;
pub mod order;
pub mod ownership;

pub use balance::{Balance, BalanceEvent, BalanceId, BalanceKind, BalanceReducer};
pub use item::{Item, ItemEvent, ItemId, ItemKind, ItemReducer};
pub use order::{Order, OrderEvent, OrderId, OrderKind, OrderReducer, OrderStatus};
pub use ownership::{Ownership, OwnershipEvent, OwnershipId, OwnershipKind, OwnershipReducer};
