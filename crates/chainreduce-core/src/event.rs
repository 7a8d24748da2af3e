//! Event model — ordering keys, revocation status, and the event accessor trait.
//!
//! Every chain event carries an ordering key `(block_number, log_index,
//! minor_log_index)` that totally orders it against every other event. Two
//! events are *the same event* iff their ordering key and kind match —
//! identity, not payload equality, drives deduplication and revert matching.

use std::fmt;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ─── EventOrd ─────────────────────────────────────────────────────────────────

/// Canonical ordering key of a chain event.
///
/// `minor_log_index` disambiguates multiple logical events decoded from one
/// physical log.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EventOrd {
    pub block_number: u64,
    pub log_index: u32,
    pub minor_log_index: u32,
}

impl EventOrd {
    pub fn new(block_number: u64, log_index: u32, minor_log_index: u32) -> Self {
        Self {
            block_number,
            log_index,
            minor_log_index,
        }
    }
}

impl fmt::Display for EventOrd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.block_number, self.log_index, self.minor_log_index
        )
    }
}

// ─── EventStatus ──────────────────────────────────────────────────────────────

/// Revocation status of an event.
///
/// The upstream chain client re-delivers a previously CONFIRMED or PENDING
/// event as REVERTED (same ordering key, same kind) when a reorg drops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    /// Seen in the mempool or an unconfirmed block.
    Pending,
    /// Included in a canonical block.
    Confirmed,
    /// Retracted by a chain reorganization.
    Reverted,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Reverted => write!(f, "reverted"),
        }
    }
}

// ─── EntityEvent ──────────────────────────────────────────────────────────────

/// Accessor trait implemented by each domain's event envelope.
pub trait EntityEvent: Clone + Send + Sync {
    /// Key of the entity this event belongs to.
    type Id: Clone
        + Eq
        + Ord
        + Hash
        + fmt::Display
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    fn entity_id(&self) -> Self::Id;

    fn ord(&self) -> EventOrd;

    fn status(&self) -> EventStatus;

    /// Static label of the event kind, e.g. `"TRANSFER_IN"`.
    fn kind(&self) -> &'static str;

    /// Identity check: same ordering key and same kind.
    fn is_same(&self, other: &Self) -> bool {
        self.ord() == other.ord() && self.kind() == other.kind()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
