//! Revertable window compaction.
//!
//! An event stays revertable while `head - event.block_number <= depth`.
//! Compaction removes the oldest members once they fall outside that range,
//! folding nothing — their effect already lives in `value` — and advances the
//! `compacted_through` watermark so re-deliveries of compacted events are
//! recognized and ignored. Removal is always a prefix of the sorted list:
//! survivors keep their order and no gap is ever left. Under the age rule
//! all events of one block leave together; the length cap trims by count.

use tracing::debug;

use crate::entity::EntityState;
use crate::event::EntityEvent;
use crate::reduce::Reducer;

impl<R: Reducer> EntityState<R> {
    /// Compact events that can no longer be reverted.
    ///
    /// `head` is the authoritative chain head at the time the triggering
    /// batch was cut. `max_events` is a hard cap on the window length: when
    /// the list is longer even after the age rule, the oldest overflow is
    /// compacted regardless of block age. Returns the number of events
    /// dropped. The value is untouched; the watermark only ever advances.
    pub fn compact(&mut self, head: u64, depth: u64, max_events: usize) -> usize {
        let mut drop_n = self
            .revertable
            .partition_point(|e| head.saturating_sub(e.ord().block_number) > depth);

        if self.revertable.len() - drop_n > max_events {
            drop_n = self.revertable.len() - max_events;
        }
        if drop_n == 0 {
            return 0;
        }

        let mark = self.revertable[drop_n - 1].ord();
        self.compacted_through = Some(match self.compacted_through {
            Some(prev) => prev.max(mark),
            None => mark,
        });
        self.revertable.drain(..drop_n);

        debug!(
            entity = R::ENTITY,
            id = %self.id,
            head,
            depth,
            dropped = drop_n,
            retained = self.revertable.len(),
            watermark = %mark,
            "compacted revertable window"
        );
        drop_n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{confirmed, TallyReducer};

    fn folded(blocks: &[u64]) -> EntityState<TallyReducer> {
        let mut state = EntityState::template("acct-1".into());
        for &b in blocks {
            state.reduce(&confirmed("acct-1", b, 0, 1)).unwrap();
        }
        state
    }

    #[test]
    fn compaction_respects_depth_and_keeps_value() {
        let mut state = folded(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let before = state.value.clone();

        let dropped = state.compact(10, 3, usize::MAX);

        assert_eq!(dropped, 6);
        assert_eq!(state.value, before);
        let blocks: Vec<u64> = state.revertable.iter().map(|e| e.ord().block_number).collect();
        assert_eq!(blocks, vec![7, 8, 9, 10]);
        // No retained event is older than head - depth.
        assert!(blocks.iter().all(|b| 10 - b <= 3));
    }

    #[test]
    fn deep_history_scenario() {
        // depth 2, head 16: only blocks 14..=16 stay revertable.
        let mut state = folded(&[1, 2, 3, 14, 15, 16]);
        assert_eq!(state.value.total, 6);

        state.compact(16, 2, usize::MAX);

        let blocks: Vec<u64> = state.revertable.iter().map(|e| e.ord().block_number).collect();
        assert_eq!(blocks, vec![14, 15, 16]);
        assert_eq!(state.value.total, 6, "value equals the full fold");
        assert_eq!(state.compacted_through.unwrap().block_number, 3);
    }

    #[test]
    fn same_block_events_leave_together() {
        let mut state = EntityState::<TallyReducer>::template("acct-1".into());
        state.reduce(&confirmed("acct-1", 3, 0, 1)).unwrap();
        state.reduce(&confirmed("acct-1", 3, 1, 1)).unwrap();
        state.reduce(&confirmed("acct-1", 4, 0, 1)).unwrap();
        state.reduce(&confirmed("acct-1", 9, 0, 1)).unwrap();

        state.compact(10, 6, usize::MAX);

        let blocks: Vec<u64> = state.revertable.iter().map(|e| e.ord().block_number).collect();
        assert_eq!(blocks, vec![4, 9]);
    }

    #[test]
    fn cap_compacts_overflow_regardless_of_age() {
        let mut state = folded(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);

        // Everything is within depth, but the cap forces the oldest out.
        let dropped = state.compact(10, 100, 4);

        assert_eq!(dropped, 6);
        let blocks: Vec<u64> = state.revertable.iter().map(|e| e.ord().block_number).collect();
        assert_eq!(blocks, vec![7, 8, 9, 10]);
        assert_eq!(state.compacted_through.unwrap().block_number, 6);
        assert_eq!(state.value.total, 10);
    }

    #[test]
    fn watermark_never_regresses() {
        let mut state = folded(&[1, 2, 3, 14, 15, 16]);
        state.compact(16, 2, usize::MAX);
        let mark = state.compacted_through.unwrap();

        // A stale (smaller) head compacts nothing and leaves the mark alone.
        assert_eq!(state.compact(5, 2, usize::MAX), 0);
        assert_eq!(state.compacted_through.unwrap(), mark);
    }

    #[test]
    fn empty_window_is_a_noop() {
        let mut state = EntityState::<TallyReducer>::template("acct-1".into());
        assert_eq!(state.compact(100, 2, usize::MAX), 0);
        assert!(state.compacted_through.is_none());
    }
}
