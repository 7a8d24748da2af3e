//! Shared fixtures for the in-crate tests: a minimal tally domain plus
//! instrumented doubles for the persistence and notification seams.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entity::EntityState;
use crate::error::ReduceError;
use crate::event::{EntityEvent, EventOrd, EventStatus};
use crate::listener::ReduceListener;
use crate::reduce::Reducer;
use crate::store::{EntityStore, EventHistory, TaskStore};

// ─── Tally domain ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TallyKind {
    Add,
    Sub,
    /// A kind the reducer does not understand; used to exercise the
    /// unknown-kind skip path.
    Opaque,
}

/// A signed adjustment to one account's running tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyEvent {
    pub account: String,
    pub ord: EventOrd,
    pub status: EventStatus,
    pub kind: TallyKind,
    pub amount: i64,
}

impl EntityEvent for TallyEvent {
    type Id = String;

    fn entity_id(&self) -> String {
        self.account.clone()
    }

    fn ord(&self) -> EventOrd {
        self.ord
    }

    fn status(&self) -> EventStatus {
        self.status
    }

    fn kind(&self) -> &'static str {
        match self.kind {
            TallyKind::Add => "ADD",
            TallyKind::Sub => "SUB",
            TallyKind::Opaque => "OPAQUE",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyValue {
    pub total: i64,
    pub entries: u64,
}

pub struct TallyReducer;

impl Reducer for TallyReducer {
    type Id = String;
    type Event = TallyEvent;
    type Value = TallyValue;

    const ENTITY: &'static str = "tally";

    fn apply(value: &mut TallyValue, event: &TallyEvent) -> Result<(), ReduceError> {
        match event.kind {
            TallyKind::Add => value.total += event.amount,
            TallyKind::Sub => value.total -= event.amount,
            TallyKind::Opaque => {
                return Err(ReduceError::UnknownKind {
                    entity: Self::ENTITY,
                    kind: "OPAQUE".into(),
                })
            }
        }
        value.entries += 1;
        Ok(())
    }

    fn unapply(value: &mut TallyValue, event: &TallyEvent) -> Result<(), ReduceError> {
        match event.kind {
            TallyKind::Add => value.total -= event.amount,
            TallyKind::Sub => value.total += event.amount,
            TallyKind::Opaque => {
                return Err(ReduceError::UnknownKind {
                    entity: Self::ENTITY,
                    kind: "OPAQUE".into(),
                })
            }
        }
        value.entries -= 1;
        Ok(())
    }

    fn is_tombstone(value: &TallyValue) -> bool {
        value.entries == 0
    }
}

pub fn confirmed(account: &str, block: u64, log: u32, amount: i64) -> TallyEvent {
    TallyEvent {
        account: account.into(),
        ord: EventOrd::new(block, log, 0),
        status: EventStatus::Confirmed,
        kind: TallyKind::Add,
        amount,
    }
}

pub fn pending(account: &str, block: u64, log: u32, amount: i64) -> TallyEvent {
    TallyEvent {
        status: EventStatus::Pending,
        ..confirmed(account, block, log, amount)
    }
}

pub fn opaque(account: &str, block: u64, log: u32) -> TallyEvent {
    TallyEvent {
        kind: TallyKind::Opaque,
        ..confirmed(account, block, log, 0)
    }
}

/// The revert delivery for a previously seen event: same identity, REVERTED.
pub fn reverted(event: &TallyEvent) -> TallyEvent {
    TallyEvent {
        status: EventStatus::Reverted,
        ..event.clone()
    }
}

// ─── Instrumented doubles ─────────────────────────────────────────────────────

/// Consume one unit of an injected-failure budget.
fn take(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
        .is_ok()
}

/// Entity store over a mutex-guarded map, with injectable save failures.
pub struct MapStore<R: Reducer> {
    rows: Mutex<HashMap<R::Id, EntityState<R>>>,
    saves: AtomicU32,
    deletes: AtomicU32,
    fail_budget: AtomicU32,
    conflict_budget: AtomicU32,
}

impl<R: Reducer> MapStore<R> {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            saves: AtomicU32::new(0),
            deletes: AtomicU32::new(0),
            fail_budget: AtomicU32::new(0),
            conflict_budget: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` saves with a transient store error.
    pub fn fail_next_saves(&self, n: u32) {
        self.fail_budget.store(n, Ordering::Relaxed);
    }

    /// Fail the next `n` saves with a version conflict.
    pub fn conflict_next_saves(&self, n: u32) {
        self.conflict_budget.store(n, Ordering::Relaxed);
    }

    pub fn get(&self, id: &R::Id) -> Option<EntityState<R>> {
        self.rows.lock().unwrap().get(id).cloned()
    }

    pub fn save_count(&self) -> u32 {
        self.saves.load(Ordering::Relaxed)
    }

    pub fn delete_count(&self) -> u32 {
        self.deletes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<R: Reducer> EntityStore<R> for MapStore<R> {
    async fn load(&self, id: &R::Id) -> Result<Option<EntityState<R>>, ReduceError> {
        Ok(self.rows.lock().unwrap().get(id).cloned())
    }

    async fn save(&self, state: &mut EntityState<R>) -> Result<(), ReduceError> {
        if take(&self.fail_budget) {
            return Err(ReduceError::Store("injected save failure".into()));
        }
        if take(&self.conflict_budget) {
            return Err(ReduceError::Conflict {
                entity: R::ENTITY,
                id: state.id.to_string(),
            });
        }
        let mut rows = self.rows.lock().unwrap();
        let stored = rows.get(&state.id).map(|s| s.version).unwrap_or(0);
        if stored != state.version {
            return Err(ReduceError::Conflict {
                entity: R::ENTITY,
                id: state.id.to_string(),
            });
        }
        state.version += 1;
        rows.insert(state.id.clone(), state.clone());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, id: &R::Id) -> Result<(), ReduceError> {
        self.rows.lock().unwrap().remove(id);
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Event history over a sorted in-memory log, keyed by event identity.
pub struct VecHistory<R: Reducer> {
    rows: Mutex<BTreeMap<(R::Id, EventOrd, String), R::Event>>,
}

impl<R: Reducer> VecHistory<R> {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn event_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl<R: Reducer> EventHistory<R> for VecHistory<R> {
    async fn append(&self, events: &[R::Event]) -> Result<(), ReduceError> {
        let mut rows = self.rows.lock().unwrap();
        for event in events {
            let key = (event.entity_id(), event.ord(), event.kind().to_string());
            rows.insert(key, event.clone());
        }
        Ok(())
    }

    async fn events_for(&self, id: &R::Id) -> Result<Vec<R::Event>, ReduceError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|((eid, _, _), e)| eid == id && e.status() != EventStatus::Reverted)
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn ids_after(&self, after: Option<&R::Id>) -> Result<Vec<R::Id>, ReduceError> {
        let ids: BTreeSet<R::Id> = self
            .rows
            .lock()
            .unwrap()
            .keys()
            .map(|(eid, _, _)| eid.clone())
            .filter(|eid| match after {
                Some(cursor) => eid > cursor,
                None => true,
            })
            .collect();
        Ok(ids.into_iter().collect())
    }
}

/// Task cursor store over a plain map.
#[derive(Default)]
pub struct MapTaskStore {
    cursors: Mutex<HashMap<String, String>>,
    saves: AtomicU32,
}

impl MapTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> u32 {
        self.saves.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TaskStore for MapTaskStore {
    async fn load_cursor(&self, task: &str) -> Result<Option<String>, ReduceError> {
        Ok(self.cursors.lock().unwrap().get(task).cloned())
    }

    async fn save_cursor(&self, task: &str, cursor: &str) -> Result<(), ReduceError> {
        self.cursors
            .lock()
            .unwrap()
            .insert(task.to_string(), cursor.to_string());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete_cursor(&self, task: &str) -> Result<(), ReduceError> {
        self.cursors.lock().unwrap().remove(task);
        Ok(())
    }
}

/// Listener that records every notified entity id.
pub struct CountListener {
    calls: AtomicU32,
    seen: Mutex<Vec<String>>,
}

impl CountListener {
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            seen: Mutex::new(vec![]),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl<R: Reducer> ReduceListener<R> for CountListener {
    async fn on_entity(&self, state: &EntityState<R>) -> Result<(), ReduceError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.seen.lock().unwrap().push(state.id.to_string());
        Ok(())
    }
}

/// Listener that always fails.
pub struct FailListener {
    calls: AtomicU32,
}

impl FailListener {
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<R: Reducer> ReduceListener<R> for FailListener {
    async fn on_entity(&self, _state: &EntityState<R>) -> Result<(), ReduceError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Err(ReduceError::Other("injected listener failure".into()))
    }
}
