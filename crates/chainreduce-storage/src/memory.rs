//! In-memory storage backend.
//!
//! Keeps entity snapshots, the event log, and task cursors in RAM. Useful
//! for testing and short-lived reducers that don't need persistence.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chainreduce_core::{
    EntityEvent, EntityState, EntityStore, EventHistory, EventOrd, ReduceError, Reducer, TaskStore,
};

/// In-memory backend for a single entity domain.
///
/// All data is lost when the value is dropped. Saves enforce the same
/// optimistic-concurrency contract as the durable backends, so service
/// behavior is identical across them.
pub struct MemoryStore<R: Reducer> {
    entities: Mutex<HashMap<R::Id, EntityState<R>>>,
    // Keyed by event identity so re-appends replace instead of duplicating.
    events: Mutex<BTreeMap<(R::Id, EventOrd, String), R::Event>>,
    cursors: Mutex<HashMap<String, String>>,
}

impl<R: Reducer> MemoryStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted entities.
    pub fn entity_count(&self) -> usize {
        self.entities.lock().unwrap().len()
    }

    /// Number of event rows in the log, reverted rows included.
    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

impl<R: Reducer> Default for MemoryStore<R> {
    fn default() -> Self {
        Self {
            entities: Mutex::new(HashMap::new()),
            events: Mutex::new(BTreeMap::new()),
            cursors: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<R: Reducer> EntityStore<R> for MemoryStore<R> {
    async fn load(&self, id: &R::Id) -> Result<Option<EntityState<R>>, ReduceError> {
        Ok(self.entities.lock().unwrap().get(id).cloned())
    }

    async fn save(&self, state: &mut EntityState<R>) -> Result<(), ReduceError> {
        let mut rows = self.entities.lock().unwrap();
        let stored = rows.get(&state.id).map(|s| s.version).unwrap_or(0);
        if stored != state.version {
            return Err(ReduceError::Conflict {
                entity: R::ENTITY,
                id: state.id.to_string(),
            });
        }
        state.version += 1;
        rows.insert(state.id.clone(), state.clone());
        Ok(())
    }

    async fn delete(&self, id: &R::Id) -> Result<(), ReduceError> {
        self.entities.lock().unwrap().remove(id);
        Ok(())
    }
}

#[async_trait]
impl<R: Reducer> EventHistory<R> for MemoryStore<R> {
    async fn append(&self, events: &[R::Event]) -> Result<(), ReduceError> {
        let mut log = self.events.lock().unwrap();
        for event in events {
            let key = (event.entity_id(), event.ord(), event.kind().to_string());
            log.insert(key, event.clone());
        }
        Ok(())
    }

    async fn events_for(&self, id: &R::Id) -> Result<Vec<R::Event>, ReduceError> {
        // BTreeMap iteration is (id, ord, kind) ascending, so the filtered
        // rows come out already ordered.
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|((eid, _, _), e)| {
                eid == id && e.status() != chainreduce_core::EventStatus::Reverted
            })
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn ids_after(&self, after: Option<&R::Id>) -> Result<Vec<R::Id>, ReduceError> {
        let log = self.events.lock().unwrap();
        let mut ids: Vec<R::Id> = Vec::new();
        for (eid, _, _) in log.keys() {
            if let Some(a) = after {
                if eid <= a {
                    continue;
                }
            }
            if ids.last() != Some(eid) {
                ids.push(eid.clone());
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl<R: Reducer> TaskStore for MemoryStore<R> {
    async fn load_cursor(&self, task: &str) -> Result<Option<String>, ReduceError> {
        Ok(self.cursors.lock().unwrap().get(task).cloned())
    }

    async fn save_cursor(&self, task: &str, cursor: &str) -> Result<(), ReduceError> {
        self.cursors
            .lock()
            .unwrap()
            .insert(task.to_string(), cursor.to_string());
        Ok(())
    }

    async fn delete_cursor(&self, task: &str) -> Result<(), ReduceError> {
        self.cursors.lock().unwrap().remove(task);
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
