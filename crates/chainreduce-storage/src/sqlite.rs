//! SQLite storage backend.
//!
//! Persists entity snapshots, the event log, and task cursors to a single
//! SQLite file. Uses `sqlx` with WAL mode for concurrent read performance.
//!
//! # Usage
//! ```rust,no_run
//! use chainreduce_market::BalanceReducer;
//! use chainreduce_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::<BalanceReducer>::open("./market.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::<BalanceReducer>::in_memory().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Tables are keyed by the reducer's entity name, so stores for several
//! domains can share one database file through [`SqliteStore::with_pool`].

use std::marker::PhantomData;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chainreduce_core::{
    EntityEvent, EntityState, EntityStore, EventHistory, EventStatus, ReduceError, Reducer,
    TaskStore,
};

/// SQLite-backed store for one entity domain.
pub struct SqliteStore<R> {
    pool: SqlitePool,
    _domain: PhantomData<R>,
}

impl<R: Reducer> SqliteStore<R> {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./market.db"`) or a full
    /// SQLite URL (`"sqlite:./market.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, ReduceError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| ReduceError::Store(e.to_string()))?;

        Self::with_pool(pool).await
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the pool is dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, ReduceError> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .map_err(|e| ReduceError::Store(e.to_string()))?;

        Self::with_pool(pool).await
    }

    /// Wrap an existing pool, e.g. to serve a second domain from the same
    /// database file. Schema initialization is idempotent.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, ReduceError> {
        let store = Self {
            pool,
            _domain: PhantomData,
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// The underlying connection pool (for custom queries).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), ReduceError> {
        // WAL mode — better concurrent read throughput
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(|e| ReduceError::Store(e.to_string()))?;

        // Entity snapshots; the version column carries the concurrency check
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS reduce_entities (
                entity     TEXT    NOT NULL,
                entity_id  TEXT    NOT NULL,
                state_json TEXT    NOT NULL,
                version    INTEGER NOT NULL,
                deleted    INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT    NOT NULL,
                PRIMARY KEY (entity, entity_id)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ReduceError::Store(e.to_string()))?;

        // Event log, keyed by event identity so re-appends replace
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS reduce_events (
                entity          TEXT    NOT NULL,
                entity_id       TEXT    NOT NULL,
                block_number    INTEGER NOT NULL,
                log_index       INTEGER NOT NULL,
                minor_log_index INTEGER NOT NULL,
                kind            TEXT    NOT NULL,
                status          TEXT    NOT NULL,
                event_json      TEXT    NOT NULL,
                PRIMARY KEY (entity, entity_id, block_number, log_index, minor_log_index, kind)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ReduceError::Store(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_reduce_events_block
             ON reduce_events (entity, block_number);",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ReduceError::Store(e.to_string()))?;

        // Task cursors
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS reduce_tasks (
                task   TEXT PRIMARY KEY,
                cursor TEXT NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ReduceError::Store(e.to_string()))?;

        Ok(())
    }

    /// Canonical key text for an id. Decoded ids do not sort like this text,
    /// so readers order in memory.
    fn id_key(id: &R::Id) -> Result<String, ReduceError> {
        serde_json::to_string(id).map_err(|e| ReduceError::Serde(e.to_string()))
    }
}

fn status_str(status: EventStatus) -> &'static str {
    match status {
        EventStatus::Pending => "PENDING",
        EventStatus::Confirmed => "CONFIRMED",
        EventStatus::Reverted => "REVERTED",
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

// ─── EntityStore impl ────────────────────────────────────────────────────────

#[async_trait]
impl<R: Reducer> EntityStore<R> for SqliteStore<R> {
    async fn load(&self, id: &R::Id) -> Result<Option<EntityState<R>>, ReduceError> {
        let key = Self::id_key(id)?;
        let row = sqlx::query(
            "SELECT state_json, version FROM reduce_entities
             WHERE entity = ? AND entity_id = ?",
        )
        .bind(R::ENTITY)
        .bind(&key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ReduceError::Store(e.to_string()))?;

        match row {
            None => Ok(None),
            Some(row) => {
                let json: String = row.get("state_json");
                let mut state: EntityState<R> =
                    serde_json::from_str(&json).map_err(|e| ReduceError::Serde(e.to_string()))?;
                // The version column is authoritative.
                state.version = row.get::<i64, _>("version") as u64;
                Ok(Some(state))
            }
        }
    }

    async fn save(&self, state: &mut EntityState<R>) -> Result<(), ReduceError> {
        // Serialize the post-save truth; `state` is only mutated on success.
        let mut snapshot = state.clone();
        snapshot.version = state.version + 1;
        let json =
            serde_json::to_string(&snapshot).map_err(|e| ReduceError::Serde(e.to_string()))?;
        let key = Self::id_key(&state.id)?;

        if state.is_new() {
            let inserted = sqlx::query(
                "INSERT INTO reduce_entities
                    (entity, entity_id, state_json, version, deleted, updated_at)
                 VALUES (?, ?, ?, 1, ?, ?)",
            )
            .bind(R::ENTITY)
            .bind(&key)
            .bind(&json)
            .bind(snapshot.deleted)
            .bind(snapshot.updated_at.to_rfc3339())
            .execute(&self.pool)
            .await;

            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(ReduceError::Conflict {
                        entity: R::ENTITY,
                        id: state.id.to_string(),
                    });
                }
                Err(e) => return Err(ReduceError::Store(e.to_string())),
            }
        } else {
            let result = sqlx::query(
                "UPDATE reduce_entities
                 SET state_json = ?, version = ?, deleted = ?, updated_at = ?
                 WHERE entity = ? AND entity_id = ? AND version = ?",
            )
            .bind(&json)
            .bind(snapshot.version as i64)
            .bind(snapshot.deleted)
            .bind(snapshot.updated_at.to_rfc3339())
            .bind(R::ENTITY)
            .bind(&key)
            .bind(state.version as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| ReduceError::Store(e.to_string()))?;

            if result.rows_affected() == 0 {
                return Err(ReduceError::Conflict {
                    entity: R::ENTITY,
                    id: state.id.to_string(),
                });
            }
        }

        state.version = snapshot.version;
        debug!(entity = R::ENTITY, id = %state.id, version = state.version, "entity saved");
        Ok(())
    }

    async fn delete(&self, id: &R::Id) -> Result<(), ReduceError> {
        let key = Self::id_key(id)?;
        sqlx::query("DELETE FROM reduce_entities WHERE entity = ? AND entity_id = ?")
            .bind(R::ENTITY)
            .bind(&key)
            .execute(&self.pool)
            .await
            .map_err(|e| ReduceError::Store(e.to_string()))?;
        Ok(())
    }
}

// ─── EventHistory impl ───────────────────────────────────────────────────────

#[async_trait]
impl<R: Reducer> EventHistory<R> for SqliteStore<R> {
    async fn append(&self, events: &[R::Event]) -> Result<(), ReduceError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ReduceError::Store(e.to_string()))?;

        for event in events {
            let key = Self::id_key(&event.entity_id())?;
            let json =
                serde_json::to_string(event).map_err(|e| ReduceError::Serde(e.to_string()))?;
            let ord = event.ord();

            sqlx::query(
                "INSERT OR REPLACE INTO reduce_events
                    (entity, entity_id, block_number, log_index, minor_log_index,
                     kind, status, event_json)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(R::ENTITY)
            .bind(&key)
            .bind(ord.block_number as i64)
            .bind(ord.log_index as i64)
            .bind(ord.minor_log_index as i64)
            .bind(event.kind())
            .bind(status_str(event.status()))
            .bind(&json)
            .execute(&mut *tx)
            .await
            .map_err(|e| ReduceError::Store(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| ReduceError::Store(e.to_string()))?;

        debug!(entity = R::ENTITY, events = events.len(), "events appended");
        Ok(())
    }

    async fn events_for(&self, id: &R::Id) -> Result<Vec<R::Event>, ReduceError> {
        let key = Self::id_key(id)?;
        let rows = sqlx::query(
            "SELECT event_json FROM reduce_events
             WHERE entity = ? AND entity_id = ? AND status != 'REVERTED'
             ORDER BY block_number, log_index, minor_log_index",
        )
        .bind(R::ENTITY)
        .bind(&key)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ReduceError::Store(e.to_string()))?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let json: String = row.get("event_json");
            events
                .push(serde_json::from_str(&json).map_err(|e| ReduceError::Serde(e.to_string()))?);
        }
        Ok(events)
    }

    async fn ids_after(&self, after: Option<&R::Id>) -> Result<Vec<R::Id>, ReduceError> {
        let rows = sqlx::query("SELECT DISTINCT entity_id FROM reduce_events WHERE entity = ?")
            .bind(R::ENTITY)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ReduceError::Store(e.to_string()))?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.get("entity_id");
            let id: R::Id =
                serde_json::from_str(&raw).map_err(|e| ReduceError::Serde(e.to_string()))?;
            if after.map_or(true, |a| &id > a) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

// ─── TaskStore impl ──────────────────────────────────────────────────────────

#[async_trait]
impl<R: Reducer> TaskStore for SqliteStore<R> {
    async fn load_cursor(&self, task: &str) -> Result<Option<String>, ReduceError> {
        let row = sqlx::query("SELECT cursor FROM reduce_tasks WHERE task = ?")
            .bind(task)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ReduceError::Store(e.to_string()))?;

        Ok(row.map(|r| r.get::<String, _>("cursor")))
    }

    async fn save_cursor(&self, task: &str, cursor: &str) -> Result<(), ReduceError> {
        sqlx::query("INSERT OR REPLACE INTO reduce_tasks (task, cursor) VALUES (?, ?)")
            .bind(task)
            .bind(cursor)
            .execute(&self.pool)
            .await
            .map_err(|e| ReduceError::Store(e.to_string()))?;
        Ok(())
    }

    async fn delete_cursor(&self, task: &str) -> Result<(), ReduceError> {
        sqlx::query("DELETE FROM reduce_tasks WHERE task = ?")
            .bind(task)
            .execute(&self.pool)
            .await
            .map_err(|e| ReduceError::Store(e.to_string()))?;
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
