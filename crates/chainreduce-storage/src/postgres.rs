//! PostgreSQL storage backend.
//!
//! Persists entity snapshots, the event log, and task cursors to a
//! PostgreSQL database. Uses `sqlx` with connection pooling for
//! high-throughput production deployments.
//!
//! # Feature Flag
//! Requires the `postgres` feature:
//! ```toml
//! chainreduce-storage = { version = "0.1", features = ["postgres"] }
//! ```
//!
//! # Schema
//! The store creates these tables automatically on first connect:
//! - `chainreduce_entities` — reduced snapshots with the concurrency version
//! - `chainreduce_events` — event log keyed by event identity
//! - `chainreduce_tasks` — background task cursors

use std::marker::PhantomData;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use chainreduce_core::{
    EntityEvent, EntityState, EntityStore, EventHistory, EventStatus, ReduceError, Reducer,
    TaskStore,
};

// ─── Connection options ──────────────────────────────────────────────────────

/// Connection options for the Postgres backend.
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: u32,
    /// Minimum number of idle connections to keep open (default: 1)
    pub min_connections: u32,
    /// Connection timeout in seconds (default: 30)
    pub connect_timeout_secs: u64,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
        }
    }
}

// ─── PostgresStore ───────────────────────────────────────────────────────────

/// PostgreSQL-backed store for one entity domain.
///
/// Thread-safe and cheaply cloneable — wraps a connection pool internally.
/// Tables are keyed by the reducer's entity name, so stores for several
/// domains can share one database through [`PostgresStore::with_pool`].
pub struct PostgresStore<R> {
    pool: PgPool,
    _domain: PhantomData<R>,
}

impl<R> Clone for PostgresStore<R> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _domain: PhantomData,
        }
    }
}

impl<R: Reducer> PostgresStore<R> {
    /// Connect to a PostgreSQL database and initialize the schema.
    ///
    /// The URL format follows libpq convention:
    /// `postgresql://[user[:password]@][host][:port][/dbname]`
    pub async fn connect(database_url: &str) -> Result<Self, ReduceError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| ReduceError::Store(format!("postgres connect: {e}")))?;

        let store = Self::with_pool(pool).await?;
        info!(entity = R::ENTITY, "PostgresStore connected and schema initialized");
        Ok(store)
    }

    /// Connect with custom pool options.
    pub async fn connect_with_options(
        database_url: &str,
        opts: PostgresOptions,
    ) -> Result<Self, ReduceError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(opts.max_connections)
            .min_connections(opts.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(opts.connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| ReduceError::Store(format!("postgres connect: {e}")))?;

        Self::with_pool(pool).await
    }

    /// Wrap an existing pool, e.g. to serve a second domain from the same
    /// database. Schema initialization is idempotent.
    pub async fn with_pool(pool: PgPool) -> Result<Self, ReduceError> {
        let store = Self {
            pool,
            _domain: PhantomData,
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// The underlying connection pool (for custom queries).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they don't already exist.
    async fn init_schema(&self) -> Result<(), ReduceError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chainreduce_entities (
                entity     TEXT        NOT NULL,
                entity_id  TEXT        NOT NULL,
                state      JSONB       NOT NULL,
                version    BIGINT      NOT NULL,
                deleted    BOOLEAN     NOT NULL DEFAULT FALSE,
                updated_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (entity, entity_id)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ReduceError::Store(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chainreduce_events (
                entity          TEXT    NOT NULL,
                entity_id       TEXT    NOT NULL,
                block_number    BIGINT  NOT NULL,
                log_index       INTEGER NOT NULL,
                minor_log_index INTEGER NOT NULL,
                kind            TEXT    NOT NULL,
                status          TEXT    NOT NULL,
                event_data      JSONB   NOT NULL,
                PRIMARY KEY (entity, entity_id, block_number, log_index, minor_log_index, kind)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ReduceError::Store(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chainreduce_events_block
             ON chainreduce_events(entity, block_number DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ReduceError::Store(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chainreduce_tasks (
                task   TEXT PRIMARY KEY,
                cursor TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ReduceError::Store(e.to_string()))?;

        debug!(entity = R::ENTITY, "PostgresStore schema initialized");
        Ok(())
    }

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
impl<R: Reducer> EntityStore<R> for PostgresStore<R> {
    async fn load(&self, id: &R::Id) -> Result<Option<EntityState<R>>, ReduceError> {
        let key = Self::id_key(id)?;
        let row = sqlx::query(
            "SELECT state, version FROM chainreduce_entities
             WHERE entity = $1 AND entity_id = $2",
        )
        .bind(R::ENTITY)
        .bind(&key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ReduceError::Store(e.to_string()))?;

        match row {
            None => Ok(None),
            Some(row) => {
                let state: serde_json::Value = row.get("state");
                let mut state: EntityState<R> =
                    serde_json::from_value(state).map_err(|e| ReduceError::Serde(e.to_string()))?;
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
            serde_json::to_value(&snapshot).map_err(|e| ReduceError::Serde(e.to_string()))?;
        let key = Self::id_key(&state.id)?;

        if state.is_new() {
            let inserted = sqlx::query(
                "INSERT INTO chainreduce_entities
                    (entity, entity_id, state, version, deleted, updated_at)
                 VALUES ($1, $2, $3, 1, $4, $5)",
            )
            .bind(R::ENTITY)
            .bind(&key)
            .bind(&json)
            .bind(snapshot.deleted)
            .bind(snapshot.updated_at)
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
                "UPDATE chainreduce_entities
                 SET state = $1, version = $2, deleted = $3, updated_at = $4
                 WHERE entity = $5 AND entity_id = $6 AND version = $7",
            )
            .bind(&json)
            .bind(snapshot.version as i64)
            .bind(snapshot.deleted)
            .bind(snapshot.updated_at)
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
        sqlx::query("DELETE FROM chainreduce_entities WHERE entity = $1 AND entity_id = $2")
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
impl<R: Reducer> EventHistory<R> for PostgresStore<R> {
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
                serde_json::to_value(event).map_err(|e| ReduceError::Serde(e.to_string()))?;
            let ord = event.ord();

            sqlx::query(
                "INSERT INTO chainreduce_events
                    (entity, entity_id, block_number, log_index, minor_log_index,
                     kind, status, event_data)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (entity, entity_id, block_number, log_index, minor_log_index, kind)
                 DO UPDATE SET status = EXCLUDED.status, event_data = EXCLUDED.event_data",
            )
            .bind(R::ENTITY)
            .bind(&key)
            .bind(ord.block_number as i64)
            .bind(ord.log_index as i32)
            .bind(ord.minor_log_index as i32)
            .bind(event.kind())
            .bind(status_str(event.status()))
            .bind(&json)
            .execute(&mut *tx)
            .await
            .map_err(|e| ReduceError::Store(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| ReduceError::Store(format!("commit batch: {e}")))?;

        debug!(entity = R::ENTITY, events = events.len(), "events appended");
        Ok(())
    }

    async fn events_for(&self, id: &R::Id) -> Result<Vec<R::Event>, ReduceError> {
        let key = Self::id_key(id)?;
        let rows = sqlx::query(
            "SELECT event_data FROM chainreduce_events
             WHERE entity = $1 AND entity_id = $2 AND status != 'REVERTED'
             ORDER BY block_number ASC, log_index ASC, minor_log_index ASC",
        )
        .bind(R::ENTITY)
        .bind(&key)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ReduceError::Store(e.to_string()))?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let json: serde_json::Value = row.get("event_data");
            events
                .push(serde_json::from_value(json).map_err(|e| ReduceError::Serde(e.to_string()))?);
        }
        Ok(events)
    }

    async fn ids_after(&self, after: Option<&R::Id>) -> Result<Vec<R::Id>, ReduceError> {
        let rows =
            sqlx::query("SELECT DISTINCT entity_id FROM chainreduce_events WHERE entity = $1")
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
        // Key text does not sort like the decoded ids, so order in memory.
        ids.sort();
        Ok(ids)
    }
}

// ─── TaskStore impl ──────────────────────────────────────────────────────────

#[async_trait]
impl<R: Reducer> TaskStore for PostgresStore<R> {
    async fn load_cursor(&self, task: &str) -> Result<Option<String>, ReduceError> {
        let row = sqlx::query("SELECT cursor FROM chainreduce_tasks WHERE task = $1")
            .bind(task)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ReduceError::Store(e.to_string()))?;

        Ok(row.map(|r| r.get::<String, _>("cursor")))
    }

    async fn save_cursor(&self, task: &str, cursor: &str) -> Result<(), ReduceError> {
        sqlx::query(
            "INSERT INTO chainreduce_tasks (task, cursor) VALUES ($1, $2)
             ON CONFLICT (task) DO UPDATE SET cursor = EXCLUDED.cursor",
        )
        .bind(task)
        .bind(cursor)
        .execute(&self.pool)
        .await
        .map_err(|e| ReduceError::Store(e.to_string()))?;
        Ok(())
    }

    async fn delete_cursor(&self, task: &str) -> Result<(), ReduceError> {
        sqlx::query("DELETE FROM chainreduce_tasks WHERE task = $1")
            .bind(task)
            .execute(&self.pool)
            .await
            .map_err(|e| ReduceError::Store(e.to_string()))?;
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
