//! Durable per-thread checkpoint log and pending interrupts.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use chrono::{TimeZone, Utc};
use rusqlite::{OptionalExtension, Transaction};
use tokio_rusqlite::Connection;

use crate::chat::core::config::StorageConfig;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::{CheckpointId, ThreadId};
use crate::chat::core::interrupt::PendingInterrupt;
use crate::chat::storage::checkpoint::{Checkpoint, InterruptWrite, Namespace, NewCheckpoint, Node};

/// Boxed future type for checkpoint store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Single writer of truth for a thread's checkpoints.
pub trait CheckpointStore: Send + Sync {
    /// Append a checkpoint (and its interrupt change) atomically.
    ///
    /// # Errors
    /// Returns `Persistence` if nothing could be written.
    fn append_checkpoint(&self, checkpoint: NewCheckpoint) -> StoreFuture<'_, ChatResult<Checkpoint>>;

    /// Latest checkpoint of a namespace, or of any namespace when `None`.
    ///
    /// # Errors
    /// Returns `Persistence` if the store cannot be read.
    fn latest_checkpoint(
        &self,
        thread_id: ThreadId,
        namespace: Option<Namespace>,
    ) -> StoreFuture<'_, ChatResult<Option<Checkpoint>>>;

    /// Checkpoints newest first, optionally restricted to one namespace.
    ///
    /// # Errors
    /// Returns `Persistence` if the store cannot be read.
    fn list_checkpoints(
        &self,
        thread_id: ThreadId,
        namespace: Option<Namespace>,
    ) -> StoreFuture<'_, ChatResult<Vec<Checkpoint>>>;

    /// The thread's outstanding interrupt.
    ///
    /// # Errors
    /// Returns `Persistence` if the store cannot be read.
    fn pending_interrupt(
        &self,
        thread_id: ThreadId,
    ) -> StoreFuture<'_, ChatResult<Option<PendingInterrupt>>>;

    /// Remove every checkpoint, write and interrupt of the thread in one
    /// transaction. Deleting an unknown thread succeeds.
    ///
    /// # Errors
    /// Returns `Persistence` if the transaction fails (nothing is removed).
    fn delete_thread(&self, thread_id: ThreadId) -> StoreFuture<'_, ChatResult<()>>;
}

/// `SQLite` implementation of [`CheckpointStore`].
pub struct SqliteCheckpointStore {
    conn: Connection,
    tables: Tables,
}

#[derive(Clone)]
struct Tables {
    checkpoints: String,
    writes: String,
    interrupts: String,
}

type CheckpointRow = (String, String, String, i64, String, String, i64);

impl SqliteCheckpointStore {
    /// Open the checkpoint database.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn new(config: &StorageConfig) -> ChatResult<Self> {
        let conn = Connection::open(&config.checkpoint_path).await?;
        Self::with_connection(conn, config).await
    }

    /// Create the schema on an existing connection.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub async fn with_connection(conn: Connection, config: &StorageConfig) -> ChatResult<Self> {
        let tables = Tables {
            checkpoints: config.checkpoints_table.clone(),
            writes: config.writes_table.clone(),
            interrupts: config.interrupts_table.clone(),
        };
        let Tables {
            checkpoints,
            writes,
            interrupts,
        } = tables.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {checkpoints} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    checkpoint_id TEXT NOT NULL UNIQUE,
                    thread_id TEXT NOT NULL,
                    namespace TEXT NOT NULL,
                    seq INTEGER NOT NULL,
                    node TEXT NOT NULL,
                    state_json TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    UNIQUE(thread_id, namespace, seq)
                );
                CREATE TABLE IF NOT EXISTS {writes} (
                    checkpoint_id TEXT PRIMARY KEY,
                    thread_id TEXT NOT NULL,
                    write_json TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS {writes}_thread_idx ON {writes}(thread_id);
                CREATE TABLE IF NOT EXISTS {interrupts} (
                    thread_id TEXT PRIMARY KEY,
                    payload_json TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                );"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, tables })
    }
}

fn next_seq(tx: &Transaction<'_>, table: &str, thread: &str, namespace: &str) -> rusqlite::Result<i64> {
    tx.query_row(
        &format!("SELECT COALESCE(MAX(seq), 0) + 1 FROM {table} WHERE thread_id = ?1 AND namespace = ?2"),
        rusqlite::params![thread, namespace],
        |row| row.get(0),
    )
}

fn row_to_checkpoint(row: CheckpointRow) -> ChatResult<Checkpoint> {
    let (checkpoint_id, thread_id, namespace, seq, node, state_json, created_at_ms) = row;
    let id = CheckpointId::from_str(&checkpoint_id)
        .map_err(|err| ChatError::persistence(format!("invalid checkpoint id: {err}")))?;
    let thread_id = ThreadId::from_str(&thread_id)
        .map_err(|err| ChatError::persistence(format!("invalid thread id: {err}")))?;
    let namespace = Namespace::from_str(&namespace)
        .map_err(|err| ChatError::persistence(format!("invalid namespace: {err}")))?;
    let node = Node::from_str(&node)
        .map_err(|err| ChatError::persistence(format!("invalid node: {err}")))?;
    let created_at = Utc
        .timestamp_millis_opt(created_at_ms)
        .single()
        .ok_or_else(|| ChatError::persistence("invalid created_at timestamp"))?;
    Ok(Checkpoint {
        id,
        thread_id,
        namespace,
        seq,
        node,
        state: serde_json::from_str(&state_json)?,
        created_at,
    })
}

fn select_sql(table: &str, namespace: Option<Namespace>, limit: Option<i64>) -> String {
    let mut sql = format!(
        "SELECT checkpoint_id, thread_id, namespace, seq, node, state_json, created_at
         FROM {table} WHERE thread_id = ?1"
    );
    if namespace.is_some() {
        sql.push_str(" AND namespace = ?2");
    }
    sql.push_str(" ORDER BY id DESC");
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    sql
}

impl SqliteCheckpointStore {
    async fn query_checkpoints(
        &self,
        thread_id: ThreadId,
        namespace: Option<Namespace>,
        limit: Option<i64>,
    ) -> ChatResult<Vec<Checkpoint>> {
        let sql = select_sql(&self.tables.checkpoints, namespace, limit);
        let thread = thread_id.to_string();
        let rows: Vec<CheckpointRow> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<CheckpointRow> {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                };
                let rows = match namespace {
                    Some(ns) => stmt
                        .query_map(rusqlite::params![thread, ns.as_str()], map_row)?
                        .collect::<Result<Vec<_>, _>>()?,
                    None => stmt
                        .query_map(rusqlite::params![thread], map_row)?
                        .collect::<Result<Vec<_>, _>>()?,
                };
                Ok(rows)
            })
            .await
            .map_err(ChatError::persistence)?;

        rows.into_iter().map(row_to_checkpoint).collect()
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn append_checkpoint(&self, checkpoint: NewCheckpoint) -> StoreFuture<'_, ChatResult<Checkpoint>> {
        Box::pin(async move {
            let id = CheckpointId::new();
            let created_at = Utc::now();
            let state_json = serde_json::to_string(&checkpoint.state)?;
            let write_json = checkpoint
                .write
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let interrupt_json = match &checkpoint.interrupt {
                InterruptWrite::Set(pending) => Some(serde_json::to_string(pending)?),
                InterruptWrite::Keep | InterruptWrite::Clear => None,
            };
            let clear_interrupt = checkpoint.interrupt == InterruptWrite::Clear;

            let tables = self.tables.clone();
            let checkpoint_id = id.to_string();
            let thread = checkpoint.thread_id.to_string();
            let namespace = checkpoint.namespace.as_str();
            let node = checkpoint.node.as_str();
            let created_at_ms = created_at.timestamp_millis();

            let seq = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let seq = next_seq(&tx, &tables.checkpoints, &thread, namespace)?;
                    tx.execute(
                        &format!(
                            "INSERT INTO {} (checkpoint_id, thread_id, namespace, seq, node, state_json, created_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                            tables.checkpoints
                        ),
                        rusqlite::params![
                            checkpoint_id,
                            thread,
                            namespace,
                            seq,
                            node,
                            state_json,
                            created_at_ms
                        ],
                    )?;
                    if let Some(write_json) = write_json {
                        tx.execute(
                            &format!(
                                "INSERT INTO {} (checkpoint_id, thread_id, write_json) VALUES (?1, ?2, ?3)",
                                tables.writes
                            ),
                            rusqlite::params![checkpoint_id, thread, write_json],
                        )?;
                    }
                    if let Some(payload) = interrupt_json {
                        tx.execute(
                            &format!(
                                "INSERT OR REPLACE INTO {} (thread_id, payload_json, created_at)
                                 VALUES (?1, ?2, ?3)",
                                tables.interrupts
                            ),
                            rusqlite::params![thread, payload, created_at_ms],
                        )?;
                    } else if clear_interrupt {
                        tx.execute(
                            &format!("DELETE FROM {} WHERE thread_id = ?1", tables.interrupts),
                            [&thread],
                        )?;
                    }
                    tx.commit()?;
                    Ok(seq)
                })
                .await
                .map_err(ChatError::persistence)?;

            Ok(Checkpoint {
                id,
                thread_id: checkpoint.thread_id,
                namespace: checkpoint.namespace,
                seq,
                node: checkpoint.node,
                state: checkpoint.state,
                created_at,
            })
        })
    }

    fn latest_checkpoint(
        &self,
        thread_id: ThreadId,
        namespace: Option<Namespace>,
    ) -> StoreFuture<'_, ChatResult<Option<Checkpoint>>> {
        Box::pin(async move {
            let mut rows = self.query_checkpoints(thread_id, namespace, Some(1)).await?;
            Ok(rows.pop())
        })
    }

    fn list_checkpoints(
        &self,
        thread_id: ThreadId,
        namespace: Option<Namespace>,
    ) -> StoreFuture<'_, ChatResult<Vec<Checkpoint>>> {
        Box::pin(async move { self.query_checkpoints(thread_id, namespace, None).await })
    }

    fn pending_interrupt(
        &self,
        thread_id: ThreadId,
    ) -> StoreFuture<'_, ChatResult<Option<PendingInterrupt>>> {
        Box::pin(async move {
            let table = self.tables.interrupts.clone();
            let thread = thread_id.to_string();
            let payload: Option<String> = self
                .conn
                .call(move |conn| {
                    let payload = conn
                        .query_row(
                            &format!("SELECT payload_json FROM {table} WHERE thread_id = ?1"),
                            [&thread],
                            |row| row.get(0),
                        )
                        .optional()?;
                    Ok(payload)
                })
                .await
                .map_err(ChatError::persistence)?;

            payload
                .map(|json| serde_json::from_str(&json).map_err(ChatError::from))
                .transpose()
        })
    }

    fn delete_thread(&self, thread_id: ThreadId) -> StoreFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            let tables = self.tables.clone();
            let thread = thread_id.to_string();
            self.conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    tx.execute(
                        &format!("DELETE FROM {} WHERE thread_id = ?1", tables.writes),
                        [&thread],
                    )?;
                    tx.execute(
                        &format!("DELETE FROM {} WHERE thread_id = ?1", tables.checkpoints),
                        [&thread],
                    )?;
                    tx.execute(
                        &format!("DELETE FROM {} WHERE thread_id = ?1", tables.interrupts),
                        [&thread],
                    )?;
                    tx.commit()?;
                    Ok(())
                })
                .await
                .map_err(ChatError::persistence)?;
            Ok(())
        })
    }
}
