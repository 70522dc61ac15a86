//! Usage: Single-writer actor owning the only sqlite connection.
//!
//! Contract:
//! - Exactly one actor task owns the `Connection`; every write and every read reaches it
//!   through one bounded FIFO channel, so storage work never overlaps.
//! - Commands run strictly in acceptance order; a command's completion signal is fulfilled
//!   before the next command starts.
//! - A full queue suspends the submitter (backpressure), it is not an error.
//! - `Db::close` is a close intent: everything accepted before it is drained, anything
//!   submitted afterwards fails with `DB_QUEUE_CLOSED`.
//! - A failing command never stops the actor. Failures of commands without a completion
//!   signal are logged and counted, not returned to anyone.

use crate::shared::error::{db_err, AppError, AppResult};
use rusqlite::{params_from_iter, Connection};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Owned positional bind value.
pub type BindValue = rusqlite::types::Value;

type Completion = oneshot::Sender<AppResult<usize>>;
type QueryJob = Box<dyn FnOnce(&Connection) + Send + 'static>;

const STATEMENT_LOG_PREVIEW_CHARS: usize = 80;

/// One mutation destined for the actor.
#[derive(Debug)]
pub struct WriteCommand {
    statement: String,
    params: Vec<BindValue>,
    completion: Option<Completion>,
}

impl WriteCommand {
    /// Fire-and-forget command: nobody observes its outcome.
    pub fn new(statement: impl Into<String>, params: Vec<BindValue>) -> Self {
        Self {
            statement: statement.into(),
            params,
            completion: None,
        }
    }

    /// Attach a completion signal; the receiver yields the affected row count or the error.
    pub fn with_completion(mut self) -> (Self, oneshot::Receiver<AppResult<usize>>) {
        let (tx, rx) = oneshot::channel();
        self.completion = Some(tx);
        (self, rx)
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }
}

enum DbCommand {
    Write(WriteCommand),
    Query(QueryJob),
    Close,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub writes_ok: u64,
    pub writes_failed: u64,
    /// Failures of fire-and-forget commands (no completion signal to deliver to).
    pub dropped_errors: u64,
    pub queries: u64,
}

/// Cloneable producer handle to the write actor.
#[derive(Clone)]
pub struct Db {
    tx: mpsc::Sender<DbCommand>,
    closing: Arc<AtomicBool>,
}

/// Owner handle of the actor task; join it after `Db::close` to wait for the drain.
pub struct DbWriterTask {
    handle: JoinHandle<WriterStats>,
}

impl DbWriterTask {
    pub async fn join(self) -> AppResult<WriterStats> {
        self.handle.await.map_err(|e| {
            if e.is_panic() {
                tracing::error!("db writer task panicked");
                AppError::new("TASK_JOIN", "db_writer: task panicked")
            } else {
                AppError::new("TASK_JOIN", "db_writer: task cancelled")
            }
        })
    }
}

pub(super) fn spawn(conn: Connection, capacity: usize) -> (Db, DbWriterTask) {
    let (tx, rx) = mpsc::channel::<DbCommand>(capacity.max(1));
    let handle = tokio::task::spawn_blocking(move || writer_loop(conn, rx));
    let db = Db {
        tx,
        closing: Arc::new(AtomicBool::new(false)),
    };
    (db, DbWriterTask { handle })
}

fn queue_closed() -> AppError {
    AppError::new("DB_QUEUE_CLOSED", "write queue is closed")
}

impl Db {
    /// Enqueue a command. Suspends while the queue is full.
    pub async fn submit(&self, command: WriteCommand) -> AppResult<()> {
        self.send(DbCommand::Write(command)).await
    }

    /// Enqueue a statement and wait for its outcome.
    pub async fn execute(
        &self,
        statement: impl Into<String>,
        params: Vec<BindValue>,
    ) -> AppResult<usize> {
        let (command, done) = WriteCommand::new(statement, params).with_completion();
        self.submit(command).await?;
        done.await.map_err(|_| {
            AppError::new(
                "DB_QUEUE_CLOSED",
                "write actor stopped before completing the command",
            )
        })?
    }

    /// Enqueue a statement without a completion signal; storage errors are only logged.
    pub async fn execute_detached(
        &self,
        statement: impl Into<String>,
        params: Vec<BindValue>,
    ) -> AppResult<()> {
        self.submit(WriteCommand::new(statement, params)).await
    }

    /// Run a read on the actor's connection, ordered with the writes around it.
    pub async fn read<T, F>(&self, label: &'static str, f: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> AppResult<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<AppResult<T>>();
        let job: QueryJob = Box::new(move |conn| {
            let _ = tx.send(f(conn));
        });
        self.send(DbCommand::Query(job)).await?;
        rx.await.map_err(|_| {
            AppError::new(
                "DB_QUEUE_CLOSED",
                format!("{label}: write actor dropped the query"),
            )
        })?
    }

    /// Signal close intent. Idempotent.
    pub async fn close(&self) -> AppResult<()> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // The actor may already be gone; nothing left to drain then.
        let _ = self.tx.send(DbCommand::Close).await;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::SeqCst) || self.tx.is_closed()
    }

    async fn send(&self, command: DbCommand) -> AppResult<()> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(queue_closed());
        }
        self.tx.send(command).await.map_err(|_| queue_closed())
    }
}

fn writer_loop(conn: Connection, mut rx: mpsc::Receiver<DbCommand>) -> WriterStats {
    let mut stats = WriterStats::default();
    tracing::debug!("db writer started");

    while let Some(command) = rx.blocking_recv() {
        match command {
            DbCommand::Write(command) => apply_write(&conn, command, &mut stats),
            DbCommand::Query(job) => {
                stats.queries += 1;
                if std::panic::catch_unwind(AssertUnwindSafe(|| job(&conn))).is_err() {
                    tracing::error!("db query job panicked; continuing");
                }
            }
            DbCommand::Close => {
                // Buffered commands are still delivered after `close`.
                rx.close();
                tracing::debug!("db writer close requested; draining queue");
            }
        }
    }

    tracing::info!(
        writes_ok = stats.writes_ok,
        writes_failed = stats.writes_failed,
        dropped_errors = stats.dropped_errors,
        queries = stats.queries,
        "db writer stopped"
    );
    stats
}

fn apply_write(conn: &Connection, command: WriteCommand, stats: &mut WriterStats) {
    let WriteCommand {
        statement,
        params,
        completion,
    } = command;

    let result = conn
        .prepare_cached(&statement)
        .and_then(|mut stmt| stmt.execute(params_from_iter(params.iter())))
        .map_err(|e| db_err!("write failed: {e}"));

    match &result {
        Ok(_) => stats.writes_ok += 1,
        Err(_) => stats.writes_failed += 1,
    }

    match (completion, result) {
        (Some(done), result) => {
            if done.send(result).is_err() {
                tracing::debug!(
                    statement = %statement_preview(&statement),
                    "write completion receiver dropped"
                );
            }
        }
        (None, Ok(_)) => {}
        (None, Err(err)) => {
            stats.dropped_errors += 1;
            tracing::warn!(
                statement = %statement_preview(&statement),
                error = %err,
                "fire-and-forget write failed; error has no receiver"
            );
        }
    }
}

fn statement_preview(statement: &str) -> String {
    let collapsed = statement.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(STATEMENT_LOG_PREVIEW_CHARS).collect()
}
