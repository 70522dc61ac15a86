//! Usage: SQLite connection setup, schema migrations, and the single-writer actor bootstrap.

mod migrations;
mod writer;

pub use writer::{BindValue, Db, DbWriterTask, WriteCommand, WriterStats};

use crate::shared::error::{db_err, AppResult};
use rusqlite::Connection;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DB_FILE_NAME: &str = "commandpost.db";
const BUSY_TIMEOUT_DEFAULT: Duration = Duration::from_millis(5000);
pub(crate) const QUEUE_CAPACITY_DEFAULT: usize = 100;
const QUEUE_CAPACITY_MAX: usize = 10_000;
const PRAGMA_SYNCHRONOUS_DEFAULT: &str = "NORMAL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbRuntimeConfig {
    pub busy_timeout: Duration,
    pub queue_capacity: usize,
    pub pragma_synchronous: String,
}

impl Default for DbRuntimeConfig {
    fn default() -> Self {
        Self::from_env_get(|_| None)
    }
}

impl DbRuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_env_get(|key| env::var(key).ok())
    }

    fn from_env_get(mut get: impl FnMut(&str) -> Option<String>) -> Self {
        let busy_timeout = get("COMMANDPOST_DB_BUSY_TIMEOUT_MS")
            .as_deref()
            .and_then(parse_u64_trimmed)
            .filter(|v| *v > 0)
            .map(Duration::from_millis)
            .unwrap_or(BUSY_TIMEOUT_DEFAULT);

        let queue_capacity = get("COMMANDPOST_DB_QUEUE_CAPACITY")
            .as_deref()
            .and_then(parse_u64_trimmed)
            .filter(|v| *v > 0)
            .map(|v| (v as usize).min(QUEUE_CAPACITY_MAX))
            .unwrap_or(QUEUE_CAPACITY_DEFAULT);

        let pragma_synchronous = get("COMMANDPOST_DB_PRAGMA_SYNCHRONOUS")
            .as_deref()
            .and_then(parse_pragma_synchronous)
            .unwrap_or_else(|| PRAGMA_SYNCHRONOUS_DEFAULT.to_string());

        Self {
            busy_timeout,
            queue_capacity,
            pragma_synchronous,
        }
    }
}

fn parse_u64_trimmed(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<u64>().ok()
}

fn parse_pragma_synchronous(raw: &str) -> Option<String> {
    let normalized = raw.trim().to_ascii_uppercase();
    match normalized.as_str() {
        "OFF" | "NORMAL" | "FULL" | "EXTRA" => Some(normalized),
        _ => None,
    }
}

pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DB_FILE_NAME)
}

/// Open, configure and migrate the database file, then hand the connection to the write actor.
///
/// Must be called from within a tokio runtime.
pub fn init(path: &Path, config: &DbRuntimeConfig) -> AppResult<(Db, DbWriterTask)> {
    let path_hint = path.to_string_lossy();
    tracing::info!(
        path = %path_hint,
        busy_timeout_ms = config.busy_timeout.as_millis(),
        queue_capacity = config.queue_capacity,
        pragma_synchronous = %config.pragma_synchronous,
        "sqlite runtime config"
    );

    let mut conn = Connection::open(path)
        .map_err(|e| db_err!("failed to open sqlite at {path_hint}: {e}"))?;
    conn.busy_timeout(config.busy_timeout)
        .map_err(|e| db_err!("failed to set busy_timeout: {e}"))?;
    configure_connection(&conn, config)
        .map_err(|e| db_err!("failed to configure sqlite connection: {e}"))?;

    migrations::apply_migrations(&mut conn)
        .map_err(|e| db_err!("sqlite migration failed at {path_hint}: {e}"))?;

    Ok(writer::spawn(conn, config.queue_capacity))
}

fn configure_connection(conn: &Connection, config: &DbRuntimeConfig) -> rusqlite::Result<()> {
    let sql = format!(
        r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA synchronous = {synchronous};
PRAGMA temp_store = MEMORY;
"#,
        synchronous = config.pragma_synchronous.as_str(),
    );
    conn.execute_batch(&sql)
}
