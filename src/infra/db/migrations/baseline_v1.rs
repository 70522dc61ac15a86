//! Usage: Baseline schema (version 1).
//!
//! Uses `IF NOT EXISTS` so databases created by older builds (same tables, no user_version)
//! are adopted in place; `ensure` then fills in whatever those builds lacked.

use crate::shared::error::AppResult;
use rusqlite::Connection;

pub(super) fn create_baseline_v1(conn: &mut Connection) -> AppResult<()> {
    let tx = conn
        .transaction()
        .map_err(|e| format!("failed to start sqlite transaction: {e}"))?;

    tx.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS collections (
  name TEXT PRIMARY KEY,
  requests TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS history (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  request TEXT,
  response TEXT,
  timestamp DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS environments (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  base_url TEXT,
  access_token TEXT,
  refresh_token TEXT,
  expires_at DATETIME,
  auth_url TEXT,
  token_url TEXT,
  client_id TEXT,
  client_secret TEXT,
  redirect_uri TEXT,
  scope TEXT,
  variables TEXT,
  oauth2_config TEXT,
  created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
  last_used DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )
    .map_err(|e| format!("failed to create baseline schema: {e}"))?;

    super::set_user_version(&tx, 1)?;

    tx.commit()
        .map_err(|e| format!("failed to commit sqlite transaction: {e}"))?;
    Ok(())
}
