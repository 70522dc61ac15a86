//! Usage: Idempotent ensure patches applied after the versioned baseline.
//!
//! Safe to run on every start. They adopt databases written by builds that created the
//! environments table without the OAuth columns or without a unique name.

use crate::shared::error::AppResult;
use rusqlite::Connection;

const ENVIRONMENT_COLUMNS: &[(&str, &str)] = &[
    ("base_url", "TEXT"),
    ("access_token", "TEXT"),
    ("refresh_token", "TEXT"),
    ("expires_at", "DATETIME"),
    ("auth_url", "TEXT"),
    ("token_url", "TEXT"),
    ("client_id", "TEXT"),
    ("client_secret", "TEXT"),
    ("redirect_uri", "TEXT"),
    ("scope", "TEXT"),
    ("variables", "TEXT"),
    ("oauth2_config", "TEXT"),
];

pub(super) fn apply_ensure_patches(conn: &mut Connection) -> AppResult<()> {
    let tx = conn
        .transaction()
        .map_err(|e| format!("failed to start sqlite transaction: {e}"))?;

    ensure_environment_columns(&tx)?;
    ensure_environment_name_unique(&tx)?;
    ensure_history_index(&tx)?;

    tx.commit()
        .map_err(|e| format!("failed to commit sqlite transaction: {e}"))?;
    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> AppResult<Vec<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .map_err(|e| format!("failed to read {table} columns: {e}"))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>("name"))
        .map_err(|e| format!("failed to read {table} columns: {e}"))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| format!("failed to read {table} column: {e}"))?);
    }
    Ok(out)
}

fn ensure_environment_columns(conn: &Connection) -> AppResult<()> {
    let existing = table_columns(conn, "environments")?;
    for (column, ty) in ENVIRONMENT_COLUMNS {
        if existing.iter().any(|c| c.eq_ignore_ascii_case(column)) {
            continue;
        }
        conn.execute_batch(&format!(
            "ALTER TABLE environments ADD COLUMN {column} {ty};"
        ))
        .map_err(|e| format!("failed to add environments.{column}: {e}"))?;
        tracing::info!(column = *column, "sqlite ensure: added environments column");
    }
    Ok(())
}

fn ensure_environment_name_unique(conn: &Connection) -> AppResult<()> {
    // Older builds appended a new row on every save; keep the newest row per name.
    let removed = conn
        .execute(
            r#"
DELETE FROM environments
WHERE id NOT IN (SELECT MAX(id) FROM environments GROUP BY name)
"#,
            [],
        )
        .map_err(|e| format!("failed to dedupe environments: {e}"))?;
    if removed > 0 {
        tracing::warn!(removed, "sqlite ensure: removed duplicate environment rows");
    }

    conn.execute_batch(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_environments_name ON environments(name);",
    )
    .map_err(|e| format!("failed to ensure environments name index: {e}"))?;
    Ok(())
}

fn ensure_history_index(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_history_timestamp ON history(timestamp);",
    )
    .map_err(|e| format!("failed to ensure history index: {e}"))?;
    Ok(())
}
