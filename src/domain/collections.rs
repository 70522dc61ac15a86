//! Usage: Request collections keyed by name (requests stored as a JSON array).

use crate::db::{BindValue, Db};
use crate::domain::request_data::RequestData;
use crate::shared::error::{db_err, AppResult};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    pub requests: Vec<RequestData>,
}

fn normalize_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("SEC_INVALID_INPUT: collection name is required".into());
    }
    Ok(name.to_string())
}

pub async fn save_collection(db: &Db, name: &str, requests: &[RequestData]) -> AppResult<()> {
    let name = normalize_name(name)?;
    let requests_json = serde_json::to_string(requests)
        .map_err(|e| format!("SYSTEM_ERROR: failed to encode collection requests: {e}"))?;

    db.execute(
        r#"
INSERT INTO collections (name, requests) VALUES (?1, ?2)
ON CONFLICT(name) DO UPDATE SET requests = excluded.requests
"#,
        vec![BindValue::Text(name), BindValue::Text(requests_json)],
    )
    .await?;
    Ok(())
}

pub async fn load_collections(db: &Db) -> AppResult<Vec<Collection>> {
    let rows = db
        .read("collections_load", |conn| {
            let mut stmt = conn
                .prepare("SELECT name, requests FROM collections ORDER BY name")
                .map_err(|e| db_err!("failed to prepare collections query: {e}"))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>("name")?,
                        row.get::<_, Option<String>>("requests")?,
                    ))
                })
                .map_err(|e| db_err!("failed to query collections: {e}"))?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|e| db_err!("failed to read collection row: {e}"))?);
            }
            Ok(out)
        })
        .await?;

    let mut collections = Vec::with_capacity(rows.len());
    for (name, raw) in rows {
        let raw = raw.unwrap_or_default();
        let requests = if raw.trim().is_empty() || raw.trim() == "null" {
            Vec::new()
        } else {
            match serde_json::from_str::<Vec<RequestData>>(&raw) {
                Ok(v) => v,
                Err(err) => {
                    tracing::warn!(collection = %name, "skipping collection with invalid requests json: {err}");
                    continue;
                }
            }
        };
        collections.push(Collection { name, requests });
    }
    Ok(collections)
}

/// Raw stored requests JSON, as written by `save_collection`.
pub async fn collection_requests_json(db: &Db, name: &str) -> AppResult<Option<String>> {
    let name = normalize_name(name)?;
    db.read("collection_requests_json", move |conn| {
        conn.query_row(
            "SELECT requests FROM collections WHERE name = ?1",
            params![name],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()
        .map(Option::flatten)
        .map_err(|e| db_err!("failed to query collection: {e}"))
    })
    .await
}

pub async fn delete_collection(db: &Db, name: &str) -> AppResult<bool> {
    let name = normalize_name(name)?;
    let changed = db
        .execute(
            "DELETE FROM collections WHERE name = ?1",
            vec![BindValue::Text(name)],
        )
        .await?;
    Ok(changed > 0)
}
