//! Usage: Request history (append-only log of request/response pairs).

use crate::db::{BindValue, Db};
use crate::domain::request_data::{RequestData, ResponseData};
use crate::shared::error::{db_err, AppResult};
use rusqlite::types::ValueRef;
use rusqlite::Row;
use serde::Serialize;

pub const DEFAULT_HISTORY_LIMIT: u32 = 15;

/// One stored history row; `request`/`response` hold the JSON as written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub request: String,
    pub response: String,
    pub timestamp: String,
}

impl HistoryRecord {
    pub fn decode_request(&self) -> AppResult<RequestData> {
        serde_json::from_str(&self.request).map_err(|e| {
            format!("SYSTEM_ERROR: history {} has invalid request json: {e}", self.id).into()
        })
    }

    pub fn decode_response(&self) -> AppResult<ResponseData> {
        serde_json::from_str(&self.response).map_err(|e| {
            format!("SYSTEM_ERROR: history {} has invalid response json: {e}", self.id).into()
        })
    }
}

/// Older writers stored the JSON payloads as BLOBs.
fn text_or_blob(row: &Row<'_>, idx: usize) -> rusqlite::Result<String> {
    match row.get_ref(idx)? {
        ValueRef::Null => Ok(String::new()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
        ValueRef::Integer(v) => Ok(v.to_string()),
        ValueRef::Real(v) => Ok(v.to_string()),
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<HistoryRecord> {
    Ok(HistoryRecord {
        id: row.get(0)?,
        request: text_or_blob(row, 1)?,
        response: text_or_blob(row, 2)?,
        timestamp: text_or_blob(row, 3)?,
    })
}

pub async fn save_history(db: &Db, request: &RequestData, response: &ResponseData) -> AppResult<()> {
    let request_json = serde_json::to_string(request)
        .map_err(|e| format!("SYSTEM_ERROR: failed to encode history request: {e}"))?;
    let response_json = serde_json::to_string(response)
        .map_err(|e| format!("SYSTEM_ERROR: failed to encode history response: {e}"))?;

    db.execute(
        "INSERT INTO history (request, response) VALUES (?1, ?2)",
        vec![BindValue::Text(request_json), BindValue::Text(response_json)],
    )
    .await?;
    Ok(())
}

/// Newest first. `limit == 0` falls back to the default page size.
pub async fn load_history(db: &Db, limit: u32) -> AppResult<Vec<HistoryRecord>> {
    let limit = if limit == 0 { DEFAULT_HISTORY_LIMIT } else { limit };
    db.read("history_load", move |conn| {
        let mut stmt = conn
            .prepare(
                "SELECT id, request, response, timestamp FROM history ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| db_err!("failed to prepare history query: {e}"))?;
        let rows = stmt
            .query_map([i64::from(limit)], row_to_record)
            .map_err(|e| db_err!("failed to query history: {e}"))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| db_err!("failed to read history row: {e}"))?);
        }
        Ok(out)
    })
    .await
}

/// Every row, oldest first.
pub(crate) async fn load_history_for_export(db: &Db) -> AppResult<Vec<HistoryRecord>> {
    db.read("history_export", |conn| {
        let mut stmt = conn
            .prepare("SELECT id, request, response, timestamp FROM history ORDER BY id ASC")
            .map_err(|e| db_err!("failed to prepare history export query: {e}"))?;
        let rows = stmt
            .query_map([], row_to_record)
            .map_err(|e| db_err!("failed to query history: {e}"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| db_err!("failed to read history row: {e}"))
    })
    .await
}

pub async fn delete_history_item(db: &Db, id: i64) -> AppResult<bool> {
    let changed = db
        .execute("DELETE FROM history WHERE id = ?1", vec![BindValue::Integer(id)])
        .await?;
    tracing::debug!(id, changed, "history item deleted");
    Ok(changed > 0)
}

pub async fn clear_history(db: &Db) -> AppResult<usize> {
    let changed = db.execute("DELETE FROM history", Vec::new()).await?;
    tracing::info!(changed, "history cleared");
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, DbRuntimeConfig};

    fn pair(i: i64) -> (RequestData, ResponseData) {
        (
            RequestData {
                method: "GET".to_string(),
                url: format!("/items/{i}"),
                timeout: 5000,
                ..Default::default()
            },
            ResponseData {
                status_code: 200,
                body: format!("{{\"id\":{i}}}"),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn load_is_newest_first_and_limited() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (db, task) =
            db::init(&db::db_path(dir.path()), &DbRuntimeConfig::default()).expect("init");

        for i in 0..20 {
            let (req, res) = pair(i);
            save_history(&db, &req, &res).await.expect("save");
        }

        let page = load_history(&db, 0).await.expect("load");
        assert_eq!(page.len(), DEFAULT_HISTORY_LIMIT as usize);
        assert_eq!(page[0].decode_request().expect("decode").url, "/items/19");
        assert_eq!(page[0].decode_response().expect("decode").status_code, 200);
        assert!(!page[0].timestamp.is_empty());

        let all = load_history_for_export(&db).await.expect("export rows");
        assert_eq!(all.len(), 20);
        assert!(all[0].id < all[19].id);

        db.close().await.expect("close");
        task.join().await.expect("join");
    }

    #[tokio::test]
    async fn delete_item_and_clear() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (db, task) =
            db::init(&db::db_path(dir.path()), &DbRuntimeConfig::default()).expect("init");

        for i in 0..3 {
            let (req, res) = pair(i);
            save_history(&db, &req, &res).await.expect("save");
        }
        let page = load_history(&db, 10).await.expect("load");
        assert!(delete_history_item(&db, page[0].id).await.expect("delete"));
        assert!(!delete_history_item(&db, page[0].id).await.expect("delete again"));
        assert_eq!(load_history(&db, 10).await.expect("load").len(), 2);

        assert_eq!(clear_history(&db).await.expect("clear"), 2);
        assert!(load_history(&db, 10).await.expect("load").is_empty());

        db.close().await.expect("close");
        task.join().await.expect("join");
    }

    #[tokio::test]
    async fn blob_payloads_are_read_as_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (db, task) =
            db::init(&db::db_path(dir.path()), &DbRuntimeConfig::default()).expect("init");

        db.execute(
            "INSERT INTO history (request, response) VALUES (?1, NULL)",
            vec![BindValue::Blob(br#"{"method":"PUT","url":"/b"}"#.to_vec())],
        )
        .await
        .expect("raw insert");

        let page = load_history(&db, 5).await.expect("load");
        assert_eq!(page[0].decode_request().expect("decode").method, "PUT");
        assert_eq!(page[0].response, "");

        db.close().await.expect("close");
        task.join().await.expect("join");
    }
}
