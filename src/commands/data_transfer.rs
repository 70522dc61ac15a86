//! Usage: Collection / history import and export to local files.

use crate::blocking;
use crate::collections;
use crate::db::Db;
use crate::history;
use crate::postman::{self, PostmanCollection};
use crate::shared::error::{AppError, AppResult};
use std::io::Write;
use std::path::{Path, PathBuf};

fn io_err(action: &str, path: &Path, err: std::io::Error) -> AppError {
    AppError::with_source(
        "IO_ERROR",
        format!("failed to {action} {}: {err}", path.display()),
        err,
    )
}

/// Write a collection's stored requests JSON verbatim.
pub async fn export_collection(db: &Db, name: &str, path: &Path) -> AppResult<()> {
    let Some(requests) = collections::collection_requests_json(db, name).await? else {
        return Err(format!("SEC_INVALID_INPUT: collection not found: {}", name.trim()).into());
    };

    let path = path.to_path_buf();
    blocking::run("export_collection", move || {
        std::fs::write(&path, requests.as_bytes()).map_err(|e| io_err("write", &path, e))
    })
    .await?;
    tracing::info!(collection = %name.trim(), "collection exported");
    Ok(())
}

/// `request\nresponse\n` per row, oldest first.
pub async fn export_history(db: &Db, path: &Path) -> AppResult<usize> {
    let rows = history::load_history_for_export(db).await?;
    let count = rows.len();

    let path: PathBuf = path.to_path_buf();
    blocking::run("export_history", move || {
        let file = std::fs::File::create(&path).map_err(|e| io_err("create", &path, e))?;
        let mut out = std::io::BufWriter::new(file);
        for row in &rows {
            writeln!(out, "{}", row.request).map_err(|e| io_err("write", &path, e))?;
            writeln!(out, "{}", row.response).map_err(|e| io_err("write", &path, e))?;
        }
        out.flush().map_err(|e| io_err("write", &path, e))
    })
    .await?;
    tracing::info!(rows = count, "history exported");
    Ok(count)
}

/// Parse a Postman v2 file and store its flattened requests under `info.name`.
pub async fn import_postman_collection(db: &Db, path: &Path) -> AppResult<PostmanCollection> {
    let path = path.to_path_buf();
    let collection = blocking::run("import_postman_read", move || {
        let bytes = std::fs::read(&path).map_err(|e| io_err("read", &path, e))?;
        postman::parse_collection(&bytes)
    })
    .await?;

    postman::save_imported(db, &collection).await?;
    Ok(collection)
}
