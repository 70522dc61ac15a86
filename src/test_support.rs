//! Usage: Public test helpers for integration tests.

use crate::shared::error::AppResult;
use std::path::{Path, PathBuf};

pub fn db_path(data_dir: &Path) -> PathBuf {
    crate::infra::db::db_path(data_dir)
}

pub fn settings_path(data_dir: &Path) -> PathBuf {
    crate::infra::settings::settings_path(data_dir)
}

/// Open + migrate the database under `data_dir` and start its write actor.
pub fn init_db(
    data_dir: &Path,
    config: &crate::DbRuntimeConfig,
) -> AppResult<(crate::Db, crate::DbWriterTask)> {
    crate::infra::db::init(&db_path(data_dir), config)
}

pub fn write_settings(data_dir: &Path, settings: crate::AppSettings) -> AppResult<crate::AppSettings> {
    crate::infra::settings::write(data_dir, settings)
}
