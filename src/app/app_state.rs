//! Usage: Explicitly owned application context (settings, write actor, HTTP client).
//!
//! Built once at process start and passed to whichever operation needs it; `shutdown` drains
//! the write actor before the process exits.

use crate::db::{self, Db, DbRuntimeConfig, DbWriterTask, WriterStats};
use crate::settings::{self, AppSettings};
use crate::shared::error::{AppError, AppResult};
use crate::{app_paths, blocking};
use std::path::{Path, PathBuf};

pub struct AppContext {
    data_dir: PathBuf,
    settings: AppSettings,
    db: Db,
    http: reqwest::Client,
    writer_task: DbWriterTask,
}

pub(crate) fn build_http_client(settings: &AppSettings) -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(format!("commandpost/{}", env!("CARGO_PKG_VERSION")))
        .connect_timeout(settings.http_connect_timeout())
        .build()
        .map_err(|e| AppError::new("CONFIG_ERROR", format!("http client init failed: {e}")))
}

impl AppContext {
    /// Resolve the data directory from the environment and start.
    pub async fn start_default() -> AppResult<Self> {
        let data_dir = app_paths::app_data_dir()?;
        Self::start(&data_dir).await
    }

    pub async fn start(data_dir: &Path) -> AppResult<Self> {
        let data_dir = data_dir.to_path_buf();
        let settings = settings::read(&data_dir)?;
        let http = build_http_client(&settings)?;

        let db_path = db::db_path(&data_dir);
        let db_config = DbRuntimeConfig::from_env();
        let (db, writer_task) =
            blocking::run("db_init", move || db::init(&db_path, &db_config)).await?;

        tracing::info!(data_dir = %data_dir.display(), "app context started");
        Ok(Self {
            data_dir,
            settings,
            db,
            http,
            writer_task,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Close the write queue and wait for everything already accepted to be applied.
    pub async fn shutdown(self) -> AppResult<WriterStats> {
        self.db.close().await?;
        let stats = self.writer_task.join().await?;
        tracing::info!(
            writes_ok = stats.writes_ok,
            dropped_errors = stats.dropped_errors,
            "app context stopped"
        );
        Ok(stats)
    }
}
