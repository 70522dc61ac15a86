//! Usage: Resolve the app data directory (`COMMANDPOST_HOME` override, else platform data dir).

use crate::shared::error::AppResult;
use std::path::PathBuf;

pub(crate) const HOME_ENV_VAR: &str = "COMMANDPOST_HOME";
const APP_DIR_NAME: &str = "commandpost";

pub fn app_data_dir() -> AppResult<PathBuf> {
    let dir = resolve_app_data_dir(|key| std::env::var(key).ok(), dirs::data_dir())?;
    std::fs::create_dir_all(&dir).map_err(|e| {
        format!(
            "IO_ERROR: failed to create app data dir {}: {e}",
            dir.display()
        )
    })?;
    Ok(dir)
}

fn resolve_app_data_dir(
    mut get: impl FnMut(&str) -> Option<String>,
    platform_data_dir: Option<PathBuf>,
) -> AppResult<PathBuf> {
    if let Some(raw) = get(HOME_ENV_VAR) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    platform_data_dir
        .map(|dir| dir.join(APP_DIR_NAME))
        .ok_or_else(|| "CONFIG_ERROR: unable to resolve platform data directory".into())
}
