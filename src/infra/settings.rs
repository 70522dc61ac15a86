//! Usage: Persisted application settings (`settings.toml` schema + read/write helpers).

use crate::shared::error::AppResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_CALLBACK_BIND_ADDRESS: &str = "127.0.0.1:8090";
pub const DEFAULT_SCOPE: &str = "openid profile email";
const SETTINGS_FILE_NAME: &str = "settings.toml";
const DEFAULT_OAUTH_CALLBACK_TIMEOUT_SECS: u64 = 300;
const MAX_OAUTH_CALLBACK_TIMEOUT_SECS: u64 = 60 * 60;
const DEFAULT_HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
const MAX_HTTP_CONNECT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_HISTORY_LOAD_LIMIT: u32 = 15;
const MAX_HISTORY_LOAD_LIMIT: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub schema_version: u32,
    /// Listener address used when an environment has no redirect URI.
    pub callback_bind_address: String,
    /// 0 waits for the browser redirect indefinitely.
    pub oauth_callback_timeout_secs: u64,
    pub default_scope: String,
    pub http_connect_timeout_secs: u64,
    pub history_load_limit: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            callback_bind_address: DEFAULT_CALLBACK_BIND_ADDRESS.to_string(),
            oauth_callback_timeout_secs: DEFAULT_OAUTH_CALLBACK_TIMEOUT_SECS,
            default_scope: DEFAULT_SCOPE.to_string(),
            http_connect_timeout_secs: DEFAULT_HTTP_CONNECT_TIMEOUT_SECS,
            history_load_limit: DEFAULT_HISTORY_LOAD_LIMIT,
        }
    }
}

impl AppSettings {
    pub fn callback_timeout(&self) -> Option<Duration> {
        match self.oauth_callback_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn http_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.http_connect_timeout_secs)
    }

    fn normalized(mut self) -> Self {
        self.schema_version = SCHEMA_VERSION;

        let bind = self.callback_bind_address.trim();
        self.callback_bind_address = if bind.is_empty() {
            DEFAULT_CALLBACK_BIND_ADDRESS.to_string()
        } else {
            bind.to_string()
        };

        let scope = self.default_scope.trim();
        self.default_scope = if scope.is_empty() {
            DEFAULT_SCOPE.to_string()
        } else {
            scope.to_string()
        };

        self.oauth_callback_timeout_secs = self
            .oauth_callback_timeout_secs
            .min(MAX_OAUTH_CALLBACK_TIMEOUT_SECS);

        self.http_connect_timeout_secs = match self.http_connect_timeout_secs {
            0 => DEFAULT_HTTP_CONNECT_TIMEOUT_SECS,
            v => v.min(MAX_HTTP_CONNECT_TIMEOUT_SECS),
        };

        self.history_load_limit = match self.history_load_limit {
            0 => DEFAULT_HISTORY_LOAD_LIMIT,
            v => v.min(MAX_HISTORY_LOAD_LIMIT),
        };

        self
    }
}

pub fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SETTINGS_FILE_NAME)
}

pub fn read(data_dir: &Path) -> AppResult<AppSettings> {
    let path = settings_path(data_dir);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(AppSettings::default());
        }
        Err(err) => {
            return Err(format!(
                "IO_ERROR: failed to read settings {}: {err}",
                path.display()
            )
            .into())
        }
    };

    let parsed: AppSettings = toml::from_str(&raw).map_err(|e| {
        format!(
            "CONFIG_ERROR: invalid settings file {}: {e}",
            path.display()
        )
    })?;
    Ok(parsed.normalized())
}

pub fn write(data_dir: &Path, settings: AppSettings) -> AppResult<AppSettings> {
    let settings = settings.normalized();
    let encoded = toml::to_string_pretty(&settings)
        .map_err(|e| format!("CONFIG_ERROR: failed to encode settings: {e}"))?;

    let path = settings_path(data_dir);
    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, encoded)
        .map_err(|e| format!("IO_ERROR: failed to write {}: {e}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, &path)
        .map_err(|e| format!("IO_ERROR: failed to replace {}: {e}", path.display()))?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = read(dir.path()).expect("read");
        assert_eq!(settings, AppSettings::default());
        assert_eq!(settings.callback_timeout(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn write_then_read_keeps_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut settings = AppSettings::default();
        settings.callback_bind_address = "127.0.0.1:9911".to_string();
        settings.oauth_callback_timeout_secs = 0;
        write(dir.path(), settings).expect("write");

        let reread = read(dir.path()).expect("read");
        assert_eq!(reread.callback_bind_address, "127.0.0.1:9911");
        assert_eq!(reread.callback_timeout(), None);
    }

    #[test]
    fn partial_file_fills_defaults_and_clamps() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            settings_path(dir.path()),
            "default_scope = \"  \"\nhistory_load_limit = 999999\noauth_callback_timeout_secs = 86400\n",
        )
        .expect("write raw");

        let settings = read(dir.path()).expect("read");
        assert_eq!(settings.default_scope, DEFAULT_SCOPE);
        assert_eq!(settings.history_load_limit, MAX_HISTORY_LOAD_LIMIT);
        assert_eq!(
            settings.oauth_callback_timeout_secs,
            MAX_OAUTH_CALLBACK_TIMEOUT_SECS
        );
        assert_eq!(settings.callback_bind_address, DEFAULT_CALLBACK_BIND_ADDRESS);
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(settings_path(dir.path()), "history_load_limit = \"lots\"")
            .expect("write raw");
        let err = read(dir.path()).expect_err("invalid");
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
