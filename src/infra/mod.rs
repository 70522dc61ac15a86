//! Usage: Infrastructure (filesystem locations, persisted settings, sqlite).

pub(crate) mod app_paths;
pub(crate) mod db;
pub(crate) mod settings;
