mod app;
mod commands;
mod domain;
mod infra;
pub mod oauth;
mod shared;
pub mod test_support;

pub(crate) use app::app_state;
pub(crate) use domain::{collections, environments, history, postman};
pub(crate) use infra::{app_paths, db, settings};
pub(crate) use shared::blocking;

pub use app::app_state::AppContext;
pub use app::logging::init as init_logging;
pub use commands::data_transfer::{export_collection, export_history, import_postman_collection};
pub use commands::history::load_recent_history;
pub use commands::oauth::{
    environment_oauth_login, environment_oauth_login_observed, environment_refresh_token,
};
pub use domain::collections::{delete_collection, load_collections, save_collection, Collection};
pub use domain::environments::{
    delete_environment, get_environment, get_environments, save_environment, Environment,
};
pub use domain::history::{
    clear_history, delete_history_item, load_history, save_history, HistoryRecord,
    DEFAULT_HISTORY_LIMIT,
};
pub use domain::postman::{flatten_requests, parse_collection, PostmanCollection};
pub use domain::request_data::{FormDataPart, RequestData, ResponseData};
pub use infra::app_paths::app_data_dir;
pub use infra::db::{BindValue, Db, DbRuntimeConfig, DbWriterTask, WriteCommand, WriterStats};
pub use infra::settings::AppSettings;
pub use shared::error::{AppError, AppResult};
