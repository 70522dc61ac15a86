//! Usage: Process-level wiring (application context, logging).

pub(crate) mod app_state;
pub(crate) mod logging;
