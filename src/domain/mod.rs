//! Usage: Domain modules (stored collections, history, environments, imports).

pub(crate) mod collections;
pub(crate) mod environments;
pub(crate) mod history;
pub(crate) mod postman;
pub(crate) mod request_data;
