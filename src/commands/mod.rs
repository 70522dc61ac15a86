//! Usage: Application-level operations composing domain storage and the OAuth flow.

pub(crate) mod data_transfer;
pub(crate) mod history;
pub(crate) mod oauth;
