//! Usage: OAuth2 authorization code + PKCE login.
//!
//! Components are independent: `flow` sequences them, `commands::oauth` merges the
//! result into a stored environment.

pub mod authorize_url;
pub mod browser;
pub mod callback_server;
pub mod flow;
pub mod pkce;
pub mod token_exchange;
