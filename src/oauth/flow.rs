//! Usage: OAuth2 authorization code + PKCE flow coordinator.
//!
//! `Idle -> GeneratingPkce -> AwaitingAuthorization -> ExchangingCode -> Succeeded | Failed`
//!
//! - Each run is a fresh instance: new PKCE pair, new state, new listener.
//! - The wait for the redirect is a single selection over the code and error signals.
//! - The listener is released exactly once on every exit path, including when the
//!   caller drops the future.

use super::authorize_url::{self, AuthorizationRequest};
use super::browser::BrowserOpener;
use super::callback_server::{self, CallbackListener, ListenerShutdown, CALLBACK_PATH};
use super::pkce;
use super::token_exchange::{self, TokenExchangeRequest, TokenExchangeResult};
use crate::infra::settings::{DEFAULT_CALLBACK_BIND_ADDRESS, DEFAULT_SCOPE};
use crate::shared::error::{AppError, AppResult};
use crate::shared::security::{mask_token, random_hex_token};
use crate::shared::time::expiry_from_now;
use reqwest::Url;
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    GeneratingPkce,
    AwaitingAuthorization,
    ExchangingCode,
    Succeeded,
    Failed,
}

impl FlowState {
    pub fn as_str(self) -> &'static str {
        match self {
            FlowState::Idle => "idle",
            FlowState::GeneratingPkce => "generating_pkce",
            FlowState::AwaitingAuthorization => "awaiting_authorization",
            FlowState::ExchangingCode => "exchanging_code",
            FlowState::Succeeded => "succeeded",
            FlowState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, FlowState::Succeeded | FlowState::Failed)
    }
}

pub trait FlowObserver: Send + Sync {
    fn on_transition(&self, _from: FlowState, _to: FlowState) {}

    fn on_listener_released(&self) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl FlowObserver for NoopObserver {}

#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub client_id: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    /// Empty: the listener binds `fallback_bind_address` and its own URL becomes the redirect URI.
    pub redirect_uri: String,
    /// Empty: `openid profile email`.
    pub scope: String,
    pub extra_params: Vec<(String, String)>,
    pub fallback_bind_address: String,
    /// `None` waits for the browser indefinitely.
    pub callback_timeout: Option<Duration>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            authorization_endpoint: String::new(),
            token_endpoint: String::new(),
            redirect_uri: String::new(),
            scope: String::new(),
            extra_params: Vec::new(),
            fallback_bind_address: DEFAULT_CALLBACK_BIND_ADDRESS.to_string(),
            callback_timeout: None,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct FlowTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in_seconds: Option<i64>,
    /// RFC 3339, present only when the provider returned a positive `expires_in`.
    pub expires_at: Option<String>,
}

impl FlowTokens {
    pub(crate) fn from_exchange(result: TokenExchangeResult) -> Self {
        Self {
            expires_at: expiry_from_now(result.expires_in_seconds),
            access_token: result.access_token,
            refresh_token: result.refresh_token,
            expires_in_seconds: result.expires_in_seconds,
        }
    }
}

impl std::fmt::Debug for FlowTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowTokens")
            .field("access_token", &mask_token(&self.access_token))
            .field(
                "refresh_token",
                &self.refresh_token.as_deref().map(mask_token),
            )
            .field("expires_in_seconds", &self.expires_in_seconds)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

struct Machine<'a> {
    state: FlowState,
    observer: &'a dyn FlowObserver,
}

impl<'a> Machine<'a> {
    fn transition(&mut self, to: FlowState) {
        let from = self.state;
        tracing::debug!(from = from.as_str(), to = to.as_str(), "oauth flow transition");
        self.state = to;
        self.observer.on_transition(from, to);
    }

    fn fail<T>(&mut self, err: AppError) -> AppResult<T> {
        tracing::warn!(from = self.state.as_str(), code = err.code(), "oauth flow failed: {err}");
        self.transition(FlowState::Failed);
        Err(err)
    }
}

struct ListenerGuard<'a> {
    shutdown: Option<ListenerShutdown>,
    observer: &'a dyn FlowObserver,
}

impl ListenerGuard<'_> {
    async fn release(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.shutdown().await;
            self.observer.on_listener_released();
        }
    }
}

impl Drop for ListenerGuard<'_> {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            drop(shutdown);
            tracing::info!("oauth flow abandoned; callback listener released");
            self.observer.on_listener_released();
        }
    }
}

/// Address to bind for a configured redirect URI (its host and port).
pub(crate) fn listener_bind_address(redirect_uri: &str, fallback: &str) -> AppResult<String> {
    let redirect_uri = redirect_uri.trim();
    if redirect_uri.is_empty() {
        return Ok(match fallback.trim() {
            "" => DEFAULT_CALLBACK_BIND_ADDRESS.to_string(),
            v => v.to_string(),
        });
    }

    let url = Url::parse(redirect_uri)
        .map_err(|e| format!("SEC_INVALID_INPUT: invalid redirect uri: {e}"))?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| "SEC_INVALID_INPUT: redirect uri has no host".to_string())?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| "SEC_INVALID_INPUT: redirect uri has no port".to_string())?;
    if url.path() != CALLBACK_PATH {
        tracing::warn!(
            path = url.path(),
            "redirect uri path differs from the listener route {CALLBACK_PATH}"
        );
    }
    Ok(format!("{host}:{port}"))
}

/// Run one flow attempt to completion.
pub async fn run(
    client: &reqwest::Client,
    config: &FlowConfig,
    browser: &dyn BrowserOpener,
    observer: &dyn FlowObserver,
) -> AppResult<FlowTokens> {
    let mut machine = Machine {
        state: FlowState::Idle,
        observer,
    };

    machine.transition(FlowState::GeneratingPkce);
    let pkce = match pkce::generate() {
        Ok(v) => v,
        Err(err) => return machine.fail(err),
    };
    let state = match random_hex_token() {
        Ok(v) => v,
        Err(err) => return machine.fail(err),
    };
    let bind_address =
        match listener_bind_address(&config.redirect_uri, &config.fallback_bind_address) {
            Ok(v) => v,
            Err(err) => return machine.fail(err),
        };
    let listener = match callback_server::start(&bind_address, Some(state.clone())).await {
        Ok(v) => v,
        Err(err) => return machine.fail(err),
    };

    let CallbackListener {
        redirect_url,
        code_signal,
        error_signal,
        shutdown,
        ..
    } = listener;
    let guard = ListenerGuard {
        shutdown: Some(shutdown),
        observer,
    };

    let redirect_uri = match config.redirect_uri.trim() {
        "" => redirect_url,
        v => v.to_string(),
    };

    let outcome = authorize_and_exchange(
        &mut machine,
        client,
        config,
        browser,
        &pkce,
        &state,
        &redirect_uri,
        code_signal,
        error_signal,
    )
    .await;

    let outcome = match outcome {
        Ok(tokens) => {
            machine.transition(FlowState::Succeeded);
            tracing::info!(
                expires_at = tokens.expires_at.as_deref().unwrap_or(""),
                has_refresh_token = tokens.refresh_token.is_some(),
                "oauth flow succeeded"
            );
            Ok(tokens)
        }
        Err(err) => machine.fail(err),
    };
    guard.release().await;
    outcome
}

#[allow(clippy::too_many_arguments)]
async fn authorize_and_exchange(
    machine: &mut Machine<'_>,
    client: &reqwest::Client,
    config: &FlowConfig,
    browser: &dyn BrowserOpener,
    pkce: &pkce::PkcePair,
    state: &str,
    redirect_uri: &str,
    code_signal: oneshot::Receiver<String>,
    error_signal: oneshot::Receiver<AppError>,
) -> AppResult<FlowTokens> {
    let scope = match config.scope.trim() {
        "" => DEFAULT_SCOPE,
        v => v,
    };
    let auth_url = authorize_url::build(&AuthorizationRequest {
        authorization_endpoint: config.authorization_endpoint.clone(),
        client_id: config.client_id.clone(),
        redirect_uri: redirect_uri.to_string(),
        scope: scope.to_string(),
        state: state.to_string(),
        challenge: pkce.challenge.clone(),
        extra_params: config.extra_params.clone(),
    })?;

    machine.transition(FlowState::AwaitingAuthorization);
    tracing::info!(redirect_uri = %redirect_uri, "waiting for oauth authorization in browser");
    browser.open(&auth_url);

    let code = wait_for_code(code_signal, error_signal, config.callback_timeout).await?;

    machine.transition(FlowState::ExchangingCode);
    let result = token_exchange::exchange(
        client,
        &TokenExchangeRequest {
            token_endpoint: config.token_endpoint.clone(),
            client_id: config.client_id.clone(),
            redirect_uri: redirect_uri.to_string(),
            code,
            code_verifier: pkce.verifier.clone(),
        },
    )
    .await?;

    Ok(FlowTokens::from_exchange(result))
}

fn listener_closed() -> AppError {
    AppError::new(
        "OAUTH_LISTENER",
        "callback listener closed before a code arrived",
    )
}

async fn wait_for_code(
    mut code_signal: oneshot::Receiver<String>,
    mut error_signal: oneshot::Receiver<AppError>,
    timeout: Option<Duration>,
) -> AppResult<String> {
    let wait = async {
        tokio::select! {
            biased;
            code = &mut code_signal => code.map_err(|_| listener_closed()),
            err = &mut error_signal => Err(err.unwrap_or_else(|_| listener_closed())),
        }
    };

    match timeout {
        None => wait.await,
        Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
            AppError::new(
                "OAUTH_CALLBACK_TIMEOUT",
                format!(
                    "no authorization callback within {}s",
                    limit.as_secs_f64()
                ),
            )
        })?,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_address_follows_redirect_uri() {
        assert_eq!(
            listener_bind_address("http://localhost:8090/callback", "x").expect("addr"),
            "localhost:8090"
        );
        assert_eq!(
            listener_bind_address("http://127.0.0.1/callback", "x").expect("addr"),
            "127.0.0.1:80"
        );
        assert_eq!(
            listener_bind_address("http://[::1]:9000/callback", "x").expect("addr"),
            "[::1]:9000"
        );
        assert_eq!(
            listener_bind_address("  ", "127.0.0.1:0").expect("addr"),
            "127.0.0.1:0"
        );
        assert_eq!(
            listener_bind_address("", "").expect("addr"),
            DEFAULT_CALLBACK_BIND_ADDRESS
        );
        let err = listener_bind_address("not a uri", "").expect_err("invalid");
        assert_eq!(err.code(), "SEC_INVALID_INPUT");
    }

    #[tokio::test]
    async fn error_signal_wins_over_pending_code() {
        let (_code_tx, code_rx) = oneshot::channel::<String>();
        let (err_tx, err_rx) = oneshot::channel::<AppError>();
        err_tx
            .send(AppError::new("OAUTH_LISTENER", "boom"))
            .expect("send");

        let err = wait_for_code(code_rx, err_rx, None).await.expect_err("error");
        assert_eq!(err.code(), "OAUTH_LISTENER");
    }

    #[tokio::test]
    async fn dropped_signals_mean_listener_closed() {
        let (code_tx, code_rx) = oneshot::channel::<String>();
        let (err_tx, err_rx) = oneshot::channel::<AppError>();
        drop(code_tx);
        drop(err_tx);

        let err = wait_for_code(code_rx, err_rx, None).await.expect_err("closed");
        assert_eq!(err.code(), "OAUTH_LISTENER");
    }

    #[tokio::test]
    async fn wait_times_out() {
        let (_code_tx, code_rx) = oneshot::channel::<String>();
        let (_err_tx, err_rx) = oneshot::channel::<AppError>();

        let err = wait_for_code(code_rx, err_rx, Some(Duration::from_millis(30)))
            .await
            .expect_err("timeout");
        assert_eq!(err.code(), "OAUTH_CALLBACK_TIMEOUT");
    }

    #[test]
    fn tokens_without_expiry_have_no_timestamp() {
        let tokens = FlowTokens::from_exchange(TokenExchangeResult {
            access_token: "tok".to_string(),
            refresh_token: None,
            expires_in_seconds: Some(0),
        });
        assert_eq!(tokens.expires_at, None);
        assert!(!format!("{tokens:?}").contains("\"tok\""));
    }
}
