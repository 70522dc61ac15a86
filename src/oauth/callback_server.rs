//! Usage: Single-use localhost listener for the authorization redirect.
//!
//! Route contract (`GET /callback`):
//! - `?code=...` (and matching `state` when one is expected): 200 HTML, code delivered once.
//! - no code: 400 plain text, nothing delivered, the flow keeps waiting.
//! - any request after the first delivered code: 410.

use crate::shared::error::{AppError, AppResult};
use crate::shared::mutex_ext::MutexExt;
use crate::shared::security::constant_time_eq;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

pub const CALLBACK_PATH: &str = "/callback";
const EPHEMERAL_BIND_ADDRESS: &str = "127.0.0.1:0";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

const SUCCESS_HTML: &str = "<html><body><h1>Authorization complete</h1><p>You may close this window and return to CommandPost.</p></body></html>";

#[derive(Debug, Default, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

struct CallbackState {
    code_tx: Mutex<Option<oneshot::Sender<String>>>,
    expected_state: Option<String>,
}

/// A running listener. Dropping it (or its `shutdown` half) stops the server.
pub struct CallbackListener {
    /// `http://<bound addr>/callback`
    pub redirect_url: String,
    pub local_addr: SocketAddr,
    /// Fires at most once with the first accepted code.
    pub code_signal: oneshot::Receiver<String>,
    /// Fires if the server stops on its own.
    pub error_signal: oneshot::Receiver<AppError>,
    pub shutdown: ListenerShutdown,
}

/// Teardown half of a listener. Release happens exactly once: on `shutdown()` or on drop.
pub struct ListenerShutdown {
    local_addr: SocketAddr,
    shutdown_tx: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ListenerShutdown {
    /// Stop accepting, then wait (bounded) for the server tasks so the port is free on return.
    pub async fn shutdown(mut self) {
        self.release();
        for mut task in std::mem::take(&mut self.tasks) {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                tracing::warn!(addr = %self.local_addr, "oauth callback listener did not stop in time; aborting");
                task.abort();
            }
        }
    }

    pub fn is_released(&self) -> bool {
        self.shutdown_tx.is_none()
    }

    fn release(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
            tracing::debug!(addr = %self.local_addr, "oauth callback listener released");
        }
    }
}

impl Drop for ListenerShutdown {
    fn drop(&mut self) {
        self.release();
    }
}

fn bind_error(addr: &str, err: std::io::Error) -> AppError {
    AppError::with_source(
        "OAUTH_LISTENER_BIND",
        format!("failed to bind oauth callback listener on {addr}: {err}"),
        err,
    )
}

/// Port of a `localhost:<port>` address; such hosts get both loopback families.
fn loopback_hostname_port(bind_address: &str) -> Option<u16> {
    let (host, port) = bind_address.rsplit_once(':')?;
    if !host.eq_ignore_ascii_case("localhost") {
        return None;
    }
    port.parse().ok()
}

/// `127.0.0.1` first, `::1` on the same port as a best-effort second listener. Either family
/// alone is enough.
async fn bind_loopback_pair(port: u16) -> AppResult<Vec<TcpListener>> {
    let (primary, secondary_host) = match TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
        Ok(v4) => (v4, IpAddr::V6(Ipv6Addr::LOCALHOST)),
        Err(v4_err) => match TcpListener::bind((Ipv6Addr::LOCALHOST, port)).await {
            Ok(v6) => (v6, IpAddr::V4(Ipv4Addr::LOCALHOST)),
            Err(v6_err) => {
                return Err(AppError::new(
                    "OAUTH_LISTENER_BIND",
                    format!(
                        "failed to bind oauth callback listener on localhost:{port}: \
127.0.0.1 ({v4_err}); ::1 ({v6_err})"
                    ),
                ))
            }
        },
    };
    let port = primary
        .local_addr()
        .map_err(|e| bind_error(&format!("localhost:{port}"), e))?
        .port();

    let mut listeners = vec![primary];
    match TcpListener::bind((secondary_host, port)).await {
        Ok(listener) => listeners.push(listener),
        Err(err) => {
            tracing::debug!(host = %secondary_host, port, "second loopback family unavailable: {err}")
        }
    }
    Ok(listeners)
}

async fn bind_listeners(bind_address: &str) -> AppResult<Vec<TcpListener>> {
    if let Some(port) = loopback_hostname_port(bind_address) {
        return bind_loopback_pair(port).await;
    }
    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(|e| bind_error(bind_address, e))?;
    Ok(vec![listener])
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    // A dropped sender counts as a stop too.
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Bind and serve. An empty `bind_address` uses an OS-assigned loopback port.
///
/// Bind failure is returned here, synchronously, and is fatal for the attempt.
pub async fn start(bind_address: &str, expected_state: Option<String>) -> AppResult<CallbackListener> {
    let bind_address = match bind_address.trim() {
        "" => EPHEMERAL_BIND_ADDRESS,
        v => v,
    };

    let listeners = bind_listeners(bind_address).await?;
    let mut bound = Vec::with_capacity(listeners.len());
    for listener in listeners {
        let addr = listener.local_addr().map_err(|e| {
            AppError::new(
                "OAUTH_LISTENER_BIND",
                format!("failed to read callback listener address: {e}"),
            )
        })?;
        bound.push((listener, addr));
    }
    let Some(local_addr) = bound.first().map(|(_, addr)| *addr) else {
        return Err(AppError::new(
            "OAUTH_LISTENER_BIND",
            format!("no callback listener bound on {bind_address}"),
        ));
    };

    let (code_tx, code_rx) = oneshot::channel::<String>();
    let (error_tx, error_rx) = oneshot::channel::<AppError>();
    let error_tx = Arc::new(Mutex::new(Some(error_tx)));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = Arc::new(CallbackState {
        code_tx: Mutex::new(Some(code_tx)),
        expected_state: expected_state.filter(|s| !s.is_empty()),
    });
    let app = Router::new()
        .route(CALLBACK_PATH, get(handle_callback))
        .with_state(state);

    let tasks = bound
        .into_iter()
        .map(|(listener, addr)| {
            let app = app.clone();
            let shutdown_rx = shutdown_rx.clone();
            let error_tx = error_tx.clone();
            tokio::spawn(async move {
                let serve = axum::serve(listener, app).with_graceful_shutdown(stopped(shutdown_rx));
                if let Err(err) = serve.await {
                    tracing::error!(addr = %addr, "oauth callback listener failed: {err}");
                    if let Some(tx) = error_tx.lock_or_recover().take() {
                        let _ = tx.send(AppError::new(
                            "OAUTH_LISTENER",
                            format!("callback listener stopped: {err}"),
                        ));
                    }
                }
            })
        })
        .collect();

    let redirect_url = match loopback_hostname_port(bind_address) {
        Some(_) => format!("http://localhost:{}{CALLBACK_PATH}", local_addr.port()),
        None => format!("http://{local_addr}{CALLBACK_PATH}"),
    };
    tracing::info!(redirect_url = %redirect_url, "oauth callback listener started");

    Ok(CallbackListener {
        redirect_url,
        local_addr,
        code_signal: code_rx,
        error_signal: error_rx,
        shutdown: ListenerShutdown {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            tasks,
        },
    })
}

async fn handle_callback(
    State(state): State<Arc<CallbackState>>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let mut code_tx = state.code_tx.lock_or_recover();
    if code_tx.is_none() {
        return (StatusCode::GONE, "Authorization code already received").into_response();
    }

    let code = query
        .code
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let Some(code) = code else {
        if let Some(error) = query.error.as_deref() {
            tracing::warn!(
                error = %error,
                error_description = query.error_description.as_deref().unwrap_or(""),
                "oauth provider redirected with an error; still waiting for a code"
            );
            return (
                StatusCode::BAD_REQUEST,
                format!("Authorization failed: {error}"),
            )
                .into_response();
        }
        return (StatusCode::BAD_REQUEST, "No code received").into_response();
    };

    if let Some(expected) = state.expected_state.as_deref() {
        let matches = query
            .state
            .as_deref()
            .is_some_and(|got| constant_time_eq(got.as_bytes(), expected.as_bytes()));
        if !matches {
            tracing::warn!("oauth callback rejected: state missing or mismatched");
            return (StatusCode::BAD_REQUEST, "State mismatch").into_response();
        }
    }

    if let Some(tx) = code_tx.take() {
        if tx.send(code.to_string()).is_err() {
            tracing::debug!("oauth callback code arrived after the flow stopped waiting");
        }
    }
    Html(SUCCESS_HTML).into_response()
}
