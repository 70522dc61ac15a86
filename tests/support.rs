#![allow(dead_code)]

use std::collections::HashMap;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use commandpost_lib::oauth::flow::{FlowObserver, FlowState};
use commandpost_lib::AppContext;
use tempfile::TempDir;
use tokio::sync::oneshot;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct EnvRestore {
    saved: Vec<(&'static str, Option<OsString>)>,
}

impl EnvRestore {
    fn save_once(&mut self, key: &'static str) {
        if self.saved.iter().any(|(k, _)| *k == key) {
            return;
        }
        self.saved.push((key, std::env::var_os(key)));
    }

    fn set_var(&mut self, key: &'static str, value: impl Into<OsString>) {
        self.save_once(key);
        std::env::set_var(key, value.into());
    }

    fn remove_var(&mut self, key: &'static str) {
        self.save_once(key);
        std::env::remove_var(key);
    }
}

impl Drop for EnvRestore {
    fn drop(&mut self) {
        for (key, value) in self.saved.drain(..).rev() {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }
}

/// Isolated `COMMANDPOST_HOME` for one test; holds the env lock for its lifetime.
pub struct TestApp {
    _lock: MutexGuard<'static, ()>,
    _env: EnvRestore,
    home: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        let lock = env_lock();
        let home = tempfile::tempdir().expect("tempdir");

        let mut env = EnvRestore::default();
        env.set_var("COMMANDPOST_HOME", home.path().as_os_str().to_os_string());
        env.remove_var("COMMANDPOST_DB_QUEUE_CAPACITY");
        env.remove_var("COMMANDPOST_DB_BUSY_TIMEOUT_MS");
        env.remove_var("COMMANDPOST_DB_PRAGMA_SYNCHRONOUS");

        Self {
            _lock: lock,
            _env: env,
            home,
        }
    }

    pub fn home_dir(&self) -> &std::path::Path {
        self.home.path()
    }

    /// Settings with an OS-assigned callback port and a short callback timeout.
    pub fn write_test_settings(&self) {
        let mut settings = commandpost_lib::AppSettings::default();
        settings.callback_bind_address = "127.0.0.1:0".to_string();
        settings.oauth_callback_timeout_secs = 10;
        commandpost_lib::test_support::write_settings(self.home_dir(), settings)
            .expect("write settings");
    }

    pub async fn start(&self) -> AppContext {
        AppContext::start(self.home_dir()).await.expect("start app context")
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct TokenEndpointState {
    status: StatusCode,
    body: String,
    requests: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

/// Local token endpoint answering every POST with a fixed status/body and recording forms.
pub struct MockTokenServer {
    pub url: String,
    requests: Arc<Mutex<Vec<HashMap<String, String>>>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockTokenServer {
    pub async fn start(status: u16, body: &str) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = TokenEndpointState {
            status: StatusCode::from_u16(status).expect("status"),
            body: body.to_string(),
            requests: requests.clone(),
        };
        let app = Router::new()
            .route("/token", post(token_endpoint))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind token server");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Self {
            url: format!("http://{addr}/token"),
            requests,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn requests(&self) -> Vec<HashMap<String, String>> {
        self.requests.lock().expect("lock").clone()
    }
}

impl Drop for MockTokenServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn token_endpoint(
    State(state): State<TokenEndpointState>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, String) {
    state.requests.lock().expect("lock").push(form);
    (state.status, state.body.clone())
}

pub fn query_param(url: &str, key: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// Browser stand-in: follows the redirect with the given code and the flow's own state.
pub fn redirecting_browser(
    code: &'static str,
    seen_urls: Arc<Mutex<Vec<String>>>,
) -> impl Fn(&str) + Send + Sync {
    move |url: &str| {
        seen_urls.lock().expect("lock").push(url.to_string());
        let redirect = query_param(url, "redirect_uri").expect("redirect_uri");
        let state = query_param(url, "state").expect("state");
        tokio::spawn(async move {
            let callback = format!("{redirect}?code={code}&state={state}");
            let _ = reqwest::get(callback).await;
        });
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    transitions: Mutex<Vec<(FlowState, FlowState)>>,
    releases: Mutex<usize>,
}

impl RecordingObserver {
    pub fn states(&self) -> Vec<FlowState> {
        self.transitions
            .lock()
            .expect("lock")
            .iter()
            .map(|(_, to)| *to)
            .collect()
    }

    pub fn releases(&self) -> usize {
        *self.releases.lock().expect("lock")
    }
}

impl FlowObserver for RecordingObserver {
    fn on_transition(&self, from: FlowState, to: FlowState) {
        self.transitions.lock().expect("lock").push((from, to));
    }

    fn on_listener_released(&self) {
        *self.releases.lock().expect("lock") += 1;
    }
}
