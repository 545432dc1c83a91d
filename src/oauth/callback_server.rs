//! Usage: Short-lived localhost redirect listener for one authorization code flow.
//!
//! The server owns three channels shared with the flow coordinator:
//! - a one-shot code slot (the first accepted code wins),
//! - a bounded error channel (state mismatch, provider error, malformed callback),
//! - a one-shot result channel the handler waits on before rendering the final page.

use crate::oauth::authorize_url::CALLBACK_PATH;
use crate::oauth::pages;
use crate::shared::error::{AppError, AppResult};
use crate::shared::security::constant_time_eq;
use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const ERROR_CHANNEL_CAPACITY: usize = 4;

/// What the flow reports back to the browser tab once the code has been handled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthOutcome {
    pub identity: Option<String>,
    pub other_identities: Vec<String>,
}

impl AuthOutcome {
    pub(crate) fn empty() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct OAuthCallbackPayload {
    pub(crate) code: Option<String>,
    pub(crate) state: Option<String>,
    pub(crate) error: Option<String>,
    pub(crate) error_description: Option<String>,
}

/// Flow-side ends of the listener's channels.
pub(crate) struct CallbackChannels {
    pub(crate) code_rx: oneshot::Receiver<String>,
    pub(crate) error_rx: mpsc::Receiver<AppError>,
    pub(crate) result_tx: oneshot::Sender<AuthOutcome>,
}

struct CallbackState {
    expected_state: String,
    code_slot: Mutex<Option<oneshot::Sender<String>>>,
    result_slot: Mutex<Option<oneshot::Receiver<AuthOutcome>>>,
    error_tx: mpsc::Sender<AppError>,
    result_wait_timeout: Duration,
}

impl CallbackState {
    fn report(&self, err: AppError) {
        tracing::warn!(code = err.code(), "oauth callback rejected: {}", err.message());
        // Nobody listens once a code was accepted; extra reports are dropped.
        let _ = self.error_tx.try_send(err);
    }
}

#[derive(Debug)]
struct BoundOAuthCallbackListener {
    port: u16,
    listener_v4: Option<TcpListener>,
    listener_v6: Option<TcpListener>,
}

/// Running listener. Dropping it signals shutdown; `shutdown` also waits for the tasks.
pub(crate) struct CallbackServer {
    port: u16,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl CallbackServer {
    /// Bind `localhost:<port>` (0 picks an ephemeral port) and start serving.
    pub(crate) async fn start(
        port: u16,
        expected_state: String,
        result_wait_timeout: Duration,
    ) -> AppResult<(Self, CallbackChannels)> {
        let bound = bind_callback_listener(port).await?;
        let port = bound.port;

        let (code_tx, code_rx) = oneshot::channel();
        let (error_tx, error_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        let (result_tx, result_rx) = oneshot::channel();

        let state = Arc::new(CallbackState {
            expected_state,
            code_slot: Mutex::new(Some(code_tx)),
            result_slot: Mutex::new(Some(result_rx)),
            error_tx,
            result_wait_timeout,
        });
        let router = Router::new()
            .route(CALLBACK_PATH, get(handle_callback))
            .with_state(state);

        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();
        for listener in [bound.listener_v4, bound.listener_v6].into_iter().flatten() {
            let router = router.clone();
            let shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
                    shutdown.cancelled().await;
                });
                if let Err(err) = serve.await {
                    tracing::error!(port, "oauth callback server error: {}", err);
                }
            }));
        }

        tracing::debug!(port, listeners = tasks.len(), "oauth callback listener started");
        Ok((
            Self {
                port,
                shutdown,
                tasks,
            },
            CallbackChannels {
                code_rx,
                error_rx,
                result_tx,
            },
        ))
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    /// Stop accepting, let in-flight responses finish for at most `grace`, then abort.
    pub(crate) async fn shutdown(mut self, grace: Duration) {
        self.shutdown.cancel();
        let deadline = tokio::time::Instant::now() + grace;
        for mut task in std::mem::take(&mut self.tasks) {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                tracing::warn!(port = self.port, "oauth callback server did not stop in time; aborting");
                task.abort();
            }
        }
        tracing::debug!(port = self.port, "oauth callback listener stopped");
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn handle_callback(
    State(state): State<Arc<CallbackState>>,
    RawQuery(query): RawQuery,
) -> (StatusCode, Html<String>) {
    let payload = parse_callback_query(query.as_deref());

    if !state_matches(&payload, &state.expected_state) {
        state.report(AppError::new(
            "AUTH_STATE_MISMATCH",
            "callback state did not match this sign-in attempt",
        ));
        return (
            StatusCode::BAD_REQUEST,
            Html(pages::render_error(
                "Sign-in request not recognized",
                "This response does not belong to the sign-in that is in progress.",
            )),
        );
    }

    if let Some(error) = payload.error.as_deref() {
        let description = payload.error_description.as_deref();
        let message = match description.map(str::trim).filter(|v| !v.is_empty()) {
            Some(description) => format!("{error}: {description}"),
            None => error.to_string(),
        };
        state.report(AppError::new("AUTH_PROVIDER_ERROR", message));
        return (
            StatusCode::BAD_REQUEST,
            Html(pages::render_provider_error(error, description)),
        );
    }

    let Some(code) = payload.code.filter(|v| !v.trim().is_empty()) else {
        state.report(AppError::new(
            "AUTH_PROVIDER_ERROR",
            "callback carried neither an authorization code nor an error",
        ));
        return (
            StatusCode::BAD_REQUEST,
            Html(pages::render_error(
                "Sign-in failed",
                "The provider response did not include an authorization code.",
            )),
        );
    };

    let sender = take_slot(&state.code_slot);
    let Some(sender) = sender else {
        return (
            StatusCode::CONFLICT,
            Html(pages::render_error(
                "Already received",
                "This sign-in has already received an authorization code.",
            )),
        );
    };
    if sender.send(code).is_err() {
        return (
            StatusCode::GONE,
            Html(pages::render_error(
                "Sign-in no longer active",
                "The application stopped waiting for this sign-in. Start it again.",
            )),
        );
    }

    let result_rx = take_slot(&state.result_slot);
    let Some(result_rx) = result_rx else {
        return (StatusCode::OK, Html(pages::render_timeout()));
    };

    match tokio::time::timeout(state.result_wait_timeout, result_rx).await {
        Ok(Ok(AuthOutcome {
            identity: Some(identity),
            other_identities,
        })) => (
            StatusCode::OK,
            Html(pages::render_success(&identity, &other_identities)),
        ),
        Ok(Ok(_)) | Ok(Err(_)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(pages::render_error(
                "Sign-in failed",
                "The authorization code could not be turned into a credential. Check the application for details.",
            )),
        ),
        Err(_) => (StatusCode::OK, Html(pages::render_timeout())),
    }
}

fn take_slot<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

pub(crate) fn parse_callback_query(query: Option<&str>) -> OAuthCallbackPayload {
    let mut payload = OAuthCallbackPayload::default();
    let Some(query) = query.filter(|q| !q.is_empty()) else {
        return payload;
    };
    let Ok(url) = reqwest::Url::parse(&format!("http://localhost{CALLBACK_PATH}?{query}")) else {
        return payload;
    };

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => payload.code = Some(value.to_string()),
            "state" => payload.state = Some(value.to_string()),
            "error" => payload.error = Some(value.to_string()),
            "error_description" => payload.error_description = Some(value.to_string()),
            _ => {}
        }
    }
    payload
}

fn state_matches(payload: &OAuthCallbackPayload, expected_state: &str) -> bool {
    payload
        .state
        .as_deref()
        .is_some_and(|state| constant_time_eq(state.as_bytes(), expected_state.as_bytes()))
}

async fn bind_callback_listener(port: u16) -> AppResult<BoundOAuthCallbackListener> {
    let bound = if port == 0 {
        try_bind_dynamic_port().await
    } else {
        try_bind_on_port(port).await
    };
    bound.map_err(|e| {
        format!("SYSTEM_ERROR: oauth callback listener could not bind localhost:{port}: {e}").into()
    })
}

async fn try_bind_on_port(port: u16) -> Result<BoundOAuthCallbackListener, String> {
    let mut bind_errors: Vec<String> = Vec::new();
    let listener_v4 = match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => Some(listener),
        Err(err) => {
            bind_errors.push(format!("127.0.0.1:{port} ({err})"));
            None
        }
    };
    let listener_v6 = match TcpListener::bind(("::1", port)).await {
        Ok(listener) => Some(listener),
        Err(err) => {
            bind_errors.push(format!("[::1]:{port} ({err})"));
            None
        }
    };
    if listener_v4.is_none() && listener_v6.is_none() {
        return Err(bind_errors.join("; "));
    }
    if !bind_errors.is_empty() {
        tracing::debug!(port, "oauth callback bound on one address family only: {}", bind_errors.join("; "));
    }

    Ok(BoundOAuthCallbackListener {
        port,
        listener_v4,
        listener_v6,
    })
}

async fn try_bind_dynamic_port() -> Result<BoundOAuthCallbackListener, String> {
    let mut bind_errors: Vec<String> = Vec::new();

    match TcpListener::bind(("127.0.0.1", 0)).await {
        Ok(listener_v4) => {
            let port = listener_v4
                .local_addr()
                .map_err(|e| format!("127.0.0.1:0 (local_addr failed: {e})"))?
                .port();
            let listener_v6 = TcpListener::bind(("::1", port)).await.ok();
            return Ok(BoundOAuthCallbackListener {
                port,
                listener_v4: Some(listener_v4),
                listener_v6,
            });
        }
        Err(err) => bind_errors.push(format!("127.0.0.1:0 ({err})")),
    }

    match TcpListener::bind(("::1", 0)).await {
        Ok(listener_v6) => {
            let port = listener_v6
                .local_addr()
                .map_err(|e| format!("[::1]:0 (local_addr failed: {e})"))?
                .port();
            let listener_v4 = TcpListener::bind(("127.0.0.1", port)).await.ok();
            return Ok(BoundOAuthCallbackListener {
                port,
                listener_v4,
                listener_v6: Some(listener_v6),
            });
        }
        Err(err) => bind_errors.push(format!("[::1]:0 ({err})")),
    }

    Err(bind_errors.join("; "))
}
