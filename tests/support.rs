#![allow(dead_code)]

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use google_workspace_auth::{
    AppResult, AuthSettings, BrowserLauncher, ClientResolver, CredentialRecord, CredentialStore,
    OAuthManager,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::task::JoinHandle;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct EnvRestore {
    saved: Vec<(&'static str, Option<OsString>)>,
}

impl EnvRestore {
    fn save_once(&mut self, key: &'static str) {
        if self.saved.iter().any(|(k, _)| *k == key) {
            return;
        }
        self.saved.push((key, std::env::var_os(key)));
    }

    pub fn set_var(&mut self, key: &'static str, value: impl Into<OsString>) {
        self.save_once(key);
        std::env::set_var(key, value.into());
    }

    pub fn remove_var(&mut self, key: &'static str) {
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

pub const CODE_PREFIX: &str = "code-for-";
pub const REVOKED_REFRESH_TOKEN: &str = "1//revoked";

#[derive(Default)]
struct ProviderState {
    exchange_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    userinfo_calls: AtomicUsize,
    issued: AtomicUsize,
    access_tokens: Mutex<HashMap<String, String>>,
}

impl ProviderState {
    fn issue_access_token(&self, email: &str) -> String {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        let token = format!("ya29.{email}.{n}");
        self.access_tokens
            .lock()
            .unwrap()
            .insert(token.clone(), email.to_string());
        token
    }
}

/// In-process stand-in for Google's token and userinfo endpoints.
///
/// Authorization codes look like `code-for-<email>`; refresh tokens like `1//refresh-<email>`.
pub struct MockGoogle {
    base_url: String,
    state: Arc<ProviderState>,
    task: JoinHandle<()>,
}

impl MockGoogle {
    pub async fn start() -> Self {
        let state = Arc::new(ProviderState::default());
        let router = Router::new()
            .route("/token", post(token_endpoint))
            .route("/userinfo", get(userinfo_endpoint))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("bind mock provider");
        let addr = listener.local_addr().expect("mock addr");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Self {
            base_url: format!("http://{addr}"),
            state,
            task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn exchange_calls(&self) -> usize {
        self.state.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn userinfo_calls(&self) -> usize {
        self.state.userinfo_calls.load(Ordering::SeqCst)
    }
}

impl Drop for MockGoogle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn token_endpoint(
    State(state): State<Arc<ProviderState>>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    match form.get("grant_type").map(String::as_str) {
        Some("authorization_code") => {
            state.exchange_calls.fetch_add(1, Ordering::SeqCst);
            let Some(email) = form
                .get("code")
                .and_then(|code| code.strip_prefix(CODE_PREFIX))
            else {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": "invalid_grant", "error_description": "Malformed auth code."})),
                );
            };
            if !form.get("code_verifier").is_some_and(|v| v.len() >= 43) {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": "invalid_grant", "error_description": "Missing code verifier."})),
                );
            }
            let access_token = state.issue_access_token(email);
            (
                StatusCode::OK,
                Json(json!({
                    "access_token": access_token,
                    "refresh_token": format!("1//refresh-{email}"),
                    "expires_in": 3599,
                    "token_type": "Bearer",
                    "scope": "openid https://www.googleapis.com/auth/userinfo.email",
                })),
            )
        }
        Some("refresh_token") => {
            state.refresh_calls.fetch_add(1, Ordering::SeqCst);
            let refresh_token = form.get("refresh_token").cloned().unwrap_or_default();
            if refresh_token == REVOKED_REFRESH_TOKEN {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": "invalid_grant", "error_description": "Token has been expired or revoked."})),
                );
            }
            let email = refresh_token
                .strip_prefix("1//refresh-")
                .unwrap_or("unknown@example.com")
                .to_string();
            let access_token = state.issue_access_token(&email);
            (
                StatusCode::OK,
                Json(json!({
                    "access_token": access_token,
                    "expires_in": 3599,
                    "token_type": "Bearer",
                })),
            )
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "unsupported_grant_type"})),
        ),
    }
}

async fn userinfo_endpoint(
    State(state): State<Arc<ProviderState>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    state.userinfo_calls.fetch_add(1, Ordering::SeqCst);
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_string();
    let email = state.access_tokens.lock().unwrap().get(&token).cloned();
    match email {
        Some(email) => (
            StatusCode::OK,
            Json(json!({"id": "1234", "email": email, "verified_email": true})),
        ),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"code": 401, "message": "Invalid Credentials", "status": "UNAUTHENTICATED"}})),
        ),
    }
}

/// What the simulated user does with the consent page.
#[derive(Debug, Clone)]
pub enum BrowserAction {
    SignInAs(String),
    /// Consent completes only after the delay, keeping the flow open meanwhile.
    SignInAfter(String, Duration),
    Deny,
    ForgedState(String),
    Ignore,
}

#[derive(Debug, Clone)]
pub struct CallbackPage {
    pub status: u16,
    pub body: String,
}

/// Browser stand-in: follows the authorization URL straight back to the redirect URI.
pub struct ScriptedBrowser {
    actions: Mutex<Vec<BrowserAction>>,
    opened: Mutex<Vec<String>>,
    pending: Mutex<Vec<JoinHandle<Option<CallbackPage>>>>,
}

impl ScriptedBrowser {
    /// Actions are used in order; the last one repeats.
    pub fn new(actions: Vec<BrowserAction>) -> Arc<Self> {
        Arc::new(Self {
            actions: Mutex::new(actions),
            opened: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn sign_in_as(email: &str) -> Arc<Self> {
        Self::new(vec![BrowserAction::SignInAs(email.to_string())])
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    /// Callback ports seen in opened authorization URLs.
    pub fn callback_ports(&self) -> Vec<u16> {
        self.opened()
            .iter()
            .filter_map(|url| {
                let redirect = query_param(url, "redirect_uri")?;
                reqwest::Url::parse(&redirect).ok()?.port()
            })
            .collect()
    }

    /// Wait for every callback request issued so far and return the rendered pages.
    pub async fn pages(&self) -> Vec<CallbackPage> {
        let handles: Vec<_> = std::mem::take(&mut *self.pending.lock().unwrap());
        let mut pages = Vec::new();
        for handle in handles {
            if let Ok(Some(page)) = handle.await {
                pages.push(page);
            }
        }
        pages
    }

    fn next_action(&self) -> BrowserAction {
        let mut actions = self.actions.lock().unwrap();
        if actions.len() > 1 {
            actions.remove(0)
        } else {
            actions.first().cloned().unwrap_or(BrowserAction::Ignore)
        }
    }
}

fn query_param(url: &str, key: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.to_string())
}

impl BrowserLauncher for ScriptedBrowser {
    fn open(&self, url: &str) -> AppResult<()> {
        self.opened.lock().unwrap().push(url.to_string());

        let redirect_uri = query_param(url, "redirect_uri").expect("redirect_uri");
        let state = query_param(url, "state").expect("state");
        // Some CI hosts have no IPv6 loopback; the listener always has an IPv4 socket.
        let redirect_uri = redirect_uri.replacen("//localhost:", "//127.0.0.1:", 1);

        let mut delay = Duration::ZERO;
        let query = match self.next_action() {
            BrowserAction::SignInAs(email) => format!("code={CODE_PREFIX}{email}&state={state}"),
            BrowserAction::SignInAfter(email, after) => {
                delay = after;
                format!("code={CODE_PREFIX}{email}&state={state}")
            }
            BrowserAction::Deny => {
                format!("error=access_denied&error_description=User+denied+access&state={state}")
            }
            BrowserAction::ForgedState(email) => {
                format!("code={CODE_PREFIX}{email}&state=forged-{state}")
            }
            BrowserAction::Ignore => return Ok(()),
        };
        let target = format!("{redirect_uri}?{query}");

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let resp = reqwest::get(&target).await.ok()?;
            let status = resp.status().as_u16();
            let body = resp.text().await.ok()?;
            Some(CallbackPage { status, body })
        });
        self.pending.lock().unwrap().push(handle);
        Ok(())
    }
}

/// Temp config dir with a client secret pointing at the mock provider.
pub struct TestEnv {
    pub dir: TempDir,
    pub google: MockGoogle,
}

impl TestEnv {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let google = MockGoogle::start().await;
        let secret = json!({
            "installed": {
                "client_id": "test-client.apps.googleusercontent.com",
                "client_secret": "GOCSPX-test-secret",
                "auth_uri": google.url("/auth"),
                "token_uri": google.url("/token"),
                "redirect_uris": ["http://localhost"],
            }
        });
        std::fs::write(
            dir.path().join("client_secret.json"),
            serde_json::to_vec_pretty(&secret).unwrap(),
        )
        .expect("write client secret");
        Self { dir, google }
    }

    pub fn config_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn tokens_dir(&self) -> PathBuf {
        self.dir.path().join("tokens")
    }

    pub fn store(&self) -> CredentialStore {
        CredentialStore::new(self.tokens_dir())
    }

    pub fn settings(&self) -> AuthSettings {
        let mut settings = AuthSettings::with_config_dir(self.config_dir());
        settings.callback_port = Some(0);
        settings.userinfo_url = self.google.url("/userinfo");
        settings.flow_timeout_secs = 20;
        settings.shutdown_grace_secs = 2;
        settings.login_command = "gws auth login".to_string();
        settings
    }

    pub fn manager_with(
        &self,
        settings: AuthSettings,
        browser: Arc<ScriptedBrowser>,
    ) -> Arc<OAuthManager> {
        Arc::new(
            OAuthManager::new(settings)
                .expect("manager")
                .with_browser(browser),
        )
    }

    pub fn manager(&self, browser: Arc<ScriptedBrowser>) -> Arc<OAuthManager> {
        self.manager_with(self.settings(), browser)
    }

    pub fn resolver(&self, browser: Arc<ScriptedBrowser>) -> Arc<ClientResolver> {
        Arc::new(ClientResolver::new(self.manager(browser)))
    }

    /// Seed a credential file as if `email` had signed in earlier.
    pub fn seed(&self, email: &str, access_token: &str, expires_at: Option<i64>) {
        self.seed_record(
            email,
            CredentialRecord {
                access_token: access_token.to_string(),
                refresh_token: format!("1//refresh-{email}"),
                token_type: "Bearer".to_string(),
                token_uri: self.google.url("/token"),
                client_id: "test-client.apps.googleusercontent.com".to_string(),
                client_secret: "GOCSPX-test-secret".to_string(),
                scopes: vec!["openid".to_string()],
                expires_at,
            },
        );
    }

    pub fn seed_record(&self, email: &str, record: CredentialRecord) {
        self.store().save(email, &record).expect("seed credentials");
    }
}

pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
