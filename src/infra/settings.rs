//! Usage: Auth settings (schema, defaults, sanitizing, environment overrides).

use crate::infra::app_paths;
use crate::shared::error::AppResult;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_CALLBACK_PORT: &str = "GWS_OAUTH_CALLBACK_PORT";
pub const ENV_DEFAULT_ACCOUNT: &str = "GWS_DEFAULT_ACCOUNT";

pub const DEFAULT_CALLBACK_PORT: u16 = 8085;
pub const DEFAULT_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
const DEFAULT_FLOW_TIMEOUT_SECS: u64 = 5 * 60;
const DEFAULT_RESULT_WAIT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;
const DEFAULT_REFRESH_LEAD_SECS: i64 = 60;
const DEFAULT_HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
const MAX_FLOW_TIMEOUT_SECS: u64 = 60 * 60;
const MAX_REFRESH_LEAD_SECS: i64 = 30 * 60;
const DEFAULT_LOGIN_COMMAND: &str = "google-workspace-mcp auth login";

pub const DEFAULT_SCOPES: &[&str] = &[
    "openid",
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/calendar",
    "https://www.googleapis.com/auth/drive",
    "https://www.googleapis.com/auth/documents",
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/tasks",
    "https://www.googleapis.com/auth/contacts",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuthSettings {
    /// Root directory; credential files live under `<config_dir>/tokens`.
    pub config_dir: PathBuf,
    /// Provider-issued application credential file.
    pub client_secret_path: PathBuf,
    /// Explicit callback port. `None` falls back to `$GWS_OAUTH_CALLBACK_PORT`, then 8085.
    pub callback_port: Option<u16>,
    pub scopes: Vec<String>,
    pub userinfo_url: String,
    pub default_account: Option<String>,
    pub flow_timeout_secs: u64,
    pub result_wait_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
    pub refresh_lead_secs: i64,
    pub http_connect_timeout_secs: u64,
    /// Shown in "not authenticated" errors as the remediation step.
    pub login_command: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::new(),
            client_secret_path: PathBuf::new(),
            callback_port: None,
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            userinfo_url: DEFAULT_USERINFO_URL.to_string(),
            default_account: None,
            flow_timeout_secs: DEFAULT_FLOW_TIMEOUT_SECS,
            result_wait_timeout_secs: DEFAULT_RESULT_WAIT_TIMEOUT_SECS,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            refresh_lead_secs: DEFAULT_REFRESH_LEAD_SECS,
            http_connect_timeout_secs: DEFAULT_HTTP_CONNECT_TIMEOUT_SECS,
            login_command: DEFAULT_LOGIN_COMMAND.to_string(),
        }
    }
}

impl AuthSettings {
    /// Settings rooted at `config_dir` with every other field defaulted.
    pub fn with_config_dir(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        let mut settings = Self {
            client_secret_path: config_dir.join("client_secret.json"),
            config_dir,
            ..Self::default()
        };
        sanitize(&mut settings);
        settings
    }

    /// Settings resolved from the process environment.
    pub fn from_env() -> AppResult<Self> {
        let config_dir = app_paths::config_dir()?;
        let client_secret_path = app_paths::client_secret_path(&config_dir)?;
        let default_account = std::env::var(ENV_DEFAULT_ACCOUNT)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let mut settings = Self {
            config_dir,
            client_secret_path,
            default_account,
            ..Self::default()
        };
        sanitize(&mut settings);
        Ok(settings)
    }

    pub fn tokens_dir(&self) -> PathBuf {
        app_paths::tokens_dir(&self.config_dir)
    }

    pub fn flow_timeout(&self) -> Duration {
        Duration::from_secs(self.flow_timeout_secs)
    }

    pub fn result_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.result_wait_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn http_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.http_connect_timeout_secs)
    }

    /// Callback port for the next flow: explicit setting, then the env override, then the default.
    pub fn resolve_callback_port(&self) -> AppResult<u16> {
        if let Some(port) = self.callback_port {
            return Ok(port);
        }
        let raw = std::env::var(ENV_CALLBACK_PORT).ok();
        Ok(parse_port_override(raw.as_deref())?.unwrap_or(DEFAULT_CALLBACK_PORT))
    }
}

/// Parse a callback port override. Blank means "not set"; anything non-numeric is rejected.
pub(crate) fn parse_port_override(raw: Option<&str>) -> AppResult<Option<u16>> {
    let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    raw.parse::<u16>().map(Some).map_err(|_| {
        format!("CONFIG_ERROR: {ENV_CALLBACK_PORT} must be a port number (0-65535), got {raw:?}")
            .into()
    })
}

/// Repair zero or out-of-range values in place. Returns whether anything changed.
pub(crate) fn sanitize(settings: &mut AuthSettings) -> bool {
    let mut changed = false;

    if settings.flow_timeout_secs == 0 {
        settings.flow_timeout_secs = DEFAULT_FLOW_TIMEOUT_SECS;
        changed = true;
    }
    if settings.flow_timeout_secs > MAX_FLOW_TIMEOUT_SECS {
        settings.flow_timeout_secs = MAX_FLOW_TIMEOUT_SECS;
        changed = true;
    }
    if settings.result_wait_timeout_secs == 0 {
        settings.result_wait_timeout_secs = DEFAULT_RESULT_WAIT_TIMEOUT_SECS;
        changed = true;
    }
    if settings.shutdown_grace_secs == 0 {
        settings.shutdown_grace_secs = DEFAULT_SHUTDOWN_GRACE_SECS;
        changed = true;
    }
    if settings.http_connect_timeout_secs == 0 {
        settings.http_connect_timeout_secs = DEFAULT_HTTP_CONNECT_TIMEOUT_SECS;
        changed = true;
    }
    if settings.refresh_lead_secs < 0 || settings.refresh_lead_secs > MAX_REFRESH_LEAD_SECS {
        settings.refresh_lead_secs = DEFAULT_REFRESH_LEAD_SECS;
        changed = true;
    }
    if settings.scopes.is_empty() {
        settings.scopes = DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect();
        changed = true;
    }
    if settings.userinfo_url.trim().is_empty() {
        settings.userinfo_url = DEFAULT_USERINFO_URL.to_string();
        changed = true;
    }
    if settings.login_command.trim().is_empty() {
        settings.login_command = DEFAULT_LOGIN_COMMAND.to_string();
        changed = true;
    }
    if let Some(account) = settings.default_account.as_mut() {
        let normalized = account.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            settings.default_account = None;
            changed = true;
        } else if *account != normalized {
            *account = normalized;
            changed = true;
        }
    }

    changed
}
