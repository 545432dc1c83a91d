//! Usage: Resolve the configuration directory (supports $GWS_CONFIG_DIR).

use crate::shared::error::AppResult;
use std::path::{Path, PathBuf};

pub const ENV_CONFIG_DIR: &str = "GWS_CONFIG_DIR";
pub const ENV_CLIENT_SECRET_PATH: &str = "GWS_CLIENT_SECRET_PATH";

const APP_DIR_NAME: &str = "google-workspace-mcp";
const TOKENS_DIR_NAME: &str = "tokens";
const CLIENT_SECRET_FILE_NAME: &str = "client_secret.json";

fn home_dir() -> AppResult<PathBuf> {
    dirs::home_dir()
        .ok_or_else(|| "CONFIG_ERROR: failed to resolve home dir".to_string().into())
}

fn expand_tilde(home: &Path, raw: &str) -> Option<PathBuf> {
    let trimmed = raw.trim();
    if trimmed == "~" {
        return Some(home.to_path_buf());
    }

    let rest = trimmed
        .strip_prefix("~/")
        .or_else(|| trimmed.strip_prefix("~\\"));

    rest.map(|suffix| home.join(suffix))
}

pub(crate) fn resolve_under_home(home: &Path, raw: &str) -> PathBuf {
    if let Some(p) = expand_tilde(home, raw) {
        return p;
    }

    let candidate = PathBuf::from(raw.trim());
    if candidate.is_absolute() {
        return candidate;
    }

    home.join(candidate)
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `$GWS_CONFIG_DIR` when set, else `<platform config dir>/google-workspace-mcp`.
pub fn config_dir() -> AppResult<PathBuf> {
    if let Some(raw) = env_non_empty(ENV_CONFIG_DIR) {
        return Ok(resolve_under_home(&home_dir()?, &raw));
    }

    match dirs::config_dir() {
        Some(base) => Ok(base.join(APP_DIR_NAME)),
        None => Ok(home_dir()?.join(".config").join(APP_DIR_NAME)),
    }
}

/// `$GWS_CLIENT_SECRET_PATH` when set, else `<config_dir>/client_secret.json`.
pub fn client_secret_path(config_dir: &Path) -> AppResult<PathBuf> {
    match env_non_empty(ENV_CLIENT_SECRET_PATH) {
        Some(raw) => Ok(resolve_under_home(&home_dir()?, &raw)),
        None => Ok(config_dir.join(CLIENT_SECRET_FILE_NAME)),
    }
}

pub fn tokens_dir(config_dir: &Path) -> PathBuf {
    config_dir.join(TOKENS_DIR_NAME)
}
