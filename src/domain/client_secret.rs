//! Usage: Load the provider-issued application credential (Google `client_secret.json`).

use crate::shared::error::AppResult;
use serde::Deserialize;
use std::path::Path;

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
}

#[derive(Debug, Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecretSection>,
    web: Option<ClientSecretSection>,
}

#[derive(Debug, Deserialize)]
struct ClientSecretSection {
    client_id: Option<String>,
    client_secret: Option<String>,
    auth_uri: Option<String>,
    token_uri: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn parse(raw: &str) -> AppResult<ClientSecret> {
    let file: ClientSecretFile = serde_json::from_str(raw)
        .map_err(|e| format!("CONFIG_ERROR: client secret file is not valid JSON: {e}"))?;

    let section = file.installed.or(file.web).ok_or_else(|| {
        "CONFIG_ERROR: client secret file must contain an \"installed\" or \"web\" section"
            .to_string()
    })?;

    let client_id = non_empty(section.client_id)
        .ok_or_else(|| "CONFIG_ERROR: client secret file missing client_id".to_string())?;
    let client_secret = non_empty(section.client_secret)
        .ok_or_else(|| "CONFIG_ERROR: client secret file missing client_secret".to_string())?;

    Ok(ClientSecret {
        client_id,
        client_secret,
        auth_uri: non_empty(section.auth_uri).unwrap_or_else(|| DEFAULT_AUTH_URI.to_string()),
        token_uri: non_empty(section.token_uri).unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
    })
}

pub fn load(path: &Path) -> AppResult<ClientSecret> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            format!(
                "CONFIG_ERROR: client secret file not found at {}; download the OAuth client JSON from the Google Cloud console and save it there (or set GWS_CLIENT_SECRET_PATH)",
                path.display()
            )
        } else {
            format!(
                "CONFIG_ERROR: failed to read client secret file {}: {e}",
                path.display()
            )
        }
    })?;
    parse(&raw)
}
