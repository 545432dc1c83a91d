//! Usage: Build the provider authorization URL and the anti-CSRF state.

use crate::shared::error::AppResult;
use crate::shared::security::random_state_hex;

pub const CALLBACK_PATH: &str = "/oauth2callback";
const REDIRECT_HOST: &str = "localhost";

#[derive(Debug, Clone)]
pub struct AuthorizeUrlParams<'a> {
    pub auth_uri: &'a str,
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub scopes: &'a [String],
    pub state: &'a str,
    pub code_challenge: &'a str,
}

/// Fresh state for one flow (32 random bytes, hex).
pub fn build_oauth_state() -> String {
    random_state_hex()
}

pub fn make_redirect_uri(port: u16) -> String {
    format!("http://{REDIRECT_HOST}:{port}{CALLBACK_PATH}")
}

/// Offline access plus forced consent, so every completed flow yields a refresh token.
pub fn build_authorize_url(params: &AuthorizeUrlParams<'_>) -> AppResult<String> {
    let mut url = reqwest::Url::parse(params.auth_uri.trim())
        .map_err(|e| format!("CONFIG_ERROR: invalid oauth auth url: {e}"))?;
    {
        let scope = params.scopes.join(" ");
        let mut query = url.query_pairs_mut();
        query.append_pair("response_type", "code");
        query.append_pair("client_id", params.client_id);
        query.append_pair("redirect_uri", params.redirect_uri);
        query.append_pair("scope", &scope);
        query.append_pair("access_type", "offline");
        query.append_pair("prompt", "consent");
        query.append_pair("state", params.state);
        query.append_pair("code_challenge", params.code_challenge);
        query.append_pair("code_challenge_method", "S256");
    }
    Ok(url.to_string())
}
