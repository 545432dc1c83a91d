//! Usage: OAuth token endpoint helpers (authorization_code + refresh_token grants) and the
//! identity (userinfo) lookup.

use crate::shared::error::{AppError, AppResult};
use crate::shared::security::mask_token;
use serde_json::Value;
use std::collections::HashMap;

const ERROR_DETAIL_MAX_CHARS: usize = 240;
const ERROR_BODY_SNIPPET_MAX_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub(crate) struct TokenExchangeRequest {
    pub(crate) token_uri: String,
    pub(crate) client_id: String,
    pub(crate) client_secret: String,
    pub(crate) code: String,
    pub(crate) redirect_uri: String,
    pub(crate) code_verifier: String,
}

#[derive(Debug, Clone)]
pub(crate) struct TokenRefreshRequest {
    pub(crate) token_uri: String,
    pub(crate) client_id: String,
    pub(crate) client_secret: String,
    pub(crate) refresh_token: String,
}

#[derive(Clone)]
pub(crate) struct OAuthTokenSet {
    pub(crate) access_token: String,
    pub(crate) refresh_token: Option<String>,
    pub(crate) token_type: Option<String>,
    pub(crate) scopes: Option<Vec<String>>,
    pub(crate) expires_at: Option<i64>,
}

impl std::fmt::Debug for OAuthTokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokenSet")
            .field("access_token", &mask_token(&self.access_token))
            .field(
                "refresh_token",
                &self.refresh_token.as_deref().map(mask_token),
            )
            .field("token_type", &self.token_type)
            .field("scopes", &self.scopes)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grant {
    AuthorizationCode,
    RefreshToken,
}

impl Grant {
    fn failure_code(self) -> &'static str {
        match self {
            Grant::AuthorizationCode => "OAUTH_EXCHANGE_FAILED",
            Grant::RefreshToken => "OAUTH_REFRESH_FAILED",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Grant::AuthorizationCode => "token exchange",
            Grant::RefreshToken => "token refresh",
        }
    }
}

pub(crate) fn http_client(connect_timeout: std::time::Duration) -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(format!("google-workspace-auth/{}", env!("CARGO_PKG_VERSION")))
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| format!("SYSTEM_ERROR: oauth http client init failed: {e}").into())
}

pub(crate) async fn exchange_authorization_code(
    client: &reqwest::Client,
    req: &TokenExchangeRequest,
) -> AppResult<OAuthTokenSet> {
    let mut form: HashMap<&str, String> = HashMap::new();
    form.insert("grant_type", "authorization_code".to_string());
    form.insert("code", req.code.trim().to_string());
    form.insert("redirect_uri", req.redirect_uri.trim().to_string());
    form.insert("client_id", req.client_id.trim().to_string());
    form.insert("client_secret", req.client_secret.trim().to_string());
    form.insert("code_verifier", req.code_verifier.trim().to_string());

    let response = client
        .post(req.token_uri.trim())
        .form(&form)
        .send()
        .await
        .map_err(|e| {
            AppError::with_source(
                Grant::AuthorizationCode.failure_code(),
                "token endpoint request failed",
                e,
            )
        })?;

    parse_token_response(response, Grant::AuthorizationCode).await
}

pub(crate) async fn refresh_access_token(
    client: &reqwest::Client,
    req: &TokenRefreshRequest,
) -> AppResult<OAuthTokenSet> {
    let mut form: HashMap<&str, String> = HashMap::new();
    form.insert("grant_type", "refresh_token".to_string());
    form.insert("refresh_token", req.refresh_token.trim().to_string());
    form.insert("client_id", req.client_id.trim().to_string());
    form.insert("client_secret", req.client_secret.trim().to_string());

    let response = client
        .post(req.token_uri.trim())
        .form(&form)
        .send()
        .await
        .map_err(|e| {
            AppError::with_source(
                Grant::RefreshToken.failure_code(),
                "token endpoint request failed",
                e,
            )
        })?;

    parse_token_response(response, Grant::RefreshToken).await
}

/// Ask the identity endpoint which account the access token belongs to.
pub(crate) async fn fetch_userinfo_email(
    client: &reqwest::Client,
    userinfo_url: &str,
    access_token: &str,
) -> AppResult<String> {
    let response = client
        .get(userinfo_url.trim())
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|e| {
            AppError::with_source("OAUTH_USERINFO_FAILED", "userinfo request failed", e)
        })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| format!("OAUTH_USERINFO_FAILED: userinfo response read failed: {e}"))?;

    if !status.is_success() {
        return Err(format!(
            "OAUTH_USERINFO_FAILED: userinfo endpoint returned status={} body={}",
            status.as_u16(),
            sanitize_oauth_error_body_snippet(&body)
        )
        .into());
    }

    let value: Value = serde_json::from_str(&body)
        .map_err(|e| format!("OAUTH_USERINFO_FAILED: userinfo response json invalid: {e}"))?;
    value
        .get("email")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| "OAUTH_USERINFO_FAILED: userinfo response has no email".into())
}

async fn parse_token_response(
    response: reqwest::Response,
    grant: Grant,
) -> AppResult<OAuthTokenSet> {
    let status = response.status();
    let body = response.text().await.map_err(|e| {
        format!(
            "{}: {} response read failed: {e}",
            grant.failure_code(),
            grant.label()
        )
    })?;

    if !status.is_success() {
        let (error_code, error_message) = parse_oauth_error_details(&body);
        if grant == Grant::RefreshToken && is_relogin_error(error_code.as_deref()) {
            return Err(AppError::new(
                "AUTH_RELOGIN_REQUIRED",
                "refresh token was revoked or has expired",
            ));
        }

        let snippet = sanitize_oauth_error_body_snippet(&body);
        let mut msg = format!(
            "{} endpoint returned status={}",
            grant.label(),
            status.as_u16()
        );
        if let Some(code) = error_code {
            msg.push_str(" code=");
            msg.push_str(code.as_str());
        }
        if let Some(detail) = error_message {
            msg.push_str(" message=");
            msg.push_str(
                detail
                    .chars()
                    .take(ERROR_DETAIL_MAX_CHARS)
                    .collect::<String>()
                    .as_str(),
            );
        }
        msg.push_str(" body=");
        msg.push_str(snippet.as_str());
        return Err(AppError::new(grant.failure_code(), msg));
    }

    let value: Value = serde_json::from_str(&body).map_err(|e| {
        format!(
            "{}: {} response json invalid: {e}",
            grant.failure_code(),
            grant.label()
        )
    })?;

    let access_token = value
        .get("access_token")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            format!(
                "{}: {} response missing access_token",
                grant.failure_code(),
                grant.label()
            )
        })?
        .to_string();

    let refresh_token = non_empty_str(&value, "refresh_token");
    let token_type = non_empty_str(&value, "token_type");
    let scopes = non_empty_str(&value, "scope")
        .map(|raw| raw.split_whitespace().map(str::to_string).collect());

    let expires_in = value.get("expires_in").and_then(parse_i64_lossy);
    let now = crate::shared::time::now_unix_seconds();
    let expires_at = expires_in.and_then(|v| {
        if v <= 0 {
            None
        } else {
            Some(now.saturating_add(v))
        }
    });

    Ok(OAuthTokenSet {
        access_token,
        refresh_token,
        token_type,
        scopes,
        expires_at,
    })
}

fn non_empty_str(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_i64_lossy(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lc = key.trim().to_ascii_lowercase();
    key_lc.contains("token")
        || key_lc.contains("secret")
        || key_lc == "code"
        || key_lc == "authorization"
}

fn redact_sensitive_json_fields(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if is_sensitive_key(key) {
                    if let Some(raw) = nested.as_str() {
                        *nested = Value::String(mask_token(raw));
                        continue;
                    }
                }
                redact_sensitive_json_fields(nested);
            }
        }
        Value::Array(items) => {
            for nested in items {
                redact_sensitive_json_fields(nested);
            }
        }
        _ => {}
    }
}

fn sanitize_oauth_error_body_snippet(body: &str) -> String {
    if let Ok(mut value) = serde_json::from_str::<Value>(body) {
        redact_sensitive_json_fields(&mut value);
        if let Ok(encoded) = serde_json::to_string(&value) {
            return encoded.chars().take(ERROR_BODY_SNIPPET_MAX_CHARS).collect();
        }
    }
    body.chars().take(ERROR_BODY_SNIPPET_MAX_CHARS).collect()
}

fn parse_oauth_error_details(body: &str) -> (Option<String>, Option<String>) {
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return (None, None),
    };

    let mut code = None;
    let mut message = non_empty_str(&value, "error_description");

    if let Some(error_value) = value.get("error") {
        if let Some(err_str) = error_value.as_str() {
            code = Some(err_str.trim().to_string()).filter(|v| !v.is_empty());
        } else if let Some(err_obj) = error_value.as_object() {
            // Google API style: {"error": {"status": "...", "message": "..."}}
            code = err_obj
                .get("status")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string);
            if message.is_none() {
                message = err_obj
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string);
            }
        }
    }

    (code, message)
}

fn is_relogin_error(code: Option<&str>) -> bool {
    code.map(str::trim)
        .is_some_and(|v| v.eq_ignore_ascii_case("invalid_grant"))
}
