//! Usage: Serve a valid access token for one account, refreshing it on demand.

use crate::domain::credentials::{CredentialRecord, CredentialStore};
use crate::oauth::token_exchange::{refresh_access_token, OAuthTokenSet, TokenRefreshRequest};
use crate::shared::blocking;
use crate::shared::error::{AppError, AppResult};
use crate::shared::time::now_unix_seconds;

/// True when the token expires within `refresh_lead_s`. Unknown expiry never refreshes.
pub(crate) fn should_refresh_now(
    expires_at: Option<i64>,
    refresh_lead_s: i64,
    now_unix: i64,
) -> bool {
    let Some(expiry) = expires_at else {
        return false;
    };
    let lead = refresh_lead_s.max(0);
    expiry.saturating_sub(lead) <= now_unix
}

/// Lifetime assumed for a refreshed access token when the response carries no `expires_in`.
const FALLBACK_ACCESS_TOKEN_TTL_SECS: i64 = 3600;

/// Apply a refresh response to the stored record. The stored refresh token survives when
/// the provider does not rotate it; a missing expiry falls back to one hour from `now_unix`.
pub(crate) fn merge_refreshed(
    current: &CredentialRecord,
    refreshed: OAuthTokenSet,
    now_unix: i64,
) -> CredentialRecord {
    let expires_at = refreshed
        .expires_at
        .unwrap_or_else(|| now_unix.saturating_add(FALLBACK_ACCESS_TOKEN_TTL_SECS));
    CredentialRecord {
        access_token: refreshed.access_token,
        refresh_token: refreshed
            .refresh_token
            .unwrap_or_else(|| current.refresh_token.clone()),
        token_type: refreshed
            .token_type
            .unwrap_or_else(|| current.token_type.clone()),
        token_uri: current.token_uri.clone(),
        client_id: current.client_id.clone(),
        client_secret: current.client_secret.clone(),
        scopes: refreshed.scopes.unwrap_or_else(|| current.scopes.clone()),
        expires_at: Some(expires_at),
    }
}

struct TokenState {
    record: CredentialRecord,
    /// Access token last known to be on disk.
    persisted_access_token: String,
}

pub(crate) struct TokenSource {
    identity: String,
    store: CredentialStore,
    http: reqwest::Client,
    refresh_lead_secs: i64,
    login_command: String,
    state: tokio::sync::Mutex<TokenState>,
}

impl TokenSource {
    pub(crate) fn new(
        identity: String,
        record: CredentialRecord,
        store: CredentialStore,
        http: reqwest::Client,
        refresh_lead_secs: i64,
        login_command: String,
    ) -> Self {
        let persisted_access_token = record.access_token.clone();
        Self {
            identity,
            store,
            http,
            refresh_lead_secs,
            login_command,
            state: tokio::sync::Mutex::new(TokenState {
                record,
                persisted_access_token,
            }),
        }
    }

    /// Current access token; refreshes first when it is about to expire. Concurrent callers
    /// wait for a single refresh.
    pub(crate) async fn access_token(&self) -> AppResult<String> {
        let mut state = self.state.lock().await;
        if !should_refresh_now(
            state.record.expires_at,
            self.refresh_lead_secs,
            now_unix_seconds(),
        ) {
            return Ok(state.record.access_token.clone());
        }

        if state.record.refresh_token.trim().is_empty() {
            return Err(self.relogin_error());
        }

        tracing::debug!(identity = %self.identity, "refreshing access token");
        let refreshed = refresh_access_token(
            &self.http,
            &TokenRefreshRequest {
                token_uri: state.record.token_uri.clone(),
                client_id: state.record.client_id.clone(),
                client_secret: state.record.client_secret.clone(),
                refresh_token: state.record.refresh_token.clone(),
            },
        )
        .await
        .map_err(|err| self.map_refresh_error(err))?;

        let next = merge_refreshed(&state.record, refreshed, now_unix_seconds());
        let access_token = next.access_token.clone();
        state.record = next.clone();
        if access_token != state.persisted_access_token && self.persist(next).await {
            state.persisted_access_token = access_token.clone();
        }
        Ok(access_token)
    }

    /// Write the refreshed record back. A failure only costs a refresh in the next process.
    async fn persist(&self, record: CredentialRecord) -> bool {
        let store = self.store.clone();
        let identity = self.identity.clone();
        match blocking::run("oauth_persist_refreshed_token", move || {
            store.save(&identity, &record)
        })
        .await
        {
            Ok(()) => {
                tracing::debug!(identity = %self.identity, "refreshed token persisted");
                true
            }
            Err(err) => {
                tracing::warn!(
                    identity = %self.identity,
                    "refreshed token could not be saved; it stays valid for this session: {err}"
                );
                false
            }
        }
    }

    fn relogin_error(&self) -> AppError {
        AppError::new(
            "AUTH_RELOGIN_REQUIRED",
            format!(
                "credentials for {} were revoked or have expired; run `{}` to sign in again",
                self.identity, self.login_command
            ),
        )
    }

    fn map_refresh_error(&self, err: AppError) -> AppError {
        if err.code() == "AUTH_RELOGIN_REQUIRED" {
            return self.relogin_error();
        }
        tracing::warn!(identity = %self.identity, "token refresh failed: {err}");
        AppError::new(
            err.code(),
            format!("refreshing credentials for {}: {}", self.identity, err.message()),
        )
    }
}
