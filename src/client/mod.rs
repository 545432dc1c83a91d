//! Usage: Hand out authenticated HTTP clients per account, signing in on demand.
//!
//! Collaborators ask for "a client for identity X" (or for the default account). Stored
//! credentials are re-read from disk on every resolution; only one interactive sign-in runs
//! at a time per resolver.

use crate::domain::credentials::{normalize_identity, CredentialRecord};
use crate::oauth::flow::OAuthManager;
use crate::oauth::token_source::TokenSource;
use crate::shared::blocking;
use crate::shared::error::{AppError, AppResult, NO_CREDENTIALS};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// HTTP client bound to one account. Every request carries a fresh bearer token.
#[derive(Clone)]
pub struct AuthorizedClient {
    identity: String,
    http: reqwest::Client,
    tokens: Arc<TokenSource>,
}

impl std::fmt::Debug for AuthorizedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizedClient")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl AuthorizedClient {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Valid access token, refreshed (and written back to disk) when close to expiry.
    pub async fn access_token(&self) -> AppResult<String> {
        self.tokens.access_token().await
    }

    /// Request builder with the `Authorization: Bearer` header already set.
    pub async fn request(
        &self,
        method: reqwest::Method,
        url: &str,
    ) -> AppResult<reqwest::RequestBuilder> {
        let token = self.access_token().await?;
        Ok(self.http.request(method, url).bearer_auth(token))
    }
}

pub struct ClientResolver {
    manager: Arc<OAuthManager>,
    flow_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ClientResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientResolver")
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

impl ClientResolver {
    pub fn new(manager: Arc<OAuthManager>) -> Self {
        Self {
            manager,
            flow_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn manager(&self) -> &Arc<OAuthManager> {
        &self.manager
    }

    /// Client for `identity` (or the default account when `None`/blank).
    ///
    /// With `interactive = false` a missing credential fails with `AUTH_NO_CREDENTIALS`
    /// and no listener is bound.
    pub async fn get_client_or_authenticate(
        &self,
        cancel: &CancellationToken,
        identity: Option<&str>,
        interactive: bool,
    ) -> AppResult<AuthorizedClient> {
        match identity.map(str::trim).filter(|v| !v.is_empty()) {
            Some(raw) => {
                let identity = normalize_identity(raw)?;
                self.resolve_identity(cancel, identity, interactive).await
            }
            None => self.resolve_default(cancel, interactive).await,
        }
    }

    async fn resolve_identity(
        &self,
        cancel: &CancellationToken,
        identity: String,
        interactive: bool,
    ) -> AppResult<AuthorizedClient> {
        if let Some(record) = self.try_load(&identity).await? {
            return Ok(self.client_for(identity, record));
        }
        if !interactive {
            return Err(self.not_authenticated(&identity));
        }

        let _flow = self.lock_flow(cancel).await?;
        // A flow that finished while this caller was queued may have signed this account in.
        if let Some(record) = self.try_load(&identity).await? {
            return Ok(self.client_for(identity, record));
        }

        tracing::info!(identity = %identity, "no stored credentials; starting interactive sign-in");
        let authenticated = self.manager.authenticate_dynamic(cancel).await?;
        if authenticated != identity {
            return Err(AppError::new(
                "AUTH_ACCOUNT_MISMATCH",
                format!(
                    "requested {identity} but signed in as {authenticated}; credentials for {authenticated} were saved. Run `{}` again and choose {identity} in the browser",
                    self.manager.settings().login_command
                ),
            ));
        }

        let record = self.load(&identity).await?;
        Ok(self.client_for(identity, record))
    }

    async fn resolve_default(
        &self,
        cancel: &CancellationToken,
        interactive: bool,
    ) -> AppResult<AuthorizedClient> {
        if let Some(identity) = self.default_identity().await? {
            return self.resolve_identity(cancel, identity, false).await;
        }
        if !interactive {
            return Err(AppError::new(
                NO_CREDENTIALS,
                format!(
                    "no authenticated accounts; run `{}` to sign in",
                    self.manager.settings().login_command
                ),
            ));
        }

        let _flow = self.lock_flow(cancel).await?;
        if let Some(identity) = self.default_identity().await? {
            return self.resolve_identity(cancel, identity, false).await;
        }

        tracing::info!("no authenticated accounts; starting interactive sign-in");
        let authenticated = self.manager.authenticate_dynamic(cancel).await?;
        let record = self.load(&authenticated).await?;
        Ok(self.client_for(authenticated, record))
    }

    /// Configured default account when it is signed in, else the first account by name.
    async fn default_identity(&self) -> AppResult<Option<String>> {
        let identities = self.manager.list_accounts().await?;
        if let Some(preferred) = self.manager.settings().default_account.as_deref() {
            if identities.iter().any(|id| id == preferred) {
                return Ok(Some(preferred.to_string()));
            }
            if !identities.is_empty() {
                tracing::debug!(
                    default_account = preferred,
                    "configured default account is not signed in; using first account"
                );
            }
        }
        Ok(identities.into_iter().next())
    }

    async fn lock_flow(
        &self,
        cancel: &CancellationToken,
    ) -> AppResult<tokio::sync::MutexGuard<'_, ()>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AppError::new(
                "AUTH_CANCELLED",
                "cancelled while waiting for another sign-in to finish",
            )),
            guard = self.flow_lock.lock() => Ok(guard),
        }
    }

    async fn load(&self, identity: &str) -> AppResult<CredentialRecord> {
        let store = self.manager.store().clone();
        let identity = identity.to_string();
        blocking::run("oauth_load_credentials", move || store.load(&identity)).await
    }

    async fn try_load(&self, identity: &str) -> AppResult<Option<CredentialRecord>> {
        match self.load(identity).await {
            Ok(record) => Ok(Some(record)),
            Err(err) if err.is_no_credentials() => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn not_authenticated(&self, identity: &str) -> AppError {
        AppError::new(
            NO_CREDENTIALS,
            format!(
                "{identity} is not signed in; run `{}` to authenticate this account",
                self.manager.settings().login_command
            ),
        )
    }

    fn client_for(&self, identity: String, record: CredentialRecord) -> AuthorizedClient {
        let settings = self.manager.settings();
        let http = self.manager.http().clone();
        let tokens = TokenSource::new(
            identity.clone(),
            record,
            self.manager.store().clone(),
            http.clone(),
            settings.refresh_lead_secs,
            settings.login_command.clone(),
        );
        AuthorizedClient {
            identity,
            http,
            tokens: Arc::new(tokens),
        }
    }
}
