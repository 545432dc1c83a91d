//! Usage: Interactive sign-in for an account that is not known in advance.
//!
//! `authenticate_dynamic` binds the redirect listener, sends the user to the consent page,
//! exchanges the returned code, asks the provider which account signed in and stores the
//! credential under that email.

use crate::domain::client_secret::{self, ClientSecret};
use crate::domain::credentials::{normalize_identity, CredentialRecord, CredentialStore};
use crate::infra::settings::AuthSettings;
use crate::oauth::authorize_url::{
    build_authorize_url, build_oauth_state, make_redirect_uri, AuthorizeUrlParams,
};
use crate::oauth::browser::{BrowserLauncher, SystemBrowser};
use crate::oauth::callback_server::{AuthOutcome, CallbackChannels, CallbackServer};
use crate::oauth::pkce::generate_pkce_pair;
use crate::oauth::token_exchange::{
    exchange_authorization_code, fetch_userinfo_email, http_client, TokenExchangeRequest,
};
use crate::shared::blocking;
use crate::shared::error::{AppError, AppResult};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

pub struct OAuthManager {
    settings: AuthSettings,
    client_secret: ClientSecret,
    store: CredentialStore,
    http: reqwest::Client,
    browser: Arc<dyn BrowserLauncher>,
}

impl std::fmt::Debug for OAuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthManager")
            .field("config_dir", &self.settings.config_dir)
            .field("client_id", &self.client_secret.client_id)
            .finish_non_exhaustive()
    }
}

impl OAuthManager {
    /// Load the application credential named by `settings.client_secret_path`.
    pub fn new(settings: AuthSettings) -> AppResult<Self> {
        let client_secret = client_secret::load(&settings.client_secret_path)?;
        Self::with_client_secret(settings, client_secret)
    }

    pub fn with_client_secret(settings: AuthSettings, client_secret: ClientSecret) -> AppResult<Self> {
        let http = http_client(settings.http_connect_timeout())?;
        let store = CredentialStore::new(settings.tokens_dir());
        tracing::debug!(
            tokens_dir = %store.dir().display(),
            "oauth manager initialized"
        );
        Ok(Self {
            settings,
            client_secret,
            store,
            http,
            browser: Arc::new(SystemBrowser),
        })
    }

    pub fn with_browser(mut self, browser: Arc<dyn BrowserLauncher>) -> Self {
        self.browser = browser;
        self
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub async fn list_accounts(&self) -> AppResult<Vec<String>> {
        let store = self.store.clone();
        blocking::run("oauth_list_accounts", move || store.list_identities()).await
    }

    /// Forget an account. Returns `false` when it was not signed in.
    pub async fn remove_account(&self, identity: &str) -> AppResult<bool> {
        let identity = normalize_identity(identity)?;
        let store = self.store.clone();
        blocking::run("oauth_remove_account", move || store.delete(&identity)).await
    }

    /// Run one interactive sign-in and return the email of the account that completed it.
    ///
    /// Whatever account the user picks in the browser is stored; an existing record for the
    /// same email is replaced.
    pub async fn authenticate_dynamic(&self, cancel: &CancellationToken) -> AppResult<String> {
        let preferred_port = self.settings.resolve_callback_port()?;
        let state = build_oauth_state();
        let pkce = generate_pkce_pair();

        let (server, channels) = CallbackServer::start(
            preferred_port,
            state.clone(),
            self.settings.result_wait_timeout(),
        )
        .await?;
        let port = server.port();
        let redirect_uri = make_redirect_uri(port);
        let auth_url = build_authorize_url(&AuthorizeUrlParams {
            auth_uri: &self.client_secret.auth_uri,
            client_id: &self.client_secret.client_id,
            redirect_uri: &redirect_uri,
            scopes: &self.settings.scopes,
            state: &state,
            code_challenge: &pkce.code_challenge,
        })?;

        tracing::info!(port, step = "waiting_callback", "oauth sign-in started");
        eprintln!(
            "\nSign in to Google to continue. If no browser window opens, visit:\n\n  {auth_url}\n"
        );
        if let Err(err) = self.browser.open(&auth_url) {
            tracing::warn!(port, "could not open browser; open the printed URL manually: {err}");
        }

        let CallbackChannels {
            code_rx,
            mut error_rx,
            result_tx,
        } = channels;

        let waited: AppResult<String> = tokio::select! {
            code = code_rx => code.map_err(|_| {
                AppError::new("SYSTEM_ERROR", "oauth callback listener stopped before a code arrived")
            }),
            Some(err) = error_rx.recv() => Err(err),
            _ = tokio::time::sleep(self.settings.flow_timeout()) => Err(AppError::new(
                "AUTH_TIMEOUT",
                format!(
                    "no sign-in completed within {}s; run `{}` to try again",
                    self.settings.flow_timeout_secs, self.settings.login_command
                ),
            )),
            _ = cancel.cancelled() => Err(AppError::new("AUTH_CANCELLED", "sign-in was cancelled")),
        };
        drop(error_rx);

        let code = match waited {
            Ok(code) => code,
            Err(err) => {
                tracing::warn!(port, step = "error", code = err.code(), "oauth sign-in ended without a code");
                self.finish(server, result_tx, AuthOutcome::empty()).await;
                return Err(err);
            }
        };

        tracing::info!(port, step = "exchanging", "oauth callback received");
        let (outcome, result) = self
            .exchange_and_persist(code, redirect_uri, pkce.code_verifier)
            .await;
        self.finish(server, result_tx, outcome).await;

        match &result {
            Ok(identity) => tracing::info!(identity = %identity, step = "done", "oauth sign-in completed"),
            Err(err) => tracing::warn!(step = "error", code = err.code(), "oauth sign-in failed: {}", err.message()),
        }
        result
    }

    async fn finish(
        &self,
        server: CallbackServer,
        result_tx: oneshot::Sender<AuthOutcome>,
        outcome: AuthOutcome,
    ) {
        // The browser tab may already be gone; nothing to do then.
        let _ = result_tx.send(outcome);
        server.shutdown(self.settings.shutdown_grace()).await;
    }

    /// Returns the page outcome alongside the call result: a save failure still names the
    /// account in the browser.
    async fn exchange_and_persist(
        &self,
        code: String,
        redirect_uri: String,
        code_verifier: String,
    ) -> (AuthOutcome, AppResult<String>) {
        let tokens = match exchange_authorization_code(
            &self.http,
            &TokenExchangeRequest {
                token_uri: self.client_secret.token_uri.clone(),
                client_id: self.client_secret.client_id.clone(),
                client_secret: self.client_secret.client_secret.clone(),
                code,
                redirect_uri,
                code_verifier,
            },
        )
        .await
        {
            Ok(tokens) => tokens,
            Err(err) => return (AuthOutcome::empty(), Err(err)),
        };

        let identity = match fetch_userinfo_email(
            &self.http,
            &self.settings.userinfo_url,
            &tokens.access_token,
        )
        .await
        .and_then(|email| {
            normalize_identity(&email).map_err(|e| {
                AppError::new(
                    "OAUTH_USERINFO_FAILED",
                    format!("provider returned an unusable email: {}", e.message()),
                )
            })
        }) {
            Ok(identity) => identity,
            Err(err) => return (AuthOutcome::empty(), Err(err)),
        };

        let store = self.store.clone();
        let identity_for_load = identity.clone();
        let previous = blocking::run("oauth_load_previous_credentials", move || {
            match store.load(&identity_for_load) {
                Ok(record) => Ok(Some(record)),
                Err(err) if err.is_no_credentials() => Ok(None),
                Err(err) => Err(err),
            }
        })
        .await
        .unwrap_or_else(|err| {
            tracing::warn!(identity = %identity, "ignoring unreadable previous credentials: {err}");
            None
        });

        let Some(refresh_token) = tokens
            .refresh_token
            .clone()
            .or_else(|| previous.map(|record| record.refresh_token))
            .filter(|v| !v.trim().is_empty())
        else {
            return (
                AuthOutcome::empty(),
                Err(AppError::new(
                    "OAUTH_EXCHANGE_FAILED",
                    format!(
                        "provider returned no refresh token for {identity}; remove this app's access in the Google account settings and run `{}` again",
                        self.settings.login_command
                    ),
                )),
            );
        };

        let record = CredentialRecord {
            access_token: tokens.access_token,
            refresh_token,
            token_type: tokens.token_type.unwrap_or_else(|| "Bearer".to_string()),
            token_uri: self.client_secret.token_uri.clone(),
            client_id: self.client_secret.client_id.clone(),
            client_secret: self.client_secret.client_secret.clone(),
            scopes: tokens.scopes.unwrap_or_else(|| self.settings.scopes.clone()),
            expires_at: tokens.expires_at,
        };

        let store = self.store.clone();
        let identity_for_save = identity.clone();
        let saved = blocking::run("oauth_save_credentials", move || {
            store.save(&identity_for_save, &record)?;
            store.list_identities()
        })
        .await;

        match saved {
            Ok(all) => {
                let other_identities = all.into_iter().filter(|id| *id != identity).collect();
                (
                    AuthOutcome {
                        identity: Some(identity.clone()),
                        other_identities,
                    },
                    Ok(identity),
                )
            }
            Err(err) => (
                AuthOutcome {
                    identity: Some(identity),
                    other_identities: Vec::new(),
                },
                Err(err),
            ),
        }
    }
}
