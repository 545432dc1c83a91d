//! Multi-account Google OAuth2 credentials for Workspace tool servers.
//!
//! Build one [`OAuthManager`] per process, wrap it in a [`ClientResolver`] and hand the
//! resolver (behind an `Arc`) to whatever needs an authenticated client.

pub mod client;
pub mod domain;
pub mod infra;
pub mod oauth;
pub mod shared;

pub use client::{AuthorizedClient, ClientResolver};
pub use domain::client_secret::ClientSecret;
pub use domain::credentials::{CredentialRecord, CredentialStore};
pub use infra::logging::LoggingOptions;
pub use infra::settings::AuthSettings;
pub use oauth::browser::{BrowserLauncher, NoBrowser, SystemBrowser};
pub use oauth::flow::OAuthManager;
pub use oauth::AuthOutcome;
pub use shared::error::{AppError, AppResult};
