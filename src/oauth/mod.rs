//! Usage: Google OAuth2 authorization code flow (listener, exchange, refresh).

pub mod authorize_url;
pub mod browser;
pub(crate) mod callback_server;
pub mod flow;
pub(crate) mod pages;
pub(crate) mod pkce;
pub(crate) mod token_exchange;
pub(crate) mod token_source;

pub use callback_server::AuthOutcome;
