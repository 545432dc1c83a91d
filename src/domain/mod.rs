//! Usage: Domain modules (credential records and the application credential).

pub mod client_secret;
pub mod credentials;
