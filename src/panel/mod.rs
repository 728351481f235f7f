//! Client for the 3X-UI panel REST API.
//!
//! The panel protects its API with a session cookie obtained from a form
//! login. [`SessionClient`] keeps that cookie, logs in again once it expires
//! and exposes typed fetches on top.

pub mod client;
pub mod models;

pub use client::{PanelOptions, Session, SessionClient};
pub use models::{ClientStats, Envelope, Inbound, Online};

/// Everything that can go wrong talking to the panel.
#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    #[error("invalid panel url: {0}")]
    InvalidUrl(String),

    #[error("failed to load CA certificate: {0}")]
    Tls(String),

    /// Bad credentials or a login answer without the session cookie.
    #[error("login failed: {0}")]
    Auth(String),

    /// Network, DNS, TLS or timeout failure.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("bad status code: {0}")]
    RemoteStatus(u16),

    /// The panel answered `success: false`.
    #[error("panel api error: {0}")]
    RemoteApi(String),

    #[error("malformed panel response: {0}")]
    Malformed(#[from] serde_json::Error),
}
