//! Error types for the Lantern crawler

use thiserror::Error;

/// Main error type for Lantern operations
#[derive(Debug, Error)]
pub enum LanternError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid scan configuration: {0}")]
    ConfigError(String),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Browser error: {0}")]
    BrowserError(String),

    #[error("Request deadline of {0} ms exceeded")]
    Deadline(u64),

    #[error("Scan stopped by user")]
    Stopped,

    #[error("Unknown scan session: {0}")]
    UnknownSession(String),
}

/// Result type alias for Lantern operations
pub type Result<T> = std::result::Result<T, LanternError>;
