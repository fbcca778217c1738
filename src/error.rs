//! Error types for Daedalus

use thiserror::Error;

/// Main error type for Daedalus operations
#[derive(Debug, Error)]
pub enum DaedalusError {
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Persisted session is corrupt: {0}")]
    SessionCorrupt(String),
}

/// Result type alias for Daedalus operations
pub type Result<T> = std::result::Result<T, DaedalusError>;
