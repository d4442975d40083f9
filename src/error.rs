//! Error types for Pagetrail

use thiserror::Error;

/// Errors that can occur while recording or delivering a session
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Stored queue rejected: {0}")]
    Schema(String),

    #[error("Unsupported stored queue version: {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Collector disabled for this user agent")]
    Disabled,

    #[error("Collector not initialised")]
    NotInitialized,

    #[error("Invalid replay script: {0}")]
    Script(String),
}

/// Failures reported by a durable storage or cookie backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("storage quota exceeded while writing {0}")]
    QuotaExceeded(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Failures reported by a transport backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("beacon transport threw: {0}")]
    Beacon(String),

    #[error("request transport failed: {0}")]
    Request(String),
}
