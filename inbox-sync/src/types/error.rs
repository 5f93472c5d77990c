//! Unified error types for the inbox synchronizer
//!
//! This module defines error types that:
//! - Are serializable so snapshots can carry them to any consumer
//! - Separate authorization failures (forced logout) from everything else
//! - Map collaborator errors to a small, stable taxonomy

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type shared by the sync core and its backend collaborators
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum SyncError {
    /// The session's credentials were rejected (HTTP 401 or equivalent).
    /// Never surfaces as an `Errored` state; it forces a logout instead.
    #[error("Authorization expired: {0}")]
    AuthExpired(String),

    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    /// Isolated to one sender; cached as a negative entry.
    #[error("Photo resolution failed: {0}")]
    PhotoResolutionFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// Whether this error must be propagated to the auth boundary
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, SyncError::AuthExpired(_))
    }

    /// Fold any non-auth error into the inbox fetch failure bucket
    pub fn into_fetch_failure(self) -> Self {
        match self {
            SyncError::AuthExpired(_) | SyncError::FetchFailed(_) => self,
            other => SyncError::FetchFailed(other.to_string()),
        }
    }
}

// Implement From for common error types

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.status() == Some(reqwest::StatusCode::UNAUTHORIZED) {
            SyncError::AuthExpired(err.to_string())
        } else if err.is_decode() {
            SyncError::Parse(err.to_string())
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

impl From<String> for SyncError {
    fn from(err: String) -> Self {
        SyncError::Other(err)
    }
}

impl From<&str> for SyncError {
    fn from(err: &str) -> Self {
        SyncError::Other(err.to_string())
    }
}
