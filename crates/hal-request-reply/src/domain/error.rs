//! Request/reply error types.

use shared_bus::TransportError;
use shared_types::EnvelopeError;
use std::time::Duration;
use thiserror::Error;

/// Reason reported to callers whose requests were cut short by `close()`.
pub const ENGINE_CLOSED: &str = "engine closed";

/// Reason reported when the engine was dropped with requests outstanding.
pub const ENGINE_DROPPED: &str = "engine dropped";

/// Terminal failure of a request.
#[derive(Debug, Error)]
pub enum RequestError {
    /// No reply arrived within the whole retry budget.
    #[error("Request on '{subject}' timed out after {}ms ({attempts} attempts)", .elapsed.as_millis())]
    RequestTimeout {
        subject: String,
        elapsed: Duration,
        attempts: u32,
    },

    /// The engine was closed or `cancel_all` was called.
    #[error("Request cancelled: {reason}")]
    Cancelled { reason: String },

    /// Publishing the request failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The request envelope could not be built or encoded.
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] EnvelopeError),
}

impl RequestError {
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. })
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid subject: {0}")]
    InvalidSubject(String),

    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("At least one capability is required")]
    MissingCapabilities,

    #[error("Invalid capability: {0}")]
    InvalidCapability(String),

    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("Invalid retry correlation policy: {0}")]
    InvalidRetryCorrelation(String),
}
