//! Transport errors.

use thiserror::Error;

/// Errors raised by a [`Transport`](crate::Transport).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport was closed.
    #[error("Transport closed")]
    Closed,

    /// The subject or subscription pattern is malformed.
    #[error("Invalid subject '{subject}': {reason}")]
    InvalidSubject { subject: String, reason: String },

    /// The underlying substrate refused the message.
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// The underlying substrate refused the subscription.
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),
}
