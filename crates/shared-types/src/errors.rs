//! # Error Types
//!
//! Structural validation and codec errors for HAL envelopes.

use thiserror::Error;

/// Errors produced while building, validating, encoding or decoding an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// Schema id does not follow `<org>/hal/<kind>/<name>/<major>.<minor>`.
    #[error("Invalid schema id '{schema_id}': {reason}")]
    InvalidSchemaId { schema_id: String, reason: String },

    /// Capability tag does not follow `<namespace>.<name>:v<major>.<minor>`.
    #[error("Invalid capability '{capability}': {reason}")]
    InvalidCapability { capability: String, reason: String },

    /// Device id is empty, too long, or contains disallowed characters.
    #[error("Invalid device id '{device_id}': {reason}")]
    InvalidDeviceId { device_id: String, reason: String },

    /// HAL version is out of range.
    #[error("Invalid HAL version {major}.{minor}: major version must be >= 1")]
    InvalidVersion { major: u32, minor: u32 },

    /// A correlation id was supplied but is empty.
    #[error("Correlation id must not be empty")]
    EmptyCorrelationId,

    /// The message takes part in request/reply but has no correlation id.
    #[error("Envelope has no correlation id")]
    MissingCorrelationId,

    /// Serialization failed.
    #[error("Encode error: {0}")]
    Encode(String),

    /// Deserialization failed (bad JSON, unknown field, bad timestamp).
    #[error("Decode error: {0}")]
    Decode(String),
}
