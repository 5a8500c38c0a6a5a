//! # HAL Message Envelope
//!
//! The universal wrapper for every message on the bus.
//!
//! ## Wire Format
//!
//! UTF-8 JSON with these fields:
//!
//! ```text
//! hal_major: int      hal_minor: int       schema: string
//! device_id: string   caps: [string]       ts: RFC 3339 string
//! payload: object     seq?: int            correlation_id?: string
//! ```
//!
//! Unknown fields are rejected. Decoded envelopes are validated before they
//! are handed out, so holding an `Envelope` means holding a well-formed one.
//!
//! ## Correlation
//!
//! - Requests: a freshly generated id, stamped by the requester.
//! - Replies: the id copied unchanged from the request.
//! - Telemetry: no id.

use crate::capability::{Capability, SchemaId};
use crate::errors::EnvelopeError;
use crate::{HAL_MAJOR, HAL_MINOR};
use chrono::{DateTime, SubsecRound, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Message payload: an opaque JSON object interpreted by the schema owner.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Maximum length of a device id.
const MAX_DEVICE_ID_LEN: usize = 64;

/// The HAL message envelope.
///
/// Immutable once built; the `with_*` helpers consume and return a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    hal_major: u32,
    hal_minor: u32,
    #[serde(rename = "schema")]
    schema_id: String,
    device_id: String,
    caps: BTreeSet<String>,
    #[serde(rename = "ts", with = "rfc3339")]
    timestamp: DateTime<Utc>,
    payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
}

impl Envelope {
    /// Start building an envelope for `schema_id` sent by `device_id`.
    pub fn builder(schema_id: impl Into<String>, device_id: impl Into<String>) -> EnvelopeBuilder {
        EnvelopeBuilder::new(schema_id, device_id)
    }

    /// A builder pre-filled with every field of this envelope.
    #[must_use]
    pub fn to_builder(&self) -> EnvelopeBuilder {
        EnvelopeBuilder {
            hal_major: self.hal_major,
            hal_minor: self.hal_minor,
            schema_id: self.schema_id.clone(),
            device_id: self.device_id.clone(),
            caps: self.caps.clone(),
            timestamp: Some(self.timestamp),
            payload: self.payload.clone(),
            seq: self.seq,
            correlation_id: self.correlation_id.clone(),
        }
    }

    /// HAL major version.
    #[must_use]
    pub fn hal_major(&self) -> u32 {
        self.hal_major
    }

    /// HAL minor version.
    #[must_use]
    pub fn hal_minor(&self) -> u32 {
        self.hal_minor
    }

    /// Payload schema id as carried on the wire.
    #[must_use]
    pub fn schema_id(&self) -> &str {
        &self.schema_id
    }

    /// Originating device.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Capability tags declared by the sender.
    #[must_use]
    pub fn caps(&self) -> &BTreeSet<String> {
        &self.caps
    }

    /// Creation time.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Raw payload object.
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Optional sequence number.
    #[must_use]
    pub fn seq(&self) -> Option<u64> {
        self.seq
    }

    /// Correlation id, present on request/reply traffic only.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// The correlation id, or an error for messages outside the request/reply protocol.
    pub fn require_correlation(&self) -> Result<&str, EnvelopeError> {
        self.correlation_id()
            .ok_or(EnvelopeError::MissingCorrelationId)
    }

    /// Parsed schema id.
    pub fn schema(&self) -> Result<SchemaId, EnvelopeError> {
        SchemaId::parse(&self.schema_id)
    }

    /// Replace the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Deserialize the payload into a concrete schema type.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        serde_json::from_value(serde_json::Value::Object(self.payload.clone()))
            .map_err(|e| EnvelopeError::Decode(e.to_string()))
    }

    /// Structural validation of every field.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.hal_major < 1 {
            return Err(EnvelopeError::InvalidVersion {
                major: self.hal_major,
                minor: self.hal_minor,
            });
        }

        SchemaId::parse(&self.schema_id)?;
        validate_device_id(&self.device_id)?;

        for cap in &self.caps {
            Capability::parse(cap)?;
        }

        if matches!(self.correlation_id.as_deref(), Some("")) {
            return Err(EnvelopeError::EmptyCorrelationId);
        }

        Ok(())
    }

    /// Encode to UTF-8 JSON.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Encode(e.to_string()))
    }

    /// Decode from UTF-8 JSON and validate.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Self =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Decode(e.to_string()))?;
        envelope.validate()?;
        Ok(envelope)
    }
}

/// Fluent builder for [`Envelope`].
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    hal_major: u32,
    hal_minor: u32,
    schema_id: String,
    device_id: String,
    caps: BTreeSet<String>,
    timestamp: Option<DateTime<Utc>>,
    payload: Payload,
    seq: Option<u64>,
    correlation_id: Option<String>,
}

impl EnvelopeBuilder {
    /// New builder stamped with the current HAL version and an empty payload.
    pub fn new(schema_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            hal_major: HAL_MAJOR,
            hal_minor: HAL_MINOR,
            schema_id: schema_id.into(),
            device_id: device_id.into(),
            caps: BTreeSet::new(),
            timestamp: None,
            payload: Payload::new(),
            seq: None,
            correlation_id: None,
        }
    }

    #[must_use]
    pub fn hal_version(mut self, major: u32, minor: u32) -> Self {
        self.hal_major = major;
        self.hal_minor = minor;
        self
    }

    #[must_use]
    pub fn schema_id(mut self, schema_id: impl Into<String>) -> Self {
        self.schema_id = schema_id.into();
        self
    }

    #[must_use]
    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    #[must_use]
    pub fn capability(mut self, cap: impl Into<String>) -> Self {
        self.caps.insert(cap.into());
        self
    }

    /// Replace the whole capability set.
    #[must_use]
    pub fn capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.caps = caps.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Serialize a typed payload. It must serialize to a JSON object.
    pub fn payload_from<T: Serialize>(mut self, payload: &T) -> Result<Self, EnvelopeError> {
        match serde_json::to_value(payload).map_err(|e| EnvelopeError::Encode(e.to_string()))? {
            serde_json::Value::Object(map) => {
                self.payload = map;
                Ok(self)
            }
            other => Err(EnvelopeError::Encode(format!(
                "payload must be a JSON object, got {other}"
            ))),
        }
    }

    /// Explicit timestamp; defaults to now at build time.
    #[must_use]
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    #[must_use]
    pub fn seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    #[must_use]
    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Validate and produce the envelope.
    pub fn build(self) -> Result<Envelope, EnvelopeError> {
        let envelope = Envelope {
            hal_major: self.hal_major,
            hal_minor: self.hal_minor,
            schema_id: self.schema_id,
            device_id: self.device_id,
            caps: self.caps,
            // Millisecond precision so that the wire form round-trips exactly.
            timestamp: self
                .timestamp
                .unwrap_or_else(Utc::now)
                .trunc_subsecs(3),
            payload: self.payload,
            seq: self.seq,
            correlation_id: self.correlation_id,
        };
        envelope.validate()?;
        Ok(envelope)
    }
}

/// Check a device id: 1 to 64 characters from `[A-Za-z0-9_-]`.
pub fn validate_device_id(device_id: &str) -> Result<(), EnvelopeError> {
    let invalid = |reason: &str| EnvelopeError::InvalidDeviceId {
        device_id: device_id.to_string(),
        reason: reason.to_string(),
    };

    if device_id.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if device_id.len() > MAX_DEVICE_ID_LEN {
        return Err(invalid("must be at most 64 characters"));
    }
    if !device_id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(invalid("allowed characters are [A-Za-z0-9_-]"));
    }
    Ok(())
}

mod rfc3339 {
    use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    /// Sub-millisecond digits from other peers are dropped to match the
    /// precision of envelopes built locally.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc).trunc_subsecs(3))
            .map_err(serde::de::Error::custom)
    }
}
