//! Responder-side reply construction.

use chrono::{SubsecRound, Utc};
use shared_types::{Envelope, EnvelopeError, Payload};
use std::collections::BTreeSet;

/// Fields a responder may change when replying.
///
/// Anything left `None` is copied from the request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyOverrides {
    pub device_id: Option<String>,
    pub schema_id: Option<String>,
    pub caps: Option<BTreeSet<String>>,
    pub seq: Option<u64>,
    pub hal_version: Option<(u32, u32)>,
}

impl ReplyOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply as the responding device rather than echoing the requester.
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_schema_id(mut self, schema_id: impl Into<String>) -> Self {
        self.schema_id = Some(schema_id.into());
        self
    }

    pub fn with_caps<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.caps = Some(caps.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    pub fn with_hal_version(mut self, major: u32, minor: u32) -> Self {
        self.hal_version = Some((major, minor));
        self
    }
}

/// Build the reply to `request` carrying `payload`.
///
/// The correlation id is copied unchanged and the timestamp is never
/// earlier than the request's.
///
/// # Errors
///
/// `MissingCorrelationId` if `request` is not part of a request/reply
/// exchange, or any validation error introduced by `overrides`.
pub fn create_reply(
    request: &Envelope,
    payload: Payload,
    overrides: ReplyOverrides,
) -> Result<Envelope, EnvelopeError> {
    request.require_correlation()?;

    // Compare at wire precision so the later truncation in `build` cannot
    // move the reply behind the request.
    let timestamp = Utc::now().trunc_subsecs(3).max(request.timestamp());
    let mut builder = request.to_builder().payload(payload).timestamp(timestamp);

    if let Some(device_id) = overrides.device_id {
        builder = builder.device_id(device_id);
    }
    if let Some(schema_id) = overrides.schema_id {
        builder = builder.schema_id(schema_id);
    }
    if let Some(caps) = overrides.caps {
        builder = builder.capabilities(caps);
    }
    if let Some(seq) = overrides.seq {
        builder = builder.seq(seq);
    }
    if let Some((major, minor)) = overrides.hal_version {
        builder = builder.hal_version(major, minor);
    }

    builder.build()
}
