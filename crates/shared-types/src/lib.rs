//! # Shared Types Crate
//!
//! The HAL message envelope used for all bus traffic, as consumed by the
//! request/reply core and every device driver.
//!
//! ## Design Principles
//!
//! - **One wire shape**: every message is an [`Envelope`]; payloads are
//!   opaque JSON objects interpreted by whoever owns the schema.
//! - **Validate at the edge**: envelopes are validated when built and when
//!   decoded, so an `Envelope` value is always structurally sound.
//! - **Correlation is optional**: broadcast telemetry carries no
//!   `correlation_id`; request/reply traffic always does.

pub mod capability;
pub mod envelope;
pub mod errors;

pub use capability::{Capability, SchemaId};
pub use envelope::{validate_device_id, Envelope, EnvelopeBuilder, Payload};
pub use errors::EnvelopeError;

/// Current HAL major version stamped on new envelopes.
pub const HAL_MAJOR: u32 = 1;

/// Current HAL minor version stamped on new envelopes.
pub const HAL_MINOR: u32 = 0;
