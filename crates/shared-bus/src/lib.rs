//! # Shared Bus - Publish/Subscribe Transport
//!
//! The transport capability consumed by the request/reply core, plus an
//! in-process implementation used for single-node deployments and tests.
//!
//! ## Delivery Model
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │  Requester   │                    │  Responder   │
//! │              │   publish(subj)    │              │
//! │              │ ──────┐            │              │
//! └──────────────┘       │            └──────────────┘
//!        ↑               ▼                    ↑
//!        │         ┌──────────────┐           │
//!        └──────── │     Bus      │ ──────────┘
//!     subscribe()  │              │  subscribe()
//!                  └──────────────┘
//! ```
//!
//! - **At-most-once**: a message with no matching subscriber is dropped.
//! - **Subjects**: dot-separated tokens; `*` matches one token, `>` matches
//!   the remaining tail (see [`subject`]).
//! - **No reconnection, no auth**: those belong to the real messaging
//!   substrate behind a production [`Transport`] implementation.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod error;
pub mod publisher;
pub mod subject;
pub mod subscriber;

// Re-export main types
pub use error::TransportError;
pub use publisher::{InMemoryBus, Transport};
pub use subject::{command_subject, event_subject, subject_matches};
pub use subscriber::{subscribe_stream, BusMessage, MessageHandler, MessageStream, Subscription};
