// Allow missing docs for internal items in development
#![allow(missing_docs)]

//! HAL Request/Reply - correlation-based request/reply over publish/subscribe.
//!
//! Turns an at-most-once bus into an awaitable call: a request goes out
//! stamped with a fresh correlation id, and the caller is resumed when the
//! reply carrying that id comes back, when every attempt has timed out, or
//! when the engine is cancelled.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                  RequestReplyEngine                        │
//! ├───────────────────────────────────────────────────────────┤
//! │  request() ──► Correlation Table ◄── handle_message()      │
//! │      │        (id → PendingRequest)          ▲             │
//! │      │               ▲                       │             │
//! │      │          timer / retry                │             │
//! │      ▼                                       │             │
//! │  publish(request_subject)       reply_handler(bytes)       │
//! └──────┼───────────────────────────────────────┼─────────────┘
//!        │                                       │
//!        ▼               Transport               │
//!   ┌──────────┐                           ┌──────────┐
//!   │ Responder│ ── create_reply() ──────► │ reply    │
//!   └──────────┘                           │ subject  │
//!                                          └──────────┘
//! ```
//!
//! # Guarantees
//!
//! - Every request ends in exactly one outcome: reply, timeout, transport
//!   failure or cancellation.
//! - An entry is removed from the table before it is resolved, so a reply
//!   racing a timer can never resolve a request twice.
//! - Retries follow [`RetryCorrelation`]: a fresh id per attempt by
//!   default, or one stable id for every attempt.
//!
//! # Usage
//!
//! ```ignore
//! use hal_request_reply::{RequestReplyConfig, RequestReplyEngine};
//! use shared_bus::InMemoryBus;
//! use std::sync::Arc;
//!
//! let bus = Arc::new(InMemoryBus::new());
//! let engine = RequestReplyEngine::new(bus, RequestReplyConfig::from_env())?;
//! engine.start().await?;
//! let reply = engine.request_default("tafylabs/hal/motor/differential/1.0", payload).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod adapters;
pub mod domain;
pub mod service;

pub use adapters::{Responder, ResponderHandle};
pub use domain::{
    create_reply, ConfigError, CorrelationId, CorrelationTable, PendingRequest, ReplyOverrides,
    RequestContext, RequestError, RequestOptions, RequestReplyConfig, RetryCorrelation,
    StatsSnapshot,
};
pub use service::RequestReplyEngine;
