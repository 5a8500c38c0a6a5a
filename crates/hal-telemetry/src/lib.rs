//! # HAL Telemetry
//!
//! Structured logging for the HAL request/reply stack, built on `tracing`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hal_telemetry::{init_logging, TelemetryConfig};
//!
//! fn main() {
//!     init_logging(&TelemetryConfig::from_env()).expect("Failed to init logging");
//!     // Spans and events from every crate are now written out
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTEL_SERVICE_NAME` | `tafy-hal` | Service name in logs |
//! | `HAL_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter |
//! | `HAL_CONSOLE_OUTPUT` | `true` | Write logs to the console |
//! | `HAL_JSON_LOGS` | `false` (`true` in containers) | JSON log lines |

#![allow(missing_docs)]

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::{init_for_tests, init_logging};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("Failed to install subscriber: {0}")]
    Init(String),
}
