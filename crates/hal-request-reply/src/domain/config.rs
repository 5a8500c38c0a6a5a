//! Engine configuration with validation.

use crate::domain::error::ConfigError;
use serde::{Deserialize, Serialize};
use shared_bus::subject::{validate_pattern, validate_subject};
use shared_types::{envelope::validate_device_id, Capability, HAL_MAJOR, HAL_MINOR};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default subject requests are published on.
pub const DEFAULT_REQUEST_SUBJECT: &str = "hal.v1.command";

/// Default subject replies are received on.
pub const DEFAULT_REPLY_SUBJECT: &str = "hal.v1.reply";

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// How a retried request is keyed in the correlation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RetryCorrelation {
    /// Every attempt gets a brand-new id. A late reply to an earlier
    /// attempt no longer matches and is dropped as unmatched.
    #[default]
    #[serde(rename = "fresh")]
    FreshPerAttempt,

    /// One id for all attempts of a logical request. Any matching reply,
    /// however late, resolves the request.
    #[serde(rename = "stable")]
    Stable,
}

impl FromStr for RetryCorrelation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fresh" => Ok(Self::FreshPerAttempt),
            "stable" => Ok(Self::Stable),
            other => Err(ConfigError::InvalidRetryCorrelation(format!(
                "'{other}' (expected fresh|stable)"
            ))),
        }
    }
}

impl fmt::Display for RetryCorrelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FreshPerAttempt => f.write_str("fresh"),
            Self::Stable => f.write_str("stable"),
        }
    }
}

/// Request/reply engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestReplyConfig {
    /// Subject requests are published on.
    pub request_subject: String,
    /// Subject (or pattern) the engine listens on for replies, if any.
    pub reply_subject: Option<String>,
    /// Per-attempt timeout in milliseconds.
    pub default_timeout_ms: u64,
    /// Retries after the first attempt.
    pub default_max_retries: u32,
    /// Correlation id policy across retries.
    pub retry_correlation: RetryCorrelation,
    /// Device id stamped on outgoing requests.
    pub device_id: String,
    /// Capabilities stamped on outgoing requests.
    pub capabilities: Vec<String>,
    /// HAL major version stamped on outgoing requests.
    pub hal_major: u32,
    /// HAL minor version stamped on outgoing requests.
    pub hal_minor: u32,
}

impl Default for RequestReplyConfig {
    fn default() -> Self {
        Self {
            request_subject: DEFAULT_REQUEST_SUBJECT.to_string(),
            reply_subject: Some(DEFAULT_REPLY_SUBJECT.to_string()),
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            default_max_retries: 0,
            retry_correlation: RetryCorrelation::FreshPerAttempt,
            device_id: "tafy-hub".to_string(),
            capabilities: vec!["system.request:v1.0".to_string()],
            hal_major: HAL_MAJOR,
            hal_minor: HAL_MINOR,
        }
    }
}

impl RequestReplyConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `HAL_REQUEST_SUBJECT`: request subject (default: hal.v1.command)
    /// - `HAL_REPLY_SUBJECT`: reply subject, empty to disable (default: hal.v1.reply)
    /// - `HAL_REQUEST_TIMEOUT_MS`: per-attempt timeout (default: 5000)
    /// - `HAL_REQUEST_RETRIES`: retries after the first attempt (default: 0)
    /// - `HAL_RETRY_CORRELATION`: `fresh` or `stable` (default: fresh)
    /// - `HAL_DEVICE_ID`: requester device id (default: tafy-hub)
    /// - `HAL_CAPABILITIES`: comma-separated capability tags
    ///
    /// Unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            request_subject: env::var("HAL_REQUEST_SUBJECT")
                .unwrap_or(defaults.request_subject),

            reply_subject: match env::var("HAL_REPLY_SUBJECT") {
                Ok(v) if v.trim().is_empty() => None,
                Ok(v) => Some(v),
                Err(_) => defaults.reply_subject,
            },

            default_timeout_ms: env::var("HAL_REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_timeout_ms),

            default_max_retries: env::var("HAL_REQUEST_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_max_retries),

            retry_correlation: env::var("HAL_RETRY_CORRELATION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.retry_correlation),

            device_id: env::var("HAL_DEVICE_ID").unwrap_or(defaults.device_id),

            capabilities: env::var("HAL_CAPABILITIES")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|c| !c.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or(defaults.capabilities),

            hal_major: defaults.hal_major,
            hal_minor: defaults.hal_minor,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_subject(&self.request_subject)
            .map_err(|e| ConfigError::InvalidSubject(e.to_string()))?;

        if let Some(reply_subject) = &self.reply_subject {
            validate_pattern(reply_subject)
                .map_err(|e| ConfigError::InvalidSubject(e.to_string()))?;
        }

        if self.default_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout(
                "default timeout cannot be 0".into(),
            ));
        }

        // Requests always declare what the requester speaks.
        if self.capabilities.is_empty() {
            return Err(ConfigError::MissingCapabilities);
        }
        for cap in &self.capabilities {
            Capability::parse(cap).map_err(|e| ConfigError::InvalidCapability(e.to_string()))?;
        }

        validate_device_id(&self.device_id)
            .map_err(|e| ConfigError::InvalidIdentity(e.to_string()))?;

        if self.hal_major == 0 {
            return Err(ConfigError::InvalidIdentity(
                "hal_major must be >= 1".into(),
            ));
        }

        Ok(())
    }

    /// Per-attempt timeout.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Builder-style method to set the request subject
    pub fn with_request_subject(mut self, subject: impl Into<String>) -> Self {
        self.request_subject = subject.into();
        self
    }

    /// Builder-style method to set or clear the reply subject
    pub fn with_reply_subject(mut self, subject: Option<&str>) -> Self {
        self.reply_subject = subject.map(String::from);
        self
    }

    /// Builder-style method to set the default timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Builder-style method to set the default retry budget
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.default_max_retries = retries;
        self
    }

    /// Builder-style method to set the retry correlation policy
    pub fn with_retry_correlation(mut self, policy: RetryCorrelation) -> Self {
        self.retry_correlation = policy;
        self
    }

    /// Builder-style method to set the requester device id
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }
}

/// Per-call overrides for [`request`](crate::RequestReplyEngine::request).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Per-attempt timeout; defaults to the engine's.
    pub timeout: Option<Duration>,
    /// Retries after the first attempt; defaults to the engine's.
    pub max_retries: Option<u32>,
    /// Subject to publish on; defaults to the engine's request subject.
    pub subject: Option<String>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}
