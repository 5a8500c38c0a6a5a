//! Domain layer for request/reply.

pub mod config;
pub mod correlation;
pub mod error;
pub mod pending;
pub mod reply;

pub use config::{RequestOptions, RequestReplyConfig, RetryCorrelation};
pub use correlation::CorrelationId;
pub use error::{ConfigError, RequestError};
pub use pending::{
    CorrelationTable, EngineStats, PendingRequest, RequestContext, RequestOutcome, StatsSnapshot,
};
pub use reply::{create_reply, ReplyOverrides};
