//! Cross-crate request/reply scenarios.

pub mod concurrency;
pub mod flows;
pub mod lifecycle;

#[cfg(test)]
pub(crate) mod support {
    use hal_request_reply::{RequestReplyConfig, RequestReplyEngine};
    use serde_json::Value;
    use shared_bus::InMemoryBus;
    use shared_types::Payload;
    use std::sync::Arc;

    pub const MOTOR_SCHEMA: &str = "tafylabs/hal/motor/differential/1.0";
    pub const REQUESTS: &str = "hal.v1.command";
    pub const REPLIES: &str = "hal.v1.reply";

    /// Turn a `json!` object literal into a payload.
    pub fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            other => panic!("payload must be an object, got {other}"),
        }
    }

    /// Engine on `bus`, already listening on its reply subject.
    pub async fn start_engine(bus: &Arc<InMemoryBus>, config: RequestReplyConfig) -> RequestReplyEngine {
        hal_telemetry::init_for_tests();
        let engine = RequestReplyEngine::new(bus.clone(), config).expect("valid config");
        engine.start().await.expect("reply subscription");
        engine
    }
}
