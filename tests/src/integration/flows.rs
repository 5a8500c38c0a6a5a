//! # Request/Reply Flows
//!
//! A requester engine and one or more responders talking over the
//! in-memory bus:
//!
//! ```text
//! [Engine] ──hal.v1.command──→ [Bus] ──→ [Responder]
//!    ↑                                        │
//!    └────────hal.v1.reply←── [Bus] ←─────────┘
//! ```
//!
//! ## Test Categories
//!
//! 1. **Round trip**: payloads and metadata survive the exchange
//! 2. **Routing**: per-device command subjects and wildcard reply subjects
//! 3. **Noise**: telemetry and garbage on the reply subject are ignored

#[cfg(test)]
mod tests {
    use super::super::support::{payload, start_engine, MOTOR_SCHEMA, REPLIES, REQUESTS};
    use hal_request_reply::{
        ReplyOverrides, RequestOptions, RequestReplyConfig, Responder,
    };
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use shared_bus::{command_subject, event_subject, InMemoryBus, Transport};
    use shared_types::{Envelope, Payload};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct MotorCommand {
        left: f64,
        right: f64,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct MotorStatus {
        accepted: bool,
        left_rpm: f64,
        right_rpm: f64,
    }

    fn to_payload<T: Serialize>(value: &T) -> Payload {
        payload(serde_json::to_value(value).unwrap())
    }

    // =============================================================================
    // ROUND TRIP
    // =============================================================================

    #[tokio::test]
    async fn test_typed_round_trip() {
        let bus = Arc::new(InMemoryBus::new());
        let engine = start_engine(&bus, RequestReplyConfig::default()).await;

        let _motor = Responder::new(bus.clone(), REQUESTS, REPLIES)
            .with_overrides(
                ReplyOverrides::new()
                    .with_device_id("esp32-001")
                    .with_schema_id("tafylabs/hal/motor/status/1.0")
                    .with_caps(["motor.differential:v1.0"]),
            )
            .serve(|request: Envelope| async move {
                let command: MotorCommand = request.decode_payload().ok()?;
                Some(to_payload(&MotorStatus {
                    accepted: true,
                    left_rpm: command.left * 100.0,
                    right_rpm: command.right * 100.0,
                }))
            })
            .await
            .unwrap();

        let command = MotorCommand {
            left: 0.5,
            right: -0.25,
        };
        let reply = engine
            .request_default(MOTOR_SCHEMA, to_payload(&command))
            .await
            .unwrap();

        let status: MotorStatus = reply.decode_payload().unwrap();
        assert_eq!(
            status,
            MotorStatus {
                accepted: true,
                left_rpm: 50.0,
                right_rpm: -25.0,
            }
        );
        assert_eq!(reply.device_id(), "esp32-001");
        assert_eq!(reply.schema_id(), "tafylabs/hal/motor/status/1.0");
        assert!(reply.caps().contains("motor.differential:v1.0"));
        assert_eq!(engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_request_carries_requester_identity() {
        let bus = Arc::new(InMemoryBus::new());
        let config = RequestReplyConfig::default().with_device_id("hub-kitchen");
        let engine = start_engine(&bus, config).await;

        let _echo = Responder::new(bus.clone(), REQUESTS, REPLIES)
            .serve(|request: Envelope| async move {
                Some(payload(json!({
                    "seen_device": request.device_id(),
                    "seen_caps": request.caps().iter().collect::<Vec<_>>(),
                    "seen_correlation": request.correlation_id(),
                })))
            })
            .await
            .unwrap();

        let reply = engine
            .request_default(MOTOR_SCHEMA, Payload::new())
            .await
            .unwrap();

        assert_eq!(reply.payload()["seen_device"], json!("hub-kitchen"));
        assert_eq!(reply.payload()["seen_caps"], json!(["system.request:v1.0"]));
        assert_eq!(
            reply.payload()["seen_correlation"],
            json!(reply.correlation_id().unwrap())
        );
        // Without overrides the reply echoes the request's routing metadata.
        assert_eq!(reply.device_id(), "hub-kitchen");
    }

    // =============================================================================
    // ROUTING
    // =============================================================================

    #[tokio::test]
    async fn test_per_device_command_subjects() {
        let bus = Arc::new(InMemoryBus::new());
        let config = RequestReplyConfig::default().with_reply_subject(Some("hal.v1.reply.>"));
        let engine = start_engine(&bus, config).await;

        let mut responders = Vec::new();
        for device in ["esp32-001", "esp32-002"] {
            let handle = Responder::new(
                bus.clone(),
                command_subject("node", device, "motor"),
                format!("hal.v1.reply.{device}"),
            )
            .with_overrides(ReplyOverrides::new().with_device_id(device))
            .serve(move |_request: Envelope| async move {
                Some(payload(json!({ "handled_by": device })))
            })
            .await
            .unwrap();
            responders.push(handle);
        }

        for device in ["esp32-002", "esp32-001"] {
            let options =
                RequestOptions::new().with_subject(command_subject("node", device, "motor"));
            let reply = engine
                .request(MOTOR_SCHEMA, Payload::new(), options)
                .await
                .unwrap();
            assert_eq!(reply.device_id(), device);
            assert_eq!(reply.payload()["handled_by"], json!(device));
        }
    }

    #[tokio::test]
    async fn test_replies_without_engine_subscription() {
        // The engine can also be fed by hand, e.g. from a transport callback
        // it does not own.
        let bus = Arc::new(InMemoryBus::new());
        let config = RequestReplyConfig::default().with_reply_subject(None);
        let engine = start_engine(&bus, config).await;
        assert_eq!(bus.subscription_count(), 0);

        let _responder = Responder::new(bus.clone(), REQUESTS, REPLIES)
            .serve(|_request: Envelope| async move { Some(Payload::new()) })
            .await
            .unwrap();

        let feeder = engine.clone();
        let mut replies = shared_bus::subscribe_stream(bus.as_ref(), REPLIES).await.unwrap();
        tokio::spawn(async move {
            while let Some(message) = replies.next().await {
                feeder.handle_bytes(&message.payload);
            }
        });

        let reply = engine
            .request(
                MOTOR_SCHEMA,
                Payload::new(),
                RequestOptions::new().with_timeout(Duration::from_secs(2)),
            )
            .await
            .unwrap();
        assert!(reply.correlation_id().is_some());
    }

    // =============================================================================
    // NOISE
    // =============================================================================

    #[tokio::test]
    async fn test_noise_on_reply_subject_is_ignored() {
        let bus = Arc::new(InMemoryBus::new());
        let engine = start_engine(&bus, RequestReplyConfig::default()).await;

        let telemetry = Envelope::builder("tafylabs/hal/sensor/range/1.0", "esp32-001")
            .capability("sensor.range:v1.0")
            .payload(payload(json!({ "distance_mm": 412 })))
            .seq(1)
            .build()
            .unwrap();
        bus.publish(REPLIES, telemetry.to_bytes().unwrap())
            .await
            .unwrap();
        bus.publish(REPLIES, b"\xff\xfe not json".to_vec())
            .await
            .unwrap();
        bus.publish(REPLIES, br#"{"hal_major":1}"#.to_vec())
            .await
            .unwrap();

        assert_eq!(engine.pending_count(), 0);
        assert_eq!(engine.stats().unmatched, 1);

        // Collaborator events on their own subjects never reach the engine.
        bus.publish(
            &event_subject("device", "esp32-001", "telemetry"),
            telemetry.to_bytes().unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(engine.stats().unmatched, 1);
    }
}

