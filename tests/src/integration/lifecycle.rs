//! # Lifecycle Tests
//!
//! Retries against a flaky responder, shutdown while requests are in
//! flight, and loss of the transport.

#[cfg(test)]
mod tests {
    use super::super::support::{payload, start_engine, MOTOR_SCHEMA, REPLIES, REQUESTS};
    use hal_request_reply::{
        RequestError, RequestOptions, RequestReplyConfig, RequestReplyEngine, Responder,
        RetryCorrelation,
    };
    use parking_lot::Mutex;
    use serde_json::json;
    use shared_bus::{InMemoryBus, TransportError};
    use shared_types::{Envelope, Payload};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// 50ms per attempt, up to three attempts.
    fn retrying() -> RequestOptions {
        RequestOptions::new()
            .with_timeout(Duration::from_millis(50))
            .with_max_retries(2)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_dropped_request() {
        for policy in [RetryCorrelation::FreshPerAttempt, RetryCorrelation::Stable] {
            let bus = Arc::new(InMemoryBus::new());
            let config = RequestReplyConfig::default().with_retry_correlation(policy);
            let engine = start_engine(&bus, config).await;

            // Loses the first request it sees.
            let seen = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&seen);
            let _responder = Responder::new(bus.clone(), REQUESTS, REPLIES)
                .serve(move |_request: Envelope| {
                    let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
                    async move { (!first).then(Payload::new) }
                })
                .await
                .unwrap();

            let reply = engine
                .request(MOTOR_SCHEMA, Payload::new(), retrying())
                .await
                .unwrap();

            assert!(reply.correlation_id().is_some());
            assert_eq!(seen.load(Ordering::SeqCst), 2);
            let stats = engine.stats();
            assert_eq!(stats.retried, 1);
            assert_eq!(stats.resolved, 1);
            assert_eq!(engine.pending_count(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stable_ids_let_slow_replies_win() {
        let bus = Arc::new(InMemoryBus::new());
        let config =
            RequestReplyConfig::default().with_retry_correlation(RetryCorrelation::Stable);
        let engine = start_engine(&bus, config).await;

        // Answers only the first sighting of each id, and slowly.
        let answered: Arc<Mutex<HashMap<String, usize>>> = Arc::default();
        let book = Arc::clone(&answered);
        let _responder = Responder::new(bus.clone(), REQUESTS, REPLIES)
            .serve(move |request: Envelope| {
                let id = request.correlation_id().unwrap_or_default().to_string();
                let sightings = {
                    let mut book = book.lock();
                    let count = book.entry(id).or_insert(0);
                    *count += 1;
                    *count
                };
                async move {
                    if sightings > 1 {
                        return None;
                    }
                    tokio::time::sleep(Duration::from_millis(70)).await;
                    Some(payload(json!({ "late": true })))
                }
            })
            .await
            .unwrap();

        let reply = engine
            .request(MOTOR_SCHEMA, Payload::new(), retrying())
            .await
            .unwrap();

        assert_eq!(reply.payload()["late"], json!(true));
        assert_eq!(answered.lock().len(), 1);
        assert_eq!(engine.stats().retried, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_ids_drop_slow_replies() {
        let bus = Arc::new(InMemoryBus::new());
        let engine = start_engine(&bus, RequestReplyConfig::default()).await;

        // Every reply takes longer than one attempt.
        let _responder = Responder::new(bus.clone(), REQUESTS, REPLIES)
            .serve(|_request: Envelope| async move {
                tokio::time::sleep(Duration::from_millis(70)).await;
                Some(Payload::new())
            })
            .await
            .unwrap();

        let err = engine
            .request(
                MOTOR_SCHEMA,
                Payload::new(),
                retrying(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RequestError::RequestTimeout { attempts: 3, .. }));
        // Replies to the first two attempts arrived after their ids were retired.
        assert_eq!(engine.stats().unmatched, 2);
    }

    #[tokio::test]
    async fn test_close_with_requests_in_flight() {
        let bus = Arc::new(InMemoryBus::new());
        let engine = start_engine(&bus, RequestReplyConfig::default()).await;
        let _silent = Responder::new(bus.clone(), REQUESTS, REPLIES)
            .serve(|_request: Envelope| async move { None })
            .await
            .unwrap();
        let before = bus.subscription_count();

        let requester = engine.clone();
        let in_flight =
            tokio::spawn(async move { requester.request_default(MOTOR_SCHEMA, Payload::new()).await });
        while engine.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        engine.close();

        match in_flight.await.unwrap() {
            Err(RequestError::Cancelled { reason }) => assert_eq!(reason, "engine closed"),
            other => panic!("expected cancellation, got {other:?}"),
        }
        assert_eq!(bus.subscription_count(), before - 1);
        assert!(engine
            .request_default(MOTOR_SCHEMA, Payload::new())
            .await
            .unwrap_err()
            .is_cancelled());
    }

    #[tokio::test]
    async fn test_closed_transport_fails_fast() {
        let bus = Arc::new(InMemoryBus::new());
        let engine = start_engine(&bus, RequestReplyConfig::default()).await;

        bus.close();

        let err = engine
            .request_default(MOTOR_SCHEMA, Payload::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Transport(TransportError::Closed)));
        assert_eq!(engine.pending_count(), 0);
        assert_eq!(engine.stats().transport_failures, 1);
    }

    #[tokio::test]
    async fn test_engine_from_env_defaults() {
        // Only asserts on values the environment is unlikely to override.
        let config = RequestReplyConfig::from_env();
        let engine = RequestReplyEngine::new(Arc::new(InMemoryBus::new()), config);
        if let Ok(engine) = engine {
            assert!(engine.config().default_timeout() > Duration::ZERO);
            assert_eq!(engine.config().hal_major, 1);
        }
    }
}
