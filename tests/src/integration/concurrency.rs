//! # Concurrency Tests
//!
//! Many requests in flight on a multi-threaded runtime.
//!
//! ## Test Categories
//!
//! 1. **Independence**: concurrent requests never share an id and each
//!    gets its own reply
//! 2. **Races**: replies racing timeouts still yield exactly one outcome
//! 3. **Cancellation**: `cancel_all` under load

#[cfg(test)]
mod tests {
    use super::super::support::{payload, start_engine, MOTOR_SCHEMA, REPLIES, REQUESTS};
    use hal_request_reply::{RequestError, RequestOptions, RequestReplyConfig, Responder};
    use serde_json::json;
    use shared_bus::InMemoryBus;
    use shared_types::{Envelope, Payload};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_resolve_independently() {
        let bus = Arc::new(InMemoryBus::new());
        let engine = start_engine(&bus, RequestReplyConfig::default()).await;

        // Replies come back out of order.
        let _responder = Responder::new(bus.clone(), REQUESTS, REPLIES)
            .serve(|request: Envelope| async move {
                let n = request.payload()["n"].as_u64()?;
                tokio::time::sleep(Duration::from_millis(n % 7)).await;
                Some(request.payload().clone())
            })
            .await
            .unwrap();

        let tasks: Vec<_> = (0..100u64)
            .map(|n| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let reply = engine
                        .request_default(MOTOR_SCHEMA, payload(json!({ "n": n })))
                        .await
                        .unwrap();
                    assert_eq!(reply.payload()["n"], json!(n));
                    reply.correlation_id().unwrap().to_string()
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for task in tasks {
            ids.insert(task.await.unwrap());
        }

        assert_eq!(ids.len(), 100);
        assert_eq!(engine.pending_count(), 0);
        assert_eq!(engine.stats().resolved, 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reply_timeout_race_has_single_outcome() {
        let bus = Arc::new(InMemoryBus::new());
        let engine = start_engine(&bus, RequestReplyConfig::default()).await;

        // Delays straddle the 20ms timeout.
        let _responder = Responder::new(bus.clone(), REQUESTS, REPLIES)
            .serve(|request: Envelope| async move {
                let n = request.payload()["n"].as_u64()?;
                tokio::time::sleep(Duration::from_millis(n % 40)).await;
                Some(Payload::new())
            })
            .await
            .unwrap();

        let tasks: Vec<_> = (0..200u64)
            .map(|n| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let options = RequestOptions::new()
                        .with_timeout(Duration::from_millis(20))
                        .with_max_retries(0);
                    engine
                        .request(MOTOR_SCHEMA, payload(json!({ "n": n })), options)
                        .await
                })
            })
            .collect();

        let (mut ok, mut timed_out) = (0u64, 0u64);
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(RequestError::RequestTimeout { attempts, .. }) => {
                    assert_eq!(attempts, 1);
                    timed_out += 1;
                }
                Err(other) => panic!("unexpected outcome: {other}"),
            }
        }

        assert_eq!(ok + timed_out, 200);
        let stats = engine.stats();
        assert_eq!(stats.resolved, ok);
        assert_eq!(stats.timed_out, timed_out);
        assert_eq!(engine.pending_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancel_all_under_load() {
        let bus = Arc::new(InMemoryBus::new());
        let engine = start_engine(&bus, RequestReplyConfig::default()).await;

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.request_default(MOTOR_SCHEMA, Payload::new()).await })
            })
            .collect();

        // No responder: wait until every request is registered.
        for _ in 0..200 {
            if engine.pending_count() == 50 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(engine.pending_count(), 50);

        let (first, second) = {
            let a = engine.clone();
            let b = engine.clone();
            let first = tokio::spawn(async move { a.cancel_all("operator abort") });
            let second = tokio::spawn(async move { b.cancel_all("operator abort") });
            (first.await.unwrap(), second.await.unwrap())
        };
        assert_eq!(first + second, 50);

        for task in tasks {
            let err = task.await.unwrap().unwrap_err();
            assert!(err.is_cancelled(), "expected cancellation, got {err}");
        }
        assert_eq!(engine.pending_count(), 0);
        assert_eq!(engine.stats().cancelled, 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_two_engines_share_a_bus() {
        // Each engine only resolves its own requests; the other's replies
        // are unmatched noise.
        let bus = Arc::new(InMemoryBus::new());
        let hub = start_engine(&bus, RequestReplyConfig::default().with_device_id("hub-a")).await;
        let other = start_engine(&bus, RequestReplyConfig::default().with_device_id("hub-b")).await;

        let _responder = Responder::new(bus.clone(), REQUESTS, REPLIES)
            .serve(|request: Envelope| async move {
                Some(payload(json!({ "for": request.device_id() })))
            })
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            hub.request_default(MOTOR_SCHEMA, Payload::new()),
            other.request_default(MOTOR_SCHEMA, Payload::new()),
        );
        assert_eq!(a.unwrap().payload()["for"], json!("hub-a"));
        assert_eq!(b.unwrap().payload()["for"], json!("hub-b"));

        // Fan-out to the second engine may still be in progress.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hub.stats().unmatched, 1);
        assert_eq!(other.stats().unmatched, 1);
    }
}
