//! Request/reply engine: the main entry point.
//!
//! Publishes request envelopes stamped with a correlation id, suspends the
//! caller on a oneshot channel, and resolves it when the matching reply is
//! delivered, when the retry budget runs out, or on cancellation.

use crate::adapters::bus_adapter::reply_handler;
use crate::domain::config::{RequestOptions, RequestReplyConfig, RetryCorrelation};
use crate::domain::correlation::CorrelationId;
use crate::domain::error::{ConfigError, RequestError, ENGINE_CLOSED, ENGINE_DROPPED};
use crate::domain::pending::{
    CorrelationTable, EngineStats, PendingRequest, RequestContext, StatsSnapshot,
};
use crate::domain::reply::{create_reply, ReplyOverrides};
use chrono::Utc;
use parking_lot::Mutex;
use shared_bus::{Subscription, Transport, TransportError};
use shared_types::{Envelope, EnvelopeError, Payload};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Correlation-based request/reply over a [`Transport`].
///
/// Cheap to clone; clones share the same correlation table.
#[derive(Clone)]
pub struct RequestReplyEngine {
    core: Arc<EngineCore>,
}

/// State shared by the engine handles, its timers and its reply handler.
///
/// Timers and the reply handler hold `Weak` references, so dropping every
/// engine handle tears everything down.
pub(crate) struct EngineCore {
    transport: Arc<dyn Transport>,
    config: RequestReplyConfig,
    table: Mutex<CorrelationTable>,
    reply_subscription: Mutex<Option<Subscription>>,
    closed: AtomicBool,
    stats: EngineStats,
}

/// What a fired timer decided while holding the table lock.
enum Expiry {
    Exhausted(PendingRequest),
    Retry {
        next_id: CorrelationId,
        subject: String,
        bytes: Vec<u8>,
        attempt: u32,
    },
    Failed(PendingRequest, EnvelopeError),
}

impl RequestReplyEngine {
    /// Create an engine over `transport`.
    ///
    /// Does not subscribe to replies; call [`start`](Self::start) or
    /// [`subscribe_to_replies`](Self::subscribe_to_replies), or feed replies
    /// through [`handle_message`](Self::handle_message).
    pub fn new(
        transport: Arc<dyn Transport>,
        config: RequestReplyConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        debug!(
            request_subject = %config.request_subject,
            reply_subject = ?config.reply_subject,
            timeout_ms = config.default_timeout_ms,
            max_retries = config.default_max_retries,
            retry_correlation = %config.retry_correlation,
            "Request/reply engine created"
        );

        Ok(Self {
            core: Arc::new(EngineCore {
                transport,
                config,
                table: Mutex::new(CorrelationTable::new()),
                reply_subscription: Mutex::new(None),
                closed: AtomicBool::new(false),
                stats: EngineStats::default(),
            }),
        })
    }

    /// Subscribe to the configured reply subject, if there is one.
    pub async fn start(&self) -> Result<(), TransportError> {
        match self.core.config.reply_subject.clone() {
            Some(subject) => self.subscribe_to_replies(&subject).await,
            None => Ok(()),
        }
    }

    /// Send a request and wait for its reply.
    ///
    /// # Errors
    ///
    /// - `RequestTimeout` once every attempt has timed out
    /// - `Cancelled` if the engine is closed or `cancel_all` is called
    /// - `Transport` if publishing any attempt fails
    /// - `InvalidRequest` if the envelope cannot be built
    pub async fn request(
        &self,
        schema_id: &str,
        payload: Payload,
        options: RequestOptions,
    ) -> Result<Envelope, RequestError> {
        let core = &self.core;
        if core.is_closed() {
            return Err(RequestError::cancelled(ENGINE_CLOSED));
        }

        let config = &core.config;
        let subject = options
            .subject
            .unwrap_or_else(|| config.request_subject.clone());
        let timeout = options.timeout.unwrap_or_else(|| config.default_timeout());
        let max_retries = options.max_retries.unwrap_or(config.default_max_retries);

        let template = Envelope::builder(schema_id, config.device_id.as_str())
            .hal_version(config.hal_major, config.hal_minor)
            .capabilities(config.capabilities.iter().map(String::as_str))
            .payload(payload)
            .build()?;

        let id = CorrelationId::new();
        let bytes = stamp(&template, id)?;
        let (tx, rx) = oneshot::channel();

        {
            let mut table = core.table.lock();
            // Checked under the lock so that close() cannot drain before we insert.
            if core.is_closed() {
                return Err(RequestError::cancelled(ENGINE_CLOSED));
            }
            let context = RequestContext {
                subject: subject.clone(),
                template,
                timeout,
                started_at: Instant::now(),
            };
            let mut pending = PendingRequest::new(tx, context, max_retries);
            pending.arm(core.spawn_timer(id, timeout));
            table.insert(id, pending);
        }

        if core.publish_attempt(id, &subject, bytes).await {
            debug!(
                correlation_id = %id,
                subject = %subject,
                timeout_ms = timeout.as_millis(),
                max_retries = max_retries,
                "Request published"
            );
        }

        rx.await
            .unwrap_or_else(|_| Err(RequestError::cancelled(ENGINE_DROPPED)))
    }

    /// [`request`](Self::request) with the engine's default options.
    pub async fn request_default(
        &self,
        schema_id: &str,
        payload: Payload,
    ) -> Result<Envelope, RequestError> {
        self.request(schema_id, payload, RequestOptions::default())
            .await
    }

    /// Offer an inbound envelope as a reply.
    ///
    /// Returns `true` if it matched a pending request, which is then resolved.
    pub fn handle_message(&self, reply: &Envelope) -> bool {
        self.core.handle_message(reply)
    }

    /// Decode raw bytes and offer them as a reply.
    ///
    /// Malformed input is logged and dropped.
    pub fn handle_bytes(&self, bytes: &[u8]) -> bool {
        self.core.handle_bytes(bytes)
    }

    /// Build the reply to `request`; see [`create_reply`].
    pub fn create_reply(
        &self,
        request: &Envelope,
        payload: Payload,
        overrides: ReplyOverrides,
    ) -> Result<Envelope, EnvelopeError> {
        create_reply(request, payload, overrides)
    }

    /// Deliver replies arriving on `subject` to this engine.
    ///
    /// Replaces any reply subscription the engine already owns.
    pub async fn subscribe_to_replies(&self, subject: &str) -> Result<(), TransportError> {
        let handler = reply_handler(Arc::downgrade(&self.core));
        let subscription = self.core.transport.subscribe(subject, handler).await?;

        let previous = {
            let mut slot = self.core.reply_subscription.lock();
            if self.core.is_closed() {
                drop(slot);
                subscription.unsubscribe();
                return Err(TransportError::Closed);
            }
            slot.replace(subscription)
        };
        if let Some(previous) = previous {
            previous.unsubscribe();
        }

        info!(subject = subject, "Listening for replies");
        Ok(())
    }

    /// Fail every pending request with `Cancelled { reason }`.
    ///
    /// Returns how many requests were cancelled.
    pub fn cancel_all(&self, reason: &str) -> usize {
        self.core.cancel_all(reason)
    }

    /// Stop the engine: drop the reply subscription and cancel everything
    /// in flight. Later requests fail with `Cancelled`.
    pub fn close(&self) {
        if self.core.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let subscription = self.core.reply_subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }

        let cancelled = self.core.cancel_all(ENGINE_CLOSED);
        info!(cancelled = cancelled, "Request/reply engine closed");
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Number of requests awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.core.table.lock().len()
    }

    /// Whether `id` belongs to an in-flight attempt.
    pub fn is_pending(&self, id: &CorrelationId) -> bool {
        self.core.table.lock().contains(id)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats.snapshot()
    }

    pub fn config(&self) -> &RequestReplyConfig {
        &self.core.config
    }
}

impl std::fmt::Debug for RequestReplyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestReplyEngine")
            .field("request_subject", &self.core.config.request_subject)
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl EngineCore {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Arm the timer for one attempt.
    fn spawn_timer(self: &Arc<Self>, id: CorrelationId, timeout: Duration) -> AbortHandle {
        let core = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(core) = core.upgrade() {
                core.on_timeout(id).await;
            }
        })
        .abort_handle()
    }

    async fn publish(&self, subject: &str, bytes: Vec<u8>) -> Result<(), TransportError> {
        match self.transport.publish(subject, bytes).await {
            Ok(()) => {
                EngineStats::incr(&self.stats.published);
                Ok(())
            }
            Err(e) => {
                EngineStats::incr(&self.stats.transport_failures);
                Err(e)
            }
        }
    }

    /// Publish one attempt of `id` if it is still in flight.
    ///
    /// Returns `true` once the transport accepted the bytes. A failed publish
    /// terminates the request.
    async fn publish_attempt(&self, id: CorrelationId, subject: &str, bytes: Vec<u8>) -> bool {
        if self.is_closed() || !self.table.lock().contains(&id) {
            debug!(correlation_id = %id, subject = %subject, "Request settled before publish");
            return false;
        }
        match self.publish(subject, bytes).await {
            Ok(()) => true,
            Err(e) => {
                self.fail(id, e);
                false
            }
        }
    }

    /// Terminate `id` with a publish failure, unless something else already did.
    fn fail(&self, id: CorrelationId, error: TransportError) {
        let pending = self.table.lock().remove(&id);
        if let Some(pending) = pending {
            warn!(
                correlation_id = %id,
                subject = %pending.context().subject,
                attempt = pending.attempt(),
                error = %error,
                "Request publish failed"
            );
            pending.resolve(Err(error.into()));
        }
    }

    async fn on_timeout(self: Arc<Self>, id: CorrelationId) {
        let expiry = {
            let mut table = self.table.lock();
            let Some(mut pending) = table.remove(&id) else {
                return;
            };
            // This task is the timer; it must not abort itself.
            pending.take_timer();

            if pending.is_abandoned() {
                debug!(correlation_id = %id, "Caller gone, dropping request");
                return;
            }

            if !pending.begin_retry() {
                Expiry::Exhausted(pending)
            } else {
                let next_id = match self.config.retry_correlation {
                    RetryCorrelation::Stable => id,
                    RetryCorrelation::FreshPerAttempt => CorrelationId::new(),
                };
                match stamp(&pending.context().template, next_id) {
                    Ok(bytes) => {
                        let subject = pending.context().subject.clone();
                        let attempt = pending.attempt();
                        pending.arm(self.spawn_timer(next_id, pending.context().timeout));
                        table.insert(next_id, pending);
                        Expiry::Retry {
                            next_id,
                            subject,
                            bytes,
                            attempt,
                        }
                    }
                    Err(e) => Expiry::Failed(pending, e),
                }
            }
        };

        match expiry {
            Expiry::Exhausted(pending) => {
                let context = pending.context();
                let subject = context.subject.clone();
                let elapsed = context.started_at.elapsed();
                let attempts = pending.attempt();

                warn!(
                    correlation_id = %id,
                    subject = %subject,
                    attempts = attempts,
                    elapsed_ms = elapsed.as_millis(),
                    "Request timed out"
                );
                EngineStats::incr(&self.stats.timed_out);
                pending.resolve(Err(RequestError::RequestTimeout {
                    subject,
                    elapsed,
                    attempts,
                }));
            }
            Expiry::Retry {
                next_id,
                subject,
                bytes,
                attempt,
            } => {
                EngineStats::incr(&self.stats.retried);
                debug!(
                    correlation_id = %next_id,
                    previous_id = %id,
                    subject = %subject,
                    attempt = attempt,
                    "Retrying request"
                );
                self.publish_attempt(next_id, &subject, bytes).await;
            }
            Expiry::Failed(pending, error) => {
                warn!(correlation_id = %id, error = %error, "Could not restamp request");
                pending.resolve(Err(error.into()));
            }
        }
    }

    pub(crate) fn handle_message(&self, reply: &Envelope) -> bool {
        let Some(raw) = reply.correlation_id() else {
            EngineStats::incr(&self.stats.unmatched);
            debug!(schema = reply.schema_id(), "Unmatched reply (no correlation id)");
            return false;
        };
        let Ok(id) = CorrelationId::parse(raw) else {
            EngineStats::incr(&self.stats.unmatched);
            debug!(correlation_id = raw, "Unmatched reply (foreign correlation id)");
            return false;
        };

        let pending = self.table.lock().remove(&id);
        let Some(pending) = pending else {
            EngineStats::incr(&self.stats.unmatched);
            debug!(correlation_id = %id, "Unmatched reply (unknown or expired)");
            return false;
        };

        let elapsed = pending.context().started_at.elapsed();
        let attempt = pending.attempt();
        if pending.resolve(Ok(reply.clone())) {
            EngineStats::incr(&self.stats.resolved);
            debug!(
                correlation_id = %id,
                attempt = attempt,
                response_time_ms = elapsed.as_millis(),
                "Request resolved"
            );
        } else {
            debug!(correlation_id = %id, "Reply arrived after caller gave up");
        }
        true
    }

    pub(crate) fn handle_bytes(&self, bytes: &[u8]) -> bool {
        match Envelope::from_bytes(bytes) {
            Ok(envelope) => self.handle_message(&envelope),
            Err(e) => {
                warn!(error = %e, bytes = bytes.len(), "Dropping malformed reply");
                false
            }
        }
    }

    fn cancel_all(&self, reason: &str) -> usize {
        let drained = self.table.lock().drain();
        let count = drained.len();

        for (id, pending) in drained {
            EngineStats::incr(&self.stats.cancelled);
            debug!(correlation_id = %id, reason = reason, "Request cancelled");
            pending.resolve(Err(RequestError::cancelled(reason)));
        }

        if count > 0 {
            info!(count = count, reason = reason, "Cancelled pending requests");
        }
        count
    }
}

/// Encode `template` for one attempt: fresh timestamp, given correlation id.
fn stamp(template: &Envelope, id: CorrelationId) -> Result<Vec<u8>, EnvelopeError> {
    template
        .to_builder()
        .timestamp(Utc::now())
        .correlation_id(id.to_string())
        .build()?
        .to_bytes()
}
