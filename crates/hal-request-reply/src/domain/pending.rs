//! Correlation table: outstanding requests keyed by correlation id.
//!
//! Flow:
//! 1. `request()` generates a CorrelationId and inserts a [`PendingRequest`]
//! 2. The request envelope is published carrying that id
//! 3. A reply, the timer, `cancel_all` or a publish failure calls `remove()`
//! 4. Whoever removed the entry calls [`PendingRequest::resolve`]
//!
//! Removal is the only gate before resolution, so exactly one of those paths
//! ever gets to resolve a given request.

use crate::domain::correlation::CorrelationId;
use crate::domain::error::RequestError;
use serde::Serialize;
use shared_types::Envelope;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// Outcome delivered to the waiting caller.
pub type RequestOutcome = Result<Envelope, RequestError>;

/// Immutable facts about a logical request, shared by all its attempts.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Subject the request is published on.
    pub subject: String,
    /// Request envelope without correlation id; restamped per attempt.
    pub template: Envelope,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// When the first attempt was issued.
    pub started_at: Instant,
}

/// A request waiting for its reply.
pub struct PendingRequest {
    /// Channel to the suspended caller.
    sender: oneshot::Sender<RequestOutcome>,
    /// Request facts.
    context: RequestContext,
    /// Retries still allowed after the current attempt.
    remaining_retries: u32,
    /// 1-based number of the current attempt.
    attempt: u32,
    /// Timer for the current attempt.
    timer: Option<AbortHandle>,
}

impl PendingRequest {
    pub fn new(
        sender: oneshot::Sender<RequestOutcome>,
        context: RequestContext,
        max_retries: u32,
    ) -> Self {
        Self {
            sender,
            context,
            remaining_retries: max_retries,
            attempt: 1,
            timer: None,
        }
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn remaining_retries(&self) -> u32 {
        self.remaining_retries
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether the caller stopped waiting (its future was dropped).
    pub fn is_abandoned(&self) -> bool {
        self.sender.is_closed()
    }

    /// Install the timer for the current attempt.
    ///
    /// Any previous handle is replaced without being aborted: the only
    /// caller re-arming an entry is the previous timer itself.
    pub fn arm(&mut self, timer: AbortHandle) {
        self.timer = Some(timer);
    }

    /// Detach the timer handle without aborting it.
    pub fn take_timer(&mut self) -> Option<AbortHandle> {
        self.timer.take()
    }

    /// Consume one retry and advance the attempt counter.
    ///
    /// Returns `false` when the retry budget is exhausted.
    pub fn begin_retry(&mut self) -> bool {
        if self.remaining_retries == 0 {
            return false;
        }
        self.remaining_retries -= 1;
        self.attempt += 1;
        true
    }

    /// Deliver the terminal outcome.
    ///
    /// Aborts the timer if one is still attached. Returns `false` if the
    /// caller had already gone away.
    pub fn resolve(mut self, outcome: RequestOutcome) -> bool {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.sender.send(outcome).is_ok()
    }
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("subject", &self.context.subject)
            .field("attempt", &self.attempt)
            .field("remaining_retries", &self.remaining_retries)
            .field("armed", &self.timer.is_some())
            .finish()
    }
}

/// Outstanding requests by correlation id.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    entries: HashMap<CorrelationId, PendingRequest>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request.
    ///
    /// # Panics
    ///
    /// If `id` is already present. Ids are random v4 UUIDs, so a collision
    /// means the table is corrupt.
    pub fn insert(&mut self, id: CorrelationId, pending: PendingRequest) {
        if self.entries.insert(id, pending).is_some() {
            panic!("correlation id {id} registered twice");
        }
    }

    /// Remove and return the entry for `id`.
    pub fn remove(&mut self, id: &CorrelationId) -> Option<PendingRequest> {
        self.entries.remove(id)
    }

    pub fn peek(&self, id: &CorrelationId) -> Option<&PendingRequest> {
        self.entries.get(id)
    }

    /// Remove every entry.
    pub fn drain(&mut self) -> Vec<(CorrelationId, PendingRequest)> {
        self.entries.drain().collect()
    }

    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Engine counters.
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Request envelopes published, retries included
    pub published: AtomicU64,
    /// Retry attempts
    pub retried: AtomicU64,
    /// Requests resolved with a reply
    pub resolved: AtomicU64,
    /// Requests failed by timeout
    pub timed_out: AtomicU64,
    /// Requests cancelled
    pub cancelled: AtomicU64,
    /// Inbound replies matching no pending request
    pub unmatched: AtomicU64,
    /// Failed publishes
    pub transport_failures: AtomicU64,
}

impl EngineStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub published: u64,
    pub retried: u64,
    pub resolved: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub unmatched: u64,
    pub transport_failures: u64,
}
