//! # Transport and In-Memory Bus
//!
//! Defines the transport capability and an in-process implementation.

use crate::error::TransportError;
use crate::subject::{subject_matches, validate_pattern, validate_subject};
use crate::subscriber::{MessageHandler, Subscription};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Publish/subscribe capability consumed by the request/reply core.
///
/// Implementations wrap a real messaging substrate (NATS, MQTT, ...) or,
/// for a single process, the [`InMemoryBus`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish raw bytes on a concrete subject.
    ///
    /// # Errors
    ///
    /// `TransportError` when the message could not be handed to the substrate.
    /// Success does not imply that anyone received it.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Register `handler` for every message whose subject matches `pattern`.
    ///
    /// The handler stays registered until the returned [`Subscription`] is
    /// unsubscribed or dropped.
    async fn subscribe(
        &self,
        pattern: &str,
        handler: MessageHandler,
    ) -> Result<Subscription, TransportError>;
}

struct Registered {
    pattern: String,
    handler: MessageHandler,
}

/// Subscription table shared between the bus and its subscription handles.
#[derive(Default)]
struct Registry {
    entries: RwLock<HashMap<u64, Registered>>,
}

impl Registry {
    fn insert(&self, id: u64, registered: Registered) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(id, registered);
        }
    }

    fn remove(&self, id: u64) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(&id);
        }
    }

    fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Handlers matching `subject`, cloned out so no lock is held during delivery.
    fn matching(&self, subject: &str) -> Vec<MessageHandler> {
        let Ok(entries) = self.entries.read() else {
            return Vec::new();
        };
        entries
            .values()
            .filter(|r| subject_matches(&r.pattern, subject))
            .map(|r| Arc::clone(&r.handler))
            .collect()
    }
}

/// In-memory implementation of the bus.
///
/// Fans each message out synchronously to every matching handler.
/// Suitable for single-node operation and tests; distributed deployments
/// use a [`Transport`] over a real broker.
pub struct InMemoryBus {
    /// Active subscriptions.
    registry: Arc<Registry>,

    /// Next subscription id.
    next_id: AtomicU64,

    /// Set once [`close`](Self::close) has been called.
    closed: AtomicBool,

    /// Total messages accepted by `publish`.
    messages_published: AtomicU64,

    /// Total handler invocations.
    messages_delivered: AtomicU64,

    /// Messages published with no matching subscriber.
    messages_dropped: AtomicU64,
}

impl InMemoryBus {
    /// Create a new, open bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry::default()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            messages_published: AtomicU64::new(0),
            messages_delivered: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }

    /// Close the bus. Existing handlers are dropped; further publish and
    /// subscribe calls fail with [`TransportError::Closed`].
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.registry.clear();
            debug!("In-memory bus closed");
        }
    }

    /// Whether the bus has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.registry.len()
    }

    /// Total messages accepted for publishing.
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    /// Total handler invocations.
    #[must_use]
    pub fn messages_delivered(&self) -> u64 {
        self.messages_delivered.load(Ordering::Relaxed)
    }

    /// Messages that matched no subscription.
    #[must_use]
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.ensure_open()?;
        validate_subject(subject)?;

        self.messages_published.fetch_add(1, Ordering::Relaxed);

        let handlers = self.registry.matching(subject);
        if handlers.is_empty() {
            self.messages_dropped.fetch_add(1, Ordering::Relaxed);
            debug!(subject = subject, "Message dropped (no subscribers)");
            return Ok(());
        }

        for handler in &handlers {
            handler(subject, &payload);
        }
        self.messages_delivered
            .fetch_add(handlers.len() as u64, Ordering::Relaxed);

        debug!(
            subject = subject,
            receivers = handlers.len(),
            bytes = payload.len(),
            "Message published"
        );
        Ok(())
    }

    async fn subscribe(
        &self,
        pattern: &str,
        handler: MessageHandler,
    ) -> Result<Subscription, TransportError> {
        self.ensure_open()?;
        if let Err(e) = validate_pattern(pattern) {
            warn!(pattern = pattern, error = %e, "Rejected subscription");
            return Err(e);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.insert(
            id,
            Registered {
                pattern: pattern.to_string(),
                handler,
            },
        );

        debug!(id = id, pattern = pattern, "New subscription created");

        let registry = Arc::downgrade(&self.registry);
        Ok(Subscription::new(id, pattern, move || {
            if let Some(registry) = registry.upgrade() {
                registry.remove(id);
            }
        }))
    }
}
