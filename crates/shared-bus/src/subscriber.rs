//! # Subscriber
//!
//! Defines the subscription side of the bus: callback handlers, the
//! subscription handle, and a stream adapter over any [`Transport`].

use crate::error::TransportError;
use crate::publisher::Transport;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tracing::debug;

/// Callback invoked for every message delivered to a subscription.
///
/// Arguments are the concrete subject and the raw message bytes. Handlers
/// run on the publisher's task and must not block.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// A subscription handle.
///
/// When dropped, the subscription is automatically removed from the transport.
pub struct Subscription {
    /// Transport-assigned id.
    id: u64,

    /// Subject pattern this subscription listens on.
    subject: String,

    /// Hook that detaches the handler from the transport.
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Create a new subscription handle.
    ///
    /// `detach` is run exactly once, on [`unsubscribe`](Self::unsubscribe) or drop.
    pub fn new(id: u64, subject: impl Into<String>, detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id,
            subject: subject.into(),
            detach: Some(Box::new(detach)),
        }
    }

    /// Transport-assigned id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Subject pattern.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Stop receiving messages.
    pub fn unsubscribe(mut self) {
        self.detach_now();
    }

    fn detach_now(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
            debug!(id = self.id, subject = %self.subject, "Subscription removed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("subject", &self.subject)
            .field("active", &self.detach.is_some())
            .finish()
    }
}

/// A message received through a [`MessageStream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Concrete subject the message was published on.
    pub subject: String,
    /// Raw message bytes.
    pub payload: Vec<u8>,
}

/// A stream wrapper for subscriptions.
///
/// Implements `tokio_stream::Stream`; the subscription lives as long as the stream.
pub struct MessageStream {
    subscription: Subscription,
    inner: UnboundedReceiverStream<BusMessage>,
}

impl MessageStream {
    /// Subject pattern of the underlying subscription.
    #[must_use]
    pub fn subject(&self) -> &str {
        self.subscription.subject()
    }
}

impl Stream for MessageStream {
    type Item = BusMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Subscribe to `pattern` on any transport and receive messages as a stream.
pub async fn subscribe_stream(
    transport: &dyn Transport,
    pattern: &str,
) -> Result<MessageStream, TransportError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler: MessageHandler = Arc::new(move |subject: &str, payload: &[u8]| {
        // Receiver gone means the stream was dropped; nothing to deliver to.
        let _ = tx.send(BusMessage {
            subject: subject.to_string(),
            payload: payload.to_vec(),
        });
    });

    let subscription = transport.subscribe(pattern, handler).await?;
    Ok(MessageStream {
        subscription,
        inner: UnboundedReceiverStream::new(rx),
    })
}
