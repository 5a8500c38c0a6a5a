//! Responder side: serve requests arriving on a subject.

use crate::domain::error::RequestError;
use crate::domain::reply::{create_reply, ReplyOverrides};
use shared_bus::{subscribe_stream, Transport, TransportError};
use shared_types::{Envelope, Payload};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// Answers requests on one subject with a user-supplied handler.
///
/// Each request is handled on its own task; the handler returns the reply
/// payload, or `None` to leave the request unanswered.
pub struct Responder {
    transport: Arc<dyn Transport>,
    request_subject: String,
    reply_subject: String,
    overrides: ReplyOverrides,
}

impl Responder {
    pub fn new(
        transport: Arc<dyn Transport>,
        request_subject: impl Into<String>,
        reply_subject: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            request_subject: request_subject.into(),
            reply_subject: reply_subject.into(),
            overrides: ReplyOverrides::default(),
        }
    }

    /// Overrides applied to every reply (typically the responder's device id).
    pub fn with_overrides(mut self, overrides: ReplyOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Subscribe and start serving.
    ///
    /// Serving stops when the returned handle is dropped or the transport
    /// closes the subscription.
    pub async fn serve<F, Fut>(self, handler: F) -> Result<ResponderHandle, TransportError>
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<Payload>> + Send + 'static,
    {
        let mut stream = subscribe_stream(self.transport.as_ref(), &self.request_subject).await?;
        let subject = self.request_subject.clone();
        let handler = Arc::new(handler);

        info!(subject = %subject, reply_subject = %self.reply_subject, "Responder serving");

        let task = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let request = match Envelope::from_bytes(&message.payload) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(subject = %message.subject, error = %e, "Dropping malformed request");
                        continue;
                    }
                };
                if request.correlation_id().is_none() {
                    debug!(subject = %message.subject, "Ignoring request without correlation id");
                    continue;
                }

                let handler = Arc::clone(&handler);
                let transport = Arc::clone(&self.transport);
                let reply_subject = self.reply_subject.clone();
                let overrides = self.overrides.clone();
                tokio::spawn(async move {
                    let Some(payload) = handler(request.clone()).await else {
                        debug!(correlation_id = ?request.correlation_id(), "Request left unanswered");
                        return;
                    };
                    if let Err(e) =
                        send_reply(transport.as_ref(), &reply_subject, &request, payload, overrides)
                            .await
                    {
                        warn!(
                            correlation_id = ?request.correlation_id(),
                            error = %e,
                            "Failed to send reply"
                        );
                    }
                });
            }
            debug!(subject = %self.request_subject, "Responder stream ended");
        });

        Ok(ResponderHandle { subject, task })
    }
}

async fn send_reply(
    transport: &dyn Transport,
    reply_subject: &str,
    request: &Envelope,
    payload: Payload,
    overrides: ReplyOverrides,
) -> Result<(), RequestError> {
    let reply = create_reply(request, payload, overrides)?;
    transport.publish(reply_subject, reply.to_bytes()?).await?;
    Ok(())
}

/// Running responder. Dropping it stops serving.
#[derive(Debug)]
pub struct ResponderHandle {
    subject: String,
    task: JoinHandle<()>,
}

impl ResponderHandle {
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Stop serving.
    pub fn shutdown(self) {
        self.task.abort();
    }
}

impl Drop for ResponderHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
