//! Inbound reply delivery from the bus into the engine.

use crate::service::EngineCore;
use shared_bus::MessageHandler;
use std::sync::{Arc, Weak};
use tracing::trace;

/// Bus handler feeding reply bytes to the engine.
///
/// Holds only a weak reference, so a live subscription does not keep a
/// dropped engine around.
pub(crate) fn reply_handler(core: Weak<EngineCore>) -> MessageHandler {
    Arc::new(move |subject: &str, bytes: &[u8]| match core.upgrade() {
        Some(core) => {
            core.handle_bytes(bytes);
        }
        None => trace!(subject = subject, "Reply for a dropped engine ignored"),
    })
}
