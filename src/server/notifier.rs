//! Download Notifier
//!
//! Best-effort advisory delivery to a file owner's session when another
//! user downloads their file. Delivery failure of any kind is swallowed;
//! a notification never aborts or delays the download that triggered it.

use std::sync::Arc;

use tracing::debug;

use super::registry::SessionRegistry;
use crate::protocol::replies;

/// Fire-and-forget messenger to connected owners
#[derive(Clone)]
pub struct Notifier {
    registry: Arc<SessionRegistry>,
}

impl Notifier {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Tell `owner` that `requester` downloaded their file, if the owner is
    /// currently connected. The write happens on a detached task under the
    /// owner session's send lock.
    pub fn file_downloaded(&self, owner: &str, filename: &str, requester: &str) {
        let Some(handle) = self.registry.lookup(owner) else {
            debug!(owner, filename, "owner not connected, notification dropped");
            return;
        };

        let frame = replies::notification(filename, requester);
        tokio::spawn(async move {
            if let Err(err) = handle.send_frame(&frame).await {
                debug!("notification delivery failed: {err}");
            }
        });
    }
}
