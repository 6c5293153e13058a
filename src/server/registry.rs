//! Session Registry
//!
//! Maps each connected username to a send-capable handle for its session.
//! The uniqueness check and the insert are one atomic operation on the map
//! entry, so two greetings racing on the same name cannot both win.

use std::io;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::{FileHubError, FileHubResult};

/// Cloneable, send-capable reference to one session's write side.
///
/// Every frame written through the handle takes the per-session send lock,
/// so a notification from another task can never interleave its bytes with
/// a frame or bulk payload written by the session's own handler.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    username: String,
    connected_at: DateTime<Utc>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl SessionHandle {
    pub fn new(username: impl Into<String>, writer: OwnedWriteHalf) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            username: username.into(),
            connected_at: Utc::now(),
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    /// Unique id of the session owning this handle
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// The username this session authenticated as
    pub fn username(&self) -> &str {
        &self.username
    }

    /// When the session was accepted
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Write one control frame as a single flushed write
    pub async fn send_frame(&self, frame: &str) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(frame.as_bytes()).await?;
        writer.flush().await
    }

    /// Hold the send lock for the duration of a bulk transfer
    pub async fn lock_writer(&self) -> MutexGuard<'_, OwnedWriteHalf> {
        self.writer.lock().await
    }

    /// Half-close the peer stream, releasing the peer's pending reads
    pub async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// Registry of currently connected sessions, keyed by username
pub struct SessionRegistry {
    sessions: DashMap<String, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Insert the handle iff its username is free
    pub fn insert_unique(&self, handle: SessionHandle) -> FileHubResult<()> {
        match self.sessions.entry(handle.username().to_string()) {
            Entry::Occupied(_) => Err(FileHubError::UsernameTaken {
                username: handle.username().to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(handle);
                Ok(())
            }
        }
    }

    /// Remove the username's entry only if it still belongs to the given
    /// session; a name re-registered by a newer session is left alone.
    pub fn remove(&self, username: &str, session_id: Uuid) -> bool {
        self.sessions
            .remove_if(username, |_, handle| handle.session_id() == session_id)
            .is_some()
    }

    /// Clone of the named session's handle, usable without any registry lock
    pub fn lookup(&self, username: &str) -> Option<SessionHandle> {
        self.sessions.get(username).map(|entry| entry.value().clone())
    }

    /// Number of currently connected sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of every connected handle, for shutdown fan-out
    pub fn handles(&self) -> Vec<SessionHandle> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.sessions.clear();
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
