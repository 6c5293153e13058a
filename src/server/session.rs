//! Per-Connection Session
//!
//! The protocol state machine for one connected client: Greeting, the Ready
//! command loop, the streaming sub-phases of UPLOAD and DOWNLOAD, and
//! teardown. Command processing is strictly sequential within a session:
//! one control frame is read, fully serviced (including any bulk transfer),
//! and only then is the next one read.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::notifier::Notifier;
use super::registry::{SessionHandle, SessionRegistry};
use crate::catalog::{Catalog, DeleteOutcome, UpsertOutcome};
use crate::config::ServerConfig;
use crate::error::FileHubError;
use crate::logging::OperatorLog;
use crate::protocol::{is_valid_username, replies, Command, FrameReader};
use crate::store::FileStore;

/// Shared collaborators handed to every session task
pub(super) struct SessionContext {
    pub config: ServerConfig,
    pub catalog: Arc<Catalog>,
    pub store: Arc<FileStore>,
    pub registry: Arc<SessionRegistry>,
    pub notifier: Notifier,
    pub log: Arc<dyn OperatorLog>,
    pub shutdown: broadcast::Sender<()>,
}

/// What the Ready loop does after servicing one frame
enum Flow {
    Continue,
    Terminate,
}

type Reader = FrameReader<OwnedReadHalf>;

/// Drive one accepted connection from Greeting to Closed.
pub(super) async fn run(stream: TcpStream, peer: SocketAddr, ctx: Arc<SessionContext>) {
    let mut shutdown_rx = ctx.shutdown.subscribe();
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half, ctx.config.max_frame_bytes);

    // Greeting: the first control frame is the proposed username.
    let proposed = tokio::select! {
        _ = shutdown_rx.recv() => return,
        frame = reader.read_control(ctx.config.handshake_timeout) => match frame {
            Ok(Some(name)) => name,
            Ok(None) => {
                debug!(%peer, "peer closed before handshake");
                return;
            }
            Err(err) => {
                debug!(%peer, "handshake failed: {err}");
                return;
            }
        },
    };

    let handle = SessionHandle::new(proposed.clone(), write_half);

    if !is_valid_username(&proposed, ctx.config.max_filename_bytes) {
        debug!(%peer, "handshake rejected: {}", FileHubError::InvalidUsername);
        let _ = handle.send_frame(replies::INVALID_USERNAME).await;
        handle.shutdown().await;
        return;
    }

    if ctx.registry.insert_unique(handle.clone()).is_err() {
        warn!(username = %proposed, %peer, "duplicate username rejected");
        ctx.log
            .log(&format!("Rejected duplicate username: {proposed}"));
        let _ = handle.send_frame(replies::USERNAME_TAKEN).await;
        handle.shutdown().await;
        return;
    }

    if handle.send_frame(replies::CONNECTED).await.is_err() {
        ctx.registry.remove(&proposed, handle.session_id());
        return;
    }
    info!(username = %proposed, %peer, "client connected");
    ctx.log.log(&format!("Client connected: {proposed}"));

    // Ready loop
    loop {
        let flow = tokio::select! {
            _ = shutdown_rx.recv() => {
                let _ = handle.send_frame(replies::SERVER_SHUTDOWN).await;
                Flow::Terminate
            }
            frame = reader.read_control(ctx.config.idle_timeout) => match frame {
                Ok(Some(frame)) => dispatch(&frame, &mut reader, &handle, &ctx).await,
                Ok(None) => Flow::Terminate,
                Err(err) if err.is_fatal() => {
                    debug!(username = %proposed, "session read failed: {err}");
                    Flow::Terminate
                }
                Err(err) => {
                    // Undecodable frame; answer and stay in Ready.
                    match handle.send_frame(&replies::error(&err.to_string())).await {
                        Ok(()) => Flow::Continue,
                        Err(_) => Flow::Terminate,
                    }
                }
            },
        };
        if matches!(flow, Flow::Terminate) {
            break;
        }
    }

    // Teardown: unregister exactly once, then close the stream.
    if ctx.registry.remove(&proposed, handle.session_id()) {
        let connected_for = Utc::now() - handle.connected_at();
        info!(
            username = %proposed,
            seconds = connected_for.num_seconds(),
            "client disconnected"
        );
        ctx.log.log(&format!("Client disconnected: {proposed}"));
    }
    handle.shutdown().await;
}

async fn dispatch(
    frame: &str,
    reader: &mut Reader,
    handle: &SessionHandle,
    ctx: &SessionContext,
) -> Flow {
    let command = match Command::parse(frame, ctx.config.max_filename_bytes) {
        Ok(command) => command,
        Err(err) => {
            debug!(username = %handle.username(), frame, "rejected command: {err}");
            return answer(handle, &replies::error(&err.to_string())).await;
        }
    };

    match command {
        Command::Upload { filename, size } => {
            handle_upload(&filename, size, reader, handle, ctx).await
        }
        Command::List => handle_list(handle, ctx).await,
        Command::Delete { filename } => handle_delete(&filename, handle, ctx).await,
        Command::Download { filename, owner } => {
            handle_download(&filename, &owner, reader, handle, ctx).await
        }
        Command::Disconnect => Flow::Terminate,
    }
}

/// Send one reply frame; a failed write is terminal for the session.
async fn answer(handle: &SessionHandle, frame: &str) -> Flow {
    match handle.send_frame(frame).await {
        Ok(()) => Flow::Continue,
        Err(_) => Flow::Terminate,
    }
}

async fn handle_upload(
    filename: &str,
    size: u64,
    reader: &mut Reader,
    handle: &SessionHandle,
    ctx: &SessionContext,
) -> Flow {
    let username = handle.username();
    let path = ctx.store.path_of(username, filename);
    ctx.log
        .log(&format!("Receiving file: {filename} from {username}..."));

    match ctx
        .store
        .receive_into(&path, size, reader, ctx.config.transfer_timeout)
        .await
    {
        Ok(received) => {
            let outcome = ctx.catalog.add(filename, username).await;
            let replaced = outcome == UpsertOutcome::Replaced;
            info!(username, filename, bytes = received, replaced, "upload stored");
            ctx.log
                .log(&format!("File '{filename}' uploaded successfully."));
            answer(handle, &replies::upload_stored(filename, replaced)).await
        }
        Err(err) if err.is_fatal() => {
            warn!(username, filename, "connection lost during upload: {err}");
            ctx.log
                .log(&format!("Connection error during upload: {err}"));
            let _ = handle.send_frame(replies::UPLOAD_CONNECTION_ERROR).await;
            Flow::Terminate
        }
        Err(err) => {
            // Storage fault; the payload has been drained, the catalog is
            // untouched, and the session stays in Ready.
            warn!(username, filename, "upload failed: {err}");
            ctx.log
                .log(&format!("Unexpected error during upload: {err}"));
            answer(handle, &replies::error(&err.to_string())).await
        }
    }
}

async fn handle_list(handle: &SessionHandle, ctx: &SessionContext) -> Flow {
    let entries = ctx.catalog.snapshot().await;
    debug!(username = %handle.username(), entries = entries.len(), "file list sent");
    answer(handle, &replies::catalog_listing(&entries)).await
}

async fn handle_delete(filename: &str, handle: &SessionHandle, ctx: &SessionContext) -> Flow {
    let username = handle.username();
    match ctx.catalog.delete(filename, username, &ctx.store).await {
        Ok(DeleteOutcome::Deleted) => {
            info!(username, filename, "file deleted");
            ctx.log
                .log(&format!("{username} deleted file '{filename}'."));
            answer(handle, &replies::delete_ok(filename)).await
        }
        Ok(DeleteOutcome::NotOwner) => answer(handle, replies::DELETE_NOT_OWNER).await,
        Ok(DeleteOutcome::NotFound) => {
            answer(handle, &replies::delete_not_found(filename)).await
        }
        Err(err) => {
            warn!(username, filename, "delete failed: {err}");
            ctx.log
                .log(&format!("Error during file deletion: {err}"));
            answer(handle, &replies::error(&err.to_string())).await
        }
    }
}

async fn handle_download(
    filename: &str,
    owner: &str,
    reader: &mut Reader,
    handle: &SessionHandle,
    ctx: &SessionContext,
) -> Flow {
    let requester = handle.username();
    let path = ctx.store.path_of(owner, filename);

    let size = match ctx.store.size_of(&path).await {
        Ok(size) => size,
        Err(FileHubError::Storage { source, .. })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            debug!(requester, filename, owner, "download of missing file");
            return answer(handle, replies::DOWNLOAD_NOT_FOUND).await;
        }
        Err(err) => {
            warn!(requester, filename, owner, "download failed: {err}");
            return answer(handle, &replies::error(&err.to_string())).await;
        }
    };

    if handle.send_frame(&replies::filesize(size)).await.is_err() {
        return Flow::Terminate;
    }

    // No payload byte moves until the peer acknowledges the size.
    match reader.read_control(ctx.config.transfer_timeout).await {
        Ok(Some(token)) if token == replies::READY => {}
        Ok(Some(other)) => {
            debug!(requester, filename, ack = %other, "peer declined download");
            return Flow::Continue;
        }
        Ok(None) => return Flow::Terminate,
        Err(FileHubError::Timeout { .. }) => {
            debug!(requester, filename, "no READY acknowledgment before deadline");
            return Flow::Continue;
        }
        Err(err) if err.is_fatal() => return Flow::Terminate,
        Err(err) => {
            debug!(requester, filename, "unusable READY acknowledgment: {err}");
            return Flow::Continue;
        }
    }

    // The send lock must be held before the notifier fires: the spawned
    // notification write queues behind it, so on a self-download the frame
    // cannot land inside the FILESIZE-announced payload.
    let mut writer = handle.lock_writer().await;
    ctx.notifier.file_downloaded(owner, filename, requester);

    match ctx
        .store
        .send_from(&path, &mut *writer, ctx.config.transfer_timeout)
        .await
    {
        Ok(sent) => {
            drop(writer);
            info!(requester, filename, owner, bytes = sent, "download served");
            ctx.log.log(&format!(
                "File '{filename}' by '{owner}' downloaded successfully."
            ));
            Flow::Continue
        }
        Err(err) => {
            // The byte count was announced in FILESIZE; a partial payload
            // cannot be followed by an error frame, so the session ends.
            drop(writer);
            warn!(requester, filename, owner, "download aborted: {err}");
            ctx.log
                .log(&format!("Error during file download: {err}"));
            Flow::Terminate
        }
    }
}
