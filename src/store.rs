//! File Store
//!
//! Maps `(owner, filename)` pairs to physical paths under the storage root
//! and moves file bytes between the host filesystem and session streams.
//!
//! The path scheme is `<root>/<owner>/<filename>`: one directory per owner,
//! which keeps the mapping injective for any valid owner and filename.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::warn;

use crate::error::{FileHubError, FileHubResult, StorageResultExt};
use crate::protocol::FrameReader;

/// Physical storage for uploaded files under one root directory
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    chunk_bytes: usize,
}

impl FileStore {
    /// Create a store over an existing root directory
    pub fn new(root: impl Into<PathBuf>, chunk_bytes: usize) -> Self {
        Self {
            root: root.into(),
            chunk_bytes,
        }
    }

    /// The storage root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Physical path of an owner's file
    pub fn path_of(&self, owner: &str, filename: &str) -> PathBuf {
        self.root.join(owner).join(filename)
    }

    /// Current length of a stored file, read once before a transfer so it
    /// can be announced to the peer.
    pub async fn size_of(&self, path: &Path) -> FileHubResult<u64> {
        let meta = tokio::fs::metadata(path).await.storage_at(path)?;
        Ok(meta.len())
    }

    /// Receive exactly `size` bytes from the stream into `path`, creating or
    /// truncating the destination. A peer close before `size` bytes is a
    /// [`FileHubError::ShortRead`]; a local write failure drains the rest of
    /// the payload so the stream stays aligned on the next control frame.
    /// When that drain itself fails the stream cannot be realigned, and the
    /// fatal drain error is returned instead of the storage error.
    pub async fn receive_into<R: AsyncRead + Unpin>(
        &self,
        path: &Path,
        size: u64,
        reader: &mut FrameReader<R>,
        wait: Duration,
    ) -> FileHubResult<u64> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.storage_at(path)?;
        }
        let mut file = tokio::fs::File::create(path).await.storage_at(path)?;

        let mut buf = vec![0u8; self.chunk_bytes];
        let mut received: u64 = 0;
        while received < size {
            let want = (size - received).min(self.chunk_bytes as u64) as usize;
            let n = reader.read_chunk(&mut buf[..want], wait).await?;
            if n == 0 {
                return Err(FileHubError::ShortRead {
                    expected: size,
                    received,
                });
            }
            if let Err(source) = file.write_all(&buf[..n]).await {
                received += n as u64;
                let storage_err = FileHubError::Storage {
                    source,
                    path: path.to_path_buf(),
                };
                // Stream alignment depends on the drain; if it fails too,
                // no further control frame can be read safely and the
                // fatal drain error wins.
                if let Err(drain_err) = reader.discard(size - received, wait).await {
                    warn!("payload drain failed after write failure ({storage_err}): {drain_err}");
                    return Err(drain_err);
                }
                return Err(storage_err);
            }
            received += n as u64;
        }
        file.flush().await.storage_at(path)?;
        Ok(received)
    }

    /// Write the entire stored file to the stream in chunks; returns the
    /// byte count sent.
    pub async fn send_from<W: AsyncWrite + Unpin>(
        &self,
        path: &Path,
        writer: &mut W,
        wait: Duration,
    ) -> FileHubResult<u64> {
        let mut file = tokio::fs::File::open(path).await.storage_at(path)?;

        let mut buf = vec![0u8; self.chunk_bytes];
        let mut sent: u64 = 0;
        loop {
            let n = file.read(&mut buf).await.storage_at(path)?;
            if n == 0 {
                break;
            }
            write_with_deadline(writer, &buf[..n], wait).await?;
            sent += n as u64;
        }
        match timeout(wait, writer.flush()).await {
            Err(_) => Err(transfer_timeout(wait)),
            Ok(Err(source)) => Err(FileHubError::Transport { source }),
            Ok(Ok(())) => Ok(sent),
        }
    }

    /// Remove a stored file; a missing file is reported upward as a storage
    /// error for the caller to interpret.
    pub async fn remove(&self, path: &Path) -> FileHubResult<()> {
        tokio::fs::remove_file(path).await.storage_at(path)
    }
}

async fn write_with_deadline<W: AsyncWrite + Unpin>(
    writer: &mut W,
    bytes: &[u8],
    wait: Duration,
) -> FileHubResult<()> {
    match timeout(wait, writer.write_all(bytes)).await {
        Err(_) => Err(transfer_timeout(wait)),
        Ok(Err(source)) => Err(FileHubError::Transport { source }),
        Ok(Ok(())) => Ok(()),
    }
}

fn transfer_timeout(wait: Duration) -> FileHubError {
    FileHubError::Timeout {
        operation: "bulk transfer",
        seconds: wait.as_secs(),
    }
}
