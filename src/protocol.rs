//! Wire Protocol
//!
//! Control-frame framing, command parsing, and the reply vocabulary of the
//! Filehub protocol.
//!
//! Two framing disciplines share one stream. In control mode a command is a
//! short ASCII text frame: one read of up to the configured frame size,
//! decoded as UTF-8 and whitespace-trimmed. The reader accepts an optional
//! `\n` terminator; when one is present, bytes after it are retained for the
//! bulk phase that follows, which keeps the stream aligned even when a peer
//! coalesces a command with its payload. In bulk mode the stream carries
//! exactly N raw bytes, where N was declared in the preceding control frame;
//! the byte counter drives completion, there is no sentinel.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

use crate::error::{FileHubError, FileHubResult};

/// Default upper bound for one control frame
pub const MAX_CONTROL_FRAME: usize = 1024;

/// Default chunk size for bulk transfers
pub const TRANSFER_CHUNK: usize = 4096;

/// Check that a name is usable as a single path component under the storage
/// root: non-empty, bounded, and free of separators and traversal sequences.
pub fn is_valid_filename(name: &str, max_len: usize) -> bool {
    !name.is_empty()
        && name.len() <= max_len
        && name != "."
        && !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains(',')
        && !name.chars().any(|c| c.is_control())
}

/// Usernames double as directory components under the storage root, so they
/// obey the same rules as filenames.
pub fn is_valid_username(name: &str, max_len: usize) -> bool {
    is_valid_filename(name, max_len)
}

/// A parsed client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Begin an upload of exactly `size` raw bytes to follow
    Upload { filename: String, size: u64 },

    /// Request the catalog listing
    List,

    /// Owner-scoped delete
    Delete { filename: String },

    /// Request a download of another user's (or one's own) file
    Download { filename: String, owner: String },

    /// Orderly close
    Disconnect,
}

impl Command {
    /// Parse one trimmed control frame into a command.
    ///
    /// The first whitespace-delimited token selects the verb; the protocol
    /// error carried back names the malformed verb so the session can reply
    /// `ERROR: <reason>` and stay in Ready.
    pub fn parse(frame: &str, max_filename: usize) -> FileHubResult<Self> {
        let mut parts = frame.split_whitespace();
        let verb = parts.next().unwrap_or("");

        match verb {
            "UPLOAD" => match (parts.next(), parts.next(), parts.next()) {
                (Some(filename), Some(size), None) if is_valid_filename(filename, max_filename) => {
                    match size.parse::<u64>() {
                        Ok(size) => Ok(Command::Upload {
                            filename: filename.to_string(),
                            size,
                        }),
                        Err(_) => Err(invalid_format("UPLOAD")),
                    }
                }
                _ => Err(invalid_format("UPLOAD")),
            },

            "LIST" => match parts.next() {
                None => Ok(Command::List),
                Some(_) => Err(invalid_format("LIST")),
            },

            "DELETE" => match (parts.next(), parts.next()) {
                (Some(filename), None) if is_valid_filename(filename, max_filename) => {
                    Ok(Command::Delete {
                        filename: filename.to_string(),
                    })
                }
                _ => Err(invalid_format("DELETE")),
            },

            "DOWNLOAD" => match (parts.next(), parts.next(), parts.next()) {
                (Some(filename), Some(owner), None)
                    if is_valid_filename(filename, max_filename)
                        && is_valid_username(owner, max_filename) =>
                {
                    Ok(Command::Download {
                        filename: filename.to_string(),
                        owner: owner.to_string(),
                    })
                }
                _ => Err(invalid_format("DOWNLOAD")),
            },

            "DISCONNECT" => Ok(Command::Disconnect),

            "" => Err(FileHubError::Protocol {
                reason: "Empty command.".to_string(),
            }),

            _ => Err(FileHubError::Protocol {
                reason: "Unknown command.".to_string(),
            }),
        }
    }
}

fn invalid_format(verb: &str) -> FileHubError {
    FileHubError::Protocol {
        reason: format!("Invalid {verb} command format."),
    }
}

/// Reader side of a session stream, handling both framing disciplines
pub struct FrameReader<R> {
    inner: R,
    /// Bytes read past the end of the last control frame, owed to the next
    /// bulk phase (or the next pipelined command).
    pending: Vec<u8>,
    max_frame: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_frame: usize) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            max_frame,
        }
    }

    /// Read one control frame, trimmed. Returns `Ok(None)` when the peer has
    /// closed the stream.
    pub async fn read_control(&mut self, wait: Duration) -> FileHubResult<Option<String>> {
        if self.pending.is_empty() {
            let mut buf = vec![0u8; self.max_frame];
            let n = match timeout(wait, self.inner.read(&mut buf)).await {
                Err(_) => {
                    return Err(FileHubError::Timeout {
                        operation: "control frame",
                        seconds: wait.as_secs(),
                    })
                }
                Ok(Err(source)) => return Err(FileHubError::Transport { source }),
                Ok(Ok(n)) => n,
            };
            if n == 0 {
                return Ok(None);
            }
            self.pending.extend_from_slice(&buf[..n]);
        }

        let frame_bytes = match self.pending.iter().position(|&b| b == b'\n') {
            Some(idx) => {
                let rest = self.pending.split_off(idx + 1);
                let mut frame = std::mem::replace(&mut self.pending, rest);
                frame.pop();
                frame
            }
            // Terminator-less peer: the whole read is the command.
            None => std::mem::take(&mut self.pending),
        };

        let text = std::str::from_utf8(&frame_bytes).map_err(|_| FileHubError::Protocol {
            reason: "Command is not valid UTF-8.".to_string(),
        })?;
        Ok(Some(text.trim().to_string()))
    }

    /// Read up to `buf.len()` bulk bytes, draining retained bytes first.
    /// Returns 0 when the peer has closed the stream.
    pub async fn read_chunk(&mut self, buf: &mut [u8], wait: Duration) -> FileHubResult<usize> {
        if !self.pending.is_empty() {
            let n = self.pending.len().min(buf.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            return Ok(n);
        }

        match timeout(wait, self.inner.read(buf)).await {
            Err(_) => Err(FileHubError::Timeout {
                operation: "bulk transfer",
                seconds: wait.as_secs(),
            }),
            Ok(Err(source)) => Err(FileHubError::Transport { source }),
            Ok(Ok(n)) => Ok(n),
        }
    }

    /// Consume and discard `remaining` bulk bytes so the next control frame
    /// stays aligned after a failed transfer.
    pub async fn discard(&mut self, mut remaining: u64, wait: Duration) -> FileHubResult<()> {
        let expected = remaining;
        let mut buf = vec![0u8; TRANSFER_CHUNK];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = self.read_chunk(&mut buf[..want], wait).await?;
            if n == 0 {
                return Err(FileHubError::ShortRead {
                    expected,
                    received: expected - remaining,
                });
            }
            remaining -= n as u64;
        }
        Ok(())
    }
}

/// Server reply vocabulary.
///
/// Every frame the server writes originates here so the wire strings live in
/// one place. Frames carry no terminator; each is written and flushed as one
/// unit.
pub mod replies {
    use crate::catalog::CatalogEntry;

    pub const CONNECTED: &str = "CONNECTED";
    pub const USERNAME_TAKEN: &str = "ERROR: Username already connected.";
    pub const INVALID_USERNAME: &str = "ERROR: Invalid username.";
    pub const UPLOAD_CONNECTION_ERROR: &str = "ERROR: Connection error during upload.";
    pub const NO_FILES: &str = "No files available.";
    pub const DELETE_NOT_OWNER: &str = "ERROR: You cannot delete a file you didn't upload.";
    pub const DOWNLOAD_NOT_FOUND: &str = "ERROR: File does not exist.";
    pub const SERVER_SHUTDOWN: &str = "SERVER_SHUTDOWN: The server is closing.";

    /// Acknowledgment the downloader sends between `FILESIZE` and the payload
    pub const READY: &str = "READY";

    pub fn error(reason: &str) -> String {
        format!("ERROR: {reason}")
    }

    pub fn upload_stored(filename: &str, replaced: bool) -> String {
        if replaced {
            format!("UPLOAD_RESPONSE: File '{filename}' overwritten successfully.")
        } else {
            format!("UPLOAD_RESPONSE: File '{filename}' uploaded successfully.")
        }
    }

    pub fn delete_ok(filename: &str) -> String {
        format!("DELETE_RESPONSE: File '{filename}' deleted successfully.")
    }

    pub fn delete_not_found(filename: &str) -> String {
        format!("ERROR: File '{filename}' does not exist.")
    }

    pub fn filesize(size: u64) -> String {
        format!("FILESIZE {size}")
    }

    pub fn notification(filename: &str, requester: &str) -> String {
        format!("NOTIFICATION: Your file '{filename}' was downloaded by '{requester}'.")
    }

    /// Body of a LIST reply: one `<filename> (Owner: <owner>)` line per
    /// catalog entry in snapshot order, or the no-files sentence.
    pub fn catalog_listing(entries: &[CatalogEntry]) -> String {
        if entries.is_empty() {
            NO_FILES.to_string()
        } else {
            entries
                .iter()
                .map(|entry| format!("{} (Owner: {})", entry.filename, entry.owner))
                .collect::<Vec<_>>()
                .join("\n")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    const MAX_NAME: usize = 255;

    #[test]
    fn test_parse_upload() {
        let cmd = Command::parse("UPLOAD hello.txt 5", MAX_NAME).unwrap();
        assert_eq!(
            cmd,
            Command::Upload {
                filename: "hello.txt".to_string(),
                size: 5
            }
        );
    }

    #[test]
    fn test_parse_upload_rejects_bad_size() {
        let err = Command::parse("UPLOAD hello.txt five", MAX_NAME).unwrap_err();
        assert_eq!(err.to_string(), "Invalid UPLOAD command format.");

        let err = Command::parse("UPLOAD hello.txt -3", MAX_NAME).unwrap_err();
        assert_eq!(err.to_string(), "Invalid UPLOAD command format.");
    }

    #[test]
    fn test_parse_upload_rejects_missing_parts() {
        assert!(Command::parse("UPLOAD hello.txt", MAX_NAME).is_err());
        assert!(Command::parse("UPLOAD", MAX_NAME).is_err());
    }

    #[test]
    fn test_parse_download() {
        let cmd = Command::parse("DOWNLOAD a.bin alice", MAX_NAME).unwrap();
        assert_eq!(
            cmd,
            Command::Download {
                filename: "a.bin".to_string(),
                owner: "alice".to_string()
            }
        );
    }

    #[test]
    fn test_parse_rejects_traversal_names() {
        assert!(Command::parse("DELETE ../etc/passwd", MAX_NAME).is_err());
        assert!(Command::parse("UPLOAD a/b.txt 3", MAX_NAME).is_err());
        assert!(Command::parse("DOWNLOAD a.bin ..", MAX_NAME).is_err());
    }

    #[test]
    fn test_parse_unknown_and_empty() {
        let err = Command::parse("FROBNICATE x", MAX_NAME).unwrap_err();
        assert_eq!(err.to_string(), "Unknown command.");

        let err = Command::parse("", MAX_NAME).unwrap_err();
        assert_eq!(err.to_string(), "Empty command.");
    }

    #[test]
    fn test_parse_list_and_disconnect() {
        assert_eq!(Command::parse("LIST", MAX_NAME).unwrap(), Command::List);
        assert_eq!(
            Command::parse("DISCONNECT", MAX_NAME).unwrap(),
            Command::Disconnect
        );
        assert!(Command::parse("LIST please", MAX_NAME).is_err());
    }

    #[test]
    fn test_filename_validation() {
        assert!(is_valid_filename("report.pdf", MAX_NAME));
        assert!(is_valid_filename("a", MAX_NAME));
        assert!(!is_valid_filename("", MAX_NAME));
        assert!(!is_valid_filename(".", MAX_NAME));
        assert!(!is_valid_filename("..", MAX_NAME));
        assert!(!is_valid_filename("a,b", MAX_NAME));
        assert!(!is_valid_filename("dir/file", MAX_NAME));
        assert!(!is_valid_filename("dir\\file", MAX_NAME));
        assert!(!is_valid_filename(&"x".repeat(MAX_NAME + 1), MAX_NAME));
    }

    #[tokio::test]
    async fn test_reader_splits_frame_from_bulk_payload() {
        let (mut client, server) = tokio::io::duplex(256);
        let mut reader = FrameReader::new(server, MAX_CONTROL_FRAME);

        client.write_all(b"UPLOAD hello.txt 5\nhello").await.unwrap();

        let wait = Duration::from_secs(1);
        let frame = reader.read_control(wait).await.unwrap().unwrap();
        assert_eq!(frame, "UPLOAD hello.txt 5");

        let mut buf = [0u8; 16];
        let n = reader.read_chunk(&mut buf, wait).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn test_reader_accepts_terminator_less_frames() {
        let (mut client, server) = tokio::io::duplex(256);
        let mut reader = FrameReader::new(server, MAX_CONTROL_FRAME);

        client.write_all(b"LIST").await.unwrap();

        let frame = reader
            .read_control(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, "LIST");
    }

    #[tokio::test]
    async fn test_reader_reports_peer_close() {
        let (client, server) = tokio::io::duplex(256);
        let mut reader = FrameReader::new(server, MAX_CONTROL_FRAME);
        drop(client);

        let frame = reader.read_control(Duration::from_secs(1)).await.unwrap();
        assert!(frame.is_none());
    }

    #[tokio::test]
    async fn test_reader_pipelines_retained_commands() {
        let (mut client, server) = tokio::io::duplex(256);
        let mut reader = FrameReader::new(server, MAX_CONTROL_FRAME);

        client.write_all(b"LIST\nDISCONNECT\n").await.unwrap();

        let wait = Duration::from_secs(1);
        assert_eq!(reader.read_control(wait).await.unwrap().unwrap(), "LIST");
        assert_eq!(
            reader.read_control(wait).await.unwrap().unwrap(),
            "DISCONNECT"
        );
    }

    #[test]
    fn test_reply_strings() {
        assert_eq!(
            replies::upload_stored("hello.txt", false),
            "UPLOAD_RESPONSE: File 'hello.txt' uploaded successfully."
        );
        assert_eq!(
            replies::upload_stored("hello.txt", true),
            "UPLOAD_RESPONSE: File 'hello.txt' overwritten successfully."
        );
        assert_eq!(
            replies::delete_ok("a.bin"),
            "DELETE_RESPONSE: File 'a.bin' deleted successfully."
        );
        assert_eq!(
            replies::notification("a.bin", "bob"),
            "NOTIFICATION: Your file 'a.bin' was downloaded by 'bob'."
        );
        assert_eq!(replies::filesize(42), "FILESIZE 42");
    }

    #[test]
    fn test_catalog_listing_body() {
        use crate::catalog::CatalogEntry;

        assert_eq!(replies::catalog_listing(&[]), "No files available.");

        let entries = vec![
            CatalogEntry {
                filename: "hello.txt".to_string(),
                owner: "alice".to_string(),
            },
            CatalogEntry {
                filename: "b.bin".to_string(),
                owner: "bob".to_string(),
            },
        ];
        assert_eq!(
            replies::catalog_listing(&entries),
            "hello.txt (Owner: alice)\nb.bin (Owner: bob)"
        );
    }
}
