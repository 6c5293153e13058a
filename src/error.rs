//! Unified Error Handling System
//!
//! This module provides the crate-wide error type used by all Filehub
//! components, built on thiserror.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for all Filehub operations
#[derive(Error, Debug)]
pub enum FileHubError {
    // Protocol errors: malformed commands, bad integers, unsafe names.
    // The `reason` is the text sent back to the peer after "ERROR: ".
    #[error("{reason}")]
    Protocol { reason: String },

    // Handshake errors
    #[error("username '{username}' already connected")]
    UsernameTaken { username: String },

    #[error("invalid username")]
    InvalidUsername,

    // Catalog lookup errors
    #[error("file '{filename}' does not exist")]
    NotFound { filename: String },

    #[error("file '{filename}' is owned by another user")]
    NotOwner { filename: String },

    // Transport errors: anything that makes the peer stream unusable
    #[error("connection error: {source}")]
    Transport {
        #[source]
        source: io::Error,
    },

    #[error("timed out after {seconds}s waiting for {operation}")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },

    #[error("peer closed the stream after {received} of {expected} bytes")]
    ShortRead { expected: u64, received: u64 },

    // Storage errors: host filesystem operations on stored files
    #[error("storage error at {path:?}: {source}")]
    Storage { source: io::Error, path: PathBuf },

    // Configuration and operator surface errors
    #[error("configuration error: {field} - {message}")]
    Configuration { field: String, message: String },

    #[error("server is already running")]
    AlreadyRunning,

    #[error("storage root is not set")]
    RootNotSet,

    // Internal errors: catalog persistence and other non-fatal faults
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for Filehub operations
pub type FileHubResult<T> = Result<T, FileHubError>;

/// Error category for grouping related errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Protocol,
    Auth,
    NotFound,
    Permission,
    Transport,
    Storage,
    Configuration,
    Internal,
}

impl FileHubError {
    /// Get the category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            FileHubError::Protocol { .. } => ErrorCategory::Protocol,

            FileHubError::UsernameTaken { .. } | FileHubError::InvalidUsername => {
                ErrorCategory::Auth
            }

            FileHubError::NotFound { .. } => ErrorCategory::NotFound,
            FileHubError::NotOwner { .. } => ErrorCategory::Permission,

            FileHubError::Transport { .. }
            | FileHubError::Timeout { .. }
            | FileHubError::ShortRead { .. } => ErrorCategory::Transport,

            FileHubError::Storage { .. } => ErrorCategory::Storage,

            FileHubError::Configuration { .. }
            | FileHubError::AlreadyRunning
            | FileHubError::RootNotSet => ErrorCategory::Configuration,

            FileHubError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Check whether this error terminates the owning session.
    ///
    /// Transport faults are terminal for the session that hit them; every
    /// other category is answered on the wire or logged, and the session
    /// stays in Ready.
    pub fn is_fatal(&self) -> bool {
        matches!(self.category(), ErrorCategory::Transport)
    }
}

/// Extension trait mapping raw I/O results into storage errors carrying the
/// path that was being operated on.
pub trait StorageResultExt<T> {
    fn storage_at(self, path: &std::path::Path) -> FileHubResult<T>;
}

impl<T> StorageResultExt<T> for Result<T, io::Error> {
    fn storage_at(self, path: &std::path::Path) -> FileHubResult<T> {
        self.map_err(|source| FileHubError::Storage {
            source,
            path: path.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let transport = FileHubError::Transport {
            source: io::Error::new(io::ErrorKind::ConnectionReset, "reset"),
        };
        assert_eq!(transport.category(), ErrorCategory::Transport);

        let auth = FileHubError::UsernameTaken {
            username: "alice".to_string(),
        };
        assert_eq!(auth.category(), ErrorCategory::Auth);

        let protocol = FileHubError::Protocol {
            reason: "Unknown command.".to_string(),
        };
        assert_eq!(protocol.category(), ErrorCategory::Protocol);

        let permission = FileHubError::NotOwner {
            filename: "x".to_string(),
        };
        assert_eq!(permission.category(), ErrorCategory::Permission);

        let internal = FileHubError::Internal("shadow rewrite failed".to_string());
        assert_eq!(internal.category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_fatal_errors() {
        let short = FileHubError::ShortRead {
            expected: 10,
            received: 3,
        };
        assert!(short.is_fatal());

        let not_found = FileHubError::NotFound {
            filename: "a.bin".to_string(),
        };
        assert!(!not_found.is_fatal());

        let storage = FileHubError::Storage {
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
            path: PathBuf::from("/tmp/x"),
        };
        assert!(!storage.is_fatal());
    }

    #[test]
    fn test_storage_result_ext() {
        let result: Result<(), io::Error> =
            Err(io::Error::new(io::ErrorKind::NotFound, "missing"));
        let mapped = result.storage_at(std::path::Path::new("/data/alice/a.bin"));
        match mapped {
            Err(FileHubError::Storage { path, .. }) => {
                assert_eq!(path, PathBuf::from("/data/alice/a.bin"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
