//! Shared File Catalog
//!
//! The authoritative in-memory set of `(filename, owner)` pairs, mirrored in
//! a text shadow file at the storage root. All mutation is serialized by one
//! mutex, and the shadow rewrite happens inside the critical section so the
//! on-disk order matches the in-memory order.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{FileHubError, FileHubResult, StorageResultExt};
use crate::logging::OperatorLog;
use crate::store::FileStore;

/// Name of the shadow file under the storage root
pub const CATALOG_FILE: &str = "file_list.txt";

/// One catalog entry; the pair is the primary key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub filename: String,
    pub owner: String,
}

/// Outcome of an upsert, driving the uploaded/overwritten reply variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Replaced,
}

/// Outcome of an owner-scoped delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The entry was the caller's and has been removed
    Deleted,
    /// The filename exists but belongs to another owner
    NotOwner,
    /// No entry with that filename exists at all
    NotFound,
}

/// Insertion-ordered catalog with a persisted shadow
pub struct Catalog {
    inner: Mutex<CatalogInner>,
    log: Arc<dyn OperatorLog>,
}

struct CatalogInner {
    entries: Vec<CatalogEntry>,
    shadow_path: PathBuf,
}

impl Catalog {
    /// Load the catalog from the shadow file under `root`, creating an empty
    /// shadow if none exists. Malformed lines are skipped with a warning and
    /// the remainder preserved.
    pub async fn load(root: &Path, log: Arc<dyn OperatorLog>) -> FileHubResult<Self> {
        let shadow_path = root.join(CATALOG_FILE);

        let mut entries = Vec::new();
        match tokio::fs::read_to_string(&shadow_path).await {
            Ok(text) => {
                for line in text.lines() {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let parts: Vec<&str> = line.split(',').collect();
                    match parts.as_slice() {
                        [filename, owner] if !filename.is_empty() && !owner.is_empty() => {
                            entries.push(CatalogEntry {
                                filename: filename.to_string(),
                                owner: owner.to_string(),
                            });
                        }
                        _ => {
                            warn!("malformed catalog line skipped: {line:?}");
                            log.log(&format!("Malformed line in file list: {line}"));
                        }
                    }
                }
            }
            Err(source) if source.kind() == io::ErrorKind::NotFound => {
                tokio::fs::write(&shadow_path, "")
                    .await
                    .storage_at(&shadow_path)?;
            }
            Err(source) => {
                return Err(FileHubError::Storage {
                    source,
                    path: shadow_path,
                })
            }
        }

        log.log(&format!("Loaded {} files from file list.", entries.len()));
        Ok(Self {
            inner: Mutex::new(CatalogInner {
                entries,
                shadow_path,
            }),
            log,
        })
    }

    /// Insert or replace `(filename, owner)`; idempotent for the same pair.
    /// The shadow is rewritten before the mutex is released.
    pub async fn add(&self, filename: &str, owner: &str) -> UpsertOutcome {
        let mut inner = self.inner.lock().await;
        let outcome = if inner
            .entries
            .iter()
            .any(|e| e.filename == filename && e.owner == owner)
        {
            UpsertOutcome::Replaced
        } else {
            inner.entries.push(CatalogEntry {
                filename: filename.to_string(),
                owner: owner.to_string(),
            });
            UpsertOutcome::Created
        };
        inner.persist(&*self.log);
        outcome
    }

    /// Remove `(filename, owner)` if present; returns whether anything was
    /// removed.
    pub async fn remove(&self, filename: &str, owner: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let position = inner
            .entries
            .iter()
            .position(|e| e.filename == filename && e.owner == owner);
        match position {
            Some(idx) => {
                inner.entries.remove(idx);
                inner.persist(&*self.log);
                true
            }
            None => false,
        }
    }

    /// Whether any owner holds an entry with this filename
    pub async fn has_any(&self, filename: &str) -> bool {
        let inner = self.inner.lock().await;
        inner.entries.iter().any(|e| e.filename == filename)
    }

    /// Whether exactly `(filename, owner)` is cataloged
    pub async fn owner_of_exactly(&self, filename: &str, owner: &str) -> bool {
        let inner = self.inner.lock().await;
        inner
            .entries
            .iter()
            .any(|e| e.filename == filename && e.owner == owner)
    }

    /// Ordered-by-insertion copy of the catalog for LIST
    pub async fn snapshot(&self) -> Vec<CatalogEntry> {
        let inner = self.inner.lock().await;
        inner.entries.clone()
    }

    /// Owner-scoped delete: removes the stored file and then the catalog
    /// entry under one hold of the catalog mutex, distinguishing "not mine"
    /// from "not found". A cataloged file already missing on disk is logged
    /// and treated as removed.
    pub async fn delete(
        &self,
        filename: &str,
        owner: &str,
        store: &FileStore,
    ) -> FileHubResult<DeleteOutcome> {
        let mut inner = self.inner.lock().await;
        let position = inner
            .entries
            .iter()
            .position(|e| e.filename == filename && e.owner == owner);

        match position {
            Some(idx) => {
                let path = store.path_of(owner, filename);
                match store.remove(&path).await {
                    Ok(()) => {}
                    Err(FileHubError::Storage { source, .. })
                        if source.kind() == io::ErrorKind::NotFound =>
                    {
                        warn!("cataloged file already missing on disk: {path:?}");
                    }
                    Err(other) => return Err(other),
                }
                inner.entries.remove(idx);
                inner.persist(&*self.log);
                Ok(DeleteOutcome::Deleted)
            }
            None if inner.entries.iter().any(|e| e.filename == filename) => {
                Ok(DeleteOutcome::NotOwner)
            }
            None => Ok(DeleteOutcome::NotFound),
        }
    }
}

impl CatalogInner {
    /// Rewrite the shadow in full: write a temporary sibling, then rename
    /// over the shadow. The in-memory catalog stays authoritative when the
    /// rewrite fails; the fault is reported to the operator surface only.
    fn persist(&self, log: &dyn OperatorLog) {
        if let Err(source) = self.try_persist() {
            let err = FileHubError::Internal(format!("catalog shadow rewrite failed: {source}"));
            warn!("{err}");
            log.log(&format!("Error updating file list: {err}"));
        } else {
            debug!(
                "catalog shadow updated with {} entries",
                self.entries.len()
            );
        }
    }

    fn try_persist(&self) -> io::Result<()> {
        let mut contents = String::new();
        for entry in &self.entries {
            contents.push_str(&entry.filename);
            contents.push(',');
            contents.push_str(&entry.owner);
            contents.push('\n');
        }

        let tmp_path = self.shadow_path.with_extension("txt.tmp");
        std::fs::write(&tmp_path, contents)?;
        std::fs::rename(&tmp_path, &self.shadow_path)
    }
}
