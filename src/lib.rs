//! Filehub - Multi-User File Sharing Server
//!
//! Filehub is a long-lived TCP server hosting arbitrarily many concurrently
//! connected clients. Each client authenticates by a unique username, then
//! uploads, lists, downloads, or deletes files. Files are namespaced by
//! their uploader, so two users may hold entries with the same filename
//! without collision; only an owner may delete their own file, any
//! connected user may download any file, and the owner is notified when
//! that happens.
//!
//! # Architecture
//!
//! 1. **Wire protocol**: length-bounded ASCII control frames and counted
//!    raw-byte bulk transfers sharing one stream
//! 2. **Catalog**: the authoritative in-memory `(filename, owner)` set with
//!    a persisted text shadow, serialized by one mutex
//! 3. **Sessions**: one task per accepted connection running a sequential
//!    command state machine
//! 4. **Operator surface**: set the storage root, start on a port, stop
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use filehub::{ConfigBuilder, FileHubServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigBuilder::new().build()?;
//!     let server = FileHubServer::new(config);
//!
//!     server.set_root("./shared").await?;
//!     server.start(9000).await?;
//!
//!     // ... accept traffic until the operator stops the server ...
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod store;

pub use catalog::{Catalog, CatalogEntry, DeleteOutcome, UpsertOutcome};
pub use config::{ConfigBuilder, ServerConfig};
pub use error::{ErrorCategory, FileHubError, FileHubResult};
pub use logging::{MemoryLog, OperatorLog, TracingLog};
pub use server::{FileHubServer, SessionRegistry};
pub use store::FileStore;
