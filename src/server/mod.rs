//! Server Module
//!
//! The connection-facing half of Filehub: the listener/supervisor and
//! operator surface (`core`), the per-connection state machine (`session`),
//! the username-to-session registry (`registry`), and the download notifier
//! (`notifier`).

pub mod core;
pub mod notifier;
pub mod registry;
mod session;

pub use self::core::FileHubServer;
pub use self::notifier::Notifier;
pub use self::registry::{SessionHandle, SessionRegistry};
