//! Inbox sync - polling inbox controller
//!
//! Keeps an inbox listing fresh while its consumer is visible and the user
//! is logged in, and decorates messages with sender photos in the
//! background.
//!
//! ## Module Organization
//!
//! - `state/`: The controller owning engine and scheduler
//! - `sync/`: Sync engine, state machine, transformer, photo cache, scheduling
//! - `backend/`: Mail and directory service traits plus the HTTP client
//! - `types/`: Data structures and errors
//! - `config/`: Configuration management

pub mod backend;
pub mod config;
pub mod state;
pub mod sync;
pub mod types;

pub use backend::{AuthSession, BackendClient, DirectoryBackend, GraphBackend, MailBackend};
pub use config::AppConfig;
pub use state::InboxController;
pub use sync::{
    InboxSnapshot, InboxSyncEngine, InboxView, MessageTransformer, PhotoUpdate, SyncState,
    SyncTrigger, VisibilitySignal,
};
pub use types::error::SyncError;
pub use types::{DisplayMessage, RawMessage};

use tracing_subscriber::EnvFilter;

/// Initialize tracing for logging
///
/// In debug builds, defaults to debug level for this crate. Can be
/// overridden with the RUST_LOG environment variable.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("inbox_sync=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });

    // Ignore the error when a subscriber is already installed
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
