//! Inbox sync core
//!
//! - `state`: pass lifecycle and generation tracking
//! - `transformer`: raw record → display record
//! - `photo_cache`: memoized sender photo lookups
//! - `engine`: fetch, publish, then resolve photos
//! - `scheduler` / `visibility`: when passes are requested
//! - `view`: consumer-side merge of snapshots and photo patches

pub mod engine;
pub mod photo_cache;
pub mod scheduler;
pub mod state;
pub mod transformer;
pub mod view;
pub mod visibility;

pub use engine::{InboxSnapshot, InboxSyncEngine, PassOutcome, PhotoUpdate};
pub use scheduler::VisibilityAwareScheduler;
pub use state::{SyncState, SyncStateMachine, SyncTrigger};
pub use transformer::MessageTransformer;
pub use view::InboxView;
pub use visibility::VisibilitySignal;
