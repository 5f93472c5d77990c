//! Application state management
//!
//! Long-lived, thread-safe owners of the sync core. Nothing here knows how
//! the inbox is rendered.

mod controller;

pub use controller::InboxController;
