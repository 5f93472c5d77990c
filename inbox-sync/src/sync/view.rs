//! Consumer-side inbox view
//!
//! Folds published snapshots and photo patches into the list a renderer
//! draws. Patches from another generation, or for messages no longer in
//! the list, are ignored.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::engine::{InboxSnapshot, PhotoUpdate};
use super::state::SyncState;
use crate::types::error::SyncError;
use crate::types::DisplayMessage;

#[derive(Debug, Default)]
pub struct InboxView {
    snapshot: Option<Arc<InboxSnapshot>>,
    messages: Vec<DisplayMessage>,
    index: HashMap<String, usize>,
    revision: u64,
}

impl InboxView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the list with a freshly published snapshot
    pub fn apply_snapshot(&mut self, snapshot: Arc<InboxSnapshot>) {
        let same_generation = self
            .snapshot
            .as_ref()
            .is_some_and(|prev| prev.generation == snapshot.generation);

        // Keep photos already patched in for the same generation
        let carried: HashMap<String, String> = if same_generation {
            self.messages
                .iter()
                .filter_map(|m| m.photo_url.clone().map(|url| (m.from_email.to_lowercase(), url)))
                .collect()
        } else {
            HashMap::new()
        };

        self.messages = snapshot
            .messages
            .iter()
            .cloned()
            .map(|mut m| {
                if m.photo_url.is_none() {
                    m.photo_url = carried.get(&m.from_email.to_lowercase()).cloned();
                }
                m
            })
            .collect();
        self.index = self
            .messages
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id.clone(), i))
            .collect();
        self.revision = if same_generation {
            self.revision.max(snapshot.revision)
        } else {
            snapshot.revision
        };
        self.snapshot = Some(snapshot);
    }

    /// Attach a resolved photo. Returns whether anything changed.
    pub fn apply_patch(&mut self, update: &PhotoUpdate) -> bool {
        let Some(snapshot) = &self.snapshot else {
            return false;
        };
        if snapshot.generation != update.generation {
            debug!(
                "Ignoring photo patch from generation {} (current {})",
                update.generation, snapshot.generation
            );
            return false;
        }
        let Some(&i) = self.index.get(&update.message_id) else {
            return false;
        };

        self.revision = self.revision.max(update.revision);
        let message = &mut self.messages[i];
        if message.photo_url.as_deref() == Some(update.photo_url.as_str()) {
            return false;
        }
        message.photo_url = Some(update.photo_url.clone());
        true
    }

    pub fn messages(&self) -> &[DisplayMessage] {
        &self.messages
    }

    pub fn state(&self) -> SyncState {
        self.snapshot
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(SyncState::Uninitialized)
    }

    pub fn error(&self) -> Option<&SyncError> {
        self.snapshot.as_ref().and_then(|s| s.error.as_ref())
    }

    /// Highest revision seen for the current generation
    pub fn revision(&self) -> u64 {
        self.revision
    }
}
