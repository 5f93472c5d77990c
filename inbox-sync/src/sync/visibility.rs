//! Visibility signal of the consuming surface
//!
//! Owned by whatever renders the inbox; the sync core only reads it and
//! subscribes to changes. Reads always sample the current value, so a
//! check never acts on a visibility captured earlier.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

#[derive(Clone)]
pub struct VisibilitySignal {
    visible: Arc<watch::Sender<bool>>,
}

impl VisibilitySignal {
    pub fn new(visible: bool) -> Self {
        let (tx, _rx) = watch::channel(visible);
        Self {
            visible: Arc::new(tx),
        }
    }

    pub fn is_visible(&self) -> bool {
        *self.visible.borrow()
    }

    /// Report a visibility change; no-op if unchanged
    pub fn set_visible(&self, visible: bool) {
        let changed = self.visible.send_if_modified(|current| {
            if *current == visible {
                false
            } else {
                *current = visible;
                true
            }
        });
        if changed {
            debug!("Surface visibility changed: visible = {}", visible);
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.visible.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_changes() {
        let signal = VisibilitySignal::new(true);
        let mut rx = signal.subscribe();

        signal.set_visible(true);
        assert!(!rx.has_changed().unwrap());

        signal.set_visible(false);
        assert!(rx.has_changed().unwrap());
        assert!(!*rx.borrow_and_update());
        assert!(!signal.is_visible());
    }
}
