//! Sync state machine
//!
//! The single source of truth for whether a sync pass may start. Each
//! accepted trigger yields a [`PassTicket`] bound to the current generation;
//! completing or failing a ticket from an older generation has no effect.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::error::SyncError;

/// Sync state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Uninitialized,
    Loading,
    Refreshing,
    Loaded,
    Errored,
}

/// What asked for a sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncTrigger {
    /// First load after login
    Initial,
    /// Periodic background tick or visibility resume
    Tick,
    /// Explicit `refresh()` from the consumer
    Manual,
}

impl SyncTrigger {
    /// Background triggers are suppressed while the surface is hidden
    pub fn is_background(self) -> bool {
        matches!(self, SyncTrigger::Tick)
    }
}

/// Permission to run exactly one pass in one generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassTicket {
    pub generation: u64,
    pub trigger: SyncTrigger,
}

#[derive(Debug, Clone)]
pub struct SyncStateMachine {
    state: SyncState,
    error: Option<SyncError>,
    generation: u64,
    in_flight: bool,
}

impl Default for SyncStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStateMachine {
    pub fn new() -> Self {
        Self {
            state: SyncState::Uninitialized,
            error: None,
            generation: 0,
            in_flight: false,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn error(&self) -> Option<&SyncError> {
        self.error.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Start a new login epoch; anything still running belongs to the old one
    pub fn login(&mut self) -> u64 {
        self.generation += 1;
        self.state = SyncState::Uninitialized;
        self.error = None;
        self.in_flight = false;
        info!("Sync generation {} started", self.generation);
        self.generation
    }

    /// Back to `Uninitialized`; in-flight results of this generation go stale
    pub fn logout(&mut self) {
        self.generation += 1;
        self.state = SyncState::Uninitialized;
        self.error = None;
        self.in_flight = false;
        info!("Sync state reset on logout (generation {})", self.generation);
    }

    /// Try to start a pass. Returns `None` when not logged in or when a
    /// pass is already running for this generation (the trigger is dropped).
    pub fn begin(&mut self, trigger: SyncTrigger, logged_in: bool) -> Option<PassTicket> {
        if !logged_in {
            debug!("Ignoring {:?} trigger: not logged in", trigger);
            return None;
        }
        if self.in_flight {
            debug!(
                "Dropping {:?} trigger: pass already in flight (generation {})",
                trigger, self.generation
            );
            return None;
        }

        self.state = match self.state {
            SyncState::Uninitialized => SyncState::Loading,
            SyncState::Loading => SyncState::Loading,
            SyncState::Refreshing | SyncState::Loaded | SyncState::Errored => {
                SyncState::Refreshing
            }
        };
        self.in_flight = true;

        Some(PassTicket {
            generation: self.generation,
            trigger,
        })
    }

    fn accepts(&self, ticket: &PassTicket) -> bool {
        self.in_flight && ticket.generation == self.generation
    }

    /// Successful fetch + transform. Returns false for a stale ticket.
    pub fn complete(&mut self, ticket: &PassTicket) -> bool {
        if !self.accepts(ticket) {
            return false;
        }
        self.state = SyncState::Loaded;
        self.error = None;
        self.in_flight = false;
        true
    }

    /// Unrecoverable fetch failure. Returns false for a stale ticket.
    pub fn fail(&mut self, ticket: &PassTicket, error: SyncError) -> bool {
        if !self.accepts(ticket) {
            return false;
        }
        self.state = SyncState::Errored;
        self.error = Some(error);
        self.in_flight = false;
        true
    }

    /// Release the ticket without changing the visible state (used when the
    /// pass ends in a forced logout)
    pub fn abandon(&mut self, ticket: &PassTicket) {
        if self.accepts(ticket) {
            self.in_flight = false;
        }
    }
}
