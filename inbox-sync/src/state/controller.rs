//! Inbox controller
//!
//! Owns the sync engine and the refresh scheduler and wires them to the
//! auth and visibility signals. Login/logout and visibility changes are
//! observed on their watch channels; refresh requests from the scheduler
//! and from `refresh()` arrive on one queue and each becomes a pass.

use flume::{Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::backend::AuthSession;
use crate::config::AppConfig;
use crate::sync::engine::{InboxSnapshot, InboxSyncEngine, PassOutcome, PhotoUpdate};
use crate::sync::scheduler::VisibilityAwareScheduler;
use crate::sync::state::SyncTrigger;
use crate::sync::transformer::MessageTransformer;
use crate::sync::visibility::VisibilitySignal;
use crate::types::error::SyncError;

pub struct InboxController {
    engine: InboxSyncEngine,
    requests: Sender<SyncTrigger>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl InboxController {
    /// Build from configuration and start the run loop
    pub fn start(
        config: &AppConfig,
        auth: AuthSession,
        visibility: VisibilitySignal,
    ) -> Result<Self, SyncError> {
        let transformer = MessageTransformer::from_config(&config.display)?;
        Ok(Self::with_parts(
            auth,
            visibility,
            transformer,
            config.sync.poll_interval(),
        ))
    }

    pub fn with_parts(
        auth: AuthSession,
        visibility: VisibilitySignal,
        transformer: MessageTransformer,
        poll_interval: Duration,
    ) -> Self {
        let engine = InboxSyncEngine::new(auth, visibility.clone(), transformer);
        let (requests, request_rx) = flume::unbounded();
        let scheduler = VisibilityAwareScheduler::new(poll_interval, visibility.clone(), requests.clone());
        let (shutdown, shutdown_rx) = watch::channel(false);

        info!("Starting inbox controller (poll interval: {:?})", poll_interval);

        let handle = tokio::spawn(run_loop(
            engine.clone(),
            scheduler,
            visibility,
            request_rx,
            shutdown_rx,
        ));

        Self {
            engine,
            requests,
            shutdown,
            handle,
        }
    }

    pub fn engine(&self) -> &InboxSyncEngine {
        &self.engine
    }

    /// Ask for a pass now. Dropped if one is already running.
    pub fn refresh(&self) {
        if let Err(e) = self.requests.send(SyncTrigger::Manual) {
            warn!("Failed to request refresh: {}", e);
        }
    }

    pub fn snapshot(&self) -> Arc<InboxSnapshot> {
        self.engine.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<InboxSnapshot>> {
        self.engine.subscribe()
    }

    pub fn photo_updates(&self) -> Receiver<PhotoUpdate> {
        self.engine.photo_updates()
    }

    /// Stop the run loop. In-flight passes are aborted and the published
    /// state is reset as on logout.
    pub fn shutdown(&self) {
        info!("Shutting down inbox controller");
        self.shutdown.send_replace(true);
    }
}

impl Drop for InboxController {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run_loop(
    engine: InboxSyncEngine,
    mut scheduler: VisibilityAwareScheduler,
    visibility: VisibilitySignal,
    requests: Receiver<SyncTrigger>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut login_rx = engine.auth().subscribe();
    let mut visible_rx = visibility.subscribe();
    let mut passes = JoinSet::new();

    visible_rx.borrow_and_update();
    if *login_rx.borrow_and_update() {
        engine.login().await;
        scheduler.on_login();
    }

    loop {
        tokio::select! {
            changed = login_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let logged_in = *login_rx.borrow_and_update();
                if logged_in {
                    engine.login().await;
                    scheduler.on_login();
                } else {
                    scheduler.on_logout();
                    engine.logout().await;
                }
            }
            changed = visible_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let visible = *visible_rx.borrow_and_update();
                scheduler.on_visibility(visible);
            }
            request = requests.recv_async() => {
                let Ok(trigger) = request else {
                    break;
                };
                let engine = engine.clone();
                passes.spawn(async move {
                    match engine.run_sync_pass(trigger).await {
                        Ok(PassOutcome::Published(messages)) => {
                            debug!("{:?} pass published {} messages", trigger, messages.len());
                        }
                        Ok(outcome) => debug!("{:?} pass skipped: {:?}", trigger, outcome),
                        Err(e) => warn!("{:?} pass failed: {}", trigger, e),
                    }
                });
            }
            Some(_) = passes.join_next(), if !passes.is_empty() => {}
            _ = shutdown.changed() => {
                break;
            }
        }
    }

    passes.abort_all();
    scheduler.on_logout();
    engine.logout().await;
    info!("Inbox controller stopped");
}
