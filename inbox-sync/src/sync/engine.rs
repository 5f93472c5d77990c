//! Inbox Sync Engine
//!
//! Runs sync passes: fetch the inbox, transform every record, publish the
//! result as one immutable snapshot, then resolve sender photos in the
//! background.
//!
//! Features:
//! - One pass in flight per generation, enforced by the state machine
//! - Snapshot publication is a single `watch` send, never a partial list
//! - Photo URLs arrive afterwards as `PhotoUpdate` patches keyed by message id,
//!   fanned out to every subscriber
//! - Results from a previous login are detected by generation and dropped

use chrono::Local;
use flume::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::photo_cache::{cache_key, resolve_photo, PhotoCache, PhotoEntry};
use super::state::{PassTicket, SyncState, SyncStateMachine, SyncTrigger};
use super::transformer::MessageTransformer;
use super::visibility::VisibilitySignal;
use crate::backend::AuthSession;
use crate::types::error::SyncError;
use crate::types::DisplayMessage;

/// Published view of the inbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxSnapshot {
    pub state: SyncState,
    pub error: Option<SyncError>,
    pub messages: Arc<[DisplayMessage]>,
    /// Revision at the time of publication
    pub revision: u64,
    pub generation: u64,
}

impl InboxSnapshot {
    fn empty(generation: u64) -> Self {
        Self {
            state: SyncState::Uninitialized,
            error: None,
            messages: Arc::from(Vec::new()),
            revision: 0,
            generation,
        }
    }
}

/// Out-of-band photo attachment for one published message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoUpdate {
    pub generation: u64,
    pub revision: u64,
    pub message_id: String,
    pub photo_url: String,
}

/// How a pass request ended when it did not produce an error
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    NotLoggedIn,
    /// Background tick while the surface is hidden
    Hidden,
    /// Another pass of this generation is running
    AlreadyRunning,
    Published(Arc<[DisplayMessage]>),
    /// Finished after a logout; nothing applied
    Stale,
}

/// One `photo_updates()` stream. The engine keeps a receiver clone only to
/// discard queued patches on logout.
struct PhotoSubscriber {
    tx: Sender<PhotoUpdate>,
    rx: Receiver<PhotoUpdate>,
}

impl PhotoSubscriber {
    /// Alive while the consumer still holds its receiver
    fn is_alive(&self) -> bool {
        self.tx.receiver_count() > 1
    }
}

/// State scoped to one login; dropping it aborts its photo tasks
struct SyncSession {
    generation: u64,
    photo_cache: Arc<RwLock<PhotoCache>>,
    photo_tasks: Mutex<JoinSet<()>>,
}

impl SyncSession {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            photo_cache: Arc::new(RwLock::new(PhotoCache::new(generation))),
            photo_tasks: Mutex::new(JoinSet::new()),
        }
    }
}

struct EngineInner {
    auth: AuthSession,
    visibility: VisibilitySignal,
    transformer: MessageTransformer,
    machine: Mutex<SyncStateMachine>,
    session: RwLock<Option<Arc<SyncSession>>>,
    snapshot: watch::Sender<Arc<InboxSnapshot>>,
    revision: watch::Sender<u64>,
    photo_subscribers: StdMutex<Vec<PhotoSubscriber>>,
}

/// The inbox sync engine
#[derive(Clone)]
pub struct InboxSyncEngine {
    inner: Arc<EngineInner>,
}

impl InboxSyncEngine {
    pub fn new(auth: AuthSession, visibility: VisibilitySignal, transformer: MessageTransformer) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(InboxSnapshot::empty(0)));
        let (revision, _) = watch::channel(0);

        Self {
            inner: Arc::new(EngineInner {
                auth,
                visibility,
                transformer,
                machine: Mutex::new(SyncStateMachine::new()),
                session: RwLock::new(None),
                snapshot,
                revision,
                photo_subscribers: StdMutex::new(Vec::new()),
            }),
        }
    }

    pub fn auth(&self) -> &AuthSession {
        &self.inner.auth
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<InboxSnapshot> {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<InboxSnapshot>> {
        self.inner.snapshot.subscribe()
    }

    /// Revision counter; bumps on every publication and photo resolution
    pub fn revision(&self) -> u64 {
        *self.inner.revision.borrow()
    }

    pub fn subscribe_revision(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// New photo patch stream; every stream receives every patch
    pub fn photo_updates(&self) -> Receiver<PhotoUpdate> {
        let (tx, rx) = flume::unbounded();
        let mut subscribers = self.photo_subscribers();
        subscribers.retain(PhotoSubscriber::is_alive);
        subscribers.push(PhotoSubscriber { tx, rx: rx.clone() });
        rx
    }

    fn photo_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<PhotoSubscriber>> {
        self.inner
            .photo_subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Send one patch to every live subscriber, dropping the dead ones
    fn broadcast_photo(&self, update: PhotoUpdate) {
        self.photo_subscribers().retain(|subscriber| {
            subscriber.is_alive() && subscriber.tx.send(update.clone()).is_ok()
        });
    }

    /// Drop patches still queued for a closed session
    fn discard_queued_photos(&self) {
        let mut subscribers = self.photo_subscribers();
        subscribers.retain(PhotoSubscriber::is_alive);
        let discarded: usize = subscribers.iter().map(|s| s.rx.drain().count()).sum();
        if discarded > 0 {
            debug!("Discarded {} queued photo updates", discarded);
        }
    }

    pub async fn state(&self) -> SyncState {
        self.inner.machine.lock().await.state()
    }

    pub async fn generation(&self) -> u64 {
        self.inner.machine.lock().await.generation()
    }

    /// Number of entries in the current session's photo cache
    pub async fn photo_cache_len(&self) -> usize {
        match self.current_session().await {
            Some(session) => session.photo_cache.read().await.len(),
            None => 0,
        }
    }

    async fn current_session(&self) -> Option<Arc<SyncSession>> {
        self.inner.session.read().await.clone()
    }

    /// Start a new session generation with an empty photo cache
    pub async fn login(&self) -> u64 {
        let mut machine = self.inner.machine.lock().await;
        let generation = machine.login();
        *self.inner.session.write().await = Some(Arc::new(SyncSession::new(generation)));

        self.discard_queued_photos();
        self.inner.revision.send_replace(0);
        self.inner
            .snapshot
            .send_replace(Arc::new(InboxSnapshot::empty(generation)));
        generation
    }

    /// Drop the session: clears messages and photo cache, resets the revision
    pub async fn logout(&self) {
        let mut machine = self.inner.machine.lock().await;
        machine.logout();
        let generation = machine.generation();

        if let Some(session) = self.inner.session.write().await.take() {
            session.photo_cache.write().await.clear(generation);
            session.photo_tasks.lock().await.abort_all();
            info!(
                "Session generation {} closed, photo cache cleared",
                session.generation
            );
        }

        self.discard_queued_photos();
        self.inner.revision.send_replace(0);
        self.inner
            .snapshot
            .send_replace(Arc::new(InboxSnapshot::empty(generation)));
    }

    fn bump_revision(&self) -> u64 {
        let mut revision = 0;
        self.inner.revision.send_modify(|r| {
            *r += 1;
            revision = *r;
        });
        revision
    }

    /// Publish the machine's state with the given messages. Caller holds the
    /// machine lock so state and list change together.
    fn publish(&self, machine: &SyncStateMachine, messages: Arc<[DisplayMessage]>) {
        let revision = self.bump_revision();
        self.inner.snapshot.send_replace(Arc::new(InboxSnapshot {
            state: machine.state(),
            error: machine.error().cloned(),
            messages,
            revision,
            generation: machine.generation(),
        }));
    }

    /// Propagate an authorization failure to the auth boundary
    fn session_invalid(&self, error: &SyncError) {
        warn!("Session invalid, forcing logout: {}", error);
        self.inner.auth.set_logged_in(false);
    }

    /// Run one sync pass
    pub async fn run_sync_pass(&self, trigger: SyncTrigger) -> Result<PassOutcome, SyncError> {
        if !self.inner.auth.is_logged_in() {
            debug!("Skipping {:?} pass: not logged in", trigger);
            return Ok(PassOutcome::NotLoggedIn);
        }
        if trigger.is_background() && !self.inner.visibility.is_visible() {
            debug!("Skipping background pass: surface hidden");
            return Ok(PassOutcome::Hidden);
        }

        let Some(session) = self.current_session().await else {
            debug!("Skipping {:?} pass: no active session", trigger);
            return Ok(PassOutcome::NotLoggedIn);
        };

        let ticket = {
            let mut machine = self.inner.machine.lock().await;
            if machine.generation() != session.generation {
                return Ok(PassOutcome::Stale);
            }
            let Some(ticket) = machine.begin(trigger, true) else {
                return Ok(PassOutcome::AlreadyRunning);
            };
            let current = self.snapshot().messages.clone();
            self.publish(&machine, current);
            ticket
        };

        info!(
            "Starting {:?} sync pass (generation {})",
            trigger, ticket.generation
        );

        let fetched = self.inner.auth.client().mail.fetch_inbox_messages().await;

        let raws = match fetched {
            Ok(raws) => raws,
            Err(e) if e.is_auth_expired() => {
                self.inner.machine.lock().await.abandon(&ticket);
                self.session_invalid(&e);
                return Err(e);
            }
            Err(e) => return self.fail_pass(&ticket, e.into_fetch_failure()).await,
        };

        let mut messages = self.inner.transformer.transform_all(&raws, &Local::now());

        // Photos are attached under the machine lock: a resolution stored
        // later patches this snapshot through apply_photo
        let messages: Arc<[DisplayMessage]> = {
            let mut machine = self.inner.machine.lock().await;
            if !machine.complete(&ticket) {
                debug!("Discarding pass result from generation {}", ticket.generation);
                return Ok(PassOutcome::Stale);
            }
            self.attach_cached_photos(&session, &mut messages).await;
            let messages: Arc<[DisplayMessage]> = Arc::from(messages);
            self.publish(&machine, messages.clone());
            messages
        };

        info!(
            "Sync pass published {} messages (generation {})",
            messages.len(),
            ticket.generation
        );

        self.spawn_photo_resolution(&session, &messages).await;

        Ok(PassOutcome::Published(messages))
    }

    async fn fail_pass(&self, ticket: &PassTicket, error: SyncError) -> Result<PassOutcome, SyncError> {
        let mut machine = self.inner.machine.lock().await;
        if !machine.fail(ticket, error.clone()) {
            return Ok(PassOutcome::Stale);
        }
        error!("Sync pass failed: {}", error);

        // Stale-but-present beats empty
        let current = self.snapshot().messages.clone();
        self.publish(&machine, current);
        Err(error)
    }

    async fn attach_cached_photos(&self, session: &SyncSession, messages: &mut [DisplayMessage]) {
        let cache = session.photo_cache.read().await;
        for message in messages.iter_mut() {
            if let Some(PhotoEntry::Resolved(url)) = cache.get(&message.from_email) {
                message.photo_url = Some(url.clone());
            }
        }
    }

    /// One task per distinct sender not yet in the cache
    async fn spawn_photo_resolution(&self, session: &Arc<SyncSession>, messages: &[DisplayMessage]) {
        let senders: Vec<String> = {
            let cache = session.photo_cache.read().await;
            let mut seen = HashSet::new();
            messages
                .iter()
                .filter(|m| !m.from_email.is_empty())
                .map(|m| cache_key(&m.from_email))
                .filter(|key| cache.get(key).is_none() && seen.insert(key.clone()))
                .collect()
        };

        if senders.is_empty() {
            return;
        }
        debug!("Resolving photos for {} senders", senders.len());

        let mut tasks = session.photo_tasks.lock().await;
        while tasks.try_join_next().is_some() {}

        for email in senders {
            let engine = self.clone();
            let cache = session.photo_cache.clone();
            let directory = self.inner.auth.client().directory.clone();
            let generation = session.generation;

            tasks.spawn(async move {
                match resolve_photo(&cache, directory.as_ref(), generation, &email).await {
                    Ok(resolution) if resolution.is_completed() => {
                        engine
                            .apply_photo(generation, &email, resolution.url())
                            .await;
                    }
                    Ok(_) => {}
                    Err(e) if e.is_auth_expired() => engine.session_invalid(&e),
                    Err(e) => warn!("Photo resolution for {} failed: {}", email, e),
                }
            });
        }
    }

    /// Bump the revision and patch every current message from `email`
    async fn apply_photo(&self, generation: u64, email: &str, url: Option<&str>) {
        let machine = self.inner.machine.lock().await;
        if machine.generation() != generation {
            debug!("Dropping photo for {} from stale generation {}", email, generation);
            return;
        }

        let revision = self.bump_revision();
        let Some(url) = url else {
            return;
        };

        let key = cache_key(email);
        let messages = self.snapshot().messages.clone();
        for message in messages.iter().filter(|m| cache_key(&m.from_email) == key) {
            self.broadcast_photo(PhotoUpdate {
                generation,
                revision,
                message_id: message.id.clone(),
                photo_url: url.to_string(),
            });
        }
    }
}
