//! Backend collaborators consumed by the sync core
//!
//! The core never talks to the network directly. It goes through the
//! mail and directory traits below, and observes login state through
//! an [`AuthSession`] owned by the auth layer.

pub mod graph;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::types::error::SyncError;
use crate::types::{PhotoResource, RawMessage};

pub use graph::GraphBackend;

/// Inbox listing service
///
/// Fails with `SyncError::AuthExpired` when the credentials are rejected;
/// any other error is treated as a generic fetch failure.
#[async_trait]
pub trait MailBackend: Send + Sync {
    async fn fetch_inbox_messages(&self) -> Result<Vec<RawMessage>, SyncError>;
}

/// User directory used to resolve sender photos
#[async_trait]
pub trait DirectoryBackend: Send + Sync {
    async fn find_user_id_by_email(&self, email: &str) -> Result<Option<String>, SyncError>;

    async fn fetch_user_photo(&self, user_id: &str) -> Result<Option<PhotoResource>, SyncError>;
}

/// Authenticated client handle shared by the mail and directory services
#[derive(Clone)]
pub struct BackendClient {
    pub mail: Arc<dyn MailBackend>,
    pub directory: Arc<dyn DirectoryBackend>,
}

impl BackendClient {
    pub fn new(mail: Arc<dyn MailBackend>, directory: Arc<dyn DirectoryBackend>) -> Self {
        Self { mail, directory }
    }

    /// Use one value for both services (e.g. a Graph client)
    pub fn shared<B>(backend: Arc<B>) -> Self
    where
        B: MailBackend + DirectoryBackend + 'static,
    {
        Self {
            mail: backend.clone(),
            directory: backend,
        }
    }
}

/// Auth collaborator: client handle plus an observable logged-in flag
#[derive(Clone)]
pub struct AuthSession {
    client: BackendClient,
    logged_in: Arc<watch::Sender<bool>>,
}

impl AuthSession {
    pub fn new(client: BackendClient, logged_in: bool) -> Self {
        let (tx, _rx) = watch::channel(logged_in);
        Self {
            client,
            logged_in: Arc::new(tx),
        }
    }

    pub fn client(&self) -> &BackendClient {
        &self.client
    }

    pub fn is_logged_in(&self) -> bool {
        *self.logged_in.borrow()
    }

    /// Change the login flag; subscribers are only woken on an actual change
    pub fn set_logged_in(&self, logged_in: bool) {
        let changed = self.logged_in.send_if_modified(|current| {
            if *current == logged_in {
                false
            } else {
                *current = logged_in;
                true
            }
        });
        if changed {
            info!("Login state changed: logged_in = {}", logged_in);
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.logged_in.subscribe()
    }
}
