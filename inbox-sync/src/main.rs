use std::sync::Arc;

use inbox_sync::config::load_config;
use inbox_sync::{
    AuthSession, BackendClient, GraphBackend, InboxController, InboxView, SyncError,
    VisibilitySignal,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    inbox_sync::init_tracing();

    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), SyncError> {
    let config = load_config()?;
    let backend = Arc::new(GraphBackend::from_config(&config)?);

    let auth = AuthSession::new(BackendClient::shared(backend), true);
    let visibility = VisibilitySignal::new(true);
    let controller = InboxController::start(&config, auth.clone(), visibility)?;

    info!("Starting inbox sync ...");

    let mut snapshots = controller.subscribe();
    let photos = controller.photo_updates();
    let mut logged_in = auth.subscribe();
    let mut view = InboxView::new();

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                view.apply_snapshot(snapshot);
                info!(
                    "Inbox {:?}: {} messages (revision {})",
                    view.state(),
                    view.messages().len(),
                    view.revision()
                );
                if let Some(e) = view.error() {
                    warn!("Last sync failed: {}", e);
                }
                for message in view.messages() {
                    info!(
                        "{} {:>10}  {:<24} {}",
                        if message.unread { "*" } else { " " },
                        message.received,
                        message.from_name,
                        message.subject
                    );
                }
            }
            Ok(update) = photos.recv_async() => {
                if view.apply_patch(&update) {
                    info!("Photo attached to message {}", update.message_id);
                }
            }
            changed = logged_in.changed() => {
                if changed.is_err() || !*logged_in.borrow_and_update() {
                    warn!("Session expired; refresh the access token and restart");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    controller.shutdown();
    Ok(())
}
