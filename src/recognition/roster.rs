use super::gallery::{load_known_gallery, GalleryHandle};
use crate::collaborators::{FaceDirectory, PersistentStore};
use crate::error::StoreError;
use crate::events::{BrokerEvent, EventBus};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Keeps the known gallery in step with the user's family roster
///
/// The store is polled for member ids; the gallery is rebuilt only when
/// the set changes. A failed poll or reload keeps the previous gallery.
pub struct RosterWatcher {
    store: Arc<dyn PersistentStore>,
    directory: Arc<dyn FaceDirectory>,
    gallery: Arc<GalleryHandle>,
    event_bus: Arc<EventBus>,
    user_id: String,
    poll_interval: Duration,
    known_ids: Mutex<Option<HashSet<String>>>,
}

impl RosterWatcher {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        directory: Arc<dyn FaceDirectory>,
        gallery: Arc<GalleryHandle>,
        event_bus: Arc<EventBus>,
        user_id: String,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            directory,
            gallery,
            event_bus,
            user_id,
            poll_interval,
            known_ids: Mutex::new(None),
        }
    }

    /// Rebuild the gallery from the store; returns the number of known faces
    pub async fn reload(&self) -> Result<usize, StoreError> {
        let ids = self.store.get_family_member_ids(&self.user_id).await?;
        let gallery =
            load_known_gallery(self.store.as_ref(), Arc::clone(&self.directory), &self.user_id)
                .await?;
        let known_faces = gallery.len();

        self.gallery.replace(gallery);
        *self.known_ids.lock() = Some(ids);

        info!("Loaded {} known face(s) for user {}", known_faces, self.user_id);
        let _ = self
            .event_bus
            .publish(BrokerEvent::RosterReloaded { known_faces })
            .await;
        Ok(known_faces)
    }

    /// Check the roster once; returns true if the gallery was rebuilt
    pub async fn poll(&self) -> Result<bool, StoreError> {
        let ids = self.store.get_family_member_ids(&self.user_id).await?;
        let changed = self.known_ids.lock().as_ref() != Some(&ids);
        if !changed {
            debug!("Family roster for {} unchanged", self.user_id);
            return Ok(false);
        }

        info!("Family roster for {} changed, reloading", self.user_id);
        self.reload().await?;
        Ok(true)
    }

    /// Poll on the configured interval until `token` is cancelled
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; the gallery was just loaded
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.poll().await {
                            warn!("Roster poll failed, keeping current gallery: {}", e);
                            if let Err(publish_err) = self
                                .event_bus
                                .publish(BrokerEvent::SystemError {
                                    component: "roster_watcher".to_string(),
                                    error: e.to_string(),
                                })
                                .await
                            {
                                error!("Failed to publish roster error: {}", publish_err);
                            }
                        }
                    }
                }
            }

            debug!("Roster watcher stopped");
        })
    }
}
