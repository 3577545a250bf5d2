//! Unknown-face alerting: deduplicate, persist the crop, notify.

mod capture;
mod dedup;
mod dispatcher;
#[cfg(test)]
mod tests;

pub use capture::UnknownFaceStore;
pub use dedup::{DedupGallery, GalleryEntry, UnknownGallery};
pub use dispatcher::{AlertDispatcher, AlertJob, AlertStats};

use crate::collaborators::Notifier;
use crate::config::{AlertConfig, UnknownConfig};
use crate::events::{BrokerEvent, EventBus};
use crate::frame::encode_jpeg;
use crate::recognition::Embedding;
use bytes::Bytes;
use image::RgbImage;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{info, warn};

const ALERT_JPEG_QUALITY: u8 = 90;

/// Raises at most one alert per distinct unknown subject
pub struct UnknownFaceAlerts {
    gallery: DedupGallery,
    captures: UnknownFaceStore,
    dispatcher: AlertDispatcher,
    destination: String,
    event_bus: Arc<EventBus>,
}

impl UnknownFaceAlerts {
    pub fn new(
        gallery: DedupGallery,
        captures: UnknownFaceStore,
        dispatcher: AlertDispatcher,
        destination: String,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            gallery,
            captures,
            dispatcher,
            destination,
            event_bus,
        }
    }

    /// Build the alert path from configuration; spawns the dispatch worker
    pub fn from_config(
        unknown: &UnknownConfig,
        alerts: &AlertConfig,
        notifier: Arc<dyn Notifier>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let dispatcher = AlertDispatcher::spawn(
            notifier,
            Arc::clone(&event_bus),
            alerts.queue_capacity,
            alerts.min_interval(),
        );
        Self::new(
            DedupGallery::new(unknown.scope, unknown.tolerance, unknown.capacity),
            UnknownFaceStore::new(&unknown.storage_path),
            dispatcher,
            alerts.destination.clone(),
            event_bus,
        )
    }

    pub fn gallery(&self) -> &DedupGallery {
        &self.gallery
    }

    pub fn captures(&self) -> &UnknownFaceStore {
        &self.captures
    }

    pub fn stats(&self) -> AlertStats {
        self.dispatcher.stats()
    }

    /// Handle one unknown face; returns true if it raised an alert
    ///
    /// Saving and delivery failures are logged and never reach the caller.
    pub async fn consider(&self, camera_id: &str, embedding: &Embedding, face: &RgbImage) -> bool {
        // A crop that cannot be encoded must not enter the gallery
        let jpeg = match encode_jpeg(face, ALERT_JPEG_QUALITY) {
            Ok(jpeg) => Bytes::from(jpeg),
            Err(e) => {
                warn!("Could not encode unknown face from camera {}: {}", camera_id, e);
                return false;
            }
        };

        if !self.gallery.consider(camera_id, embedding) {
            return false;
        }

        info!("New unknown face on camera {}", camera_id);

        let filename = self.captures.next_filename();
        if let Err(e) = self.captures.save(&filename, &jpeg).await {
            warn!("Failed to save {}: {}", filename, e);
        }

        let job = AlertJob {
            image: jpeg,
            filename: filename.clone(),
            destination: self.destination.clone(),
            created_at: SystemTime::now(),
        };
        if self.dispatcher.dispatch(job) {
            let _ = self
                .event_bus
                .publish(BrokerEvent::AlertQueued { filename })
                .await;
        }

        true
    }

    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}
