//! Contracts for the services the broker depends on but does not implement.
//!
//! Face location, embedding and emotion inference are CPU-bound and
//! synchronous; the pipeline runs them on the blocking pool. Store and
//! notifier calls are network-bound and async.

mod memory;
mod notify;

pub use memory::{MemoryStore, StatusWrite};
pub use notify::LogNotifier;

use crate::access::LockStatus;
use crate::error::{ClassifierError, NotifyError, StoreError};
use crate::recognition::{Embedding, FaceBox, FaceMatch, KnownGallery};
use async_trait::async_trait;
use bytes::Bytes;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A family member record as stored for a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownFace {
    pub member_id: String,
    pub name: String,
    /// Reference to the enrolment photo, resolved with `fetch_image`
    pub image_ref: Option<String>,
}

#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get_known_faces(&self, user_id: &str) -> Result<Vec<KnownFace>, StoreError>;

    async fn get_family_member_ids(&self, user_id: &str) -> Result<HashSet<String>, StoreError>;

    async fn update_camera_status(
        &self,
        camera_id: &str,
        status: LockStatus,
    ) -> Result<(), StoreError>;

    async fn update_family_emotion(&self, member_id: &str, emotion: &str)
        -> Result<(), StoreError>;

    async fn fetch_image(&self, image_ref: &str) -> Result<Bytes, StoreError>;
}

/// Alert delivery; the broker never waits on the outcome
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, destination: &str, image: Bytes, filename: &str)
        -> Result<(), NotifyError>;
}

pub trait FaceDirectory: Send + Sync {
    /// Face boxes in the coordinates of `image`
    fn locate(&self, image: &RgbImage) -> Result<Vec<FaceBox>, ClassifierError>;

    /// Embedding of the single face in `image`, if one is found
    fn encode(&self, image: &RgbImage) -> Result<Option<Embedding>, ClassifierError>;

    /// Closest gallery entry, accepted only when strictly under `threshold`
    fn best_match(
        &self,
        gallery: &KnownGallery,
        embedding: &Embedding,
        threshold: f32,
    ) -> Option<FaceMatch> {
        gallery
            .entries()
            .iter()
            .map(|entry| (entry, entry.embedding.distance(embedding)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .filter(|(_, distance)| *distance < threshold)
            .map(|(entry, distance)| FaceMatch {
                member_id: entry.member_id.clone(),
                name: entry.name.clone(),
                distance,
            })
    }
}

pub trait EmotionClassifier: Send + Sync {
    fn classify(&self, face: &RgbImage) -> Result<String, ClassifierError>;
}
