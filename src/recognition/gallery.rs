use super::types::Embedding;
use crate::collaborators::{FaceDirectory, PersistentStore};
use crate::error::{ClassifierError, StoreError};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One enrolled family member
#[derive(Debug, Clone)]
pub struct KnownEntry {
    pub member_id: String,
    pub name: String,
    pub embedding: Embedding,
}

/// Embeddings of the current user's family members
#[derive(Debug, Clone, Default)]
pub struct KnownGallery {
    entries: Vec<KnownEntry>,
}

impl KnownGallery {
    pub fn new(entries: Vec<KnownEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[KnownEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Swappable gallery; readers keep the snapshot they started with
#[derive(Debug, Default)]
pub struct GalleryHandle {
    current: RwLock<Arc<KnownGallery>>,
}

impl GalleryHandle {
    pub fn new(gallery: KnownGallery) -> Self {
        Self {
            current: RwLock::new(Arc::new(gallery)),
        }
    }

    pub fn current(&self) -> Arc<KnownGallery> {
        Arc::clone(&self.current.read())
    }

    pub fn replace(&self, gallery: KnownGallery) {
        *self.current.write() = Arc::new(gallery);
    }
}

/// Build the known gallery for `user_id` from the store
///
/// Only a failure to list the members is an error; members whose photo
/// cannot be fetched, decoded or encoded are skipped.
pub async fn load_known_gallery(
    store: &dyn PersistentStore,
    directory: Arc<dyn FaceDirectory>,
    user_id: &str,
) -> Result<KnownGallery, StoreError> {
    let members = store.get_known_faces(user_id).await?;
    if members.is_empty() {
        warn!("No family members found for user {}", user_id);
    }

    let mut entries = Vec::with_capacity(members.len());
    for member in members {
        let Some(image_ref) = member.image_ref.as_deref() else {
            debug!("Member {} has no enrolment photo", member.name);
            continue;
        };

        let bytes = match store.fetch_image(image_ref).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to fetch photo for {}: {}", member.name, e);
                continue;
            }
        };

        let directory = Arc::clone(&directory);
        let encoded = tokio::task::spawn_blocking(move || {
            let image = image::load_from_memory(&bytes)
                .map_err(|e| ClassifierError::Decode {
                    details: e.to_string(),
                })?
                .to_rgb8();
            directory.encode(&image)
        })
        .await;

        match encoded {
            Ok(Ok(Some(embedding))) => {
                info!("Loaded known face for {}", member.name);
                entries.push(KnownEntry {
                    member_id: member.member_id,
                    name: member.name,
                    embedding,
                });
            }
            Ok(Ok(None)) => warn!("No face detected for {}", member.name),
            Ok(Err(e)) => warn!("Failed to encode photo for {}: {}", member.name, e),
            Err(e) => warn!("Encoding task for {} failed: {}", member.name, e),
        }
    }

    Ok(KnownGallery::new(entries))
}
