use crate::config::GalleryScope;
use crate::recognition::Embedding;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

/// An unknown face that has already raised an alert
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub embedding: Embedding,
    pub alerted_at: SystemTime,
}

/// Bounded record of alerted unknown embeddings
///
/// Entries are pairwise more than `tolerance` apart because one is only
/// added when it is farther than that from every other.
#[derive(Debug)]
pub struct UnknownGallery {
    tolerance: f32,
    capacity: usize,
    entries: VecDeque<GalleryEntry>,
}

impl UnknownGallery {
    pub fn new(tolerance: f32, capacity: usize) -> Self {
        Self {
            tolerance,
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Distance to the closest entry, `None` for an empty gallery
    pub fn nearest(&self, embedding: &Embedding) -> Option<f32> {
        self.entries
            .iter()
            .map(|entry| entry.embedding.distance(embedding))
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Record `embedding` if it is a new subject; returns whether it was
    pub fn consider(&mut self, embedding: &Embedding) -> bool {
        if let Some(distance) = self.nearest(embedding) {
            if distance <= self.tolerance {
                debug!("Unknown face within {:.3} of an alerted one", distance);
                return false;
            }
        }

        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(GalleryEntry {
            embedding: embedding.clone(),
            alerted_at: SystemTime::now(),
        });
        true
    }

    pub fn entries(&self) -> impl Iterator<Item = &GalleryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

const PROCESS_SCOPE: &str = "*";

/// Unknown galleries keyed by scope, each behind its own lock
pub struct DedupGallery {
    scope: GalleryScope,
    tolerance: f32,
    capacity: usize,
    galleries: Mutex<HashMap<String, Arc<Mutex<UnknownGallery>>>>,
}

impl DedupGallery {
    pub fn new(scope: GalleryScope, tolerance: f32, capacity: usize) -> Self {
        Self {
            scope,
            tolerance,
            capacity,
            galleries: Mutex::new(HashMap::new()),
        }
    }

    pub fn scope(&self) -> GalleryScope {
        self.scope
    }

    fn gallery_for(&self, camera_id: &str) -> Arc<Mutex<UnknownGallery>> {
        let key = match self.scope {
            GalleryScope::Process => PROCESS_SCOPE,
            GalleryScope::Camera => camera_id,
        };
        let mut galleries = self.galleries.lock();
        Arc::clone(
            galleries
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(UnknownGallery::new(self.tolerance, self.capacity)))),
        )
    }

    /// Check-then-append under the scope's lock
    pub fn consider(&self, camera_id: &str, embedding: &Embedding) -> bool {
        let gallery = self.gallery_for(camera_id);
        let mut gallery = gallery.lock();
        gallery.consider(embedding)
    }

    /// Number of alerted subjects visible from `camera_id`
    pub fn len_for(&self, camera_id: &str) -> usize {
        self.gallery_for(camera_id).lock().len()
    }
}
