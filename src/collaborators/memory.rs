use super::{KnownFace, PersistentStore};
use crate::access::LockStatus;
use crate::error::StoreError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tokio::time::Instant;
use tracing::debug;

/// One camera status write, in the order the store received it
#[derive(Debug, Clone, PartialEq)]
pub struct StatusWrite {
    pub camera_id: String,
    pub status: LockStatus,
    pub at: Instant,
}

#[derive(Default)]
struct MemoryState {
    members: HashMap<String, Vec<KnownFace>>,
    images: HashMap<String, Bytes>,
    camera_status: HashMap<String, LockStatus>,
    emotions: HashMap<String, String>,
    status_writes: Vec<StatusWrite>,
    failing_status_writes: usize,
    unavailable: bool,
}

/// Process-local store used by the binary and as a test double
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a family member for `user_id`, with optional enrolment photo
    pub fn add_member(&self, user_id: &str, face: KnownFace, image: Option<Bytes>) {
        let mut state = self.state.lock();
        if let (Some(image_ref), Some(bytes)) = (face.image_ref.clone(), image) {
            state.images.insert(image_ref, bytes);
        }
        state
            .members
            .entry(user_id.to_string())
            .or_default()
            .push(face);
    }

    pub fn remove_member(&self, user_id: &str, member_id: &str) {
        let mut state = self.state.lock();
        if let Some(members) = state.members.get_mut(user_id) {
            members.retain(|m| m.member_id != member_id);
        }
    }

    pub fn camera_status(&self, camera_id: &str) -> Option<LockStatus> {
        self.state.lock().camera_status.get(camera_id).copied()
    }

    pub fn emotion(&self, member_id: &str) -> Option<String> {
        self.state.lock().emotions.get(member_id).cloned()
    }

    /// Every status write for `camera_id`, oldest first
    pub fn status_writes(&self, camera_id: &str) -> Vec<StatusWrite> {
        self.state
            .lock()
            .status_writes
            .iter()
            .filter(|w| w.camera_id == camera_id)
            .cloned()
            .collect()
    }

    /// Make the next `count` camera status writes fail
    pub fn fail_next_status_writes(&self, count: usize) {
        self.state.lock().failing_status_writes = count;
    }

    /// Make every call fail until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    fn check_available(state: &MemoryState) -> Result<(), StoreError> {
        if state.unavailable {
            return Err(StoreError::Unavailable {
                details: "memory store marked unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get_known_faces(&self, user_id: &str) -> Result<Vec<KnownFace>, StoreError> {
        let state = self.state.lock();
        Self::check_available(&state)?;
        Ok(state.members.get(user_id).cloned().unwrap_or_default())
    }

    async fn get_family_member_ids(&self, user_id: &str) -> Result<HashSet<String>, StoreError> {
        let state = self.state.lock();
        Self::check_available(&state)?;
        Ok(state
            .members
            .get(user_id)
            .map(|members| members.iter().map(|m| m.member_id.clone()).collect())
            .unwrap_or_default())
    }

    async fn update_camera_status(
        &self,
        camera_id: &str,
        status: LockStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        if state.failing_status_writes > 0 {
            state.failing_status_writes -= 1;
            return Err(StoreError::Request {
                details: format!("injected failure writing status of {}", camera_id),
            });
        }

        debug!("Camera {} status -> {}", camera_id, status);
        state.camera_status.insert(camera_id.to_string(), status);
        state.status_writes.push(StatusWrite {
            camera_id: camera_id.to_string(),
            status,
            at: Instant::now(),
        });
        Ok(())
    }

    async fn update_family_emotion(
        &self,
        member_id: &str,
        emotion: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        state
            .emotions
            .insert(member_id.to_string(), emotion.to_string());
        Ok(())
    }

    async fn fetch_image(&self, image_ref: &str) -> Result<Bytes, StoreError> {
        let state = self.state.lock();
        Self::check_available(&state)?;
        state
            .images
            .get(image_ref)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                key: image_ref.to_string(),
            })
    }
}
