use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;
use tokio::time::Instant;

/// Door status as written to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockStatus {
    Locked,
    Unlocked,
}

impl LockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockStatus::Locked => "Locked",
            LockStatus::Unlocked => "Unlocked",
        }
    }
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock state of one camera, owned by that camera's actor
#[derive(Debug, Clone)]
pub struct LockState {
    pub camera_id: String,
    pub status: LockStatus,
    /// When the pending relock fires; `None` while no timer is armed
    pub lock_deadline: Option<Instant>,
    /// Wall-clock time of the last Locked -> Unlocked transition
    pub last_unlock: Option<SystemTime>,
    /// Wall-clock time of the last known face seen on this camera
    pub last_recognized: Option<SystemTime>,
}

impl LockState {
    pub(crate) fn new(camera_id: String) -> Self {
        Self {
            camera_id,
            status: LockStatus::Locked,
            lock_deadline: None,
            last_unlock: None,
            last_recognized: None,
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.status == LockStatus::Unlocked
    }

    /// Time left before relocking, if a timer is armed
    pub fn remaining(&self) -> Option<std::time::Duration> {
        self.lock_deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}
