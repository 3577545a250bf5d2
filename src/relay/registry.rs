use crate::error::RelayError;
use crate::frame::Frame;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Identity of one WebSocket connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Publisher,
    Subscriber,
}

/// What a connection registered as, returned by `publish` and `subscribe`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub camera_id: String,
    pub role: Role,
}

/// Outcome of relaying one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayOutcome {
    pub delivered: usize,
    pub dropped: usize,
    pub pruned: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub cameras: usize,
    pub publishers: usize,
    pub subscribers: usize,
    pub frames_relayed: u64,
    pub frames_dropped: u64,
}

#[derive(Default)]
struct CameraChannel {
    publisher: Option<ConnectionId>,
    subscribers: HashMap<ConnectionId, mpsc::Sender<Frame>>,
}

impl CameraChannel {
    fn is_empty(&self) -> bool {
        self.publisher.is_none() && self.subscribers.is_empty()
    }
}

/// Publisher and subscribers of every camera
///
/// The map lock is held only to find or create a channel; membership and
/// fan-out for a camera happen under that camera's own mutex.
pub struct ConnectionRegistry {
    channels: RwLock<HashMap<String, Arc<Mutex<CameraChannel>>>>,
    subscriber_queue: usize,
    frames_relayed: AtomicU64,
    frames_dropped: AtomicU64,
}

impl ConnectionRegistry {
    /// `subscriber_queue` frames may wait for each subscriber before relay
    /// drops frames for it
    pub fn new(subscriber_queue: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            subscriber_queue: subscriber_queue.max(1),
            frames_relayed: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    fn with_channel<R>(&self, camera_id: &str, f: impl FnOnce(&mut CameraChannel) -> R) -> R {
        {
            let channels = self.channels.read();
            if let Some(channel) = channels.get(camera_id) {
                return f(&mut channel.lock());
            }
        }

        let mut channels = self.channels.write();
        let channel = Arc::clone(channels.entry(camera_id.to_string()).or_default());
        let mut channel = channel.lock();
        f(&mut channel)
    }

    /// Register the sole publisher of `camera_id`
    ///
    /// A second publisher is refused; the incumbent keeps the channel.
    pub fn publish(&self, camera_id: &str) -> Result<ConnectionHandle, RelayError> {
        let id = ConnectionId::new();
        self.with_channel(camera_id, |channel| {
            if channel.publisher.is_some() {
                return Err(RelayError::Conflict {
                    camera_id: camera_id.to_string(),
                });
            }
            channel.publisher = Some(id);
            Ok(())
        })?;

        info!("Publisher {} registered for camera {}", id, camera_id);
        Ok(ConnectionHandle {
            id,
            camera_id: camera_id.to_string(),
            role: Role::Publisher,
        })
    }

    /// Add a subscriber; frames relayed from now on arrive on the receiver
    pub fn subscribe(&self, camera_id: &str) -> (ConnectionHandle, mpsc::Receiver<Frame>) {
        let id = ConnectionId::new();
        let (sender, receiver) = mpsc::channel(self.subscriber_queue);
        self.with_channel(camera_id, |channel| {
            channel.subscribers.insert(id, sender);
        });

        info!("Subscriber {} registered for camera {}", id, camera_id);
        let handle = ConnectionHandle {
            id,
            camera_id: camera_id.to_string(),
            role: Role::Subscriber,
        };
        (handle, receiver)
    }

    /// Fan `frame` out to every current subscriber of `camera_id`
    ///
    /// Never waits: a subscriber whose queue is full misses this frame, and
    /// one whose receiver is gone is removed.
    pub fn relay(&self, camera_id: &str, frame: &Frame) -> RelayOutcome {
        let channels = self.channels.read();
        let Some(channel) = channels.get(camera_id) else {
            return RelayOutcome::default();
        };
        let mut channel = channel.lock();

        let mut outcome = RelayOutcome::default();
        channel.subscribers.retain(|id, sender| match sender.try_send(frame.clone()) {
            Ok(()) => {
                outcome.delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                outcome.dropped += 1;
                trace!("Subscriber {} lagging, dropped frame {}", id, frame.seq);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                outcome.pruned += 1;
                debug!("Pruned closed subscriber {} of camera {}", id, camera_id);
                false
            }
        });

        self.frames_relayed
            .fetch_add(outcome.delivered as u64, Ordering::Relaxed);
        self.frames_dropped
            .fetch_add(outcome.dropped as u64, Ordering::Relaxed);
        outcome
    }

    /// Remove a connection from whatever role it held
    ///
    /// Subscribers stay attached when their publisher leaves. A channel with
    /// no publisher and no subscribers is dropped.
    pub fn disconnect(&self, handle: &ConnectionHandle) {
        let mut channels = self.channels.write();
        let Some(channel) = channels.get(&handle.camera_id).map(Arc::clone) else {
            return;
        };
        let mut channel = channel.lock();

        match handle.role {
            Role::Publisher => {
                if channel.publisher == Some(handle.id) {
                    channel.publisher = None;
                    info!("Publisher {} left camera {}", handle.id, handle.camera_id);
                } else {
                    warn!(
                        "Publisher {} is not registered for camera {}",
                        handle.id, handle.camera_id
                    );
                }
            }
            Role::Subscriber => {
                if channel.subscribers.remove(&handle.id).is_some() {
                    info!("Subscriber {} left camera {}", handle.id, handle.camera_id);
                }
            }
        }

        if channel.is_empty() {
            drop(channel);
            channels.remove(&handle.camera_id);
            debug!("Camera channel {} removed", handle.camera_id);
        }
    }

    pub fn has_publisher(&self, camera_id: &str) -> bool {
        self.channels
            .read()
            .get(camera_id)
            .map(|channel| channel.lock().publisher.is_some())
            .unwrap_or(false)
    }

    pub fn subscriber_count(&self, camera_id: &str) -> usize {
        self.channels
            .read()
            .get(camera_id)
            .map(|channel| channel.lock().subscribers.len())
            .unwrap_or(0)
    }

    pub fn camera_count(&self) -> usize {
        self.channels.read().len()
    }

    pub fn stats(&self) -> RegistryStats {
        let channels = self.channels.read();
        let mut stats = RegistryStats {
            cameras: channels.len(),
            frames_relayed: self.frames_relayed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            ..RegistryStats::default()
        };
        for channel in channels.values() {
            let channel = channel.lock();
            if channel.publisher.is_some() {
                stats.publishers += 1;
            }
            stats.subscribers += channel.subscribers.len();
        }
        stats
    }
}
