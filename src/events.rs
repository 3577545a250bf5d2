use crate::error::EventBusError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Events that can occur in the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BrokerEvent {
    /// A publisher took ownership of a camera channel
    PublisherConnected { camera_id: String },
    /// A second publisher was refused for a camera
    PublisherRejected { camera_id: String },
    /// The publisher of a camera went away
    PublisherDisconnected { camera_id: String },
    SubscriberConnected { camera_id: String },
    SubscriberDisconnected { camera_id: String },
    /// A detected face matched the known gallery
    FaceRecognized {
        camera_id: String,
        name: String,
        distance: f32,
    },
    /// A detected face matched nobody; `novel` is true when it raised an alert
    UnknownFaceDetected { camera_id: String, novel: bool },
    CameraUnlocked {
        camera_id: String,
        timestamp: SystemTime,
    },
    /// The lock deadline of an unlocked camera was pushed back
    UnlockExtended { camera_id: String },
    CameraLocked {
        camera_id: String,
        timestamp: SystemTime,
    },
    AlertQueued { filename: String },
    AlertDelivered { filename: String },
    AlertFailed { filename: String, error: String },
    /// A family member's emotion was written to the store
    EmotionUpdated { member_id: String, emotion: String },
    /// The known-face gallery was rebuilt from the store
    RosterReloaded { known_faces: usize },
    /// A component hit a recoverable error
    SystemError { component: String, error: String },
    ShutdownRequested {
        timestamp: SystemTime,
        reason: String,
    },
}

impl BrokerEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            BrokerEvent::PublisherConnected { camera_id } => {
                format!("Publisher connected to camera {}", camera_id)
            }
            BrokerEvent::PublisherRejected { camera_id } => {
                format!("Publisher rejected for camera {}", camera_id)
            }
            BrokerEvent::PublisherDisconnected { camera_id } => {
                format!("Publisher disconnected from camera {}", camera_id)
            }
            BrokerEvent::SubscriberConnected { camera_id } => {
                format!("Subscriber connected to camera {}", camera_id)
            }
            BrokerEvent::SubscriberDisconnected { camera_id } => {
                format!("Subscriber disconnected from camera {}", camera_id)
            }
            BrokerEvent::FaceRecognized {
                camera_id,
                name,
                distance,
            } => {
                format!(
                    "Recognized {} on camera {} (distance {:.3})",
                    name, camera_id, distance
                )
            }
            BrokerEvent::UnknownFaceDetected { camera_id, novel } => {
                format!(
                    "Unknown face on camera {}{}",
                    camera_id,
                    if *novel { " (new)" } else { "" }
                )
            }
            BrokerEvent::CameraUnlocked { camera_id, .. } => {
                format!("Camera {} unlocked", camera_id)
            }
            BrokerEvent::UnlockExtended { camera_id } => {
                format!("Camera {} unlock extended", camera_id)
            }
            BrokerEvent::CameraLocked { camera_id, .. } => {
                format!("Camera {} locked", camera_id)
            }
            BrokerEvent::AlertQueued { filename } => format!("Alert queued: {}", filename),
            BrokerEvent::AlertDelivered { filename } => {
                format!("Alert delivered: {}", filename)
            }
            BrokerEvent::AlertFailed { filename, error } => {
                format!("Alert {} failed: {}", filename, error)
            }
            BrokerEvent::EmotionUpdated { member_id, emotion } => {
                format!("Member {} emotion set to {}", member_id, emotion)
            }
            BrokerEvent::RosterReloaded { known_faces } => {
                format!("Known-face gallery reloaded ({} faces)", known_faces)
            }
            BrokerEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
            BrokerEvent::ShutdownRequested { reason, .. } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            BrokerEvent::PublisherConnected { .. } => "publisher_connected",
            BrokerEvent::PublisherRejected { .. } => "publisher_rejected",
            BrokerEvent::PublisherDisconnected { .. } => "publisher_disconnected",
            BrokerEvent::SubscriberConnected { .. } => "subscriber_connected",
            BrokerEvent::SubscriberDisconnected { .. } => "subscriber_disconnected",
            BrokerEvent::FaceRecognized { .. } => "face_recognized",
            BrokerEvent::UnknownFaceDetected { .. } => "unknown_face_detected",
            BrokerEvent::CameraUnlocked { .. } => "camera_unlocked",
            BrokerEvent::UnlockExtended { .. } => "unlock_extended",
            BrokerEvent::CameraLocked { .. } => "camera_locked",
            BrokerEvent::AlertQueued { .. } => "alert_queued",
            BrokerEvent::AlertDelivered { .. } => "alert_delivered",
            BrokerEvent::AlertFailed { .. } => "alert_failed",
            BrokerEvent::EmotionUpdated { .. } => "emotion_updated",
            BrokerEvent::RosterReloaded { .. } => "roster_reloaded",
            BrokerEvent::SystemError { .. } => "system_error",
            BrokerEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }

    /// Camera the event concerns, if any
    pub fn camera_id(&self) -> Option<&str> {
        match self {
            BrokerEvent::PublisherConnected { camera_id }
            | BrokerEvent::PublisherRejected { camera_id }
            | BrokerEvent::PublisherDisconnected { camera_id }
            | BrokerEvent::SubscriberConnected { camera_id }
            | BrokerEvent::SubscriberDisconnected { camera_id }
            | BrokerEvent::FaceRecognized { camera_id, .. }
            | BrokerEvent::UnknownFaceDetected { camera_id, .. }
            | BrokerEvent::CameraUnlocked { camera_id, .. }
            | BrokerEvent::UnlockExtended { camera_id }
            | BrokerEvent::CameraLocked { camera_id, .. } => Some(camera_id),
            _ => None,
        }
    }
}

/// Async event bus for component coordination using broadcast channels
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BrokerEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<BrokerEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers
    ///
    /// Fails only when nobody is listening, which callers are free to ignore.
    pub async fn publish(&self, event: BrokerEvent) -> Result<usize, EventBusError> {
        match &event {
            BrokerEvent::CameraUnlocked { camera_id, .. } => {
                info!("Camera {} unlocked", camera_id);
            }
            BrokerEvent::CameraLocked { camera_id, .. } => {
                info!("Camera {} locked", camera_id);
            }
            BrokerEvent::PublisherRejected { camera_id } => {
                warn!("Rejected duplicate publisher for camera {}", camera_id);
            }
            BrokerEvent::AlertFailed { filename, error } => {
                warn!("Alert {} failed: {}", filename, error);
            }
            BrokerEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            BrokerEvent::ShutdownRequested { reason, .. } => {
                info!("Shutdown requested: {}", reason);
            }
            _ => {
                debug!("Event: {}", event.description());
            }
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Accept events concerning one camera
    Camera(String),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &BrokerEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Camera(camera_id) => event.camera_id() == Some(camera_id.as_str()),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<BrokerEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    /// Create a new event receiver with a filter
    pub fn new(
        receiver: broadcast::Receiver<BrokerEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<BrokerEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::PublishFailed {
                        details: format!("Receiver lagged behind by {} events", n),
                    });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}
