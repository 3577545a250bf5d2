use super::state::{LockState, LockStatus};
use crate::collaborators::PersistentStore;
use crate::events::{BrokerEvent, EventBus};
use crate::recognition::FaceEvent;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{sleep, timeout, Instant, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const COMMAND_QUEUE: usize = 16;
const FINAL_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

enum Command {
    Recognized { detected_at: SystemTime },
}

struct CameraHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<LockState>,
    task: JoinHandle<()>,
}

/// Debounced lock/unlock state machine, one actor per camera
///
/// A camera's actor owns its `LockState` and its only relock timer, and
/// performs that camera's store writes one after another. The shared map is
/// locked only to look up or create an actor.
pub struct AccessController {
    store: Arc<dyn PersistentStore>,
    event_bus: Arc<EventBus>,
    debounce: Duration,
    cameras: Mutex<HashMap<String, CameraHandle>>,
    cancellation_token: CancellationToken,
}

impl AccessController {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        event_bus: Arc<EventBus>,
        debounce: Duration,
    ) -> Self {
        Self {
            store,
            event_bus,
            debounce,
            cameras: Mutex::new(HashMap::new()),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Feed a face event; only known faces affect lock state
    pub fn handle_event(&self, event: &FaceEvent) {
        if !event.is_known() {
            return;
        }
        self.recognized(&event.camera_id, event.detected_at);
    }

    /// Report a known face on `camera_id`
    pub fn recognized(&self, camera_id: &str, detected_at: SystemTime) {
        let mut cameras = self.cameras.lock();

        let live = cameras
            .get(camera_id)
            .map(|handle| !handle.commands.is_closed())
            .unwrap_or(false);
        if !live {
            if self.cancellation_token.is_cancelled() {
                debug!("Access controller stopped; ignoring camera {}", camera_id);
                return;
            }
            let handle = self.spawn_actor(camera_id);
            cameras.insert(camera_id.to_string(), handle);
        }

        if let Some(handle) = cameras.get(camera_id) {
            match handle.commands.try_send(Command::Recognized { detected_at }) {
                Ok(()) => {}
                // Backed up behind a store write; the pending sighting covers this one
                Err(TrySendError::Full(_)) => {
                    debug!("Lock actor for camera {} is busy; sighting dropped", camera_id)
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("Lock actor for camera {} is gone", camera_id)
                }
            }
        }
    }

    /// Current lock state of a camera that has ever been unlocked
    pub fn snapshot(&self, camera_id: &str) -> Option<LockState> {
        self.cameras
            .lock()
            .get(camera_id)
            .map(|handle| handle.state.borrow().clone())
    }

    pub fn snapshots(&self) -> Vec<LockState> {
        let mut states: Vec<LockState> = self
            .cameras
            .lock()
            .values()
            .map(|handle| handle.state.borrow().clone())
            .collect();
        states.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        states
    }

    /// Stop every camera actor, locking any camera that is still unlocked
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        let tasks: Vec<JoinHandle<()>> = self
            .cameras
            .lock()
            .drain()
            .map(|(_, handle)| handle.task)
            .collect();
        for task in tasks {
            let _ = task.await;
        }
        info!("Access controller stopped");
    }

    fn spawn_actor(&self, camera_id: &str) -> CameraHandle {
        let (commands, receiver) = mpsc::channel(COMMAND_QUEUE);
        let initial = LockState::new(camera_id.to_string());
        let (state_tx, state_rx) = watch::channel(initial.clone());

        let actor = CameraActor {
            state: initial,
            store: Arc::clone(&self.store),
            event_bus: Arc::clone(&self.event_bus),
            debounce: self.debounce,
            state_tx,
        };
        let token = self.cancellation_token.child_token();
        let task = tokio::spawn(actor.run(receiver, token));

        debug!("Created lock actor for camera {}", camera_id);
        CameraHandle {
            commands,
            state: state_rx,
            task,
        }
    }
}

impl Drop for AccessController {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

struct CameraActor {
    state: LockState,
    store: Arc<dyn PersistentStore>,
    event_bus: Arc<EventBus>,
    debounce: Duration,
    state_tx: watch::Sender<LockState>,
}

impl CameraActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        token: CancellationToken,
    ) {
        // Single relock timer; re-arming moves its deadline.
        let timer = sleep(Duration::ZERO);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => break,

                command = commands.recv() => match command {
                    Some(Command::Recognized { detected_at }) => {
                        self.on_recognized(detected_at, timer.as_mut()).await;
                    }
                    None => break,
                },

                () = &mut timer, if self.state.lock_deadline.is_some() => {
                    self.on_timer_elapsed(timer.as_mut()).await;
                }
            }
        }

        if self.state.lock_deadline.is_some() {
            self.lock_on_exit().await;
        }

        debug!("Lock actor for camera {} stopped", self.state.camera_id);
    }

    /// Relock a camera whose timer had not fired yet
    async fn lock_on_exit(&mut self) {
        let camera_id = self.state.camera_id.clone();

        match timeout(
            FINAL_LOCK_TIMEOUT,
            self.store.update_camera_status(&camera_id, LockStatus::Locked),
        )
        .await
        {
            Ok(Ok(())) => {
                info!("Camera {} locked on shutdown", camera_id);
                self.state.status = LockStatus::Locked;
                self.state.lock_deadline = None;
                self.publish_state();
                let _ = self
                    .event_bus
                    .publish(BrokerEvent::CameraLocked {
                        camera_id,
                        timestamp: SystemTime::now(),
                    })
                    .await;
            }
            Ok(Err(e)) => warn!("Failed to lock camera {} on shutdown: {}", camera_id, e),
            Err(_) => warn!(
                "Locking camera {} on shutdown timed out after {:?}",
                camera_id, FINAL_LOCK_TIMEOUT
            ),
        }
    }

    async fn on_recognized(&mut self, detected_at: SystemTime, timer: Pin<&mut Sleep>) {
        self.state.last_recognized = Some(detected_at);

        match self.state.status {
            LockStatus::Unlocked => {
                self.arm(timer);
                debug!(
                    "Camera {} relock pushed back by {:?}",
                    self.state.camera_id, self.debounce
                );
                self.publish_state();
                let _ = self
                    .event_bus
                    .publish(BrokerEvent::UnlockExtended {
                        camera_id: self.state.camera_id.clone(),
                    })
                    .await;
            }
            LockStatus::Locked => {
                let camera_id = self.state.camera_id.clone();
                match self
                    .store
                    .update_camera_status(&camera_id, LockStatus::Unlocked)
                    .await
                {
                    Ok(()) => {
                        let now = SystemTime::now();
                        self.state.status = LockStatus::Unlocked;
                        self.state.last_unlock = Some(now);
                        self.arm(timer);
                        self.publish_state();
                        let _ = self
                            .event_bus
                            .publish(BrokerEvent::CameraUnlocked {
                                camera_id,
                                timestamp: now,
                            })
                            .await;
                    }
                    Err(e) => {
                        // Stay locked; the next known face retries.
                        warn!("Failed to unlock camera {}: {}", camera_id, e);
                        self.publish_state();
                        let _ = self
                            .event_bus
                            .publish(BrokerEvent::SystemError {
                                component: "access_controller".to_string(),
                                error: format!("unlock of camera {} failed: {}", camera_id, e),
                            })
                            .await;
                    }
                }
            }
        }
    }

    async fn on_timer_elapsed(&mut self, timer: Pin<&mut Sleep>) {
        let camera_id = self.state.camera_id.clone();

        match self
            .store
            .update_camera_status(&camera_id, LockStatus::Locked)
            .await
        {
            Ok(()) => {
                self.state.status = LockStatus::Locked;
                self.state.lock_deadline = None;
                self.publish_state();
                let _ = self
                    .event_bus
                    .publish(BrokerEvent::CameraLocked {
                        camera_id,
                        timestamp: SystemTime::now(),
                    })
                    .await;
            }
            Err(e) => {
                // Still unlocked; try again after another debounce period.
                warn!("Failed to relock camera {}: {}", camera_id, e);
                self.arm(timer);
                self.publish_state();
                let _ = self
                    .event_bus
                    .publish(BrokerEvent::SystemError {
                        component: "access_controller".to_string(),
                        error: format!("relock of camera {} failed: {}", camera_id, e),
                    })
                    .await;
            }
        }
    }

    fn arm(&mut self, timer: Pin<&mut Sleep>) {
        let deadline = Instant::now() + self.debounce;
        timer.reset(deadline);
        self.state.lock_deadline = Some(deadline);
    }

    fn publish_state(&self) {
        let _ = self.state_tx.send(self.state.clone());
    }
}
