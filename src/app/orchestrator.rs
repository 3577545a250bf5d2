use super::types::{ComponentState, ShutdownReason};
use crate::access::AccessController;
use crate::alerts::UnknownFaceAlerts;
use crate::collaborators::{
    EmotionClassifier, FaceDirectory, LogNotifier, MemoryStore, Notifier, PersistentStore,
};
use crate::config::LockcamConfig;
use crate::error::Result;
use crate::events::EventBus;
use crate::recognition::{GalleryHandle, RecognitionAdapter, RecognitionService, RosterWatcher};
use crate::relay::{RecognitionHook, RelayServer, RelayServerBuilder};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// External services the broker talks to
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn PersistentStore>,
    pub notifier: Arc<dyn Notifier>,
    pub directory: Option<Arc<dyn FaceDirectory>>,
    pub classifier: Option<Arc<dyn EmotionClassifier>>,
}

impl Collaborators {
    /// In-process store and a logging notifier, with no face model
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            notifier: Arc::new(LogNotifier::new()),
            directory: None,
            classifier: None,
        }
    }

    pub fn with_directory(mut self, directory: Arc<dyn FaceDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn EmotionClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }
}

/// Builds and runs every broker component
pub struct LockcamOrchestrator {
    pub(super) config: LockcamConfig,
    pub(super) event_bus: Arc<EventBus>,

    // Components
    pub(super) access: Arc<AccessController>,
    pub(super) alerts: Arc<UnknownFaceAlerts>,
    pub(super) recognition: Option<Arc<RecognitionService>>,
    pub(super) roster: Option<Arc<RosterWatcher>>,
    pub(super) server: Arc<RelayServer>,

    // Lifecycle management
    pub(super) local_addr: Option<SocketAddr>,
    pub(super) server_task: Option<JoinHandle<Result<()>>>,
    pub(super) roster_task: Option<JoinHandle<()>>,
    pub(super) component_states: Mutex<HashMap<&'static str, ComponentState>>,
    pub(super) shutdown_sender: mpsc::Sender<ShutdownReason>,
    pub(super) shutdown_receiver: Option<mpsc::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl LockcamOrchestrator {
    /// Create the components described by `config`
    ///
    /// Recognition is wired in only when it is enabled and a face directory
    /// is supplied; otherwise the broker runs as a plain relay.
    pub fn new(config: LockcamConfig, collaborators: Collaborators) -> Result<Self> {
        let event_bus = Arc::new(EventBus::new(config.system.event_bus_capacity));
        let store = Arc::clone(&collaborators.store);

        let access = Arc::new(AccessController::new(
            Arc::clone(&store),
            Arc::clone(&event_bus),
            config.access.debounce(),
        ));

        let alerts = Arc::new(UnknownFaceAlerts::from_config(
            &config.unknown,
            &config.alerts,
            Arc::clone(&collaborators.notifier),
            Arc::clone(&event_bus),
        ));

        let (recognition, roster) = match (&collaborators.directory, config.recognition.enabled) {
            (Some(directory), true) => {
                let user_id = config.recognition.user_id.clone().unwrap_or_default();
                let gallery = Arc::new(GalleryHandle::default());
                let adapter = Arc::new(RecognitionAdapter::new(
                    Arc::clone(directory),
                    config.recognition.match_threshold,
                    config.recognition.resize_factor,
                ));

                let mut service = RecognitionService::new(
                    adapter,
                    Arc::clone(&gallery),
                    Arc::clone(&access),
                    Arc::clone(&alerts),
                    Arc::clone(&store),
                    Arc::clone(&event_bus),
                );
                if let Some(classifier) = &collaborators.classifier {
                    service = service.with_emotions(
                        Arc::clone(classifier),
                        config.recognition.alert_emotions.iter().cloned(),
                    );
                }

                let roster = RosterWatcher::new(
                    Arc::clone(&store),
                    Arc::clone(directory),
                    gallery,
                    Arc::clone(&event_bus),
                    user_id,
                    config.roster.poll_interval(),
                );
                (Some(Arc::new(service)), Some(Arc::new(roster)))
            }
            (None, true) => {
                warn!("Recognition is enabled but no face directory is available; relaying only");
                (None, None)
            }
            _ => (None, None),
        };

        let mut builder = RelayServerBuilder::new()
            .config(config.server.clone())
            .event_bus(Arc::clone(&event_bus))
            .access(Arc::clone(&access));
        if let Some(service) = &recognition {
            builder = builder.recognition(RecognitionHook {
                service: Arc::clone(service),
                queue: config.recognition.pipeline_queue,
                sample_every: config.recognition.sample_every,
            });
        }
        let server = Arc::new(builder.build()?);

        let (shutdown_sender, shutdown_receiver) = mpsc::channel(1);

        debug!(
            "Orchestrator created (recognition: {})",
            recognition.is_some()
        );

        Ok(Self {
            config,
            event_bus,
            access,
            alerts,
            recognition,
            roster,
            server,
            local_addr: None,
            server_task: None,
            roster_task: None,
            component_states: Mutex::new(HashMap::new()),
            shutdown_sender,
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        })
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    pub fn access(&self) -> Arc<AccessController> {
        Arc::clone(&self.access)
    }

    pub fn server(&self) -> Arc<RelayServer> {
        Arc::clone(&self.server)
    }

    pub fn recognition(&self) -> Option<Arc<RecognitionService>> {
        self.recognition.clone()
    }

    /// Address the relay is listening on, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Sending on this makes `run` shut the broker down
    pub fn shutdown_trigger(&self) -> mpsc::Sender<ShutdownReason> {
        self.shutdown_sender.clone()
    }

    pub(super) fn set_component_state(&self, component: &'static str, state: ComponentState) {
        self.component_states.lock().insert(component, state);
        debug!("Component '{}' state changed to: {:?}", component, state);
    }

    pub fn component_state(&self, component: &str) -> Option<ComponentState> {
        self.component_states.lock().get(component).copied()
    }

    pub fn component_states(&self) -> HashMap<&'static str, ComponentState> {
        self.component_states.lock().clone()
    }

    pub(super) fn log_summary(&self) {
        info!(
            "Relay on {}:{}, debounce {}s, unknown tolerance {}, recognition {}",
            self.config.server.ip,
            self.config.server.port,
            self.config.access.debounce_seconds,
            self.config.unknown.tolerance,
            if self.recognition.is_some() {
                "on"
            } else {
                "off"
            }
        );
    }
}
