pub mod access;
pub mod alerts;
pub mod app;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod recognition;
pub mod relay;

pub use access::{AccessController, LockState, LockStatus};
pub use alerts::{AlertDispatcher, AlertJob, DedupGallery, UnknownFaceAlerts, UnknownFaceStore};
pub use app::{Collaborators, ComponentState, LockcamOrchestrator, ShutdownReason};
pub use collaborators::{
    EmotionClassifier, FaceDirectory, KnownFace, LogNotifier, MemoryStore, Notifier,
    PersistentStore,
};
pub use config::LockcamConfig;
pub use error::{LockcamError, Result};
pub use events::{BrokerEvent, EventBus, EventFilter, EventReceiver};
pub use frame::{Frame, FrameKind};
pub use recognition::{
    Embedding, FaceBox, FaceEvent, FaceSubject, RecognitionAdapter, RecognitionService,
};
pub use relay::{ConnectionRegistry, RelayServer, RelayServerBuilder};
