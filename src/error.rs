use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockcamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Notify error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },
}

/// Connection registry and transport failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("camera {camera_id} already has a publisher")]
    Conflict { camera_id: String },

    #[error("transport error on {camera_id}: {details}")]
    Transport { camera_id: String, details: String },
}

/// PersistentStore call failures
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("store unavailable: {details}")]
    Unavailable { details: String },

    #[error("record not found: {key}")]
    NotFound { key: String },

    #[error("store request failed: {details}")]
    Request { details: String },
}

/// Embedding, detection or emotion inference failures for one frame
#[derive(Error, Debug, Clone)]
pub enum ClassifierError {
    #[error("frame decode failed: {details}")]
    Decode { details: String },

    #[error("face inference failed: {details}")]
    Inference { details: String },
}

/// Alert delivery failures
#[derive(Error, Debug, Clone)]
pub enum NotifyError {
    #[error("alert delivery to {destination} failed: {details}")]
    Delivery { destination: String, details: String },
}

#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    #[error("failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("event bus closed")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server failed: {details}")]
    StartupFailed { details: String },
}

impl LockcamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LockcamError>;
