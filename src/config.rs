use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LockcamConfig {
    pub server: ServerConfig,
    pub recognition: RecognitionConfig,
    pub access: AccessConfig,
    pub unknown: UnknownConfig,
    pub alerts: AlertConfig,
    pub roster: RosterConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// IP address to bind to
    #[serde(default = "default_server_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Frames buffered per subscriber before relay starts dropping for it
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecognitionConfig {
    /// Run the recognition pipeline on published frames
    #[serde(default = "default_recognition_enabled")]
    pub enabled: bool,

    /// Owner of the known-face gallery; required when recognition is enabled
    #[serde(default)]
    pub user_id: Option<String>,

    /// Maximum embedding distance for a known-face match (τ)
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,

    /// Process every Kth frame
    #[serde(default = "default_sample_every")]
    pub sample_every: u32,

    /// Downscale factor applied before face location
    #[serde(default = "default_resize_factor")]
    pub resize_factor: f32,

    /// Frames waiting for recognition before new ones are skipped
    #[serde(default = "default_pipeline_queue")]
    pub pipeline_queue: usize,

    /// Emotion labels that are written back to the store
    #[serde(default = "default_alert_emotions")]
    pub alert_emotions: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AccessConfig {
    /// Seconds without a known face before the camera locks again (D)
    #[serde(default = "default_debounce_seconds")]
    pub debounce_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GalleryScope {
    /// One dedup gallery shared by every camera
    Process,
    /// A separate dedup gallery per camera
    Camera,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UnknownConfig {
    /// Embedding distance under which two unknown faces are the same subject (ε)
    #[serde(default = "default_unknown_tolerance")]
    pub tolerance: f32,

    #[serde(default = "default_gallery_scope")]
    pub scope: GalleryScope,

    /// Entries kept per gallery; the oldest is evicted beyond this
    #[serde(default = "default_gallery_capacity")]
    pub capacity: usize,

    /// Directory for captured unknown-face images
    #[serde(default = "default_storage_path")]
    pub storage_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AlertConfig {
    /// Recipient handed to the notifier
    #[serde(default = "default_alert_destination")]
    pub destination: String,

    /// Pending alerts before new ones are dropped
    #[serde(default = "default_alert_queue")]
    pub queue_capacity: usize,

    /// Minimum spacing between two deliveries
    #[serde(default = "default_alert_min_interval_ms")]
    pub min_interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RosterConfig {
    /// Seconds between family roster polls
    #[serde(default = "default_roster_poll_interval")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl AccessConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_seconds)
    }
}

impl AlertConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

impl RosterConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl LockcamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("lockcam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("server.ip", default_server_ip())?
            .set_default("server.port", default_server_port())?
            .set_default("server.subscriber_queue", default_subscriber_queue() as i64)?
            .set_default("recognition.enabled", default_recognition_enabled())?
            .set_default(
                "recognition.match_threshold",
                default_match_threshold() as f64,
            )?
            .set_default("recognition.sample_every", default_sample_every())?
            .set_default("recognition.resize_factor", default_resize_factor() as f64)?
            .set_default(
                "recognition.pipeline_queue",
                default_pipeline_queue() as i64,
            )?
            .set_default("recognition.alert_emotions", default_alert_emotions())?
            .set_default("access.debounce_seconds", default_debounce_seconds())?
            .set_default("unknown.tolerance", default_unknown_tolerance() as f64)?
            .set_default("unknown.scope", "process")?
            .set_default("unknown.capacity", default_gallery_capacity() as i64)?
            .set_default("unknown.storage_path", default_storage_path())?
            .set_default("alerts.destination", default_alert_destination())?
            .set_default("alerts.queue_capacity", default_alert_queue() as i64)?
            .set_default("alerts.min_interval_ms", default_alert_min_interval_ms())?
            .set_default("roster.poll_interval_secs", default_roster_poll_interval())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // LOCKCAM_SECTION__KEY, e.g. LOCKCAM_RECOGNITION__USER_ID
            .add_source(Environment::with_prefix("LOCKCAM").separator("__"))
            .build()?;

        let config: LockcamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.subscriber_queue == 0 {
            return Err(ConfigError::Message(
                "Subscriber queue must be greater than 0".to_string(),
            ));
        }

        if self.recognition.enabled {
            match self.recognition.user_id.as_deref() {
                Some(id) if !id.trim().is_empty() => {}
                _ => {
                    return Err(ConfigError::Message(
                        "recognition.user_id is required when recognition is enabled".to_string(),
                    ))
                }
            }
        }

        if self.recognition.match_threshold <= 0.0 {
            return Err(ConfigError::Message(
                "Match threshold must be greater than 0".to_string(),
            ));
        }

        if self.recognition.sample_every == 0 {
            return Err(ConfigError::Message(
                "Frame sample rate must be greater than 0".to_string(),
            ));
        }

        if !(self.recognition.resize_factor > 0.0 && self.recognition.resize_factor <= 1.0) {
            return Err(ConfigError::Message(
                "Resize factor must be in (0, 1]".to_string(),
            ));
        }

        if self.recognition.pipeline_queue == 0 {
            return Err(ConfigError::Message(
                "Pipeline queue must be greater than 0".to_string(),
            ));
        }

        if self.access.debounce_seconds == 0 {
            return Err(ConfigError::Message(
                "Debounce delay must be greater than 0".to_string(),
            ));
        }

        if self.unknown.tolerance <= 0.0 {
            return Err(ConfigError::Message(
                "Unknown tolerance must be greater than 0".to_string(),
            ));
        }

        if self.unknown.capacity == 0 {
            return Err(ConfigError::Message(
                "Unknown gallery capacity must be greater than 0".to_string(),
            ));
        }

        if self.alerts.queue_capacity == 0 {
            return Err(ConfigError::Message(
                "Alert queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.roster.poll_interval_secs == 0 {
            return Err(ConfigError::Message(
                "Roster poll interval must be greater than 0".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for LockcamConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                ip: default_server_ip(),
                port: default_server_port(),
                subscriber_queue: default_subscriber_queue(),
            },
            recognition: RecognitionConfig {
                enabled: default_recognition_enabled(),
                user_id: None,
                match_threshold: default_match_threshold(),
                sample_every: default_sample_every(),
                resize_factor: default_resize_factor(),
                pipeline_queue: default_pipeline_queue(),
                alert_emotions: default_alert_emotions(),
            },
            access: AccessConfig {
                debounce_seconds: default_debounce_seconds(),
            },
            unknown: UnknownConfig {
                tolerance: default_unknown_tolerance(),
                scope: default_gallery_scope(),
                capacity: default_gallery_capacity(),
                storage_path: default_storage_path(),
            },
            alerts: AlertConfig {
                destination: default_alert_destination(),
                queue_capacity: default_alert_queue(),
                min_interval_ms: default_alert_min_interval_ms(),
            },
            roster: RosterConfig {
                poll_interval_secs: default_roster_poll_interval(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
            },
        }
    }
}

// Default value functions
fn default_server_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_server_port() -> u16 {
    8765
}
fn default_subscriber_queue() -> usize {
    64
}

fn default_recognition_enabled() -> bool {
    false
}
fn default_match_threshold() -> f32 {
    0.6
}
fn default_sample_every() -> u32 {
    5
}
fn default_resize_factor() -> f32 {
    0.25
}
fn default_pipeline_queue() -> usize {
    10
}
fn default_alert_emotions() -> Vec<String> {
    vec!["Angry".to_string(), "Fear".to_string(), "Sad".to_string()]
}

fn default_debounce_seconds() -> u64 {
    15
}

fn default_unknown_tolerance() -> f32 {
    0.5
}
fn default_gallery_scope() -> GalleryScope {
    GalleryScope::Process
}
fn default_gallery_capacity() -> usize {
    256
}
fn default_storage_path() -> String {
    "./unknown_faces".to_string()
}

fn default_alert_destination() -> String {
    "security@localhost".to_string()
}
fn default_alert_queue() -> usize {
    32
}
fn default_alert_min_interval_ms() -> u64 {
    1000
}

fn default_roster_poll_interval() -> u64 {
    10
}

fn default_event_bus_capacity() -> usize {
    256
}
