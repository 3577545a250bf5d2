use super::*;
use crate::collaborators::{FaceDirectory, KnownFace, MemoryStore};
use crate::config::LockcamConfig;
use crate::error::ClassifierError;
use crate::recognition::{Embedding, FaceBox};
use bytes::Bytes;
use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct NoFaces;

impl FaceDirectory for NoFaces {
    fn locate(&self, _image: &RgbImage) -> Result<Vec<FaceBox>, ClassifierError> {
        Ok(Vec::new())
    }

    fn encode(&self, _image: &RgbImage) -> Result<Option<Embedding>, ClassifierError> {
        Ok(Some(Embedding::new(vec![0.5, 0.5])))
    }
}

fn create_test_config(storage: &TempDir) -> LockcamConfig {
    let mut config = LockcamConfig::default();
    config.server.ip = "127.0.0.1".to_string();
    config.server.port = 0;
    config.unknown.storage_path = storage.path().join("unknown").to_string_lossy().into_owned();
    config
}

fn photo() -> Bytes {
    let mut buffer = Cursor::new(Vec::new());
    RgbImage::new(4, 4)
        .write_to(&mut buffer, ImageFormat::Png)
        .unwrap();
    Bytes::from(buffer.into_inner())
}

#[tokio::test]
async fn test_orchestrator_defaults_to_relay_only() {
    let storage = TempDir::new().unwrap();
    let orchestrator =
        LockcamOrchestrator::new(create_test_config(&storage), Collaborators::in_memory()).unwrap();

    assert!(orchestrator.recognition().is_none());
    assert!(orchestrator.component_states().is_empty());
}

#[tokio::test]
async fn test_recognition_without_directory_falls_back_to_relay() {
    let storage = TempDir::new().unwrap();
    let mut config = create_test_config(&storage);
    config.recognition.enabled = true;
    config.recognition.user_id = Some("user-1".to_string());

    let orchestrator = LockcamOrchestrator::new(config, Collaborators::in_memory()).unwrap();

    assert!(orchestrator.recognition().is_none());
}

#[tokio::test]
async fn test_start_and_shutdown_lifecycle() {
    let storage = TempDir::new().unwrap();
    let mut orchestrator =
        LockcamOrchestrator::new(create_test_config(&storage), Collaborators::in_memory()).unwrap();

    orchestrator.initialize().await.unwrap();
    assert!(storage.path().join("unknown").is_dir());
    assert_eq!(
        orchestrator.component_state("relay"),
        Some(ComponentState::Stopped)
    );

    orchestrator.start().await.unwrap();
    let addr = orchestrator.local_addr().unwrap();
    assert_ne!(addr.port(), 0);
    assert!(tokio::net::TcpStream::connect(addr).await.is_ok());
    assert_eq!(
        orchestrator.component_state("relay"),
        Some(ComponentState::Running)
    );

    let exit_code = orchestrator.shutdown().await.unwrap();
    assert_eq!(exit_code, 0);
    for (component, state) in orchestrator.component_states() {
        assert_eq!(state, ComponentState::Stopped, "{} not stopped", component);
    }
}

#[tokio::test]
async fn test_recognition_loads_gallery_on_start() {
    let storage = TempDir::new().unwrap();
    let mut config = create_test_config(&storage);
    config.recognition.enabled = true;
    config.recognition.user_id = Some("user-1".to_string());

    let store = Arc::new(MemoryStore::new());
    store.add_member(
        "user-1",
        KnownFace {
            member_id: "m1".to_string(),
            name: "Alice".to_string(),
            image_ref: Some("alice.png".to_string()),
        },
        Some(photo()),
    );
    let mut collaborators = Collaborators::in_memory().with_directory(Arc::new(NoFaces));
    collaborators.store = store;

    let mut orchestrator = LockcamOrchestrator::new(config, collaborators).unwrap();
    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();

    let recognition = orchestrator.recognition().unwrap();
    assert_eq!(recognition.gallery().current().len(), 1);
    assert_eq!(
        orchestrator.component_state("roster"),
        Some(ComponentState::Running)
    );

    assert_eq!(orchestrator.shutdown().await.unwrap(), 0);
}

#[tokio::test]
async fn test_run_returns_on_shutdown_trigger() {
    let storage = TempDir::new().unwrap();
    let mut orchestrator =
        LockcamOrchestrator::new(create_test_config(&storage), Collaborators::in_memory()).unwrap();
    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();

    let trigger = orchestrator.shutdown_trigger();
    trigger.send(ShutdownReason::UserRequest).await.unwrap();

    let exit_code = tokio::time::timeout(Duration::from_secs(15), orchestrator.run())
        .await
        .expect("run did not return")
        .unwrap();
    assert_eq!(exit_code, 0);
}

#[tokio::test]
async fn test_bind_failure_is_reported() {
    let storage = TempDir::new().unwrap();
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = create_test_config(&storage);
    config.server.port = taken.local_addr().unwrap().port();

    let mut orchestrator = LockcamOrchestrator::new(config, Collaborators::in_memory()).unwrap();
    orchestrator.initialize().await.unwrap();

    assert!(orchestrator.start().await.is_err());
    assert_eq!(
        orchestrator.component_state("relay"),
        Some(ComponentState::Failed)
    );
}
