use super::*;
use crate::collaborators::{KnownFace, MemoryStore, PersistentStore};
use crate::error::StoreError;
use crate::events::{BrokerEvent, EventBus, EventFilter, EventReceiver};
use crate::recognition::{Embedding, FaceEvent, FaceSubject};
use async_trait::async_trait;
use bytes::Bytes;
use image::RgbImage;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout, Instant};

const DEBOUNCE: Duration = Duration::from_secs(15);

fn setup() -> (Arc<MemoryStore>, Arc<EventBus>, AccessController) {
    let store = Arc::new(MemoryStore::new());
    let event_bus = Arc::new(EventBus::new(64));
    let controller = AccessController::new(store.clone(), Arc::clone(&event_bus), DEBOUNCE);
    (store, event_bus, controller)
}

fn receiver(event_bus: &EventBus, types: Vec<&'static str>) -> EventReceiver {
    EventReceiver::new(
        event_bus.subscribe(),
        EventFilter::EventTypes(types),
        "access-test".to_string(),
    )
}

fn known_event(camera_id: &str, name: &str) -> FaceEvent {
    FaceEvent {
        camera_id: camera_id.to_string(),
        subject: FaceSubject::Known {
            member_id: format!("{}-id", name.to_lowercase()),
            name: name.to_string(),
            distance: 0.2,
            embedding: Embedding::new(vec![0.1, 0.2, 0.3]),
            image: RgbImage::new(4, 4),
        },
        detected_at: SystemTime::now(),
    }
}

fn unknown_event(camera_id: &str) -> FaceEvent {
    FaceEvent {
        camera_id: camera_id.to_string(),
        subject: FaceSubject::Unknown {
            embedding: Embedding::new(vec![0.9, 0.9, 0.9]),
            image: RgbImage::new(4, 4),
        },
        detected_at: SystemTime::now(),
    }
}

async fn next(receiver: &mut EventReceiver) -> BrokerEvent {
    timeout(Duration::from_secs(120), receiver.recv())
        .await
        .expect("event not received in time")
        .expect("event bus closed")
}

fn statuses(store: &MemoryStore, camera_id: &str, start: Instant) -> Vec<(LockStatus, u64)> {
    store
        .status_writes(camera_id)
        .into_iter()
        .map(|w| (w.status, (w.at - start).as_secs()))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_unlock_then_relock_after_debounce() {
    let (store, event_bus, controller) = setup();
    let mut events = receiver(&event_bus, vec!["camera_unlocked", "camera_locked"]);
    let start = Instant::now();

    controller.handle_event(&known_event("7", "Alice"));

    assert_eq!(next(&mut events).await.event_type(), "camera_unlocked");
    assert_eq!(store.camera_status("7"), Some(LockStatus::Unlocked));

    assert_eq!(next(&mut events).await.event_type(), "camera_locked");
    assert_eq!(
        statuses(&store, "7", start),
        vec![(LockStatus::Unlocked, 0), (LockStatus::Locked, 15)]
    );
    assert!(!controller.snapshot("7").unwrap().is_unlocked());
}

#[tokio::test(start_paused = true)]
async fn test_recognition_while_unlocked_resets_timer_without_write() {
    let (store, event_bus, controller) = setup();
    let mut events = receiver(
        &event_bus,
        vec!["camera_unlocked", "unlock_extended", "camera_locked"],
    );
    let start = Instant::now();

    controller.handle_event(&known_event("7", "Alice"));
    assert_eq!(next(&mut events).await.event_type(), "camera_unlocked");

    sleep(Duration::from_secs(10)).await;
    controller.handle_event(&known_event("7", "Alice"));
    assert_eq!(next(&mut events).await.event_type(), "unlock_extended");
    assert_eq!(store.status_writes("7").len(), 1);

    assert_eq!(next(&mut events).await.event_type(), "camera_locked");
    assert_eq!(
        statuses(&store, "7", start),
        vec![(LockStatus::Unlocked, 0), (LockStatus::Locked, 25)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_repeated_recognition_writes_unlock_once() {
    let (store, event_bus, controller) = setup();
    let mut events = receiver(&event_bus, vec!["unlock_extended", "camera_locked"]);

    controller.handle_event(&known_event("7", "Alice"));
    for _ in 0..5 {
        controller.handle_event(&known_event("7", "Bob"));
    }
    for _ in 0..5 {
        assert_eq!(next(&mut events).await.event_type(), "unlock_extended");
    }
    assert_eq!(store.status_writes("7").len(), 1);

    assert_eq!(next(&mut events).await.event_type(), "camera_locked");
    sleep(Duration::from_secs(120)).await;

    let writes = store.status_writes("7");
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[1].status, LockStatus::Locked);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_faces_never_touch_lock_state() {
    let (store, _event_bus, controller) = setup();

    controller.handle_event(&unknown_event("7"));
    sleep(Duration::from_secs(30)).await;

    assert!(controller.snapshot("7").is_none());
    assert!(store.status_writes("7").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_face_while_unlocked_does_not_extend() {
    let (store, event_bus, controller) = setup();
    let mut events = receiver(&event_bus, vec!["camera_unlocked", "camera_locked"]);
    let start = Instant::now();

    controller.handle_event(&known_event("7", "Alice"));
    next(&mut events).await;

    sleep(Duration::from_secs(10)).await;
    controller.handle_event(&unknown_event("7"));

    assert_eq!(next(&mut events).await.event_type(), "camera_locked");
    assert_eq!(
        statuses(&store, "7", start),
        vec![(LockStatus::Unlocked, 0), (LockStatus::Locked, 15)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cameras_are_independent() {
    let (store, event_bus, controller) = setup();
    let mut locks = receiver(&event_bus, vec!["camera_locked"]);
    let start = Instant::now();

    controller.recognized("front", SystemTime::now());
    sleep(Duration::from_secs(5)).await;
    controller.recognized("back", SystemTime::now());

    let first = next(&mut locks).await;
    assert_eq!(first.camera_id(), Some("front"));
    let second = next(&mut locks).await;
    assert_eq!(second.camera_id(), Some("back"));

    assert_eq!(
        statuses(&store, "front", start),
        vec![(LockStatus::Unlocked, 0), (LockStatus::Locked, 15)]
    );
    assert_eq!(
        statuses(&store, "back", start),
        vec![(LockStatus::Unlocked, 5), (LockStatus::Locked, 20)]
    );
    assert_eq!(controller.snapshots().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_unlock_write_stays_locked_and_retries() {
    let (store, event_bus, controller) = setup();
    let mut events = receiver(&event_bus, vec!["system_error", "camera_unlocked"]);

    store.fail_next_status_writes(1);
    controller.recognized("7", SystemTime::now());
    assert_eq!(next(&mut events).await.event_type(), "system_error");

    let state = controller.snapshot("7").unwrap();
    assert!(!state.is_unlocked());
    assert!(state.lock_deadline.is_none());

    controller.recognized("7", SystemTime::now());
    assert_eq!(next(&mut events).await.event_type(), "camera_unlocked");
    assert_eq!(store.camera_status("7"), Some(LockStatus::Unlocked));
}

#[tokio::test(start_paused = true)]
async fn test_failed_relock_write_is_retried_after_debounce() {
    let (store, event_bus, controller) = setup();
    let mut events = receiver(
        &event_bus,
        vec!["camera_unlocked", "system_error", "camera_locked"],
    );
    let start = Instant::now();

    controller.recognized("7", SystemTime::now());
    assert_eq!(next(&mut events).await.event_type(), "camera_unlocked");

    store.fail_next_status_writes(1);
    assert_eq!(next(&mut events).await.event_type(), "system_error");
    assert!(controller.snapshot("7").unwrap().is_unlocked());

    assert_eq!(next(&mut events).await.event_type(), "camera_locked");
    assert_eq!(
        statuses(&store, "7", start),
        vec![(LockStatus::Unlocked, 0), (LockStatus::Locked, 30)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_actors() {
    let (store, event_bus, controller) = setup();
    let mut events = receiver(&event_bus, vec!["camera_unlocked"]);

    controller.recognized("7", SystemTime::now());
    next(&mut events).await;

    controller.shutdown().await;
    sleep(Duration::from_secs(60)).await;

    controller.recognized("7", SystemTime::now());
    assert!(controller.snapshot("7").is_none());
    assert_eq!(store.status_writes("7").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_while_unlocked_locks_once() {
    let (store, event_bus, controller) = setup();
    let mut events = receiver(&event_bus, vec!["camera_unlocked", "camera_locked"]);
    let start = Instant::now();

    controller.handle_event(&known_event("7", "Alice"));
    assert_eq!(next(&mut events).await.event_type(), "camera_unlocked");
    sleep(Duration::from_secs(1)).await;

    controller.shutdown().await;
    assert_eq!(next(&mut events).await.event_type(), "camera_locked");
    assert_eq!(store.camera_status("7"), Some(LockStatus::Locked));

    // The cancelled timer must not write a second time
    sleep(Duration::from_secs(60)).await;
    assert_eq!(
        statuses(&store, "7", start),
        vec![(LockStatus::Unlocked, 0), (LockStatus::Locked, 1)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_after_relock_writes_nothing() {
    let (store, event_bus, controller) = setup();
    let mut events = receiver(&event_bus, vec!["camera_unlocked", "camera_locked"]);

    controller.recognized("7", SystemTime::now());
    assert_eq!(next(&mut events).await.event_type(), "camera_unlocked");
    assert_eq!(next(&mut events).await.event_type(), "camera_locked");

    controller.shutdown().await;
    assert_eq!(store.status_writes("7").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_lock_on_shutdown_still_stops() {
    let (store, event_bus, controller) = setup();
    let mut events = receiver(&event_bus, vec!["camera_unlocked"]);

    controller.recognized("7", SystemTime::now());
    next(&mut events).await;

    store.fail_next_status_writes(1);
    timeout(Duration::from_secs(30), controller.shutdown())
        .await
        .expect("shutdown hung on a failed lock");
    assert_eq!(store.camera_status("7"), Some(LockStatus::Unlocked));
}

/// Holds every status write until the gate is opened
struct GatedStore {
    inner: MemoryStore,
    gate: Semaphore,
}

#[async_trait]
impl PersistentStore for GatedStore {
    async fn get_known_faces(&self, user_id: &str) -> Result<Vec<KnownFace>, StoreError> {
        self.inner.get_known_faces(user_id).await
    }

    async fn get_family_member_ids(&self, user_id: &str) -> Result<HashSet<String>, StoreError> {
        self.inner.get_family_member_ids(user_id).await
    }

    async fn update_camera_status(
        &self,
        camera_id: &str,
        status: LockStatus,
    ) -> Result<(), StoreError> {
        self.gate.acquire().await.unwrap().forget();
        self.inner.update_camera_status(camera_id, status).await
    }

    async fn update_family_emotion(
        &self,
        member_id: &str,
        emotion: &str,
    ) -> Result<(), StoreError> {
        self.inner.update_family_emotion(member_id, emotion).await
    }

    async fn fetch_image(&self, image_ref: &str) -> Result<Bytes, StoreError> {
        self.inner.fetch_image(image_ref).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_sightings_behind_a_stalled_write_are_bounded() {
    let store = Arc::new(GatedStore {
        inner: MemoryStore::new(),
        gate: Semaphore::new(0),
    });
    let event_bus = Arc::new(EventBus::new(64));
    let controller = AccessController::new(store.clone(), Arc::clone(&event_bus), DEBOUNCE);
    let mut events = receiver(&event_bus, vec!["camera_unlocked", "camera_locked"]);

    for _ in 0..500 {
        controller.recognized("7", SystemTime::now());
    }
    sleep(Duration::from_secs(1)).await;
    assert!(store.inner.status_writes("7").is_empty());

    store.gate.add_permits(10);
    assert_eq!(next(&mut events).await.event_type(), "camera_unlocked");
    assert_eq!(next(&mut events).await.event_type(), "camera_locked");

    let writes: Vec<LockStatus> = store
        .inner
        .status_writes("7")
        .into_iter()
        .map(|w| w.status)
        .collect();
    assert_eq!(writes, vec![LockStatus::Unlocked, LockStatus::Locked]);
}
