use super::*;
use crate::config::GalleryScope;
use crate::error::NotifyError;
use crate::events::{EventFilter, EventReceiver};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::{timeout, Instant};

const TOLERANCE: f32 = 0.5;

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, String, Instant)>>,
    fail: bool,
}

impl RecordingNotifier {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn filenames(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, f, _)| f.clone()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, destination: &str, _image: Bytes, filename: &str) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .push((destination.to_string(), filename.to_string(), Instant::now()));
        if self.fail {
            return Err(NotifyError::Delivery {
                destination: destination.to_string(),
                details: "mail relay refused".to_string(),
            });
        }
        Ok(())
    }
}

fn embedding(values: &[f32]) -> Embedding {
    Embedding::new(values.to_vec())
}

fn face() -> RgbImage {
    RgbImage::from_pixel(8, 8, image::Rgb([120, 90, 60]))
}

fn alerts(
    scope: GalleryScope,
    notifier: Arc<dyn Notifier>,
    dir: &TempDir,
) -> (UnknownFaceAlerts, Arc<EventBus>) {
    let event_bus = Arc::new(EventBus::new(64));
    let dispatcher =
        AlertDispatcher::spawn(notifier, Arc::clone(&event_bus), 8, Duration::from_millis(0));
    let alerts = UnknownFaceAlerts::new(
        DedupGallery::new(scope, TOLERANCE, 16),
        UnknownFaceStore::new(dir.path()),
        dispatcher,
        "security@example.com".to_string(),
        Arc::clone(&event_bus),
    );
    (alerts, event_bus)
}

fn delivery_receiver(event_bus: &EventBus) -> EventReceiver {
    EventReceiver::new(
        event_bus.subscribe(),
        EventFilter::EventTypes(vec!["alert_delivered", "alert_failed"]),
        "alerts-test".to_string(),
    )
}

async fn next(receiver: &mut EventReceiver) -> BrokerEvent {
    timeout(Duration::from_secs(5), receiver.recv())
        .await
        .expect("event not received in time")
        .expect("event bus closed")
}

#[test]
fn test_gallery_suppresses_within_tolerance() {
    let mut gallery = UnknownGallery::new(TOLERANCE, 8);

    assert!(gallery.consider(&embedding(&[0.0, 0.0])));
    // 0.3 away: same subject
    assert!(!gallery.consider(&embedding(&[0.3, 0.0])));
    // exactly at tolerance is still the same subject
    assert!(!gallery.consider(&embedding(&[0.5, 0.0])));
    assert!(gallery.consider(&embedding(&[2.0, 0.0])));
    assert_eq!(gallery.len(), 2);
}

#[test]
fn test_gallery_entries_stay_apart() {
    let mut gallery = UnknownGallery::new(TOLERANCE, 64);
    for i in 0..40 {
        let x = (i as f32) * 0.17;
        gallery.consider(&embedding(&[x, (i % 3) as f32 * 0.2]));
    }

    let entries: Vec<_> = gallery.entries().cloned().collect();
    for (i, a) in entries.iter().enumerate() {
        for b in entries.iter().skip(i + 1) {
            assert!(a.embedding.distance(&b.embedding) > TOLERANCE);
        }
    }
}

#[test]
fn test_gallery_evicts_oldest_at_capacity() {
    let mut gallery = UnknownGallery::new(TOLERANCE, 2);

    assert!(gallery.consider(&embedding(&[0.0])));
    assert!(gallery.consider(&embedding(&[10.0])));
    assert!(gallery.consider(&embedding(&[20.0])));
    assert_eq!(gallery.len(), 2);

    // The first subject was evicted and alerts again
    assert!(gallery.consider(&embedding(&[0.1])));
    assert!(!gallery.consider(&embedding(&[20.2])));
}

#[test]
fn test_camera_scope_keeps_galleries_apart() {
    let gallery = DedupGallery::new(GalleryScope::Camera, TOLERANCE, 8);
    let subject = embedding(&[1.0, 1.0]);

    assert!(gallery.consider("front", &subject));
    assert!(gallery.consider("back", &subject));
    assert!(!gallery.consider("front", &subject));
    assert_eq!(gallery.len_for("front"), 1);
    assert_eq!(gallery.len_for("back"), 1);
}

#[test]
fn test_process_scope_shares_gallery() {
    let gallery = DedupGallery::new(GalleryScope::Process, TOLERANCE, 8);
    let subject = embedding(&[1.0, 1.0]);

    assert!(gallery.consider("front", &subject));
    assert!(!gallery.consider("back", &subject));
    assert_eq!(gallery.len_for("garage"), 1);
}

#[test]
fn test_capture_filenames_are_unique() {
    let dir = TempDir::new().unwrap();
    let store = UnknownFaceStore::new(dir.path());

    let first = store.next_filename();
    let second = store.next_filename();

    assert!(first.starts_with("unknown_"));
    assert!(first.ends_with(".jpg"));
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_repeat_visitor_raises_one_alert() {
    let dir = TempDir::new().unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let (alerts, event_bus) = alerts(GalleryScope::Process, notifier.clone(), &dir);
    let mut deliveries = delivery_receiver(&event_bus);

    // U1 is new
    assert!(alerts.consider("7", &embedding(&[0.0, 0.0, 0.0]), &face()).await);
    assert_eq!(next(&mut deliveries).await.event_type(), "alert_delivered");

    // U2 is within tolerance of U1
    assert!(!alerts.consider("7", &embedding(&[0.2, 0.1, 0.0]), &face()).await);

    // U3 is a different person
    assert!(alerts.consider("7", &embedding(&[3.0, 3.0, 3.0]), &face()).await);
    assert_eq!(next(&mut deliveries).await.event_type(), "alert_delivered");

    let sent = notifier.filenames();
    assert_eq!(sent.len(), 2);
    assert_eq!(alerts.gallery().len_for("7"), 2);

    // Crops are on disk under the names that were sent
    for filename in &sent {
        let path = dir.path().join(filename);
        let bytes = std::fs::read(&path).unwrap();
        assert!(image::load_from_memory(&bytes).is_ok());
    }

    alerts.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_sightings_alert_once() {
    let dir = TempDir::new().unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let (alerts, event_bus) = alerts(GalleryScope::Process, notifier.clone(), &dir);
    let alerts = Arc::new(alerts);
    let mut deliveries = delivery_receiver(&event_bus);

    let mut handles = Vec::new();
    for camera in 0..16 {
        let alerts = Arc::clone(&alerts);
        handles.push(tokio::spawn(async move {
            alerts
                .consider(&format!("cam-{}", camera), &embedding(&[0.4, 0.4]), &face())
                .await
        }));
    }

    let mut raised = 0;
    for handle in handles {
        if handle.await.unwrap() {
            raised += 1;
        }
    }

    assert_eq!(raised, 1);
    assert_eq!(next(&mut deliveries).await.event_type(), "alert_delivered");
    assert_eq!(notifier.filenames().len(), 1);
}

#[tokio::test]
async fn test_failed_delivery_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let notifier = Arc::new(RecordingNotifier::failing());
    let (alerts, event_bus) = alerts(GalleryScope::Process, notifier.clone(), &dir);
    let mut deliveries = delivery_receiver(&event_bus);

    assert!(alerts.consider("7", &embedding(&[1.0]), &face()).await);
    assert_eq!(next(&mut deliveries).await.event_type(), "alert_failed");

    // The subject stays recorded, so a second sighting does not re-send
    assert!(!alerts.consider("7", &embedding(&[1.1]), &face()).await);
    tokio::task::yield_now().await;

    assert_eq!(notifier.filenames().len(), 1);
    let stats = alerts.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.delivered, 0);
}

#[tokio::test]
async fn test_unwritable_storage_still_alerts() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"x").unwrap();

    let event_bus = Arc::new(EventBus::new(16));
    let notifier = Arc::new(RecordingNotifier::default());
    let dispatcher = AlertDispatcher::spawn(
        notifier.clone(),
        Arc::clone(&event_bus),
        4,
        Duration::from_millis(0),
    );
    let alerts = UnknownFaceAlerts::new(
        DedupGallery::new(GalleryScope::Process, TOLERANCE, 4),
        UnknownFaceStore::new(&blocker),
        dispatcher,
        "ops".to_string(),
        Arc::clone(&event_bus),
    );
    let mut deliveries = delivery_receiver(&event_bus);

    assert!(alerts.consider("7", &embedding(&[0.0]), &face()).await);
    assert_eq!(next(&mut deliveries).await.event_type(), "alert_delivered");
}

#[tokio::test]
async fn test_unencodable_crop_does_not_suppress_subject() {
    let dir = TempDir::new().unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let (alerts, event_bus) = alerts(GalleryScope::Process, notifier.clone(), &dir);
    let mut deliveries = delivery_receiver(&event_bus);
    let stranger = embedding(&[1.0, 2.0, 3.0]);

    assert!(!alerts.consider("7", &stranger, &RgbImage::new(0, 0)).await);
    assert_eq!(alerts.gallery().len_for("7"), 0);
    assert_eq!(alerts.stats().queued, 0);

    // The next good sighting of the same person still alerts
    assert!(alerts.consider("7", &stranger, &face()).await);
    assert_eq!(next(&mut deliveries).await.event_type(), "alert_delivered");
    assert_eq!(notifier.filenames().len(), 1);

    alerts.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_dispatcher_spaces_deliveries() {
    let event_bus = Arc::new(EventBus::new(16));
    let notifier = Arc::new(RecordingNotifier::default());
    let dispatcher = AlertDispatcher::spawn(
        notifier.clone(),
        Arc::clone(&event_bus),
        8,
        Duration::from_secs(2),
    );
    let mut deliveries = delivery_receiver(&event_bus);

    for i in 0..3 {
        assert!(dispatcher.dispatch(AlertJob {
            image: Bytes::from_static(b"jpeg"),
            filename: format!("unknown_{}.jpg", i),
            destination: "ops".to_string(),
            created_at: SystemTime::now(),
        }));
    }
    for _ in 0..3 {
        next(&mut deliveries).await;
    }

    let sent = notifier.sent.lock().clone();
    assert_eq!(sent.len(), 3);
    assert!(sent[1].2 - sent[0].2 >= Duration::from_secs(2));
    assert!(sent[2].2 - sent[1].2 >= Duration::from_secs(2));
}

#[tokio::test]
async fn test_dispatch_after_shutdown_is_dropped() {
    let event_bus = Arc::new(EventBus::new(16));
    let dispatcher = AlertDispatcher::spawn(
        Arc::new(RecordingNotifier::default()),
        event_bus,
        1,
        Duration::from_millis(0),
    );
    dispatcher.shutdown().await;

    let accepted = dispatcher.dispatch(AlertJob {
        image: Bytes::new(),
        filename: "late.jpg".to_string(),
        destination: "ops".to_string(),
        created_at: SystemTime::now(),
    });

    assert!(!accepted);
    assert_eq!(dispatcher.stats().dropped, 1);
}
