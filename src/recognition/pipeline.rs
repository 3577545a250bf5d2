use super::adapter::RecognitionAdapter;
use super::gallery::GalleryHandle;
use super::types::{FaceEvent, FaceSubject};
use crate::access::AccessController;
use crate::alerts::UnknownFaceAlerts;
use crate::collaborators::{EmotionClassifier, PersistentStore};
use crate::error::ClassifierError;
use crate::events::{BrokerEvent, EventBus};
use crate::frame::Frame;
use image::RgbImage;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Picks frames 0, K, 2K, ... of a stream
#[derive(Debug)]
pub struct FrameSampler {
    every: u64,
    seen: AtomicU64,
}

impl FrameSampler {
    pub fn new(every: u32) -> Self {
        Self {
            every: u64::from(every.max(1)),
            seen: AtomicU64::new(0),
        }
    }

    pub fn should_sample(&self) -> bool {
        self.seen.fetch_add(1, Ordering::Relaxed) % self.every == 0
    }
}

/// Counters for one camera's pipeline
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
}

#[derive(Default)]
struct PipelineCounters {
    processed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

/// Shared recognition state used by every camera's pipeline
pub struct RecognitionService {
    adapter: Arc<RecognitionAdapter>,
    gallery: Arc<GalleryHandle>,
    access: Arc<AccessController>,
    alerts: Arc<UnknownFaceAlerts>,
    store: Arc<dyn PersistentStore>,
    event_bus: Arc<EventBus>,
    classifier: Option<Arc<dyn EmotionClassifier>>,
    alert_emotions: HashSet<String>,
    last_emotions: Mutex<HashMap<String, String>>,
}

impl RecognitionService {
    pub fn new(
        adapter: Arc<RecognitionAdapter>,
        gallery: Arc<GalleryHandle>,
        access: Arc<AccessController>,
        alerts: Arc<UnknownFaceAlerts>,
        store: Arc<dyn PersistentStore>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            adapter,
            gallery,
            access,
            alerts,
            store,
            event_bus,
            classifier: None,
            alert_emotions: HashSet::new(),
            last_emotions: Mutex::new(HashMap::new()),
        }
    }

    /// Classify emotions of known faces and record the ones in `alert_emotions`
    pub fn with_emotions(
        mut self,
        classifier: Arc<dyn EmotionClassifier>,
        alert_emotions: impl IntoIterator<Item = String>,
    ) -> Self {
        self.classifier = Some(classifier);
        self.alert_emotions = alert_emotions.into_iter().collect();
        self
    }

    pub fn gallery(&self) -> &Arc<GalleryHandle> {
        &self.gallery
    }

    pub fn access(&self) -> &Arc<AccessController> {
        &self.access
    }

    pub fn alerts(&self) -> &Arc<UnknownFaceAlerts> {
        &self.alerts
    }

    /// Start a recognition worker for one camera
    pub fn start_pipeline(
        self: &Arc<Self>,
        camera_id: &str,
        queue: usize,
        sample_every: u32,
    ) -> RecognitionPipeline {
        let (sender, receiver) = mpsc::channel(queue.max(1));
        let counters = Arc::new(PipelineCounters::default());
        let token = CancellationToken::new();

        let task = tokio::spawn(pipeline_worker(
            Arc::clone(self),
            camera_id.to_string(),
            receiver,
            Arc::clone(&counters),
            token.clone(),
        ));

        info!(
            "Recognition pipeline started for camera {} (every {} frame(s))",
            camera_id, sample_every
        );

        RecognitionPipeline {
            camera_id: camera_id.to_string(),
            sampler: FrameSampler::new(sample_every),
            sender,
            counters,
            task: Mutex::new(Some(task)),
            token,
        }
    }

    /// Run detection on one frame and route every face it yields
    pub async fn process_frame(
        &self,
        camera_id: &str,
        frame: Frame,
    ) -> Result<usize, ClassifierError> {
        let adapter = Arc::clone(&self.adapter);
        let gallery = self.gallery.current();
        let camera = camera_id.to_string();

        let events = tokio::task::spawn_blocking(move || {
            let image = frame.decode()?;
            adapter.detect(&camera, &image, &gallery)
        })
        .await
        .map_err(|e| ClassifierError::Inference {
            details: format!("detection task failed: {}", e),
        })??;

        let count = events.len();
        for event in events {
            self.route(event).await;
        }
        Ok(count)
    }

    async fn route(&self, event: FaceEvent) {
        self.access.handle_event(&event);

        match event.subject {
            FaceSubject::Known {
                member_id,
                name,
                distance,
                image,
                ..
            } => {
                debug!(
                    "Camera {}: recognized {} ({:.3})",
                    event.camera_id, name, distance
                );
                let _ = self
                    .event_bus
                    .publish(BrokerEvent::FaceRecognized {
                        camera_id: event.camera_id.clone(),
                        name,
                        distance,
                    })
                    .await;
                self.record_emotion(&member_id, image).await;
            }
            FaceSubject::Unknown { embedding, image } => {
                let novel = self
                    .alerts
                    .consider(&event.camera_id, &embedding, &image)
                    .await;
                let _ = self
                    .event_bus
                    .publish(BrokerEvent::UnknownFaceDetected {
                        camera_id: event.camera_id,
                        novel,
                    })
                    .await;
            }
        }
    }

    /// Write a member's emotion when it is an alerting one and has changed
    async fn record_emotion(&self, member_id: &str, face: RgbImage) {
        let Some(classifier) = self.classifier.clone() else {
            return;
        };

        let emotion = match tokio::task::spawn_blocking(move || classifier.classify(&face)).await {
            Ok(Ok(emotion)) => emotion,
            Ok(Err(e)) => {
                debug!("Emotion classification failed for {}: {}", member_id, e);
                return;
            }
            Err(e) => {
                warn!("Emotion task failed: {}", e);
                return;
            }
        };

        if !self.alert_emotions.contains(&emotion) {
            trace!("Emotion {} for {} is not recorded", emotion, member_id);
            return;
        }
        if self.last_emotions.lock().get(member_id) == Some(&emotion) {
            return;
        }

        match self.store.update_family_emotion(member_id, &emotion).await {
            Ok(()) => {
                self.last_emotions
                    .lock()
                    .insert(member_id.to_string(), emotion.clone());
                let _ = self
                    .event_bus
                    .publish(BrokerEvent::EmotionUpdated {
                        member_id: member_id.to_string(),
                        emotion,
                    })
                    .await;
            }
            Err(e) => warn!("Failed to update emotion for {}: {}", member_id, e),
        }
    }
}

/// Per-camera handle feeding frames to a recognition worker
pub struct RecognitionPipeline {
    camera_id: String,
    sampler: FrameSampler,
    sender: mpsc::Sender<Frame>,
    counters: Arc<PipelineCounters>,
    task: Mutex<Option<JoinHandle<()>>>,
    token: CancellationToken,
}

impl RecognitionPipeline {
    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    /// Offer a relayed frame; returns true if it was queued for recognition
    ///
    /// Never waits: unsampled frames are ignored and a full queue skips
    /// the frame.
    pub fn offer(&self, frame: &Frame) -> bool {
        if !self.sampler.should_sample() {
            return false;
        }
        match self.sender.try_send(frame.clone()) {
            Ok(()) => true,
            Err(_) => {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                trace!(
                    "Camera {}: recognition busy, skipping frame {}",
                    self.camera_id,
                    frame.seq
                );
                false
            }
        }
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            processed: self.counters.processed.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Stop the worker after its current frame
    pub async fn stop(&self) {
        self.token.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        debug!("Recognition pipeline for camera {} stopped", self.camera_id);
    }
}

impl Drop for RecognitionPipeline {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn pipeline_worker(
    service: Arc<RecognitionService>,
    camera_id: String,
    mut receiver: mpsc::Receiver<Frame>,
    counters: Arc<PipelineCounters>,
    token: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            frame = receiver.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let seq = frame.seq;
        match service.process_frame(&camera_id, frame).await {
            Ok(faces) => {
                counters.processed.fetch_add(1, Ordering::Relaxed);
                trace!("Camera {}: frame {} had {} face(s)", camera_id, seq, faces);
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Camera {}: frame {} skipped: {}", camera_id, seq, e);
            }
        }
    }

    debug!("Recognition worker for camera {} exiting", camera_id);
}
