use crate::collaborators::Notifier;
use crate::events::{BrokerEvent, EventBus};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One unknown-face alert waiting for delivery
#[derive(Debug, Clone)]
pub struct AlertJob {
    pub image: Bytes,
    pub filename: String,
    pub destination: String,
    pub created_at: SystemTime,
}

/// Counters for alert delivery
#[derive(Debug, Clone, Default)]
pub struct AlertStats {
    pub queued: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct AlertCounters {
    queued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Hands alerts to a background worker that calls the notifier
///
/// `dispatch` never waits: a full queue drops the job. The worker spaces
/// deliveries by `min_interval` and never retries a failed one.
pub struct AlertDispatcher {
    sender: mpsc::Sender<AlertJob>,
    counters: Arc<AlertCounters>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancellation_token: CancellationToken,
}

impl AlertDispatcher {
    pub fn spawn(
        notifier: Arc<dyn Notifier>,
        event_bus: Arc<EventBus>,
        capacity: usize,
        min_interval: Duration,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(AlertCounters::default());
        let cancellation_token = CancellationToken::new();

        let worker = tokio::spawn(alert_worker(
            receiver,
            notifier,
            event_bus,
            Arc::clone(&counters),
            min_interval,
            cancellation_token.clone(),
        ));

        Self {
            sender,
            counters,
            worker: Mutex::new(Some(worker)),
            cancellation_token,
        }
    }

    /// Queue a job for delivery; returns false if it was dropped
    pub fn dispatch(&self, job: AlertJob) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Alert queue full, dropping alert {}", job.filename);
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Alert worker stopped, dropping alert {}", job.filename);
                false
            }
        }
    }

    pub fn stats(&self) -> AlertStats {
        AlertStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop the worker; queued alerts that have not started are discarded
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
        info!("Alert dispatcher stopped");
    }
}

impl Drop for AlertDispatcher {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

async fn alert_worker(
    mut receiver: mpsc::Receiver<AlertJob>,
    notifier: Arc<dyn Notifier>,
    event_bus: Arc<EventBus>,
    counters: Arc<AlertCounters>,
    min_interval: Duration,
    token: CancellationToken,
) {
    let mut last_sent: Option<Instant> = None;

    loop {
        let job = tokio::select! {
            _ = token.cancelled() => break,
            job = receiver.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        if let Some(last) = last_sent {
            let ready_at = last + min_interval;
            if ready_at > Instant::now() {
                debug!("Throttling alert {}", job.filename);
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = sleep_until(ready_at) => {}
                }
            }
        }
        last_sent = Some(Instant::now());

        match notifier
            .send(&job.destination, job.image.clone(), &job.filename)
            .await
        {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                info!("Alert sent to {}", job.destination);
                let _ = event_bus
                    .publish(BrokerEvent::AlertDelivered {
                        filename: job.filename,
                    })
                    .await;
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                let _ = event_bus
                    .publish(BrokerEvent::AlertFailed {
                        filename: job.filename,
                        error: e.to_string(),
                    })
                    .await;
            }
        }
    }

    debug!("Alert worker exiting");
}
