use super::Notifier;
use crate::error::NotifyError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Notifier that records alerts in the log instead of mailing them
#[derive(Debug, Default)]
pub struct LogNotifier {
    sent: AtomicU64,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(
        &self,
        destination: &str,
        image: Bytes,
        filename: &str,
    ) -> Result<(), NotifyError> {
        self.sent.fetch_add(1, Ordering::Relaxed);
        info!(
            "Unknown face alert for {}: {} ({} bytes)",
            destination,
            filename,
            image.len()
        );
        Ok(())
    }
}
