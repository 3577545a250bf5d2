use super::{LockcamOrchestrator, ShutdownReason};
use crate::error::{LockcamError, Result};
use crate::events::BrokerEvent;
use std::time::SystemTime;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};

impl LockcamOrchestrator {
    /// Run until a signal or a shutdown trigger arrives, then shut down
    pub async fn run(&mut self) -> Result<i32> {
        info!("lockcam is running");

        let mut shutdown_receiver =
            self.shutdown_receiver
                .take()
                .ok_or_else(|| LockcamError::system("Shutdown receiver already taken"))?;

        self.setup_signal_handlers(self.shutdown_sender.clone());

        let reason = shutdown_receiver
            .recv()
            .await
            .ok_or_else(|| LockcamError::system("Shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {}", reason);
        let _ = self
            .event_bus
            .publish(BrokerEvent::ShutdownRequested {
                timestamp: SystemTime::now(),
                reason: reason.to_string(),
            })
            .await;

        let exit_code = self.shutdown().await?;

        info!("lockcam shutdown complete");
        Ok(exit_code)
    }

    fn setup_signal_handlers(&self, shutdown_sender: mpsc::Sender<ShutdownReason>) {
        // SIGTERM (systemd stop), Unix only
        #[cfg(unix)]
        {
            let sender = shutdown_sender.clone();
            tokio::spawn(async move {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        if sigterm.recv().await.is_some() {
                            info!("Received SIGTERM signal");
                            let _ = sender.try_send(ShutdownReason::Signal("SIGTERM".to_string()));
                        }
                    }
                    Err(e) => error!("Failed to register SIGTERM handler: {}", e),
                }
            });
        }

        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                let _ = shutdown_sender.try_send(ShutdownReason::Signal("SIGINT".to_string()));
            }
        });
    }
}
