use super::{ComponentState, LockcamOrchestrator};
use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

const STOP_TIMEOUT: Duration = Duration::from_secs(10);

impl LockcamOrchestrator {
    /// Stop every component, relay first; returns the process exit code
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        // Stops the relay server and the roster watcher
        self.cancellation_token.cancel();

        let mut exit_code = 0;

        if let Some(task) = self.server_task.take() {
            let stopped = self
                .stop_component("relay", async move {
                    match task.await {
                        Ok(result) => result.is_ok(),
                        Err(_) => false,
                    }
                })
                .await;
            if !stopped {
                exit_code = 1;
            }
        } else {
            self.set_component_state("relay", ComponentState::Stopped);
        }

        if let Some(task) = self.roster_task.take() {
            if !self
                .stop_component("roster", async move { task.await.is_ok() })
                .await
            {
                exit_code = 1;
            }
        }
        if self.recognition.is_some() {
            self.set_component_state("recognition", ComponentState::Stopped);
        }

        let access = self.access();
        if !self
            .stop_component("access", async move {
                access.shutdown().await;
                true
            })
            .await
        {
            exit_code = 1;
        }

        let alerts = std::sync::Arc::clone(&self.alerts);
        if !self
            .stop_component("alerts", async move {
                alerts.shutdown().await;
                true
            })
            .await
        {
            exit_code = 1;
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    /// Await one component's stop future, bounded by a timeout
    async fn stop_component<F>(&self, component: &'static str, stop: F) -> bool
    where
        F: Future<Output = bool>,
    {
        info!("Stopping {} component", component);
        self.set_component_state(component, ComponentState::Stopping);

        match timeout(STOP_TIMEOUT, stop).await {
            Ok(true) => {
                self.set_component_state(component, ComponentState::Stopped);
                info!("{} component stopped", component);
                true
            }
            Ok(false) => {
                self.set_component_state(component, ComponentState::Failed);
                error!("Error stopping {} component", component);
                false
            }
            Err(_) => {
                self.set_component_state(component, ComponentState::Failed);
                error!("{} component stop timeout", component);
                false
            }
        }
    }
}
