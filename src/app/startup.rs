use super::{ComponentState, LockcamOrchestrator};
use crate::error::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

impl LockcamOrchestrator {
    /// Register components and prepare what they need on disk
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing lockcam components");

        self.set_component_state("access", ComponentState::Stopped);
        self.set_component_state("alerts", ComponentState::Stopped);
        if self.recognition.is_some() {
            self.set_component_state("recognition", ComponentState::Stopped);
            self.set_component_state("roster", ComponentState::Stopped);
        }
        self.set_component_state("relay", ComponentState::Stopped);

        if let Err(e) = self.alerts.captures().ensure_root().await {
            warn!(
                "Unknown-face directory {} is not usable: {}",
                self.alerts.captures().root().display(),
                e
            );
        }

        self.log_summary();
        info!("All components initialized successfully");
        Ok(())
    }

    /// Load the known gallery, start background tasks and open the relay
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting lockcam");

        self.set_component_state("access", ComponentState::Running);
        self.set_component_state("alerts", ComponentState::Running);

        if let Some(roster) = &self.roster {
            self.set_component_state("roster", ComponentState::Starting);
            match roster.reload().await {
                Ok(count) => info!("Known gallery ready with {} face(s)", count),
                // The watcher keeps retrying on its interval
                Err(e) => warn!("Initial gallery load failed: {}", e),
            }
            self.roster_task = Some(Arc::clone(roster).spawn(self.cancellation_token.child_token()));
            self.set_component_state("roster", ComponentState::Running);
            self.set_component_state("recognition", ComponentState::Running);
        }

        self.set_component_state("relay", ComponentState::Starting);
        let listener = self.server.bind().await.map_err(|e| {
            error!("Failed to start relay server: {}", e);
            self.set_component_state("relay", ComponentState::Failed);
            e
        })?;
        self.local_addr = listener.local_addr().ok();

        let server = Arc::clone(&self.server);
        let token = self.cancellation_token.child_token();
        self.server_task = Some(tokio::spawn(async move {
            let result = server.serve(listener, token).await;
            if let Err(e) = &result {
                error!("Relay server error: {}", e);
            }
            result
        }));
        self.set_component_state("relay", ComponentState::Running);

        info!("lockcam started");
        Ok(())
    }
}
