use super::orchestrator::UpdateOrchestrator;
use super::state::{RestartReason, ServerLifecycleState};
use crate::process::StopOutcome;
use tokio::time::sleep;
use tracing::{error, info};

impl UpdateOrchestrator {
    /// One full announce → stop → (update) → start → announce pass. The
    /// watchdog is suspended for the whole span; any step failure abandons
    /// the remainder, resumes the watchdog and returns the state machine to
    /// Idle so the next watchdog cycle or an operator can recover.
    pub(crate) async fn run_sequence(&self, reason: RestartReason) {
        self.gate.suspend();
        self.lifecycle.set(ServerLifecycleState::AnnouncingPendingAction);

        match &reason {
            RestartReason::ScheduledUpdate(version) => {
                self.announcer.announce_update_pending(version).await;
            }
            RestartReason::PeriodicMaintenance => {
                self.announcer.announce_maintenance_pending().await;
            }
        }

        // The warning window players were promised. Liveness is checked
        // after the wait, not before: the server can die or be stopped by
        // hand while we sleep.
        sleep(self.lead_time).await;

        self.lifecycle.set(ServerLifecycleState::Stopping);
        if self.process.is_running().await {
            match self.process.stop(self.stop_grace).await {
                Ok(StopOutcome::Stopped) => info!("Server stopped cleanly"),
                Ok(StopOutcome::NotRunning) => {
                    info!("Server exited on its own during the stop request")
                }
                Err(e) => {
                    error!("Failed to stop the running server, abandoning sequence: {}", e);
                    self.abort_sequence();
                    return;
                }
            }
        } else {
            info!("Server already stopped during the warning window");
        }

        if let RestartReason::ScheduledUpdate(_) = &reason {
            self.lifecycle.set(ServerLifecycleState::Updating);
            info!("Installing update");
            if let Err(e) = self.version.apply_update().await {
                error!(
                    "Update install failed, abandoning sequence without a restart: {}",
                    e
                );
                self.abort_sequence();
                return;
            }
        }

        self.lifecycle.set(ServerLifecycleState::Starting);
        match self.process.start().await {
            Ok(outcome) => {
                if !self.process.is_running().await {
                    error!("Server process is not running after a start request ({:?})", outcome);
                    self.abort_sequence();
                    return;
                }
                info!("Server has started back up");
            }
            Err(e) => {
                error!("Failed to start the server after the sequence: {}", e);
                self.abort_sequence();
                return;
            }
        }

        self.lifecycle.set(ServerLifecycleState::Monitoring);
        self.announcer.announce_restarted().await;

        self.gate.resume();
        self.lifecycle.set(ServerLifecycleState::Idle);
    }

    /// Abandon the sequence: the watchdog comes back first so a dead
    /// process is recovered even though the sequence failed.
    fn abort_sequence(&self) {
        self.gate.resume();
        self.lifecycle.set(ServerLifecycleState::Idle);
    }
}
