use super::state::{LifecycleCell, RestartReason, ServerLifecycleState};
use super::watchdog::WatchdogGate;
use crate::announce::Announcer;
use crate::config::KeeperConfig;
use crate::process::ProcessController;
use crate::version::{UpdateCheck, VersionSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The control loop. Owns the canonical lifecycle state machine, consumes
/// the update-poll and periodic-restart timers, and drives the announcer,
/// process controller and version source through each sequence.
pub struct UpdateOrchestrator {
    pub(super) process: Arc<dyn ProcessController>,
    pub(super) version: Arc<dyn VersionSource>,
    pub(super) announcer: Arc<Announcer>,
    pub(super) lifecycle: Arc<LifecycleCell>,
    pub(super) gate: Arc<WatchdogGate>,
    pub(super) poll_interval: Duration,
    pub(super) restart_interval: Option<Duration>,
    pub(super) lead_time: Duration,
    pub(super) stop_grace: Duration,
    pub(super) cancel: CancellationToken,
}

impl UpdateOrchestrator {
    /// Build the orchestrator from the configuration snapshot. The
    /// minute/hour settings are converted to durations once, here; a
    /// periodic-restart interval of 0 means that trigger is never armed.
    pub fn new(
        config: &KeeperConfig,
        process: Arc<dyn ProcessController>,
        version: Arc<dyn VersionSource>,
        announcer: Arc<Announcer>,
        lifecycle: Arc<LifecycleCell>,
        gate: Arc<WatchdogGate>,
        cancel: CancellationToken,
    ) -> Self {
        let restart_interval = match config.general.restart_every_hours {
            0 => None,
            hours => Some(Duration::from_secs(hours * 3600)),
        };

        Self {
            process,
            version,
            announcer,
            lifecycle,
            gate,
            poll_interval: Duration::from_secs(config.update.poll_interval_minutes * 60),
            restart_interval,
            lead_time: Duration::from_secs(config.update.announce_minutes_before * 60),
            stop_grace: Duration::from_secs(config.general.stop_grace_seconds),
            cancel,
        }
    }

    /// Timer loop. Both triggers feed the same state machine from one
    /// select; the update-poll arm is polled first so a simultaneous fire
    /// runs the update check to completion before the periodic restart is
    /// reconsidered. Cancellation stops the loop without leaving a timer
    /// armed.
    pub async fn run(&self) {
        info!(
            "Checking for updates every {} minutes",
            self.poll_interval.as_secs() / 60
        );

        let mut update_ticks = interval_at(
            Instant::now() + self.poll_interval,
            self.poll_interval,
        );
        update_ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut next_restart = self.restart_interval.map(|interval| {
            info!(
                "Server will restart for maintenance every {} hours",
                interval.as_secs() / 3600
            );
            Instant::now() + interval
        });

        loop {
            match next_restart {
                Some(deadline) => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = update_ticks.tick() => self.on_update_tick().await,
                        _ = sleep_until(deadline) => {
                            // The next fire is scheduled relative to now;
                            // bounded drift is accepted over fixed
                            // wall-clock instants.
                            if let Some(interval) = self.restart_interval {
                                next_restart = Some(Instant::now() + interval);
                            }
                            self.on_periodic_tick().await;
                        }
                    }
                }
                None => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = update_ticks.tick() => self.on_update_tick().await,
                    }
                }
            }
        }

        info!("Update control loop stopped");
    }

    /// Update-poll trigger. Claims the state machine, asks the version
    /// source for news, and either returns to Idle or runs a full update
    /// sequence. A version-source failure is a warning and counts as "no
    /// update"; it never escapes into the timer loop.
    pub(crate) async fn on_update_tick(&self) {
        if !self.lifecycle.begin(ServerLifecycleState::CheckingForUpdate) {
            debug!(
                "Update poll dropped; a sequence is active ({:?})",
                self.lifecycle.current()
            );
            return;
        }

        info!("Performing update check");
        let check = match self.version.detect_update().await {
            Ok(check) => check,
            Err(e) => {
                warn!("Update check failed: {}", e);
                UpdateCheck::none()
            }
        };

        if !check.has_update {
            debug!("No update available");
            self.lifecycle.set(ServerLifecycleState::Idle);
            return;
        }

        let version = check.version.unwrap_or_else(|| "unknown".to_string());
        self.run_sequence(RestartReason::ScheduledUpdate(version))
            .await;
    }

    /// Periodic-restart trigger. The state claim doubles as the tie-break:
    /// if an update sequence is active the claim fails, the trigger is
    /// dropped, and the timer simply fires again on its own schedule.
    pub(crate) async fn on_periodic_tick(&self) {
        if !self
            .lifecycle
            .begin(ServerLifecycleState::AnnouncingPendingAction)
        {
            debug!(
                "Periodic restart dropped; a sequence is active ({:?})",
                self.lifecycle.current()
            );
            return;
        }

        info!("Scheduled restart interval elapsed");
        self.run_sequence(RestartReason::PeriodicMaintenance).await;
    }
}
