use super::state::LifecycleCell;
use crate::process::ProcessController;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Suspension gate between the orchestrator and the watchdog. Raised for
/// the whole span of a sequence so the watchdog never restarts a process
/// the orchestrator just stopped.
pub struct WatchdogGate {
    suspended: AtomicBool,
}

impl WatchdogGate {
    pub fn new() -> Self {
        Self {
            suspended: AtomicBool::new(false),
        }
    }

    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.suspended.store(false, Ordering::SeqCst);
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }
}

impl Default for WatchdogGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Liveness poller for the managed process. Outside of planned sequences,
/// an absent process is started again; during a sequence the gate and the
/// lifecycle state both keep the watchdog's hands off.
pub struct ProcessWatchdog {
    process: Arc<dyn ProcessController>,
    lifecycle: Arc<LifecycleCell>,
    gate: Arc<WatchdogGate>,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl ProcessWatchdog {
    pub fn new(
        process: Arc<dyn ProcessController>,
        lifecycle: Arc<LifecycleCell>,
        gate: Arc<WatchdogGate>,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            process,
            lifecycle,
            gate,
            poll_interval,
            cancel,
        }
    }

    /// Run the poll loop on the runtime until the token is cancelled.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Monitoring server process liveness every {:?}",
                self.poll_interval
            );

            let mut ticks = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = ticks.tick() => self.poll().await,
                }
            }

            debug!("Watchdog loop stopped");
        })
    }

    /// One liveness check. The gate is read at the top and again right
    /// before acting: a poll that was already past the first check when a
    /// sequence suspended the watchdog must still not start anything.
    pub(crate) async fn poll(&self) {
        if self.gate.is_suspended() {
            debug!("Watchdog poll skipped; suspended during a sequence");
            return;
        }

        if self.process.is_running().await {
            return;
        }

        if !self.lifecycle.is_idle() {
            debug!(
                "Server process absent but a sequence is active ({:?}); leaving it alone",
                self.lifecycle.current()
            );
            return;
        }

        if self.gate.is_suspended() {
            debug!("Watchdog suspended mid-poll; not acting");
            return;
        }

        error!("Server process not found running. Will try to start it now.");
        match self.process.start().await {
            Ok(outcome) => info!("Watchdog start request finished: {:?}", outcome),
            Err(e) => error!("Watchdog failed to start the server: {}", e),
        }
    }
}
