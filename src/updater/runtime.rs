use super::orchestrator::UpdateOrchestrator;
use super::state::LifecycleCell;
use super::watchdog::{ProcessWatchdog, WatchdogGate};
use crate::announce::Announcer;
use crate::channels::build_channels;
use crate::config::KeeperConfig;
use crate::error::{KeeperError, Result};
use crate::process::GameProcessController;
use crate::version::{SteamVersionSource, VersionSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Why the service is going down.
#[derive(Debug, Clone)]
pub enum ShutdownReason {
    Signal(String),
}

/// The assembled service: every collaborator wired together, ready to arm
/// the timers and wait for a shutdown signal. Construction is where all
/// fail-fast checks live; a `Keeper` that exists can run.
pub struct Keeper {
    orchestrator: Arc<UpdateOrchestrator>,
    watchdog: Option<ProcessWatchdog>,
    version: Arc<SteamVersionSource>,
    update_on_launch: bool,
    cancel: CancellationToken,
    shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
}

impl Keeper {
    pub fn new(config: KeeperConfig) -> Result<Self> {
        config.validate()?;

        let channels = build_channels(&config)?;
        info!("{} notification channel(s) enabled", channels.len());

        let announcer = Arc::new(Announcer::new(
            channels,
            config.messages.clone(),
            config.update.announce_minutes_before,
            config.general.restart_every_hours,
        ));

        let process = Arc::new(GameProcessController::new(
            config.server.process_name.clone(),
            config.server.launch_scripts.clone(),
        ));

        let version = Arc::new(SteamVersionSource::new(
            &config.update.steamcmd_dir,
            &config.server.install_dir,
            &config.update.app_id,
            config.update.installed_build,
        ));

        if !version.is_installed() {
            return Err(KeeperError::version(format!(
                "steamcmd not found under '{}'; it is required to perform updates",
                config.update.steamcmd_dir
            )));
        }

        let lifecycle = Arc::new(LifecycleCell::new());
        let gate = Arc::new(WatchdogGate::new());
        let cancel = CancellationToken::new();

        let orchestrator = Arc::new(UpdateOrchestrator::new(
            &config,
            process.clone(),
            version.clone() as Arc<dyn VersionSource>,
            announcer,
            lifecycle.clone(),
            gate.clone(),
            cancel.clone(),
        ));

        let watchdog = if config.general.restart_on_crash {
            Some(ProcessWatchdog::new(
                process,
                lifecycle,
                gate,
                Duration::from_secs(config.general.watchdog_poll_seconds),
                cancel.clone(),
            ))
        } else {
            info!("Crash watchdog disabled by configuration");
            None
        };

        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        Ok(Self {
            orchestrator,
            watchdog,
            version,
            update_on_launch: config.update.update_on_launch,
            cancel,
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
        })
    }

    /// Arm the watchdog and the control loop, then wait for a shutdown
    /// signal. Both timer loops are released deterministically through the
    /// cancellation token before this returns.
    pub async fn run(&mut self) -> Result<()> {
        info!("serverkeeper is running");

        if self.update_on_launch {
            info!("Running the configured update pass before arming timers");
            if let Err(e) = self.version.apply_update().await {
                warn!("Update-on-launch pass failed: {}", e);
            }
        }

        let shutdown_sender = self
            .shutdown_sender
            .take()
            .ok_or_else(|| KeeperError::process("shutdown sender already taken"))?;
        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| KeeperError::process("shutdown receiver already taken"))?;

        self.setup_signal_handlers(shutdown_sender).await;

        let watchdog_handle = self.watchdog.take().map(ProcessWatchdog::spawn);

        let orchestrator = Arc::clone(&self.orchestrator);
        let orchestrator_handle = tokio::spawn(async move {
            orchestrator.run().await;
        });

        let shutdown_reason = shutdown_receiver
            .await
            .map_err(|_| KeeperError::process("shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {:?}", shutdown_reason);
        self.cancel.cancel();

        if let Err(e) = orchestrator_handle.await {
            error!("Control loop task panicked: {}", e);
        }
        if let Some(handle) = watchdog_handle {
            if let Err(e) = handle.await {
                error!("Watchdog task panicked: {}", e);
            }
        }

        info!("serverkeeper shutdown complete");
        Ok(())
    }

    /// Set up signal handlers for graceful shutdown
    async fn setup_signal_handlers(&self, shutdown_sender: oneshot::Sender<ShutdownReason>) {
        let shutdown_sender = Arc::new(Mutex::new(Some(shutdown_sender)));

        // Handle SIGTERM (systemd stop) - Unix only
        #[cfg(unix)]
        {
            let shutdown_sender_sigterm = Arc::clone(&shutdown_sender);
            tokio::spawn(async move {
                if let Some(()) = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM handler")
                    .recv()
                    .await
                {
                    info!("Received SIGTERM signal");
                    if let Some(sender) = shutdown_sender_sigterm.lock().await.take() {
                        let _ = sender.send(ShutdownReason::Signal("SIGTERM".to_string()));
                    }
                }
            });
        }

        // Handle SIGINT (Ctrl+C) - Cross-platform
        let shutdown_sender_sigint = Arc::clone(&shutdown_sender);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                if let Some(sender) = shutdown_sender_sigint.lock().await.take() {
                    let _ = sender.send(ShutdownReason::Signal("SIGINT".to_string()));
                }
            }
        });
    }
}
