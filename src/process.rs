use crate::error::{KeeperError, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Outcome of a start request. Starting an already-running server is not an
/// error; the controller reports it so callers never double-launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// Outcome of a stop request. An absent process is reported, not failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

/// Start/stop/query capability for the managed game-server process.
#[async_trait]
pub trait ProcessController: Send + Sync {
    /// Launch the server. Idempotent: returns `AlreadyRunning` without
    /// spawning anything if the process is already up.
    async fn start(&self) -> Result<StartOutcome>;

    /// Request termination and wait up to `grace` for the process to exit.
    async fn stop(&self, grace: Duration) -> Result<StopOutcome>;

    /// Whether the server process is currently in the process table.
    async fn is_running(&self) -> bool;
}

/// Controls the game server through its launch scripts and the process
/// table. Liveness is a `/proc` scan by process name; termination is a
/// SIGTERM followed by a bounded wait.
pub struct GameProcessController {
    process_name: String,
    launch_scripts: Vec<String>,
    startup_wait: Duration,
}

const STARTUP_POLL_STEP: Duration = Duration::from_millis(500);
const SHUTDOWN_POLL_STEP: Duration = Duration::from_secs(1);

impl GameProcessController {
    pub fn new(process_name: String, launch_scripts: Vec<String>) -> Self {
        Self {
            process_name,
            launch_scripts,
            startup_wait: Duration::from_secs(10),
        }
    }

    /// Scan `/proc` for pids whose comm matches the configured name.
    fn find_pids(&self) -> Vec<i32> {
        match scan_proc(&self.process_name) {
            Ok(pids) => pids,
            Err(e) => {
                warn!("Failed to scan process table: {}", e);
                Vec::new()
            }
        }
    }

    fn running(&self) -> bool {
        !self.find_pids().is_empty()
    }
}

#[async_trait]
impl ProcessController for GameProcessController {
    async fn start(&self) -> Result<StartOutcome> {
        if self.running() {
            debug!("Start requested but '{}' is already running", self.process_name);
            return Ok(StartOutcome::AlreadyRunning);
        }

        for script in &self.launch_scripts {
            info!("Launching server script: {}", script);
            Command::new(script).spawn().map_err(|e| {
                KeeperError::process(format!("failed to launch '{}': {}", script, e))
            })?;
        }

        // The scripts hand off to the real server binary, so give the
        // process a moment to appear in the process table.
        let deadline = tokio::time::Instant::now() + self.startup_wait;
        while tokio::time::Instant::now() < deadline {
            if self.running() {
                info!("Server process '{}' is up", self.process_name);
                return Ok(StartOutcome::Started);
            }
            sleep(STARTUP_POLL_STEP).await;
        }

        error!(
            "Server process '{}' did not appear within {:?} of launching",
            self.process_name, self.startup_wait
        );
        Err(KeeperError::StartFailed)
    }

    async fn stop(&self, grace: Duration) -> Result<StopOutcome> {
        let pids = self.find_pids();
        if pids.is_empty() {
            debug!("Stop requested but '{}' is not running", self.process_name);
            return Ok(StopOutcome::NotRunning);
        }

        for pid in &pids {
            info!("Sending SIGTERM to '{}' (pid {})", self.process_name, pid);
            // Failure here usually means the pid exited between the scan and
            // the signal; the wait loop below settles it either way.
            unsafe {
                libc::kill(*pid, libc::SIGTERM);
            }
        }

        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            if !self.running() {
                info!("Server process '{}' has exited", self.process_name);
                return Ok(StopOutcome::Stopped);
            }
            sleep(SHUTDOWN_POLL_STEP).await;
        }

        Err(KeeperError::StopTimeout {
            grace_secs: grace.as_secs(),
        })
    }

    async fn is_running(&self) -> bool {
        self.running()
    }
}

/// Walk `/proc` and collect pids whose comm matches `name`.
fn scan_proc(name: &str) -> std::io::Result<Vec<i32>> {
    let mut pids = Vec::new();

    for entry in std::fs::read_dir("/proc")? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };

        let pid: i32 = match entry.file_name().to_string_lossy().parse() {
            Ok(pid) => pid,
            Err(_) => continue,
        };

        // Processes can exit between the read_dir and the comm read.
        let comm_path = Path::new("/proc").join(pid.to_string()).join("comm");
        let comm = match std::fs::read_to_string(&comm_path) {
            Ok(comm) => comm,
            Err(_) => continue,
        };

        if comm_matches(name, comm.trim_end()) {
            pids.push(pid);
        }
    }

    Ok(pids)
}

/// Match a configured process name against a `/proc/<pid>/comm` entry.
/// comm is truncated by the kernel to 15 bytes, so a long configured name
/// also matches when it starts with a full-length comm value.
fn comm_matches(name: &str, comm: &str) -> bool {
    if comm.contains(name) {
        return true;
    }
    comm.len() == 15 && name.starts_with(comm)
}
