use crate::error::{KeeperError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Result of one update poll. Produced fresh each time, never retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCheck {
    pub has_update: bool,
    pub version: Option<String>,
}

impl UpdateCheck {
    pub fn none() -> Self {
        Self {
            has_update: false,
            version: None,
        }
    }

    pub fn available(version: String) -> Self {
        Self {
            has_update: true,
            version: Some(version),
        }
    }
}

/// Upstream build queries and the install step. The source owns the "last
/// known installed build" so the orchestrator never tracks versions itself.
#[async_trait]
pub trait VersionSource: Send + Sync {
    /// Compare the live build against the last known installed build.
    async fn detect_update(&self) -> Result<UpdateCheck>;

    /// Run the updater tool to completion. Long-running; no timeout is
    /// imposed here.
    async fn apply_update(&self) -> Result<()>;
}

const STEAMCMD_BIN: &str = "steamcmd.sh";

/// Queries and installs builds through a local steamcmd installation.
pub struct SteamVersionSource {
    steamcmd_dir: PathBuf,
    install_dir: PathBuf,
    app_id: String,
    installed_build: Mutex<u32>,
}

impl SteamVersionSource {
    pub fn new(steamcmd_dir: &str, install_dir: &str, app_id: &str, installed_build: u32) -> Self {
        Self {
            steamcmd_dir: PathBuf::from(steamcmd_dir),
            install_dir: PathBuf::from(install_dir),
            app_id: app_id.to_string(),
            installed_build: Mutex::new(installed_build),
        }
    }

    /// Whether the steamcmd binary is present. Checked at startup so a
    /// misconfigured path fails before any timer is armed.
    pub fn is_installed(&self) -> bool {
        self.steamcmd_dir.join(STEAMCMD_BIN).exists()
    }

    pub fn installed_build(&self) -> u32 {
        *self.installed_build.lock()
    }

    fn steamcmd(&self) -> PathBuf {
        self.steamcmd_dir.join(STEAMCMD_BIN)
    }

    fn manifest_path(&self) -> PathBuf {
        self.install_dir
            .join("steamapps")
            .join(format!("appmanifest_{}.acf", self.app_id))
    }

    /// Read the installed build id from the app manifest. Used once, when
    /// the configuration does not carry a build id.
    fn prime_from_manifest(&self) -> Result<u32> {
        let manifest = self.manifest_path();
        let text = std::fs::read_to_string(&manifest).map_err(|e| {
            KeeperError::version(format!(
                "could not read app manifest {}: {}",
                manifest.display(),
                e
            ))
        })?;

        find_build_id(&text).ok_or_else(|| {
            KeeperError::version(format!(
                "no buildid entry in app manifest {}",
                manifest.display()
            ))
        })
    }

    async fn query_live_build(&self) -> Result<u32> {
        // steamcmd serves a cached build id unless the app cache is cleared
        // before the query.
        let cache = self.steamcmd_dir.join("appcache");
        if cache.exists() {
            if let Err(e) = std::fs::remove_dir_all(&cache) {
                warn!("Could not clear steamcmd app cache: {}", e);
            }
        }

        let output = Command::new(self.steamcmd())
            .arg("+login")
            .arg("anonymous")
            .arg("+app_info_update")
            .arg("1")
            .arg("+app_info_print")
            .arg(&self.app_id)
            .arg("+quit")
            .output()
            .await
            .map_err(|e| KeeperError::version(format!("failed to run steamcmd: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        find_build_id(&stdout)
            .ok_or_else(|| KeeperError::version("no buildid in steamcmd app info output"))
    }
}

#[async_trait]
impl VersionSource for SteamVersionSource {
    async fn detect_update(&self) -> Result<UpdateCheck> {
        if *self.installed_build.lock() == 0 {
            let build = self.prime_from_manifest()?;
            *self.installed_build.lock() = build;
            info!("Installed build id read from app manifest: {}", build);
            return Ok(UpdateCheck::none());
        }

        let live = self.query_live_build().await?;
        let installed = *self.installed_build.lock();

        if live <= installed {
            debug!(
                "Installed build {} is current (live build {})",
                installed, live
            );
            return Ok(UpdateCheck::none());
        }

        info!(
            "Live build is {}, installed build is {}. An update is required.",
            live, installed
        );
        *self.installed_build.lock() = live;
        Ok(UpdateCheck::available(live.to_string()))
    }

    async fn apply_update(&self) -> Result<()> {
        info!("Running steamcmd app_update for app {}", self.app_id);

        let status = Command::new(self.steamcmd())
            .arg("+@ShutdownOnFailedCommand")
            .arg("+@NoPromptForPassword")
            .arg("1")
            .arg("+login")
            .arg("anonymous")
            .arg("+force_install_dir")
            .arg(&self.install_dir)
            .arg("+app_update")
            .arg(&self.app_id)
            .arg("+quit")
            .status()
            .await
            .map_err(|e| KeeperError::version(format!("failed to run steamcmd: {}", e)))?;

        if !status.success() {
            return Err(KeeperError::version(format!(
                "steamcmd app_update exited with {}",
                status
            )));
        }

        info!("steamcmd app_update completed");
        Ok(())
    }
}

/// Extract a build id from manifest or app-info text. Both formats carry a
/// line like `"buildid"  "12345"`; the id is the last quoted number on it.
fn find_build_id(text: &str) -> Option<u32> {
    let line = text.lines().find(|line| line.contains("buildid"))?;
    line.split('"')
        .filter(|token| !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()))
        .last()?
        .parse()
        .ok()
}
