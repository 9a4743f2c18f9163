use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct KeeperConfig {
    pub server: ServerConfig,
    pub update: UpdateConfig,
    pub general: GeneralConfig,
    pub discord: DiscordConfig,
    pub twitch: TwitchConfig,
    pub rcon: RconConfig,
    pub messages: MessagesConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// Process name to look for in the process table
    pub process_name: String,

    /// Launch scripts executed, in order, to bring the server up
    #[serde(default)]
    pub launch_scripts: Vec<String>,

    /// Server installation directory (holds the app manifest)
    pub install_dir: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UpdateConfig {
    /// Minutes between update checks
    #[serde(default = "default_poll_interval_minutes")]
    pub poll_interval_minutes: u64,

    /// Minutes of warning between the pending announcement and the stop
    #[serde(default = "default_announce_minutes_before")]
    pub announce_minutes_before: u64,

    /// Directory containing the steamcmd binary
    pub steamcmd_dir: String,

    /// Steam application id of the dedicated server
    pub app_id: String,

    /// Last installed build id; 0 means read it from the app manifest
    #[serde(default)]
    pub installed_build: u32,

    /// Run an install/update pass at startup before arming the timers
    #[serde(default)]
    pub update_on_launch: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GeneralConfig {
    /// Restart the server process when it is found not running
    #[serde(default = "default_restart_on_crash")]
    pub restart_on_crash: bool,

    /// Force a restart every N hours; 0 disables the schedule
    #[serde(default)]
    pub restart_every_hours: u64,

    /// Seconds between watchdog liveness polls
    #[serde(default = "default_watchdog_poll_seconds")]
    pub watchdog_poll_seconds: u64,

    /// Seconds to wait for a clean shutdown before declaring the stop failed
    #[serde(default = "default_stop_grace_seconds")]
    pub stop_grace_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DiscordConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Webhook URL the announcement is POSTed to
    #[serde(default)]
    pub webhook_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TwitchConfig {
    #[serde(default)]
    pub enabled: bool,

    /// IRC endpoint, host:port
    #[serde(default = "default_twitch_server")]
    pub server: String,

    /// OAuth token ("oauth:...")
    #[serde(default)]
    pub oauth: String,

    #[serde(default)]
    pub username: String,

    /// Channel to announce into, without the leading '#'
    #[serde(default)]
    pub channel: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RconConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Remote-console endpoints, host:port, one per server shard
    #[serde(default)]
    pub servers: Vec<String>,

    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MessagesConfig {
    /// Sent when an update is detected. Supports @version and @announcebefore.
    #[serde(default = "default_update_pending_message")]
    pub update_pending: String,

    /// Sent before a scheduled maintenance restart. Supports @hours and
    /// @announcebefore.
    #[serde(default = "default_maintenance_pending_message")]
    pub maintenance_pending: String,

    /// Sent once the server is back up after a sequence.
    #[serde(default = "default_restart_complete_message")]
    pub restart_complete: String,
}

impl KeeperConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("serverkeeper.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Start with default values
            .set_default("server.process_name", "")?
            .set_default("server.launch_scripts", Vec::<String>::new())?
            .set_default("server.install_dir", "")?
            .set_default(
                "update.poll_interval_minutes",
                default_poll_interval_minutes(),
            )?
            .set_default(
                "update.announce_minutes_before",
                default_announce_minutes_before(),
            )?
            .set_default("update.steamcmd_dir", "")?
            .set_default("update.app_id", "")?
            .set_default("update.installed_build", 0)?
            .set_default("update.update_on_launch", false)?
            .set_default("general.restart_on_crash", default_restart_on_crash())?
            .set_default("general.restart_every_hours", 0)?
            .set_default(
                "general.watchdog_poll_seconds",
                default_watchdog_poll_seconds(),
            )?
            .set_default("general.stop_grace_seconds", default_stop_grace_seconds())?
            .set_default("discord.enabled", false)?
            .set_default("discord.webhook_url", "")?
            .set_default("twitch.enabled", false)?
            .set_default("twitch.server", default_twitch_server())?
            .set_default("twitch.oauth", "")?
            .set_default("twitch.username", "")?
            .set_default("twitch.channel", "")?
            .set_default("rcon.enabled", false)?
            .set_default("rcon.servers", Vec::<String>::new())?
            .set_default("rcon.password", "")?
            .set_default(
                "messages.update_pending",
                default_update_pending_message(),
            )?
            .set_default(
                "messages.maintenance_pending",
                default_maintenance_pending_message(),
            )?
            .set_default(
                "messages.restart_complete",
                default_restart_complete_message(),
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with SERVERKEEPER_ prefix
            .add_source(Environment::with_prefix("SERVERKEEPER").separator("_"))
            .build()?;

        let config: KeeperConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values. Enabled channels with missing
    /// credentials are rejected here so the service fails fast instead of
    /// degrading silently once a sequence is underway.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.process_name.is_empty() {
            return Err(ConfigError::Message(
                "server.process_name must be set".to_string(),
            ));
        }

        if self.server.launch_scripts.is_empty() {
            return Err(ConfigError::Message(
                "server.launch_scripts must contain at least one script".to_string(),
            ));
        }

        if self.server.install_dir.is_empty() {
            return Err(ConfigError::Message(
                "server.install_dir must be set".to_string(),
            ));
        }

        if self.update.poll_interval_minutes == 0 {
            return Err(ConfigError::Message(
                "update.poll_interval_minutes must be greater than 0".to_string(),
            ));
        }

        if self.update.steamcmd_dir.is_empty() {
            return Err(ConfigError::Message(
                "update.steamcmd_dir must be set".to_string(),
            ));
        }

        if self.update.app_id.is_empty() {
            return Err(ConfigError::Message(
                "update.app_id must be set".to_string(),
            ));
        }

        if self.general.stop_grace_seconds == 0 {
            return Err(ConfigError::Message(
                "general.stop_grace_seconds must be greater than 0".to_string(),
            ));
        }

        if self.general.watchdog_poll_seconds == 0 {
            return Err(ConfigError::Message(
                "general.watchdog_poll_seconds must be greater than 0".to_string(),
            ));
        }

        if self.discord.enabled && self.discord.webhook_url.is_empty() {
            return Err(ConfigError::Message(
                "discord channel is enabled but discord.webhook_url is not set".to_string(),
            ));
        }

        if self.twitch.enabled {
            if self.twitch.oauth.is_empty()
                || self.twitch.username.is_empty()
                || self.twitch.channel.is_empty()
            {
                return Err(ConfigError::Message(
                    "twitch channel is enabled but oauth, username and channel must all be set"
                        .to_string(),
                ));
            }
        }

        if self.rcon.enabled {
            if self.rcon.servers.is_empty() {
                return Err(ConfigError::Message(
                    "rcon channel is enabled but rcon.servers is empty".to_string(),
                ));
            }
            if self.rcon.password.is_empty() {
                return Err(ConfigError::Message(
                    "rcon channel is enabled but rcon.password is not set".to_string(),
                ));
            }
        }

        Ok(())
    }
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                process_name: String::new(),
                launch_scripts: Vec::new(),
                install_dir: String::new(),
            },
            update: UpdateConfig {
                poll_interval_minutes: default_poll_interval_minutes(),
                announce_minutes_before: default_announce_minutes_before(),
                steamcmd_dir: String::new(),
                app_id: String::new(),
                installed_build: 0,
                update_on_launch: false,
            },
            general: GeneralConfig {
                restart_on_crash: default_restart_on_crash(),
                restart_every_hours: 0,
                watchdog_poll_seconds: default_watchdog_poll_seconds(),
                stop_grace_seconds: default_stop_grace_seconds(),
            },
            discord: DiscordConfig {
                enabled: false,
                webhook_url: String::new(),
            },
            twitch: TwitchConfig {
                enabled: false,
                server: default_twitch_server(),
                oauth: String::new(),
                username: String::new(),
                channel: String::new(),
            },
            rcon: RconConfig {
                enabled: false,
                servers: Vec::new(),
                password: String::new(),
            },
            messages: MessagesConfig {
                update_pending: default_update_pending_message(),
                maintenance_pending: default_maintenance_pending_message(),
                restart_complete: default_restart_complete_message(),
            },
        }
    }
}

// Default value functions
fn default_poll_interval_minutes() -> u64 {
    5
}
fn default_announce_minutes_before() -> u64 {
    5
}
fn default_restart_on_crash() -> bool {
    true
}
fn default_watchdog_poll_seconds() -> u64 {
    30
}
fn default_stop_grace_seconds() -> u64 {
    30
}
fn default_twitch_server() -> String {
    "irc.chat.twitch.tv:6667".to_string()
}
fn default_update_pending_message() -> String {
    "Server update @version detected. The server will go down for the update in @announcebefore."
        .to_string()
}
fn default_maintenance_pending_message() -> String {
    "The server has been up for @hours hours and will restart for maintenance in @announcebefore."
        .to_string()
}
fn default_restart_complete_message() -> String {
    "The server has restarted and is back online.".to_string()
}
