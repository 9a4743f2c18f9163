mod discord;
mod rcon;
mod twitch;

pub use discord::DiscordChannel;
pub use rcon::RconChannel;
pub use twitch::TwitchChannel;

use crate::config::KeeperConfig;
use crate::error::Result;
use async_trait::async_trait;
use tracing::info;

/// A single announcement destination. One adapter per channel kind; the
/// fan-out loop iterates over this trait and never sees concrete kinds.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver one rendered message. Errors are the caller's to isolate.
    async fn send(&self, text: &str) -> Result<()>;
}

/// Construct every enabled channel adapter. Disabled channels are never
/// built; an enabled channel with missing credentials is a hard error so the
/// service refuses to start rather than announcing into the void.
pub fn build_channels(config: &KeeperConfig) -> Result<Vec<Box<dyn NotificationChannel>>> {
    let mut channels: Vec<Box<dyn NotificationChannel>> = Vec::new();

    if config.discord.enabled {
        channels.push(Box::new(DiscordChannel::new(&config.discord)?));
    }

    if config.twitch.enabled {
        channels.push(Box::new(TwitchChannel::new(&config.twitch)?));
    }

    if config.rcon.enabled {
        channels.push(Box::new(RconChannel::new(&config.rcon)?));
    }

    if channels.is_empty() {
        info!("No notification channels enabled; announcements will only be logged");
    }

    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeeperConfig;

    #[test]
    fn no_channels_built_when_all_disabled() {
        let config = KeeperConfig::default();
        let channels = build_channels(&config).unwrap();
        assert!(channels.is_empty());
    }

    #[test]
    fn enabled_channel_without_credentials_is_a_hard_error() {
        let mut config = KeeperConfig::default();
        config.discord.enabled = true;
        assert!(build_channels(&config).is_err());
    }

    #[test]
    fn enabled_channels_are_built_in_order() {
        let mut config = KeeperConfig::default();
        config.discord.enabled = true;
        config.discord.webhook_url = "https://discord.invalid/api/webhooks/1/x".to_string();
        config.rcon.enabled = true;
        config.rcon.servers = vec!["127.0.0.1:27015".to_string()];
        config.rcon.password = "hunter2".to_string();

        let channels = build_channels(&config).unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].name(), "discord");
        assert_eq!(channels[1].name(), "rcon");
    }
}
