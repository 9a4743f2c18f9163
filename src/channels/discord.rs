use super::NotificationChannel;
use crate::config::DiscordConfig;
use crate::error::{KeeperError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Announces into a Discord channel through an incoming webhook.
pub struct DiscordChannel {
    client: reqwest::Client,
    webhook_url: String,
}

impl DiscordChannel {
    pub fn new(config: &DiscordConfig) -> Result<Self> {
        if config.webhook_url.is_empty() {
            return Err(KeeperError::channel("discord", "webhook_url is not set"));
        }

        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .map_err(|e| KeeperError::channel("discord".to_string(), e.to_string()))?;

        Ok(Self {
            client,
            webhook_url: config.webhook_url.clone(),
        })
    }
}

#[async_trait]
impl NotificationChannel for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    async fn send(&self, text: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&serde_json::json!({ "content": text }))
            .send()
            .await
            .map_err(|e| KeeperError::channel("discord".to_string(), e.to_string()))?;

        if !response.status().is_success() {
            return Err(KeeperError::channel(
                "discord".to_string(),
                format!("webhook returned {}", response.status()),
            ));
        }

        debug!("Discord webhook delivery succeeded");
        Ok(())
    }
}
