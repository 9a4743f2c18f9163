use super::NotificationChannel;
use crate::config::TwitchConfig;
use crate::error::{KeeperError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Announces into a Twitch chat channel over the IRC line protocol. A fresh
/// connection is made per announcement; announcements are rare enough that
/// holding a session open buys nothing.
pub struct TwitchChannel {
    server: String,
    oauth: String,
    username: String,
    channel: String,
}

impl TwitchChannel {
    pub fn new(config: &TwitchConfig) -> Result<Self> {
        if config.oauth.is_empty() || config.username.is_empty() || config.channel.is_empty() {
            return Err(KeeperError::channel(
                "twitch",
                "oauth, username and channel must all be set",
            ));
        }

        Ok(Self {
            server: config.server.clone(),
            oauth: config.oauth.clone(),
            username: config.username.clone(),
            channel: config.channel.trim_start_matches('#').to_string(),
        })
    }

    async fn deliver(&self, text: &str) -> std::io::Result<()> {
        let mut stream = TcpStream::connect(&self.server).await?;

        let login = format!(
            "PASS {}\r\nNICK {}\r\nJOIN #{}\r\n",
            self.oauth, self.username, self.channel
        );
        stream.write_all(login.as_bytes()).await?;

        let message = format!("PRIVMSG #{} :{}\r\n", self.channel, text);
        stream.write_all(message.as_bytes()).await?;
        stream.flush().await?;
        stream.shutdown().await?;

        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for TwitchChannel {
    fn name(&self) -> &str {
        "twitch"
    }

    async fn send(&self, text: &str) -> Result<()> {
        match timeout(SEND_TIMEOUT, self.deliver(text)).await {
            Ok(Ok(())) => {
                debug!("Twitch chat delivery to #{} succeeded", self.channel);
                Ok(())
            }
            Ok(Err(e)) => Err(KeeperError::channel("twitch".to_string(), e.to_string())),
            Err(_) => Err(KeeperError::channel(
                "twitch".to_string(),
                format!("send timed out after {:?}", SEND_TIMEOUT),
            )),
        }
    }
}
