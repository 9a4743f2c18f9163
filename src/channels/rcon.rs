use super::NotificationChannel;
use crate::config::RconConfig;
use crate::error::{KeeperError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const BROADCAST_COMMAND: &str = "serverchat";

// Source remote-console packet types
const PACKET_AUTH: i32 = 3;
const PACKET_EXEC: i32 = 2;

/// Broadcasts announcements in-game through each configured server's
/// remote console. Servers are contacted one at a time; a shard that is
/// down does not block delivery to the rest.
pub struct RconChannel {
    servers: Vec<String>,
    password: String,
}

impl RconChannel {
    pub fn new(config: &RconConfig) -> Result<Self> {
        if config.servers.is_empty() {
            return Err(KeeperError::channel("rcon", "no servers configured"));
        }
        if config.password.is_empty() {
            return Err(KeeperError::channel("rcon", "password is not set"));
        }

        Ok(Self {
            servers: config.servers.clone(),
            password: config.password.clone(),
        })
    }

    async fn deliver(&self, addr: &str, text: &str) -> std::io::Result<()> {
        let mut stream = TcpStream::connect(addr).await?;

        stream
            .write_all(&encode_packet(1, PACKET_AUTH, &self.password))
            .await?;
        let auth_id = read_response_id(&mut stream).await?;
        if auth_id == -1 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "remote console rejected the password",
            ));
        }

        let command = format!("{} {}", BROADCAST_COMMAND, text);
        stream
            .write_all(&encode_packet(2, PACKET_EXEC, &command))
            .await?;
        read_response_id(&mut stream).await?;

        stream.shutdown().await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for RconChannel {
    fn name(&self) -> &str {
        "rcon"
    }

    async fn send(&self, text: &str) -> Result<()> {
        let mut delivered = 0usize;

        for addr in &self.servers {
            match timeout(SEND_TIMEOUT, self.deliver(addr, text)).await {
                Ok(Ok(())) => {
                    debug!("Remote console broadcast to {} succeeded", addr);
                    delivered += 1;
                }
                Ok(Err(e)) => warn!("Remote console broadcast to {} failed: {}", addr, e),
                Err(_) => warn!("Remote console broadcast to {} timed out", addr),
            }
        }

        if delivered == 0 {
            return Err(KeeperError::channel(
                "rcon".to_string(),
                "no server accepted the broadcast".to_string(),
            ));
        }

        Ok(())
    }
}

/// Frame one remote-console packet: little-endian size, id and type, the
/// body, and a double null terminator. The size field excludes itself.
fn encode_packet(id: i32, packet_type: i32, body: &str) -> Vec<u8> {
    let size = (4 + 4 + body.len() + 2) as i32;
    let mut packet = Vec::with_capacity(size as usize + 4);
    packet.extend_from_slice(&size.to_le_bytes());
    packet.extend_from_slice(&id.to_le_bytes());
    packet.extend_from_slice(&packet_type.to_le_bytes());
    packet.extend_from_slice(body.as_bytes());
    packet.extend_from_slice(&[0, 0]);
    packet
}

/// Read one response packet, discard the payload, return its id.
async fn read_response_id(stream: &mut TcpStream) -> std::io::Result<i32> {
    let mut size_buf = [0u8; 4];
    stream.read_exact(&mut size_buf).await?;
    let size = i32::from_le_bytes(size_buf).max(0) as usize;

    let mut payload = vec![0u8; size];
    stream.read_exact(&mut payload).await?;

    if payload.len() < 4 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "short remote console response",
        ));
    }
    Ok(i32::from_le_bytes([
        payload[0], payload[1], payload[2], payload[3],
    ]))
}
