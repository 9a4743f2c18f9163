use crate::channels::NotificationChannel;
use crate::config::MessagesConfig;
use tracing::{info, warn};

const VERSION_TOKEN: &str = "@version";
const ANNOUNCE_BEFORE_TOKEN: &str = "@announcebefore";
const HOURS_TOKEN: &str = "@hours";

/// Renders announcement templates and fans them out to every enabled
/// channel. Rendering happens once per announcement; each channel's send is
/// awaited and isolated so one failing adapter never blocks the rest.
pub struct Announcer {
    channels: Vec<Box<dyn NotificationChannel>>,
    messages: MessagesConfig,
    lead_minutes: u64,
    restart_hours: u64,
}

impl Announcer {
    pub fn new(
        channels: Vec<Box<dyn NotificationChannel>>,
        messages: MessagesConfig,
        lead_minutes: u64,
        restart_hours: u64,
    ) -> Self {
        Self {
            channels,
            messages,
            lead_minutes,
            restart_hours,
        }
    }

    /// "update pending" warning, substituting the new build label and the
    /// lead-time wording.
    pub async fn announce_update_pending(&self, version: &str) -> usize {
        let text = self
            .messages
            .update_pending
            .replace(VERSION_TOKEN, version)
            .replace(ANNOUNCE_BEFORE_TOKEN, &minutes_wording(self.lead_minutes));
        self.broadcast(&text).await
    }

    /// "maintenance restart pending" warning.
    pub async fn announce_maintenance_pending(&self) -> usize {
        let text = self
            .messages
            .maintenance_pending
            .replace(HOURS_TOKEN, &self.restart_hours.to_string())
            .replace(ANNOUNCE_BEFORE_TOKEN, &minutes_wording(self.lead_minutes));
        self.broadcast(&text).await
    }

    /// "server is back" notice, sent at the end of a sequence.
    pub async fn announce_restarted(&self) -> usize {
        self.broadcast(&self.messages.restart_complete).await
    }

    /// Dispatch one rendered message to every channel. Returns how many
    /// deliveries succeeded.
    async fn broadcast(&self, text: &str) -> usize {
        info!("Announcing: {}", text);

        let mut delivered = 0usize;
        for channel in &self.channels {
            match channel.send(text).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Announcement via '{}' failed: {}", channel.name(), e),
            }
        }
        delivered
    }
}

/// Lead-time wording: "1 Minute" for exactly one, "N Minutes" otherwise.
fn minutes_wording(minutes: u64) -> String {
    if minutes == 1 {
        "1 Minute".to_string()
    } else {
        format!("{} Minutes", minutes)
    }
}
