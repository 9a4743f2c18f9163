pub mod announce;
pub mod channels;
pub mod config;
pub mod error;
pub mod process;
pub mod updater;
pub mod version;

pub use announce::Announcer;
pub use channels::{build_channels, DiscordChannel, NotificationChannel, RconChannel, TwitchChannel};
pub use config::KeeperConfig;
pub use error::{KeeperError, Result};
pub use process::{GameProcessController, ProcessController, StartOutcome, StopOutcome};
pub use updater::{
    Keeper, LifecycleCell, ProcessWatchdog, RestartReason, ServerLifecycleState, ShutdownReason,
    UpdateOrchestrator, WatchdogGate,
};
pub use version::{SteamVersionSource, UpdateCheck, VersionSource};
