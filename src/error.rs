use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeeperError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),

    #[error("Process control error: {message}")]
    Process { message: String },

    #[error("Server did not exit within the {grace_secs}s grace period")]
    StopTimeout { grace_secs: u64 },

    #[error("Server process did not come up after launch")]
    StartFailed,

    #[error("Version source error: {message}")]
    Version { message: String },

    #[error("Channel '{channel}' error: {message}")]
    Channel { channel: String, message: String },
}

impl KeeperError {
    pub fn process<S: Into<String>>(message: S) -> Self {
        Self::Process {
            message: message.into(),
        }
    }

    pub fn version<S: Into<String>>(message: S) -> Self {
        Self::Version {
            message: message.into(),
        }
    }

    pub fn channel<S: Into<String>>(channel: S, message: S) -> Self {
        Self::Channel {
            channel: channel.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, KeeperError>;
