//! Transport configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use peerlane_protocol::{
    Channel, ChannelConfig, DEFAULT_MTU, MAX_CLIENTS, ServerMode,
};
use serde::{Deserialize, Serialize};

/// Errors that can occur while loading a [`TransportConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Everything a [`PeerTransport`](crate::PeerTransport) needs to know up
/// front.
///
/// Missing fields take their defaults, so `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Channels the host framework uses, with their MTU hints.
    pub channels: Vec<ChannelConfig>,

    /// Where the client connects: an IP address, `localhost`, or the
    /// host's identity token for relay connections.
    pub client_address: String,

    /// Address the dedicated server binds. Empty binds every interface.
    pub server_bind_address: String,

    pub port: u16,

    /// Remote peers the server admits at once. The client host is not
    /// counted.
    pub max_clients: u32,

    pub client_timeout_secs: u64,

    pub server_timeout_secs: u64,

    pub server_mode: ServerMode,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            client_address: "127.0.0.1".to_string(),
            server_bind_address: String::new(),
            port: 27015,
            max_clients: 4095,
            client_timeout_secs: 15,
            server_timeout_secs: 25,
            server_mode: ServerMode::PeerRelay,
        }
    }
}

fn default_channels() -> Vec<ChannelConfig> {
    vec![
        ChannelConfig::new(Channel::RELIABLE),
        ChannelConfig::new(Channel::UNRELIABLE),
    ]
}

impl TransportConfig {
    /// Parses a JSON config. The result is not validated yet.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| {
            ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::from_json_str(&text)
    }

    /// Fixes values the transport cannot use, logging each fix.
    pub fn validated(mut self) -> Self {
        if self.max_clients > MAX_CLIENTS {
            tracing::warn!(
                max_clients = self.max_clients,
                limit = MAX_CLIENTS,
                "max_clients too large, clamping"
            );
            self.max_clients = MAX_CLIENTS;
        }
        if self.channels.is_empty() {
            tracing::warn!("no channels configured, using reliable and unreliable");
            self.channels = default_channels();
        }
        for config in &mut self.channels {
            if config.mtu == 0 {
                tracing::warn!(channel = %config.channel, "zero MTU, using default");
                config.mtu = DEFAULT_MTU;
            }
        }
        self
    }

    /// MTU hint for `channel`. Unknown channels get the default.
    pub fn mtu(&self, channel: Channel) -> usize {
        self.channels
            .iter()
            .find(|config| config.channel == channel)
            .map_or(DEFAULT_MTU, |config| config.mtu)
    }

    /// Largest configured MTU.
    pub fn max_mtu(&self) -> usize {
        self.channels
            .iter()
            .map(|config| config.mtu)
            .max()
            .unwrap_or(DEFAULT_MTU)
    }

    /// Seconds a connection may stay silent before the host framework
    /// should drop it.
    pub fn timeout(&self, server: bool) -> Duration {
        let secs = if server {
            self.server_timeout_secs
        } else {
            self.client_timeout_secs
        };
        Duration::from_secs(secs)
    }
}
