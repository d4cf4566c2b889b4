use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Tunables for the client core. Every field has a working default; config
/// files only need to name what they change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// First local port probed for the display backend.
    pub display_port_start: u16,
    /// End of the probed range (exclusive).
    pub display_port_end: u16,
    /// External router port mapped to the display port.
    pub nat_external_port: u16,
    /// NAT mapping lease, in seconds.
    pub nat_lease_secs: u64,
    /// Receive buffer per chat peer, in bytes.
    pub chat_recv_buffer: usize,
    /// Outbound messages queued per chat peer before drops.
    pub chat_peer_queue: usize,
    /// Timeout for the post-bind dial probe, in seconds.
    pub bind_probe_timeout_secs: u64,
    /// Broker address an embedding shell should offer by default.
    pub default_server: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            display_port_start: 5900,
            display_port_end: 65534,
            nat_external_port: 9932,
            nat_lease_secs: 3600,
            chat_recv_buffer: 16 * 1024,
            chat_peer_queue: 32,
            bind_probe_timeout_secs: 3,
            default_server: None,
        }
    }
}

impl ClientConfig {
    /// Load from the default config locations, falling back to defaults.
    ///
    /// Lookup order: `$XDG_CONFIG_HOME/desklink/config.toml`, then
    /// `~/.desklink.toml`. A missing or unparseable file is never fatal.
    pub fn load_default() -> Self {
        let paths = [
            dirs::config_dir().map(|p| p.join("desklink").join("config.toml")),
            dirs::home_dir().map(|p| p.join(".desklink.toml")),
        ];

        let mut config = Self::default();
        for path in paths.into_iter().flatten() {
            if path.exists() {
                debug!("loading config from {:?}", path);
                if let Some(loaded) = Self::load_from_file(&path) {
                    config = loaded;
                    break;
                }
            }
        }

        if config.default_server.is_none() {
            if let Ok(server) = std::env::var("DESKLINK_SERVER") {
                if !server.is_empty() {
                    config.default_server = Some(server);
                }
            }
        }

        config
    }

    /// Load from a specific TOML file. Returns `None` on read or parse
    /// failure, after logging it.
    pub fn load_from_file(path: &PathBuf) -> Option<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!("failed to read config file {:?}: {}", path, e);
                return None;
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("failed to parse config file {:?}: {}", path, e);
                None
            }
        }
    }

    pub const fn nat_lease(&self) -> Duration {
        Duration::from_secs(self.nat_lease_secs)
    }

    pub const fn bind_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.bind_probe_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_wire_constants() {
        let config = ClientConfig::default();
        assert_eq!(config.display_port_start, 5900);
        assert_eq!(config.nat_external_port, 9932);
        assert_eq!(config.nat_lease_secs, 3600);
        assert_eq!(config.chat_recv_buffer, 16 * 1024);
        assert_eq!(config.bind_probe_timeout_secs, 3);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
nat_external_port = 10000
default_server = "broker.example.net:9934"
"#,
        )
        .unwrap();
        assert_eq!(config.nat_external_port, 10000);
        assert_eq!(
            config.default_server.as_deref(),
            Some("broker.example.net:9934")
        );
        assert_eq!(config.display_port_start, 5900);
    }

    #[test]
    fn garbage_file_is_rejected() {
        let result: std::result::Result<ClientConfig, _> = toml::from_str("display_port_start = \"not a port\"");
        assert!(result.is_err());
    }
}
