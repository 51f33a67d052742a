//! `key=value` configuration files shared by the relay and the bundled client.
//!
//! Recognised keys (case-insensitive): `ServerIp`, `ServerPort`, `UdpPort`.
//! Anything that does not parse is skipped and the default stays in effect.

use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::Path,
};

use tracing::{debug, info, warn};

use crate::error::ConfigParseError;

pub const DEFAULT_SERVER_CONFIG: &str = "server_config.txt";
pub const DEFAULT_CLIENT_CONFIG: &str = "client_config.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// Bind address on the relay, connect address on the client.
    pub server_ip: IpAddr,
    pub stream_port: u16,
    pub datagram_port: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            stream_port: 9000,
            datagram_port: 9001,
        }
    }
}

impl RelayConfig {
    pub fn stream_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server_ip, self.stream_port)
    }

    pub fn datagram_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server_ip, self.datagram_port)
    }

    /// Parses configuration text on top of the defaults, returning the lines
    /// that were skipped.
    pub fn parse(text: &str) -> (Self, Vec<ConfigParseError>) {
        let mut config = Self::default();
        let mut skipped = Vec::new();

        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            if raw.trim().is_empty() {
                continue;
            }

            let parts: Vec<&str> = raw.split('=').collect();
            let [key, value] = parts.as_slice() else {
                skipped.push(ConfigParseError::Malformed { line });
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            if let Err(error) = config.apply(line, key, value) {
                skipped.push(error);
            }
        }

        (config, skipped)
    }

    fn apply(&mut self, line: usize, key: &str, value: &str) -> Result<(), ConfigParseError> {
        let invalid = || ConfigParseError::InvalidValue {
            line,
            key: key.to_string(),
            value: value.to_string(),
        };

        match key.to_ascii_lowercase().as_str() {
            "serverip" => self.server_ip = value.parse().map_err(|_| invalid())?,
            "serverport" => self.stream_port = value.parse().map_err(|_| invalid())?,
            "udpport" => self.datagram_port = value.parse().map_err(|_| invalid())?,
            _ => debug!(line, key, "ignoring unknown configuration key"),
        }
        Ok(())
    }

    /// Loads `path`, falling back to defaults when it is missing or unreadable.
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "configuration file not found; using defaults");
                return Self::default();
            }
            Err(error) => {
                warn!(path = %path.display(), ?error, "failed to read configuration; using defaults");
                return Self::default();
            }
        };

        let (config, skipped) = Self::parse(&text);
        for error in &skipped {
            warn!(path = %path.display(), %error, "ignoring configuration line");
        }
        info!(path = %path.display(), ?config, "configuration loaded");
        config
    }
}
