//! Relay configuration, loaded from environment variables.
//!
//! Every knob has a default, so an empty environment yields a working relay
//! on ports 3000 (HTTP and broker) and 12345 (direct TCP).

use std::time::Duration;

use peer::ChannelOptions;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_LAN_PORT: u16 = 12345;
const DEFAULT_LAN_ROOM: &str = "LAN";
const DEFAULT_HOST_NAME: &str = "Host";
const DEFAULT_OUTBOUND_BUFFER: usize = 256;
const DEFAULT_ROOM_QUEUE: usize = 1024;
const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be a valid room code, got {value:?}")]
    InvalidRoom { key: &'static str, value: String },
    #[error("{key} must be a non-empty display name without ':' or ','")]
    InvalidName { key: &'static str },
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    pub lan_port: u16,
    pub lan_enabled: bool,
    pub lan_room: String,
    pub host_name: String,
    pub host_console: bool,
    pub outbound_buffer: usize,
    pub room_queue: usize,
    pub handshake_timeout: Duration,
    pub write_timeout: Duration,
    pub max_line_bytes: usize,
    pub replay_on_join: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            lan_port: DEFAULT_LAN_PORT,
            lan_enabled: true,
            lan_room: DEFAULT_LAN_ROOM.to_owned(),
            host_name: DEFAULT_HOST_NAME.to_owned(),
            host_console: false,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            room_queue: DEFAULT_ROOM_QUEUE,
            handshake_timeout: Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            replay_on_join: false,
        }
    }
}

impl RelayConfig {
    /// Read the relay configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `LAN_ROOM` or `HOST_NAME` is unusable.
    /// Unparseable numeric or boolean values fall back to their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            port: env_parse("PORT", DEFAULT_PORT),
            lan_port: env_parse("LAN_PORT", DEFAULT_LAN_PORT),
            lan_enabled: env_parse("LAN_ENABLED", true),
            lan_room: env_string("LAN_ROOM", DEFAULT_LAN_ROOM),
            host_name: env_string("HOST_NAME", DEFAULT_HOST_NAME),
            host_console: env_parse("HOST_CONSOLE", false),
            outbound_buffer: env_parse("OUTBOUND_BUFFER", DEFAULT_OUTBOUND_BUFFER).max(1),
            room_queue: env_parse("ROOM_QUEUE", DEFAULT_ROOM_QUEUE).max(1),
            handshake_timeout: Duration::from_millis(env_parse("HANDSHAKE_TIMEOUT_MS", DEFAULT_HANDSHAKE_TIMEOUT_MS)),
            write_timeout: Duration::from_millis(env_parse("WRITE_TIMEOUT_MS", DEFAULT_WRITE_TIMEOUT_MS)),
            max_line_bytes: env_parse("MAX_LINE_BYTES", DEFAULT_MAX_LINE_BYTES).max(64),
            replay_on_join: env_parse("REPLAY_ON_JOIN", false),
        };
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// See [`RelayConfig::from_env`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !frames::is_valid_room_code(&self.lan_room) {
            return Err(ConfigError::InvalidRoom { key: "LAN_ROOM", value: self.lan_room.clone() });
        }
        if self.host_name.is_empty() || actions::sanitize(&self.host_name) != self.host_name {
            return Err(ConfigError::InvalidName { key: "HOST_NAME" });
        }
        Ok(())
    }

    #[must_use]
    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            outbound_capacity: self.outbound_buffer,
            inbound_capacity: self.outbound_buffer,
            write_timeout: self.write_timeout,
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port, 3000);
        assert_eq!(config.lan_port, 12345);
        assert_eq!(config.lan_room, "LAN");
        assert!(!config.replay_on_join);
    }

    #[test]
    fn env_parse_falls_back_on_missing_or_garbage() {
        assert_eq!(env_parse("RELAY_TEST_UNSET_VARIABLE_1", 7_u16), 7);
    }

    #[test]
    fn invalid_lan_room_is_rejected() {
        let config = RelayConfig { lan_room: "two words".into(), ..RelayConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRoom { .. })));
    }

    #[test]
    fn host_name_with_separators_is_rejected() {
        let config = RelayConfig { host_name: "Ho,st".into(), ..RelayConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidName { .. })));
    }

    #[test]
    fn channel_options_follow_buffers_and_timeouts() {
        let config = RelayConfig {
            outbound_buffer: 8,
            write_timeout: Duration::from_millis(250),
            ..RelayConfig::default()
        };
        let opts = config.channel_options();
        assert_eq!(opts.outbound_capacity, 8);
        assert_eq!(opts.write_timeout, Duration::from_millis(250));
    }
}
