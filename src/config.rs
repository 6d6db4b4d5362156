// src/config.rs
//
// Client configuration, read from the environment (and `.env`)

use crate::download::SinkStrategy;
use crate::token::PollSettings;
use crate::upload::UploadMode;
use anyhow::{anyhow, Result};
use log::warn;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Upload chunk size, matching the relay's own read size
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Configuration shared by the sending and receiving flows
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the relay (scheme, host, optional port and path prefix)
    pub relay_url: String,

    /// Peer readiness polling
    pub poll: PollSettings,

    /// How long a success status stays up before the session resets
    pub success_display: Duration,

    /// How long a failure status stays up before the session resets
    pub failure_display: Duration,

    /// Timeout for token and status requests, also used as connect timeout
    pub request_timeout: Duration,

    /// Timeout for a whole upload or download; `None` waits forever
    pub transfer_timeout: Option<Duration>,

    /// Read size for file-backed upload sources
    pub chunk_size: usize,

    pub upload_mode: UploadMode,

    pub sink: SinkStrategy,

    /// Where downloads are written
    pub download_dir: PathBuf,

    /// Where buffered downloads are saved when `download_dir` is unusable
    pub fallback_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "http://localhost:3000".to_string(),
            poll: PollSettings::default(),
            success_display: Duration::from_secs(3),
            failure_display: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            transfer_timeout: Some(Duration::from_secs(3600)), // relay keeps tokens for an hour
            chunk_size: DEFAULT_CHUNK_SIZE,
            upload_mode: UploadMode::Auto,
            sink: SinkStrategy::Auto,
            download_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
            fallback_dir: env::temp_dir(),
        }
    }
}

impl ClientConfig {
    /// Build a configuration from `IOLINK_*` environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            relay_url: env::var("IOLINK_RELAY_URL").unwrap_or(defaults.relay_url),
            poll: PollSettings {
                poll_interval: env_millis("IOLINK_POLL_INTERVAL_MS")
                    .unwrap_or(defaults.poll.poll_interval),
                max_attempts: env_parse("IOLINK_MAX_POLL_ATTEMPTS")
                    .unwrap_or(defaults.poll.max_attempts),
                stabilization_delay: env_millis("IOLINK_STABILIZATION_DELAY_MS")
                    .unwrap_or(defaults.poll.stabilization_delay),
            },
            success_display: env_secs("IOLINK_SUCCESS_DISPLAY_SECS")
                .unwrap_or(defaults.success_display),
            failure_display: env_secs("IOLINK_FAILURE_DISPLAY_SECS")
                .unwrap_or(defaults.failure_display),
            request_timeout: env_secs("IOLINK_REQUEST_TIMEOUT_SECS")
                .unwrap_or(defaults.request_timeout),
            transfer_timeout: match env_parse::<u64>("IOLINK_TRANSFER_TIMEOUT_SECS") {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.transfer_timeout,
            },
            chunk_size: env_parse("IOLINK_CHUNK_SIZE").unwrap_or(defaults.chunk_size),
            upload_mode: env_parse("IOLINK_UPLOAD_MODE").unwrap_or(defaults.upload_mode),
            sink: env_parse("IOLINK_SINK").unwrap_or(defaults.sink),
            download_dir: env::var("IOLINK_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.download_dir),
            fallback_dir: defaults.fallback_dir,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the flows cannot work with
    pub fn validate(&self) -> Result<()> {
        if !(self.relay_url.starts_with("http://") || self.relay_url.starts_with("https://")) {
            return Err(anyhow!(
                "Relay URL must start with http:// or https://, got {:?}",
                self.relay_url
            ));
        }
        if self.poll.max_attempts == 0 {
            return Err(anyhow!("Maximum poll attempts must be at least 1"));
        }
        if self.chunk_size == 0 {
            return Err(anyhow!("Chunk size must be greater than zero"));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let value = env::var(key).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("Ignoring invalid {}={:?}, using the default", key, value);
            None
        }
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse(key).map(Duration::from_millis)
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse(key).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.poll.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.poll.max_attempts, 120);
        assert_eq!(config.poll.stabilization_delay, Duration::from_millis(1000));
        assert_eq!(config.success_display, Duration::from_secs(3));
        assert_eq!(config.failure_display, Duration::from_secs(5));
        assert_eq!(config.chunk_size, 64 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let config = ClientConfig {
            relay_url: "relay.example.com".to_string(),
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.poll.max_attempts = 0;
        assert!(config.validate().is_err());

        let config = ClientConfig {
            chunk_size: 0,
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_env_overrides() {
        // Only this test touches these variables
        env::set_var("IOLINK_POLL_INTERVAL_MS", "250");
        env::set_var("IOLINK_TRANSFER_TIMEOUT_SECS", "0");
        env::set_var("IOLINK_UPLOAD_MODE", "multipart");
        env::set_var("IOLINK_MAX_POLL_ATTEMPTS", "not-a-number");

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.poll.poll_interval, Duration::from_millis(250));
        assert_eq!(config.transfer_timeout, None);
        assert_eq!(config.upload_mode, UploadMode::Multipart);
        assert_eq!(config.poll.max_attempts, 120);

        env::remove_var("IOLINK_POLL_INTERVAL_MS");
        env::remove_var("IOLINK_TRANSFER_TIMEOUT_SECS");
        env::remove_var("IOLINK_UPLOAD_MODE");
        env::remove_var("IOLINK_MAX_POLL_ATTEMPTS");
    }
}
