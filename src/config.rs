//! Application-level configuration loading: vote retry policy, fan-out sizing, identity
//! derivation and reconciliation cadence.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "LIVE_POLL_BACK_CONFIG_PATH";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    pub vote_retry: VoteRetryConfig,
    pub fanout: FanoutConfig,
    pub identity: IdentityConfig,
    pub reconciler: ReconcilerConfig,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Bounded backoff applied to storage calls on the vote path.
pub struct VoteRetryConfig {
    /// Total attempts per storage step, the first one included.
    pub max_attempts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "initial_delay_ms")]
    pub initial_delay: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "max_delay_ms")]
    pub max_delay: Duration,
}

impl Default for VoteRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Sizing of the per-poll broadcast topics and live streams.
pub struct FanoutConfig {
    /// Buffered snapshots per topic before slow subscribers start skipping.
    pub channel_capacity: usize,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "keep_alive_secs")]
    pub keep_alive: Duration,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            keep_alive: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// How voter identities are derived from requests.
pub struct IdentityConfig {
    /// Honour `X-Forwarded-For` / `X-Real-IP` set by a reverse proxy.
    pub trust_proxy_headers: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            trust_proxy_headers: true,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Cadence of the background task that finishes pending ledger entries.
pub struct ReconcilerConfig {
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "interval_secs")]
    pub interval: Duration,
    /// Minimum age of a pending entry before the reconciler touches it. The live vote path
    /// stops retrying well before this age.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "grace_secs")]
    pub grace: Duration,
    pub batch_size: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            grace: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        retry_attempts = app_config.vote_retry.max_attempts,
                        channel_capacity = app_config.fanout.channel_capacity,
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON document; absent sections and fields keep their defaults.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        let mut config: Self = serde_json::from_str(contents)?;
        config.vote_retry.max_attempts = config.vote_retry.max_attempts.max(1);
        config.fanout.channel_capacity = config.fanout.channel_capacity.max(1);
        config.reconciler.batch_size = config.reconciler.batch_size.max(1);
        Ok(config)
    }

    /// Hard deadline of the live vote path, storage calls included. Past it the vote is left
    /// to the reconciler.
    pub fn live_retry_deadline(&self) -> Duration {
        self.reconciler.grace / 2
    }

    /// Minimum age of a tallied ledger entry before its tally receipt may be dropped. Any
    /// increment for the vote, live or replayed, has been abandoned long before.
    pub fn receipt_release_horizon(&self) -> Duration {
        self.reconciler.grace * 2
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config.vote_retry.max_attempts, 5);
        assert_eq!(config.fanout.keep_alive, Duration::from_secs(15));
        assert!(config.identity.trust_proxy_headers);
        assert_eq!(config.live_retry_deadline(), Duration::from_secs(30));
        assert_eq!(config.receipt_release_horizon(), Duration::from_secs(120));
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = AppConfig::from_json(
            r#"{"vote_retry": {"initial_delay_ms": 10}, "identity": {"trust_proxy_headers": false}}"#,
        )
        .unwrap();
        assert_eq!(config.vote_retry.initial_delay, Duration::from_millis(10));
        assert_eq!(config.vote_retry.max_delay, Duration::from_secs(1));
        assert!(!config.identity.trust_proxy_headers);
    }

    #[test]
    fn zero_sizes_are_clamped() {
        let config = AppConfig::from_json(
            r#"{"vote_retry": {"max_attempts": 0}, "fanout": {"channel_capacity": 0}}"#,
        )
        .unwrap();
        assert_eq!(config.vote_retry.max_attempts, 1);
        assert_eq!(config.fanout.channel_capacity, 1);
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(AppConfig::from_json(r#"{"fanout": {"keep_alive_secs": "soon"}}"#).is_err());
    }
}
