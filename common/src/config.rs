// common/src/config.rs
use config::{Config as ConfigFile, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Central configuration shared by every tab runtime
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub sync: SyncConfig,
    pub session: SessionConfig,
    pub retry: RetryDefaults,
    pub token: TokenConfig,
    pub wallet: WalletConfig,
    pub lockout: LockoutConfig,
    pub storage: StorageConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Broadcast topic shared by all tabs
    pub channel_name: String,
    pub debounce_ms: u64,
    /// Messages buffered per listener before it starts lagging
    pub bus_capacity: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub duration_secs: u64,
    pub check_interval_secs: u64,
    /// Fraction of the session lifetime below which a poll refreshes proactively
    pub refresh_threshold: f64,
    /// Recorded activity restarts the session clock instead of only bumping `last_activity`
    pub refresh_on_activity: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryDefaults {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub timeout_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub refresh_interval_secs: u64,
    pub expiry_threshold_secs: u64,
    pub refresh_timeout_ms: u64,
    pub decode_timeout_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub supported_chain_ids: Vec<u64>,
    pub expected_chain_id: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutConfig {
    pub max_failed_attempts: u32,
    pub block_duration_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub key_prefix: String,
    pub auth_ttl_secs: u64,
    pub wallet_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            sync: SyncConfig::default(),
            session: SessionConfig::default(),
            retry: RetryDefaults::default(),
            token: TokenConfig::default(),
            wallet: WalletConfig::default(),
            lockout: LockoutConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            channel_name: "tokenforge_auth_sync".to_string(),
            debounce_ms: 100,
            bus_capacity: 64,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_secs: 24 * 60 * 60,
            check_interval_secs: 60,
            refresh_threshold: 0.25,
            refresh_on_activity: true,
        }
    }
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 5000,
            timeout_ms: 10_000,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 45 * 60,
            expiry_threshold_secs: 5 * 60,
            refresh_timeout_ms: 10_000,
            decode_timeout_ms: 5_000,
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            supported_chain_ids: vec![1],
            expected_chain_id: 1,
        }
    }
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 3,
            block_duration_secs: 15 * 60,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            key_prefix: "tokenforge_".to_string(),
            auth_ttl_secs: 24 * 60 * 60,
            wallet_ttl_secs: 60 * 60,
        }
    }
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Longest span any setting may configure; keeps deadline arithmetic on `DateTime` in range
pub const MAX_SPAN_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Configured seconds as a chrono span, capped at [`MAX_SPAN_SECS`]
pub fn span_secs(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(MAX_SPAN_SECS) as i64)
}

impl SessionConfig {
    pub fn duration(&self) -> chrono::Duration {
        span_secs(self.duration_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Remaining lifetime under which a poll extends the session
    pub fn refresh_window(&self) -> chrono::Duration {
        let ratio = self.refresh_threshold.clamp(0.0, 1.0);
        let millis = (self.duration().num_milliseconds() as f64 * ratio) as i64;
        chrono::Duration::milliseconds(millis)
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        // Get the run mode, defaulting to "development"
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        // Locate the config directory
        let config_dir = env::var("CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                // Check if we're in the project root or a subcrate
                let mut path = PathBuf::from("./config");
                if !path.exists() {
                    path = PathBuf::from("../config");
                }
                path
            });

        tracing::info!("Loading configuration from {}", config_dir.display());
        tracing::info!("Using run mode: {}", run_mode);

        let config = ConfigFile::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", run_mode))).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // Environment variables with prefix "APP", e.g. APP__SYNC__DEBOUNCE_MS
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Load from files, falling back to individual environment variables
    pub fn from_env() -> Self {
        match Self::load() {
            Ok(config) => {
                tracing::info!("Configuration loaded from files and environment");
                config
            }
            Err(e) => {
                tracing::warn!("Failed to load configuration from files: {}", e);
                tracing::info!("Falling back to environment variables only");

                let mut config = Self::default();

                if let Ok(level) = env::var("LOG_LEVEL") {
                    config.log_level = level;
                }
                if let Ok(channel) = env::var("SYNC_CHANNEL") {
                    config.sync.channel_name = channel;
                }
                if let Some(debounce) = env_parse::<u64>("SYNC_DEBOUNCE_MS") {
                    config.sync.debounce_ms = debounce;
                }
                if let Some(duration) = env_parse::<u64>("SESSION_DURATION_SECS") {
                    config.session.duration_secs = duration;
                }
                if let Some(interval) = env_parse::<u64>("SESSION_CHECK_INTERVAL_SECS") {
                    config.session.check_interval_secs = interval;
                }
                if let Some(attempts) = env_parse::<u32>("RETRY_MAX_ATTEMPTS") {
                    config.retry.max_attempts = attempts;
                }
                if let Some(timeout) = env_parse::<u64>("RETRY_TIMEOUT_MS") {
                    config.retry.timeout_ms = timeout;
                }

                config
            }
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_product_constants() {
        let config = Config::default();
        assert_eq!(config.sync.debounce(), Duration::from_millis(100));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.lockout.block_duration_secs, 900);
        assert_eq!(config.session.refresh_window(), chrono::Duration::hours(6));
    }

    #[test]
    fn oversized_spans_are_capped() {
        let session = SessionConfig {
            duration_secs: u64::MAX,
            refresh_threshold: f64::NAN,
            ..SessionConfig::default()
        };
        assert_eq!(session.duration(), chrono::Duration::seconds(MAX_SPAN_SECS as i64));
        assert_eq!(session.refresh_window(), chrono::Duration::zero());
        assert_eq!(span_secs(90), chrono::Duration::seconds(90));

        let deadline = chrono::Utc::now() + session.duration();
        assert!(deadline > chrono::Utc::now());
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let parsed: Config = ConfigFile::builder()
            .add_source(config::File::from_str(
                "[sync]\ndebounce_ms = 25\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(parsed.sync.debounce_ms, 25);
        assert_eq!(parsed.sync.channel_name, "tokenforge_auth_sync");
        assert_eq!(parsed.token.refresh_interval_secs, 2700);
    }
}
