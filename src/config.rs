use crate::staleness::UnreachablePolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Mainnet block time.
pub const BLOCK_DELAY_SECS: u64 = 30;

/// Top-level configuration loaded from lotus-health.toml.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub chain: ChainConfig,
    pub watchdog: WatchdogConfig,
    pub recovery: RecoveryConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Explicit JSON-RPC URL. Takes precedence over `FULLNODE_API_INFO` and the repo.
    pub api_url: Option<String>,
    pub api_token: Option<String>,
    /// Lotus repo holding the `api` and `token` files.
    pub repo: PathBuf,
    pub block_delay_secs: u64,
    /// Per-attempt timeout. Defaults to one block delay.
    pub api_timeout_secs: Option<u64>,
    /// Additional attempts after the first one fails.
    pub api_retries: u32,
    pub retry_backoff_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Unchanged observations before the head counts as stale.
    pub threshold: u32,
    /// Seconds between observations. Defaults to one block delay.
    pub interval_secs: Option<u64>,
    pub unreachable_policy: UnreachablePolicy,
    /// Hold off monitoring until the node has caught up with the network.
    pub wait_for_sync: bool,
    pub sync_poll_secs: u64,
    /// Give up waiting for sync after this long. Defaults to `threshold` intervals.
    pub sync_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub managed_unit: String,
    pub command: String,
    pub args: Vec<String>,
    pub restart_timeout_secs: u64,
}

// --- Default implementations ---

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_token: None,
            repo: PathBuf::from("~/.lotus"),
            block_delay_secs: BLOCK_DELAY_SECS,
            api_timeout_secs: None,
            api_retries: 8,
            retry_backoff_secs: 0,
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            interval_secs: None,
            unreachable_policy: UnreachablePolicy::Skip,
            wait_for_sync: true,
            sync_poll_secs: 3,
            sync_timeout_secs: None,
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            managed_unit: "lotus-daemon.service".to_string(),
            command: "systemctl".to_string(),
            args: vec![
                "try-restart".to_string(),
                "--job-mode=fail".to_string(),
                "{unit}".to_string(),
            ],
            restart_timeout_secs: 60,
        }
    }
}

/// Invalid or unreadable configuration. Fatal before monitoring starts.
#[derive(Debug)]
pub enum ConfigError {
    Read { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, source: toml::de::Error },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl HealthConfig {
    /// Load from `path`. A missing file yields defaults unless `required`.
    pub fn load(path: &Path, required: bool) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        Self::parse(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(
            self.watchdog
                .interval_secs
                .unwrap_or(self.chain.block_delay_secs),
        )
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(
            self.chain
                .api_timeout_secs
                .unwrap_or(self.chain.block_delay_secs),
        )
    }

    pub fn block_delay(&self) -> Duration {
        Duration::from_secs(self.chain.block_delay_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.chain.retry_backoff_secs)
    }

    pub fn restart_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery.restart_timeout_secs)
    }

    pub fn sync_poll(&self) -> Duration {
        Duration::from_secs(self.watchdog.sync_poll_secs)
    }

    pub fn sync_timeout(&self) -> Duration {
        match self.watchdog.sync_timeout_secs {
            Some(secs) => Duration::from_secs(secs),
            None => self.interval().saturating_mul(self.watchdog.threshold),
        }
    }

    /// Reject values the watchdog cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.watchdog.threshold == 0 {
            return invalid("threshold must be at least 1");
        }
        if self.chain.block_delay_secs == 0 {
            return invalid("block_delay_secs must be greater than 0");
        }
        if self.interval().is_zero() {
            return invalid("interval must be greater than 0");
        }
        if self.api_timeout().is_zero() {
            return invalid("api-timeout must be greater than 0");
        }
        if self.restart_timeout().is_zero() {
            return invalid("restart_timeout_secs must be greater than 0");
        }
        if self.watchdog.wait_for_sync && self.sync_poll().is_zero() {
            return invalid("sync_poll_secs must be greater than 0");
        }
        if self.watchdog.wait_for_sync && self.sync_timeout().is_zero() {
            return invalid("sync_timeout_secs must be greater than 0");
        }
        if self.recovery.managed_unit.trim().is_empty() {
            return invalid("managed-unit must not be empty");
        }
        if self.recovery.command.trim().is_empty() {
            return invalid("recovery command must not be empty");
        }
        if let Some(url) = &self.chain.api_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "api-url must be an http(s) URL, got '{url}'"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let cfg = HealthConfig::default();
        assert_eq!(cfg.watchdog.threshold, 3);
        assert_eq!(cfg.chain.api_retries, 8);
        assert_eq!(cfg.recovery.managed_unit, "lotus-daemon.service");
        assert_eq!(cfg.interval(), Duration::from_secs(BLOCK_DELAY_SECS));
        assert_eq!(cfg.api_timeout(), Duration::from_secs(BLOCK_DELAY_SECS));
        assert_eq!(cfg.watchdog.unreachable_policy, UnreachablePolicy::Skip);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_sync_timeout_defaults_to_threshold_intervals() {
        let cfg = HealthConfig::default();
        assert_eq!(cfg.sync_timeout(), Duration::from_secs(3 * BLOCK_DELAY_SECS));

        let cfg = HealthConfig::parse("[watchdog]\nthreshold = 5\ninterval_secs = 10\n").unwrap();
        assert_eq!(cfg.sync_timeout(), Duration::from_secs(50));

        let cfg = HealthConfig::parse("[watchdog]\nsync_timeout_secs = 600\n").unwrap();
        assert_eq!(cfg.sync_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_validate_rejects_zero_sync_timeout() {
        let mut cfg = HealthConfig::default();
        cfg.watchdog.sync_timeout_secs = Some(0);
        assert!(cfg.validate().is_err());
        cfg.watchdog.wait_for_sync = false;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_interval_follows_block_delay() {
        let cfg = HealthConfig::parse("[chain]\nblock_delay_secs = 6\n").unwrap();
        assert_eq!(cfg.interval(), Duration::from_secs(6));
        assert_eq!(cfg.api_timeout(), Duration::from_secs(6));
    }

    #[test]
    fn test_parse_partial_file() {
        let cfg = HealthConfig::parse(
            r#"
[watchdog]
threshold = 5
interval_secs = 10
unreachable_policy = "count-as-stale"

[recovery]
managed_unit = "lotus-miner.service"
"#,
        )
        .unwrap();
        assert_eq!(cfg.watchdog.threshold, 5);
        assert_eq!(cfg.interval(), Duration::from_secs(10));
        assert_eq!(
            cfg.watchdog.unreachable_policy,
            UnreachablePolicy::CountAsStale
        );
        assert_eq!(cfg.recovery.managed_unit, "lotus-miner.service");
        // Untouched sections keep their defaults.
        assert_eq!(cfg.recovery.command, "systemctl");
        assert_eq!(cfg.chain.api_retries, 8);
    }

    #[test]
    fn test_load_missing_optional_file() {
        let dir = tempdir().unwrap();
        let cfg = HealthConfig::load(&dir.path().join("nope.toml"), false).unwrap();
        assert_eq!(cfg.watchdog.threshold, 3);
    }

    #[test]
    fn test_load_missing_required_file() {
        let dir = tempdir().unwrap();
        let err = HealthConfig::load(&dir.path().join("nope.toml"), true).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lotus-health.toml");
        std::fs::write(&path, "[watchdog]\nthreshold = \"three\"\n").unwrap();
        let err = HealthConfig::load(&path, false).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("lotus-health.toml"));
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut cfg = HealthConfig::default();
        cfg.watchdog.threshold = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("threshold"));
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        let mut cfg = HealthConfig::default();
        cfg.watchdog.interval_secs = Some(0);
        assert!(cfg.validate().is_err());

        let mut cfg = HealthConfig::default();
        cfg.chain.api_timeout_secs = Some(0);
        assert!(cfg.validate().is_err());

        let mut cfg = HealthConfig::default();
        cfg.recovery.restart_timeout_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_unit() {
        let mut cfg = HealthConfig::default();
        cfg.recovery.managed_unit = "  ".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_http_url() {
        let mut cfg = HealthConfig::default();
        cfg.chain.api_url = Some("ws://127.0.0.1:1234/rpc/v0".to_string());
        assert!(cfg.validate().is_err());
        cfg.chain.api_url = Some("http://127.0.0.1:1234/rpc/v0".to_string());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_zero_retries_is_valid() {
        let mut cfg = HealthConfig::default();
        cfg.chain.api_retries = 0;
        assert!(cfg.validate().is_ok());
    }
}
