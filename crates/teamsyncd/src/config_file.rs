//! Configuration file support for teamsyncd
//!
//! Loads and validates teamsyncd configuration from TOML files.
//! Default location: /etc/sonic/teamsyncd.conf

use crate::error::{Result, TeamdError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/teamsyncd.conf";

/// Team device configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamConfig {
    /// Interface index of the team device, 0 if not configured
    #[serde(default)]
    pub ifindex: u32,
}

/// Netlink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetlinkConfig {
    /// Port list request timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

/// Reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Interval between port list snapshots in milliseconds
    #[serde(default = "default_reconcile_interval")]
    pub interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Complete teamsyncd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamsyncConfig {
    #[serde(default)]
    pub team: TeamConfig,

    #[serde(default)]
    pub netlink: NetlinkConfig,

    #[serde(default)]
    pub reconcile: ReconcileConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_request_timeout() -> u64 {
    2000
}

fn default_reconcile_interval() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetlinkConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_reconcile_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl TeamsyncConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                TeamdError::Config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(TeamdError::Io(e)),
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TeamdError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.netlink.request_timeout_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile.interval_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.team.ifindex == 0 {
            return Err(TeamdError::Config(
                "team ifindex must be > 0".to_string(),
            ));
        }

        if self.netlink.request_timeout_ms == 0 {
            return Err(TeamdError::Config(
                "request_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.reconcile.interval_ms == 0 {
            return Err(TeamdError::Config(
                "interval_ms must be > 0".to_string(),
            ));
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(TeamdError::Config(format!(
                "unknown log level \"{}\"",
                self.logging.level
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> TeamsyncConfig {
        let mut config = TeamsyncConfig::default();
        config.team.ifindex = 3;
        config
    }

    #[test]
    fn test_default_config() {
        let config = TeamsyncConfig::default();
        assert_eq!(config.team.ifindex, 0);
        assert_eq!(config.netlink.request_timeout_ms, 2000);
        assert_eq!(config.reconcile.interval_ms, 1000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_durations() {
        let config = TeamsyncConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(2));
        assert_eq!(config.reconcile_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(configured().validate().is_ok());
    }

    #[test]
    fn test_validate_requires_team() {
        assert!(matches!(
            TeamsyncConfig::default().validate(),
            Err(TeamdError::Config(_))
        ));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = configured();
        config.netlink.request_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = configured();
        config.logging.level = "DEBUG".to_string();
        assert!(config.validate().is_ok());
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[team]
ifindex = 12

[netlink]
request_timeout_ms = 500
"#;
        let config: TeamsyncConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.team.ifindex, 12);
        assert_eq!(config.netlink.request_timeout_ms, 500);
        // Unspecified values should use defaults
        assert_eq!(config.reconcile.interval_ms, 1000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = TeamsyncConfig::load_or_default("/nonexistent/path.conf").unwrap();
        assert_eq!(config.netlink.request_timeout_ms, 2000);
    }
}
