//! Configuration for trellis

use crate::TrellisError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration as TOML
pub const DEFAULT_CONFIG: &str = r#"# Trellis Configuration

[github]
# Account whose repositories are reconciled into the category indexes
username = ""

[monitor]
# Interval between full reconciliation passes
scan_interval = "60s"
# Poll interval for the README document watcher
poll_interval = "3s"
# Quiet period after a document edit before the commit fires
debounce = "5s"
# Time-to-live for the cached remote repository listing
cache_ttl = "5m"
# Upper bound on any single git/gh invocation
command_timeout = "30s"
"#;

/// Trellis configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_scan_interval")]
    pub scan_interval: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
    #[serde(default = "default_debounce")]
    pub debounce: String,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: String,
    #[serde(default = "default_command_timeout")]
    pub command_timeout: String,
}

// Default value functions
fn default_scan_interval() -> String {
    "60s".to_string()
}
fn default_poll_interval() -> String {
    "3s".to_string()
}
fn default_debounce() -> String {
    "5s".to_string()
}
fn default_cache_ttl() -> String {
    "5m".to_string()
}
fn default_command_timeout() -> String {
    "30s".to_string()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            scan_interval: default_scan_interval(),
            poll_interval: default_poll_interval(),
            debounce: default_debounce(),
            cache_ttl: default_cache_ttl(),
            command_timeout: default_command_timeout(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| TrellisError::ConfigParse(e.to_string()))
    }

    /// Validate settings that must be present before any loop starts.
    ///
    /// Missing required settings are fatal at startup; they are never
    /// encountered mid-loop because callers validate before looping.
    pub fn validate(&self) -> crate::Result<()> {
        if self.github.username.trim().is_empty() {
            return Err(TrellisError::MissingSetting("github.username"));
        }
        Ok(())
    }

    /// Interval between full reconciliation passes
    pub fn scan_interval(&self) -> Duration {
        parse_duration(&self.monitor.scan_interval).unwrap_or(Duration::from_secs(60))
    }

    /// Poll interval for the document watcher loop
    pub fn poll_interval(&self) -> Duration {
        parse_duration(&self.monitor.poll_interval).unwrap_or(Duration::from_secs(3))
    }

    /// Debounce quiet period before a watched-document commit
    pub fn debounce(&self) -> Duration {
        parse_duration(&self.monitor.debounce).unwrap_or(Duration::from_secs(5))
    }

    /// TTL for the cached remote repository listing
    pub fn cache_ttl(&self) -> Duration {
        parse_duration(&self.monitor.cache_ttl).unwrap_or(Duration::from_secs(300))
    }

    /// Bounded wait applied to every external command invocation
    pub fn command_timeout(&self) -> Duration {
        parse_duration(&self.monitor.command_timeout).unwrap_or(Duration::from_secs(30))
    }
}

/// Parse duration string (e.g., "30s", "5m", "1h")
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let (num_str, unit) = s.split_at(s.len() - 1);
    let num: u64 = num_str.parse().ok()?;

    match unit {
        "s" => Some(Duration::from_secs(num)),
        "m" => Some(Duration::from_secs(num * 60)),
        "h" => Some(Duration::from_secs(num * 3600)),
        "d" => Some(Duration::from_secs(num * 86400)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config = Config::from_toml(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.monitor.scan_interval, "60s");
        assert_eq!(config.scan_interval(), Duration::from_secs(60));
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("invalid"), None);
    }

    #[test]
    fn test_validate_requires_username() {
        let config = Config::from_toml(DEFAULT_CONFIG).unwrap();
        assert!(matches!(
            config.validate(),
            Err(TrellisError::MissingSetting("github.username"))
        ));

        let config = Config::from_toml("[github]\nusername = \"someone\"").unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = Config::from_toml("[github]\nusername = \"someone\"").unwrap();
        assert_eq!(config.poll_interval(), Duration::from_secs(3));
        assert_eq!(config.debounce(), Duration::from_secs(5));
        assert_eq!(config.command_timeout(), Duration::from_secs(30));
    }
}
