//! LLM simulator configuration types and loading

use eyre::{Context, Result};
use eventbus::BusConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::metrics::{BudgetConfig, SloConfig, StreamingConfig};
use crate::simulate::SimulationConfig;

/// Main llmsim configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Event bus queue and dispatch settings
    pub bus: BusConfig,

    /// Error budget target and error history
    pub slo: SloConfig,

    /// Streaming latency window
    pub streaming: StreamingConfig,

    /// Budget limits and model pricing
    pub budgets: BudgetConfig,

    /// Synthetic load defaults for `llmsim simulate`
    pub simulation: SimulationConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: ./llmsim.yml
        let local_config = PathBuf::from("llmsim.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/llmsim/llmsim.yml
        if let Some(user_config) = Self::user_config_path()
            && user_config.exists()
        {
            match Self::load_from_file(&user_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Best-effort read of just the log level, before logging is set up
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates = match config_path {
            Some(path) => vec![path.clone()],
            None => std::iter::once(PathBuf::from("llmsim.yml"))
                .chain(Self::user_config_path())
                .collect(),
        };
        candidates
            .into_iter()
            .find(|path| path.exists())
            .and_then(|path| fs::read_to_string(path).ok())
            .and_then(|content| serde_yaml::from_str::<Self>(&content).ok())
            .and_then(|config| config.log_level)
    }

    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("llmsim").join("llmsim.yml"))
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Render the effective configuration as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{BudgetLimitType, BudgetPeriod};
    use eventbus::OverflowPolicy;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.bus.capacity, 10_000);
        assert_eq!(config.bus.workers, 1);
        assert_eq!(config.slo.target, 0.999);
        assert_eq!(config.streaming.window_size, 1_000);
        assert!(config.budgets.limits.is_empty());
        assert!(config.budgets.pricing.contains_key("gpt-4"));
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
bus:
  capacity: 500
  overflow: drop-oldest
  handler-timeout-ms: 250
  workers: 2

slo:
  target: 0.99
  pattern-threshold: 5

streaming:
  window-size: 50

budgets:
  limits:
    - name: daily-total
      limit-type:
        type: total-spend
      period: daily
      ceiling: 12.5

simulation:
  requests: 40
  error-rate: 0.2

log-level: debug
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.bus.capacity, 500);
        assert_eq!(config.bus.overflow, OverflowPolicy::DropOldest);
        assert_eq!(config.bus.handler_timeout_ms, 250);
        assert_eq!(config.slo.target, 0.99);
        assert_eq!(config.slo.pattern_threshold, 5);
        assert_eq!(config.streaming.window_size, 50);
        assert_eq!(config.budgets.limits[0].limit_type, BudgetLimitType::TotalSpend);
        assert_eq!(config.budgets.limits[0].period, BudgetPeriod::Daily);
        assert_eq!(config.simulation.requests, 40);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
slo:
  target: 0.95
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        // Specified value
        assert_eq!(config.slo.target, 0.95);

        // Defaults for unspecified
        assert_eq!(config.slo.pattern_threshold, 10);
        assert_eq!(config.bus.capacity, 10_000);
        assert_eq!(config.bus.overflow, OverflowPolicy::DropIncoming);
        assert!(!config.budgets.pricing.is_empty());
    }

    #[test]
    fn test_load_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bus:\n  capacity: 42\nlog-level: warn").unwrap();
        let path = file.path().to_path_buf();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.bus.capacity, 42);
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("warn"));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.yml");
        assert!(Config::load(Some(&path)).is_err());
        assert!(Config::load_log_level(Some(&path)).is_none());
    }

    #[test]
    fn test_yaml_roundtrip_keeps_kebab_keys() {
        let yaml = Config::default().to_yaml().unwrap();
        assert!(yaml.contains("handler-timeout-ms"));
        assert!(yaml.contains("window-size"));

        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.slo.target, 0.999);
    }
}
