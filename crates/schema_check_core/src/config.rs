//! Engine configuration.
//!
//! Process-wide knobs for the check/publish pipeline. Per-namespace governance
//! settings live in the catalog (`types::NamespaceSettings`), not here.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the check/publish orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on targets composed at the same time.
    pub max_concurrent_compositions: usize,

    /// Whole-operation deadline. Exceeding it fails the operation closed.
    pub operation_timeout_secs: u64,

    /// Per-attempt timeout for the check-extension callout.
    pub extension_timeout_secs: u64,

    /// Delay before the single check-extension retry.
    pub extension_retry_backoff_ms: u64,

    /// Hard ceiling for a namespace's traffic lookback window.
    pub retention_limit_days: u32,

    /// Range passed to the cache-warmer recompute job.
    pub cache_warmer_range_hours: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_compositions: 4,
            operation_timeout_secs: 60,
            extension_timeout_secs: 30,
            extension_retry_backoff_ms: 500,
            retention_limit_days: 90,
            cache_warmer_range_hours: 24,
        }
    }
}

impl EngineConfig {
    /// Load from a YAML file. Missing keys fall back to defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        let config: EngineConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Parsing {}", path.display()))?;
        config.validated()
    }

    fn validated(self) -> Result<Self> {
        anyhow::ensure!(
            self.max_concurrent_compositions > 0,
            "max_concurrent_compositions must be at least 1"
        );
        anyhow::ensure!(
            self.operation_timeout_secs > 0,
            "operation_timeout_secs must be at least 1"
        );
        anyhow::ensure!(
            self.retention_limit_days > 0,
            "retention_limit_days must be at least 1"
        );
        Ok(self)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn extension_timeout(&self) -> Duration {
        Duration::from_secs(self.extension_timeout_secs)
    }

    pub fn extension_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.extension_retry_backoff_ms)
    }

    /// Clamp a namespace's configured lookback into `[1, retention_limit_days]`.
    /// Namespaces without a configured window get 7 days.
    pub fn traffic_window_days(&self, namespace_days: Option<u32>) -> u32 {
        namespace_days
            .unwrap_or(7)
            .clamp(1, self.retention_limit_days.max(1))
    }

    /// Set the concurrency bound.
    pub fn max_concurrent_compositions(mut self, n: usize) -> Self {
        self.max_concurrent_compositions = n.max(1);
        self
    }

    /// Set the operation deadline.
    pub fn operation_timeout_secs(mut self, secs: u64) -> Self {
        self.operation_timeout_secs = secs;
        self
    }

    /// Set the retry backoff, mostly useful to keep tests fast.
    pub fn extension_retry_backoff_ms(mut self, ms: u64) -> Self {
        self.extension_retry_backoff_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.max_concurrent_compositions, 4);
        assert_eq!(c.extension_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn traffic_window_is_clamped() {
        let c = EngineConfig::default();
        assert_eq!(c.traffic_window_days(None), 7);
        assert_eq!(c.traffic_window_days(Some(0)), 1);
        assert_eq!(c.traffic_window_days(Some(30)), 30);
        assert_eq!(c.traffic_window_days(Some(400)), 90);
    }

    #[test]
    fn partial_yaml_uses_defaults() {
        let c: EngineConfig = serde_yaml::from_str("operation_timeout_secs: 5\n").unwrap();
        assert_eq!(c.operation_timeout_secs, 5);
        assert_eq!(c.max_concurrent_compositions, 4);
    }

    #[test]
    fn load_from_file_rejects_zero_concurrency() {
        let dir = std::env::temp_dir().join(format!("engine-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("engine.yaml");
        std::fs::write(&path, "max_concurrent_compositions: 0\n").unwrap();
        let err = EngineConfig::load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("max_concurrent_compositions"));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
