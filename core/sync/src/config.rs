//! Configuration for the sync queue and its collaborators.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use fieldsync_common::{Error, Result};
use fieldsync_storage::StorageThresholds;
use fieldsync_validation::ValidationConfig;

/// Delivery pacing options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Wait after the first failure, in minutes.
    pub retry_backoff_base_minutes: u64,
    /// Growth factor of the wait per failed attempt.
    pub retry_exponent_base: u32,
    /// Retry ceiling stamped on new queue items.
    pub default_max_retries: u32,
    /// Remote upserts issued concurrently within one cycle.
    pub dispatch_concurrency: usize,
    /// Upper bound on a single remote call, in seconds.
    pub remote_timeout_secs: u64,
    /// Period of timer-driven cycles, in seconds. Zero disables the timer.
    pub dispatch_interval_secs: u64,
}

impl SyncConfig {
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    pub fn dispatch_interval(&self) -> Option<Duration> {
        (self.dispatch_interval_secs > 0).then(|| Duration::from_secs(self.dispatch_interval_secs))
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry_exponent_base < 1 {
            return Err(Error::Config(
                "retry_exponent_base must be at least 1".to_string(),
            ));
        }
        if self.dispatch_concurrency == 0 {
            return Err(Error::Config(
                "dispatch_concurrency must be at least 1".to_string(),
            ));
        }
        if self.remote_timeout_secs == 0 {
            return Err(Error::Config(
                "remote_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_backoff_base_minutes: 1,
            retry_exponent_base: 2,
            default_max_retries: 5,
            dispatch_concurrency: 4,
            remote_timeout_secs: 30,
            dispatch_interval_secs: 300,
        }
    }
}

/// Complete configuration of the sync core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldSyncConfig {
    pub validation: ValidationConfig,
    pub storage: StorageThresholds,
    pub sync: SyncConfig,
}

impl FieldSyncConfig {
    /// Check every section for inconsistent values.
    pub fn validate(&self) -> Result<()> {
        self.validation.validate()?;
        self.storage.validate()?;
        self.sync.validate()
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_storage::MIB;

    #[test]
    fn test_defaults() {
        let config = FieldSyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.hard_floor_bytes, 10 * MIB);
        assert_eq!(config.storage.advisory_floor_bytes, 50 * MIB);
        assert_eq!(config.sync.retry_backoff_base_minutes, 1);
        assert_eq!(config.sync.retry_exponent_base, 2);
        assert_eq!(config.sync.default_max_retries, 5);
        assert_eq!(config.validation.polygon_max_vertices, 1000);
    }

    #[test]
    fn test_partial_json() {
        let config = FieldSyncConfig::from_json(
            r#"{ "sync": { "default_max_retries": 8 }, "storage": { "hard_floor_bytes": 1024 } }"#,
        )
        .unwrap();
        assert_eq!(config.sync.default_max_retries, 8);
        assert_eq!(config.sync.retry_exponent_base, 2);
        assert_eq!(config.storage.hard_floor_bytes, 1024);
        assert_eq!(config.storage.advisory_floor_bytes, 50 * MIB);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = FieldSyncConfig::default();
        let restored = FieldSyncConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(FieldSyncConfig::from_json(r#"{ "sync": { "dispatch_concurrency": 0 } }"#).is_err());
        assert!(FieldSyncConfig::from_json(
            r#"{ "storage": { "hard_floor_bytes": 100, "advisory_floor_bytes": 10 } }"#
        )
        .is_err());
        assert!(FieldSyncConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_interval_zero_disables_timer() {
        let config = SyncConfig {
            dispatch_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.dispatch_interval().is_none());
        assert_eq!(
            SyncConfig::default().dispatch_interval(),
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("fieldsync.json");
        std::fs::write(&path, r#"{ "sync": { "remote_timeout_secs": 5 } }"#).unwrap();

        let config = FieldSyncConfig::load(&path).unwrap();
        assert_eq!(config.sync.remote_timeout(), Duration::from_secs(5));
    }
}
