use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::{AuditError, AuditResult};

/// Environment variable prefix, e.g. `GOVERNANCE_AUDIT__KEY_PATH=/etc/audit.key`.
pub const ENV_PREFIX: &str = "GOVERNANCE_AUDIT";

/// Config file looked up in the working directory when no explicit path is given.
pub const DEFAULT_CONFIG_FILE: &str = "governance-audit";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub database_url: String,
    pub key_path: PathBuf,
    pub failure_log_path: Option<PathBuf>,
    pub append_lock_timeout_ms: u64,
    pub verify_batch_size: u32,
    pub default_query_limit: u32,
    pub max_query_limit: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://governance-audit.db".to_string(),
            key_path: PathBuf::from("governance-audit.key"),
            failure_log_path: Some(PathBuf::from("governance-audit-failures.log")),
            append_lock_timeout_ms: 5000,
            verify_batch_size: 500,
            default_query_limit: 100,
            max_query_limit: 10_000,
        }
    }
}

impl AuditConfig {
    /// Load configuration from an optional TOML file followed by
    /// `GOVERNANCE_AUDIT__*` environment variables. Later sources win.
    pub fn load(explicit_path: Option<&Path>) -> AuditResult<Self> {
        let mut builder = config::Config::builder().add_source(
            config::File::with_name(DEFAULT_CONFIG_FILE)
                .required(false)
                .format(config::FileFormat::Toml),
        );

        if let Some(path) = explicit_path {
            info!("Loading audit configuration from {:?}", path);
            builder = builder.add_source(
                config::File::from(path.to_path_buf())
                    .required(true)
                    .format(config::FileFormat::Toml),
            );
        }

        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .map_err(|e| AuditError::ConfigError(format!("Failed to build configuration: {}", e)))?;

        let config: AuditConfig = settings
            .try_deserialize()
            .map_err(|e| AuditError::ConfigError(format!("Invalid configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AuditResult<()> {
        if self.database_url.trim().is_empty() {
            return Err(AuditError::ConfigError("database_url must not be empty".to_string()));
        }
        if self.append_lock_timeout_ms == 0 {
            return Err(AuditError::ConfigError(
                "append_lock_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.verify_batch_size == 0 {
            return Err(AuditError::ConfigError(
                "verify_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.default_query_limit == 0 || self.default_query_limit > self.max_query_limit {
            return Err(AuditError::ConfigError(format!(
                "default_query_limit must be between 1 and max_query_limit ({})",
                self.max_query_limit
            )));
        }
        Ok(())
    }

    pub fn append_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.append_lock_timeout_ms)
    }

    /// Configuration for tests and embedded use: in-memory database, key file
    /// under `dir`, no failure side-log.
    pub fn in_memory(dir: &Path) -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            key_path: dir.join("audit.key"),
            failure_log_path: None,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = AuditConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.append_lock_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let config = AuditConfig {
            verify_batch_size: 0,
            ..AuditConfig::default()
        };
        assert!(matches!(config.validate(), Err(AuditError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_default_limit_above_max() {
        let config = AuditConfig {
            default_query_limit: 50,
            max_query_limit: 10,
            ..AuditConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "database_url = \"sqlite://custom.db\"").unwrap();
        writeln!(file, "verify_batch_size = 42").unwrap();

        let config = AuditConfig::load(Some(&path)).unwrap();
        assert_eq!(config.database_url, "sqlite://custom.db");
        assert_eq!(config.verify_batch_size, 42);
        assert_eq!(config.default_query_limit, 100);
    }
}
