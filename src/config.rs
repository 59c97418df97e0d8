//! Pipeline configuration.
//!
//! Settings come from an optional YAML file; every field has a default, so an
//! empty file (or none at all) is a valid configuration. Command-line flags are
//! applied on top by the CLI layer.

use crate::engine::ConnectionParams;
use crate::error::{PipelineError, Result};
use crate::retry::RetryConfig;
use crate::transfer::DEFAULT_CHUNK_SIZE;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Tunables for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Tables extracted per database when `--tables` is empty.
    pub default_tables: BTreeMap<String, Vec<String>>,
    /// Attempt ceiling for every retried network operation.
    pub max_retry: u32,
    /// Pause before the second attempt, doubled per attempt; `0` retries at once.
    pub retry_delay_ms: u64,
    /// Upload chunk size in bytes.
    pub chunk_size: usize,
    /// Upload pool size (default: one per CPU).
    pub upload_workers: Option<usize>,
    /// Load pool size (default: one per CPU).
    pub load_workers: Option<usize>,
    /// Slice cleanup pool size (default: one per CPU).
    pub cleanup_workers: Option<usize>,
    /// Tables extracted concurrently; `1` reads them one after another over a
    /// single reused connection.
    pub table_workers: usize,
    /// Bound on each load job; unbounded when unset.
    pub load_timeout_secs: Option<u64>,
    pub poll_interval_ms: u64,
    pub engine_port: u16,
    pub engine_auth: String,
    pub engine_ssl: bool,
    /// Environment prefix for warehouse credentials (`{prefix}PROJECT_ID`, `{prefix}TOKEN`).
    pub credentials_prefix: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_tables: BTreeMap::new(),
            max_retry: crate::retry::MAX_RETRY,
            retry_delay_ms: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            upload_workers: None,
            load_workers: None,
            cleanup_workers: None,
            table_workers: 1,
            load_timeout_secs: None,
            poll_interval_ms: 1000,
            engine_port: 10000,
            engine_auth: "PLAIN".to_string(),
            engine_ssl: true,
            credentials_prefix: "HIVEBRIDGE_".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate YAML text.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for malformed YAML or invalid values.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = if text.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(text)
                .map_err(|e| PipelineError::Config(format!("parsing YAML: {e}")))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if the file cannot be read or is invalid.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_yaml(&text)
    }

    /// # Errors
    ///
    /// Returns a `Config` error naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.max_retry == 0 {
            return Err(PipelineError::Config("max_retry must be at least 1".into()));
        }
        if self.chunk_size == 0 {
            return Err(PipelineError::Config("chunk_size must be positive".into()));
        }
        if self.table_workers == 0 {
            return Err(PipelineError::Config("table_workers must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(PipelineError::Config("poll_interval_ms must be positive".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry,
            initial_delay_ms: self.retry_delay_ms,
            ..RetryConfig::default()
        }
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn load_timeout(&self) -> Option<Duration> {
        self.load_timeout_secs.map(Duration::from_secs)
    }

    /// Engine session parameters for `database` on `host`, with `creds` given
    /// as `user,password`.
    #[must_use]
    pub fn connection_params(&self, host: &str, creds: &str, database: &str) -> ConnectionParams {
        let (user, password) = split_creds(creds);
        ConnectionParams {
            host: host.to_string(),
            port: self.engine_port,
            user,
            password,
            database: database.to_string(),
            auth_mechanism: self.engine_auth.clone(),
            ssl: self.engine_ssl,
        }
    }
}

/// `user,password` -> `(user, password)`. Everything after the first comma is
/// the password; without a comma the password is empty.
#[must_use]
pub fn split_creds(creds: &str) -> (String, String) {
    match creds.split_once(',') {
        Some((user, password)) => (user.to_string(), password.to_string()),
        None => (creds.to_string(), String::new()),
    }
}

/// Tables to process: the explicit list when non-empty, otherwise the
/// configured default set for `database`. Blank names are dropped and
/// duplicates collapse to their first occurrence.
#[must_use]
pub fn select_tables(explicit: &[String], config: &PipelineConfig, database: &str) -> Vec<String> {
    let requested: Vec<&String> = explicit.iter().filter(|t| !t.trim().is_empty()).collect();
    let source: Vec<&String> = if requested.is_empty() {
        config
            .default_tables
            .get(database)
            .map(|tables| tables.iter().collect())
            .unwrap_or_default()
    } else {
        requested
    };

    let mut seen = HashSet::new();
    source
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_is_default() {
        assert_eq!(PipelineConfig::from_yaml("").unwrap(), PipelineConfig::default());
    }

    #[test]
    fn yaml_overrides_selected_fields() {
        let config = PipelineConfig::from_yaml(
            "max_retry: 5\nupload_workers: 2\ndefault_tables:\n  sales: [orders, customers]\n",
        )
        .unwrap();
        assert_eq!(config.max_retry, 5);
        assert_eq!(config.upload_workers, Some(2));
        assert_eq!(config.chunk_size, 1 << 23);
        assert_eq!(config.engine_port, 10000);
        assert_eq!(config.retry().max_attempts, 5);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            PipelineConfig::from_yaml("chunk_size: 0"),
            Err(PipelineError::Config(_))
        ));
        assert!(PipelineConfig::from_yaml("max_retry: [1]").is_err());
    }

    #[test]
    fn creds_split_on_first_comma() {
        assert_eq!(split_creds("bob,pa,ss"), ("bob".into(), "pa,ss".into()));
        assert_eq!(split_creds("bob"), ("bob".into(), String::new()));

        let params = PipelineConfig::default().connection_params("hive.local", "bob,pw", "sales");
        assert_eq!(params.port, 10000);
        assert_eq!(params.auth_mechanism, "PLAIN");
        assert!(params.ssl);
        assert_eq!(params.password, "pw");
        assert!(!format!("{params:?}").contains("pw\""));
    }

    #[test]
    fn table_selection() {
        let mut config = PipelineConfig::default();
        config
            .default_tables
            .insert("sales".into(), vec!["orders".into(), "customers".into()]);

        let explicit = vec!["b".to_string(), " a ".to_string(), "b".to_string(), String::new()];
        assert_eq!(select_tables(&explicit, &config, "sales"), vec!["b", "a"]);
        assert_eq!(select_tables(&[], &config, "sales"), vec!["orders", "customers"]);
        assert!(select_tables(&[], &config, "hr").is_empty());
    }
}
