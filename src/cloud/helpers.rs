//! Small utilities shared by the storage and warehouse sides.
//!
//! - [`object_uri`] - build `scheme://bucket/key` paths
//! - [`ensure_scheme`] - prepend a scheme to bare `bucket/key` destinations
//! - [`validate_key_path`] - reject object names storage services refuse
//! - [`EnvCredentialProvider`] - credentials collected from environment variables

use crate::cloud::traits::{CloudIOError, CloudResult, CredentialProvider, Credentials, ErrorKind};
use std::collections::HashMap;

// ============================================================================
// Resource Identifier Parsing
// ============================================================================

/// Canonical remote path for an object: `scheme://bucket/key`.
#[must_use]
pub fn object_uri(scheme: &str, bucket: &str, key: &str) -> String {
    format!("{scheme}://{bucket}/{key}")
}

/// Prefix `scheme://` unless the path already carries a scheme. Empty stays empty.
#[must_use]
pub fn ensure_scheme(path: &str, scheme: &str) -> String {
    if path.is_empty() || path.contains("://") {
        path.to_string()
    } else {
        format!("{scheme}://{path}")
    }
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate a key path (for object storage, etc.)
///
/// # Errors
///
/// Returns an error if:
/// - The key path is empty
/// - The key path starts with a forward slash
pub fn validate_key_path(path: &str) -> CloudResult<()> {
    if path.is_empty() {
        return Err(CloudIOError::new(
            ErrorKind::InvalidInput,
            "Key path cannot be empty",
        ));
    }

    if path.starts_with('/') {
        return Err(CloudIOError::new(
            ErrorKind::InvalidInput,
            "Key path cannot start with '/'",
        ));
    }

    Ok(())
}

// ============================================================================
// Credential Helpers
// ============================================================================

/// Collect environment variables starting with `prefix`, keyed by the
/// lower-cased remainder of the name.
#[must_use]
pub fn vars_with_prefix(
    prefix: &str,
    vars: impl IntoIterator<Item = (String, String)>,
) -> HashMap<String, String> {
    vars.into_iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(prefix)
                .map(|name| (name.to_lowercase(), value))
        })
        .collect()
}

/// Credentials read from `{prefix}TOKEN` and `{prefix}PROJECT_ID`.
///
/// The token may be empty (ambient machine credentials); the project may not.
#[derive(Debug, Clone)]
pub struct EnvCredentialProvider {
    prefix: String,
}

impl EnvCredentialProvider {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Resolve from an explicit variable set instead of the process environment.
    ///
    /// # Errors
    ///
    /// Returns an `Authentication` error when no project id is present
    pub fn resolve_from(
        &self,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> CloudResult<Credentials> {
        let creds = vars_with_prefix(&self.prefix, vars);

        let project_id = creds
            .get("project_id")
            .filter(|p| !p.is_empty())
            .cloned()
            .ok_or_else(|| {
                CloudIOError::new(
                    ErrorKind::Authentication,
                    format!("No project id found in {}PROJECT_ID", self.prefix),
                )
            })?;

        Ok(Credentials {
            token: creds.get("token").cloned().unwrap_or_default(),
            project_id,
        })
    }
}

impl Default for EnvCredentialProvider {
    fn default() -> Self {
        Self::new("HIVEBRIDGE_")
    }
}

impl CredentialProvider for EnvCredentialProvider {
    fn credentials(&self) -> CloudResult<Credentials> {
        self.resolve_from(std::env::vars())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_ensure_scheme() {
        assert_eq!(ensure_scheme("bucket/out.csv", "gs"), "gs://bucket/out.csv");
        assert_eq!(ensure_scheme("s3://bucket/out.csv", "gs"), "s3://bucket/out.csv");
        assert_eq!(ensure_scheme("", "gs"), "");
    }

    #[test]
    fn test_validate_key_path() {
        assert!(validate_key_path("db/table.csv").is_ok());
        assert!(validate_key_path("").is_err());
        assert!(validate_key_path("/db/table.csv").is_err());
    }

    #[test]
    fn test_env_credentials() {
        let provider = EnvCredentialProvider::new("HB_");
        let creds = provider
            .resolve_from(env(&[
                ("HB_PROJECT_ID", "analytics"),
                ("HB_TOKEN", "secret"),
                ("OTHER", "x"),
            ]))
            .unwrap();
        assert_eq!(creds.project_id, "analytics");
        assert_eq!(creds.token, "secret");

        let err = provider.resolve_from(env(&[("HB_TOKEN", "t")])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authentication);
    }
}
