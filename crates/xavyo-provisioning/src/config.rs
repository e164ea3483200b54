//! Engine configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use xavyo_connector::resilience::{CallPolicy, RetryConfig};

use crate::error::{ProvisioningError, ProvisioningResult};

const ENV_PREFIX: &str = "XAVYO_PROVISIONING_";

/// What a full pull does with linked identities missing from the enumeration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteUnmatched {
    /// Delete the identity.
    #[default]
    Delete,
    /// Keep the identity but drop its link to the resource.
    Unlink,
}

impl DeleteUnmatched {
    /// Parse from string value (case-insensitive).
    pub fn from_str_value(s: &str) -> ProvisioningResult<Self> {
        match s.to_lowercase().as_str() {
            "delete" => Ok(Self::Delete),
            "unlink" => Ok(Self::Unlink),
            other => Err(ProvisioningError::configuration(format!(
                "Unknown {ENV_PREFIX}DELETE_UNMATCHED value '{other}'. Valid options: delete, unlink"
            ))),
        }
    }
}

/// Tuning for the propagation and reconciliation engines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bound on concurrent propagation targets and concurrent runs.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Deadline for every discrete connector call. Enumeration and change
    /// feeds fail once the connector delivers nothing for this long.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Deadline for a whole enumeration or change feed; 0 leaves only the
    /// idle deadline.
    #[serde(default)]
    pub stream_timeout_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Page size for enumeration built on paged search.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default)]
    pub delete_unmatched: DeleteUnmatched,
}

fn default_worker_count() -> usize {
    4
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_page_size() -> u32 {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            call_timeout_ms: default_call_timeout_ms(),
            stream_timeout_ms: 0,
            retry: RetryConfig::default(),
            page_size: default_page_size(),
            delete_unmatched: DeleteUnmatched::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables over the defaults.
    ///
    /// Optional:
    /// - `XAVYO_PROVISIONING_WORKER_COUNT`
    /// - `XAVYO_PROVISIONING_CALL_TIMEOUT_MS`
    /// - `XAVYO_PROVISIONING_STREAM_TIMEOUT_MS`
    /// - `XAVYO_PROVISIONING_RETRY_MAX_ATTEMPTS`
    /// - `XAVYO_PROVISIONING_PAGE_SIZE`
    /// - `XAVYO_PROVISIONING_DELETE_UNMATCHED`: delete (default), unlink
    pub fn from_env() -> ProvisioningResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`EngineConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> ProvisioningResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));
        let mut config = Self::default();

        if let Some(v) = var("WORKER_COUNT") {
            config.worker_count = parse_number("WORKER_COUNT", &v)?;
        }
        if let Some(v) = var("CALL_TIMEOUT_MS") {
            config.call_timeout_ms = parse_number("CALL_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("STREAM_TIMEOUT_MS") {
            config.stream_timeout_ms = parse_number("STREAM_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("RETRY_MAX_ATTEMPTS") {
            config.retry.max_attempts = parse_number("RETRY_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = var("PAGE_SIZE") {
            config.page_size = parse_number("PAGE_SIZE", &v)?;
        }
        if let Some(v) = var("DELETE_UNMATCHED") {
            config.delete_unmatched = DeleteUnmatched::from_str_value(&v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ProvisioningResult<()> {
        if self.worker_count == 0 {
            return Err(ProvisioningError::configuration(
                "worker_count must be at least 1",
            ));
        }
        if self.call_timeout_ms == 0 {
            return Err(ProvisioningError::configuration(
                "call_timeout_ms must be positive",
            ));
        }
        if self.page_size == 0 {
            return Err(ProvisioningError::configuration(
                "page_size must be at least 1",
            ));
        }
        Ok(())
    }

    /// Deadline and retry wrapped around each discrete connector call.
    #[must_use]
    pub fn call_policy(&self) -> CallPolicy {
        CallPolicy::new(
            self.retry.clone(),
            Some(self.call_timeout()),
        )
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    #[must_use]
    pub fn stream_timeout(&self) -> Option<Duration> {
        (self.stream_timeout_ms > 0).then(|| Duration::from_millis(self.stream_timeout_ms))
    }
}

fn parse_number<T: FromStr>(suffix: &str, value: &str) -> ProvisioningResult<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        ProvisioningError::configuration(format!("invalid {ENV_PREFIX}{suffix} '{value}': {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.stream_timeout(), None);
        assert_eq!(config.call_timeout(), Duration::from_secs(30));
        assert_eq!(
            config.call_policy().timeout(),
            Some(Duration::from_millis(30_000))
        );
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("XAVYO_PROVISIONING_WORKER_COUNT", "8"),
            ("XAVYO_PROVISIONING_STREAM_TIMEOUT_MS", "600000"),
            ("XAVYO_PROVISIONING_RETRY_MAX_ATTEMPTS", "3"),
            ("XAVYO_PROVISIONING_DELETE_UNMATCHED", "Unlink"),
        ]))
        .unwrap();

        assert_eq!(config.worker_count, 8);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.stream_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.delete_unmatched, DeleteUnmatched::Unlink);
    }

    #[test]
    fn test_malformed_values_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[("XAVYO_PROVISIONING_WORKER_COUNT", "many")]))
            .unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION");

        let err = EngineConfig::from_lookup(lookup(&[("XAVYO_PROVISIONING_WORKER_COUNT", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("worker_count"));

        assert!(EngineConfig::from_lookup(lookup(&[(
            "XAVYO_PROVISIONING_DELETE_UNMATCHED",
            "archive"
        )]))
        .is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"worker_count": 2, "delete_unmatched": "unlink"}"#).unwrap();
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.call_timeout_ms, 30_000);
        assert_eq!(config.delete_unmatched, DeleteUnmatched::Unlink);
    }
}
