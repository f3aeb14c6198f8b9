//! Composition settings: default origin, fan-out bounds, fallback policy.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ComposeError, ComposeResult};

/// Which primary-source failures move a fragment on to its fallback URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Only a timeout on the primary source triggers the fallback.
    #[default]
    TimeoutOnly,
    /// A timeout or a non-200 answer from the primary source triggers it.
    TimeoutOrUpstreamStatus,
}

/// Settings shared by every resolution a [`Resolver`](crate::Resolver) runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeConfig {
    /// Host (and optional port) substituted when a fragment URL has none.
    pub default_host: String,
    /// Scheme used together with `default_host`.
    pub default_scheme: String,
    /// Upper bound on concurrently running fragment fetches. `None` means
    /// one task per fragment with no cap.
    pub max_concurrency: Option<usize>,
    /// Fallback rule for primary-source failures.
    pub fallback_policy: FallbackPolicy,
    /// TCP connect timeout for fragment origins, in milliseconds.
    pub connect_timeout_ms: u64,
    /// User-Agent sent when the inbound request carried none.
    pub user_agent: Option<String>,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            default_host: "127.0.0.1:8080".to_string(),
            default_scheme: "http".to_string(),
            max_concurrency: None,
            fallback_policy: FallbackPolicy::TimeoutOnly,
            connect_timeout_ms: 10_000,
            user_agent: None,
        }
    }
}

impl ComposeConfig {
    /// Load settings from a JSON file. Missing keys keep their defaults.
    pub fn from_json_file(path: &Path) -> ComposeResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ComposeError::Config(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `FRAGMENTS_*` environment variables.
    pub fn apply_env(mut self) -> ComposeResult<Self> {
        if let Ok(host) = std::env::var("FRAGMENTS_DEFAULT_HOST") {
            self.default_host = host;
        }
        if let Ok(scheme) = std::env::var("FRAGMENTS_DEFAULT_SCHEME") {
            self.default_scheme = scheme;
        }
        if let Ok(max) = std::env::var("FRAGMENTS_MAX_CONCURRENCY") {
            let max = max.trim().parse::<usize>().map_err(|e| {
                ComposeError::Config(format!("FRAGMENTS_MAX_CONCURRENCY={max}: {e}"))
            })?;
            self.max_concurrency = Some(max);
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject settings that can never produce a working fetch.
    pub fn validate(&self) -> ComposeResult<()> {
        if self.default_host.trim().is_empty() {
            return Err(ComposeError::Config("default_host must not be empty".into()));
        }
        if !matches!(self.default_scheme.as_str(), "http" | "https") {
            return Err(ComposeError::Config(format!(
                "unsupported default_scheme: {}",
                self.default_scheme
            )));
        }
        if self.max_concurrency == Some(0) {
            return Err(ComposeError::Config(
                "max_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Base URL that host-less fragment sources are joined onto.
    pub fn base_url(&self) -> String {
        format!("{}://{}/", self.default_scheme, self.default_host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ComposeConfig::default();
        assert_eq!(config.base_url(), "http://127.0.0.1:8080/");
        assert_eq!(config.fallback_policy, FallbackPolicy::TimeoutOnly);
        assert!(config.max_concurrency.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"default_host": "fragments.internal:3000", "fallback_policy": "timeout_or_upstream_status"}}"#
        )
        .unwrap();

        let config = ComposeConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.default_host, "fragments.internal:3000");
        assert_eq!(config.default_scheme, "http");
        assert_eq!(
            config.fallback_policy,
            FallbackPolicy::TimeoutOrUpstreamStatus
        );
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = ComposeConfig {
            max_concurrency: Some(0),
            ..ComposeConfig::default()
        };
        assert!(matches!(config.validate(), Err(ComposeError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_scheme() {
        let config = ComposeConfig {
            default_scheme: "ftp".into(),
            ..ComposeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = ComposeConfig::from_json_file(Path::new("/nonexistent/compose.json"))
            .unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
