use std::time::Duration;

use crate::config::helpers::{optional_env, parse_positive_env};
use crate::error::ConfigError;

/// Default base address the component resources are fetched from.
pub const DEFAULT_REMOTE_URL: &str =
    "https://raw.githubusercontent.com/suite-plugins/suite-core/main";

/// Remote source configuration.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL; resource paths are appended to it.
    /// Env: `SUITE_CORE_REMOTE_URL`.
    pub base_url: String,
    /// Per-request timeout. Env: `SUITE_CORE_FETCH_TIMEOUT_SECS` (default: 30).
    pub timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REMOTE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RemoteConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let base_url = match optional_env("SUITE_CORE_REMOTE_URL")? {
            Some(url) => {
                if !(url.starts_with("https://") || url.starts_with("http://")) {
                    return Err(ConfigError::InvalidValue {
                        key: "SUITE_CORE_REMOTE_URL".to_string(),
                        message: "must be an http(s) URL".to_string(),
                    });
                }
                url.trim_end_matches('/').to_string()
            }
            None => DEFAULT_REMOTE_URL.to_string(),
        };

        Ok(Self {
            base_url,
            timeout: Duration::from_secs(parse_positive_env(
                "SUITE_CORE_FETCH_TIMEOUT_SECS",
                30,
            )?),
        })
    }

    /// Full URL of a resource under the base address.
    pub fn url_for(&self, relative: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            relative.trim_start_matches('/')
        )
    }
}
