//! Endpoint configuration for the remote services.

use crate::error::{CloudError, CloudResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where the remote account store and callable functions live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Base URL of the account document API (e.g. `https://api.tandem.app/v1`).
    pub store_base_url: String,
    /// Base URL of the callable functions (e.g. `https://functions.tandem.app`).
    pub functions_base_url: String,
    /// Per-request timeout (ms).
    pub timeout_ms: u64,
    /// Bearer token of the signed-in user, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            store_base_url: "https://api.tandem.app/v1".to_string(),
            functions_base_url: "https://functions.tandem.app".to_string(),
            timeout_ms: 15_000,
            id_token: None,
        }
    }
}

impl CloudConfig {
    /// Returns the request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Checks that both base URLs are usable.
    pub fn validate(&self) -> CloudResult<()> {
        for (name, url) in [
            ("store_base_url", &self.store_base_url),
            ("functions_base_url", &self.functions_base_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(CloudError::Config(format!(
                    "{name} must be an http(s) URL, got {url:?}"
                )));
            }
        }
        if self.timeout_ms == 0 {
            return Err(CloudError::Config("timeout_ms must be non-zero".into()));
        }
        Ok(())
    }

    pub(crate) fn store_url(&self, path: &str) -> String {
        format!("{}/{}", self.store_base_url.trim_end_matches('/'), path)
    }

    pub(crate) fn function_url(&self, name: &str) -> String {
        format!("{}/{}", self.functions_base_url.trim_end_matches('/'), name)
    }
}
