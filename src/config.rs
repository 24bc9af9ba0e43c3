//! Remote browser-backend configuration
//!
//! The engine drives browsers hosted by a remote CDP backend (websocket
//! endpoint + API key). A debug mode launches a local Chromium instead,
//! for development without a backend.

use crate::error::{ClassifiedError, ErrorClassifier};

/// Env var holding the remote CDP websocket endpoint
pub const WS_ENDPOINT_VAR: &str = "BROWSER_WS_ENDPOINT";
/// Env var holding the backend API key
pub const API_KEY_VAR: &str = "BROWSER_API_KEY";
/// Env var switching to a local Chromium launch ("1"/"true")
pub const DEBUG_LOCAL_VAR: &str = "BROWSER_DEBUG_LOCAL";

/// Connection settings for the remote browser backend
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Remote CDP websocket endpoint, e.g. `wss://chrome.example.io`
    pub ws_url: String,
    /// Backend API key, passed as the `token` query parameter
    pub api_key: String,
    /// Launch a local Chromium instead of connecting to the backend
    pub debug_local: bool,
}

impl BackendConfig {
    pub fn new(ws_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            api_key: api_key.into(),
            debug_local: false,
        }
    }

    /// Use a locally launched Chromium (no backend required)
    pub fn local_debug() -> Self {
        Self {
            ws_url: String::new(),
            api_key: String::new(),
            debug_local: true,
        }
    }

    /// Read configuration from the environment.
    ///
    /// Endpoint and API key are required unless `BROWSER_DEBUG_LOCAL` is set.
    pub fn from_env() -> Result<Self, ClassifiedError> {
        let debug_local = std::env::var(DEBUG_LOCAL_VAR)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        if debug_local {
            return Ok(Self::local_debug());
        }

        let ws_url = std::env::var(WS_ENDPOINT_VAR).map_err(|_| {
            ErrorClassifier::internal(format!("{} is not set", WS_ENDPOINT_VAR))
        })?;
        let api_key = std::env::var(API_KEY_VAR).map_err(|_| {
            ErrorClassifier::internal(format!("{} is not set", API_KEY_VAR))
        })?;

        Ok(Self {
            ws_url,
            api_key,
            debug_local: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_debug_needs_no_endpoint() {
        let config = BackendConfig::local_debug();
        assert!(config.debug_local);
        assert!(config.ws_url.is_empty());
    }

    #[test]
    fn builder_sets_endpoint_and_key() {
        let config = BackendConfig::new("wss://chrome.example.io", "key-123");
        assert_eq!(config.ws_url, "wss://chrome.example.io");
        assert_eq!(config.api_key, "key-123");
        assert!(!config.debug_local);
    }
}
