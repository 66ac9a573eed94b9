//! Configuration for the choreo runtime
//!
//! Values come from environment variables with defaults, so the binary runs
//! unconfigured on a laptop and can be tuned in a container.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Definition store configuration
    pub store: StoreConfig,
    /// Built-in HTTP operator configuration
    pub http: HttpConfig,
    /// Log filter directive (e.g., "info", "choreo=debug")
    pub log_filter: String,
}

/// Where workflow definitions are read from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite URL of the definition database (default: "sqlite://data/choreo.db")
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

pub const DEFAULT_STORE_URL: &str = "sqlite://data/choreo.db";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LOG_FILTER: &str = "info";

impl Default for Config {
    /// Defaults overridable through CHOREO_* environment variables
    fn default() -> Self {
        Self {
            store: StoreConfig {
                url: std::env::var("CHOREO_STORE_URL")
                    .unwrap_or_else(|_| DEFAULT_STORE_URL.to_string()),
            },
            http: HttpConfig {
                timeout_secs: std::env::var("CHOREO_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|raw| raw.parse().ok())
                    .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            },
            log_filter: std::env::var("CHOREO_LOG")
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string()),
        }
    }
}

impl Config {
    /// Replace the store URL when one is given
    pub fn with_store_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url {
            self.store.url = url;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_url_override() {
        let config = Config::default().with_store_url(Some("sqlite::memory:".into()));
        assert_eq!(config.store.url, "sqlite::memory:");

        let untouched = config.clone().with_store_url(None);
        assert_eq!(untouched.store.url, "sqlite::memory:");
    }

    #[test]
    fn timeout_conversion() {
        let http = HttpConfig { timeout_secs: 12 };
        assert_eq!(http.timeout(), Duration::from_secs(12));
    }
}
