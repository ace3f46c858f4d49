//! Client configuration
//!
//! Every value can be set through the environment; CLI flags override.

use std::time::Duration;

const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Connection settings for the analysis service
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the service, without trailing slash
    pub api_url: String,
    /// Timeout for a whole API request (headers and body)
    pub request_timeout: Duration,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Timeout for one health probe
    pub health_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        // ANALYSIS_API_URL: base URL of the analysis service
        let api_url = std::env::var("ANALYSIS_API_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let request_timeout = secs_from_env("ANALYSIS_REQUEST_TIMEOUT_SECS", 30);
        let connect_timeout = secs_from_env("ANALYSIS_CONNECT_TIMEOUT_SECS", 5);
        let health_timeout = secs_from_env("ANALYSIS_HEALTH_TIMEOUT_SECS", 5);

        Self {
            api_url: normalize_url(&api_url),
            request_timeout,
            connect_timeout,
            health_timeout,
        }
    }
}

fn secs_from_env(key: &str, default: u64) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default))
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

impl ClientConfig {
    /// Config pointing at `api_url` with default timeouts.
    pub fn for_url(api_url: &str) -> Self {
        Self {
            api_url: normalize_url(api_url),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            health_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = normalize_url(api_url);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Absolute URL for a service path such as `/api/config`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }
}
