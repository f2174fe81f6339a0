//! Rate limit configuration: strategies, numeric limits, identification
//! switches, overrides, and response shaping.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::key::RequestInfo;
use crate::error::{FloodgateError, Result};

/// The admission-control algorithm a limiter runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Float token refill with a burst ceiling; steady-state per-second rate
    TokenBucket,
    /// Counter reset at fixed window boundaries; cheap but bursty at edges
    FixedWindow,
    /// Exact trailing-window accounting over pruned admission timestamps
    SlidingWindow,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::TokenBucket
    }
}

/// Numeric limits applied to one key.
///
/// Used both as the global default and as a per-path/per-method override.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Steady-state rate for the token bucket, and the second-window limit
    /// for the fixed window strategy (truncated to an integer there)
    #[serde(default)]
    pub requests_per_second: f64,
    /// Minute-window limit; the only limit the sliding window strategy uses
    #[serde(default)]
    pub requests_per_minute: u64,
    #[serde(default)]
    pub requests_per_hour: u64,
    #[serde(default)]
    pub requests_per_day: u64,
    /// Token bucket capacity
    #[serde(default = "default_burst_size")]
    pub burst_size: u64,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            requests_per_minute: default_requests_per_minute(),
            requests_per_hour: 0,
            requests_per_day: 0,
            burst_size: default_burst_size(),
        }
    }
}

fn default_requests_per_second() -> f64 {
    10.0
}

fn default_requests_per_minute() -> u64 {
    600
}

fn default_burst_size() -> u64 {
    20
}

/// A caller-supplied key derivation function.
///
/// When configured it replaces the built-in IP/user/header/query derivation
/// entirely; its result is used verbatim.
#[derive(Clone)]
pub struct KeyExtractor(Arc<dyn Fn(&RequestInfo) -> String + Send + Sync>);

impl KeyExtractor {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&RequestInfo) -> String + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn extract(&self, info: &RequestInfo) -> String {
        (self.0)(info)
    }
}

impl fmt::Debug for KeyExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyExtractor")
    }
}

/// Full configuration for a rate limiting stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Which algorithm each per-key limiter runs
    #[serde(default)]
    pub strategy: Strategy,

    /// Global default limits, used when no override matches
    #[serde(default)]
    pub limit: RateLimit,

    /// Include the client IP in derived keys
    #[serde(default = "default_true")]
    pub identify_by_ip: bool,
    /// Include the authenticated user in derived keys
    #[serde(default)]
    pub identify_by_user: bool,
    /// Name of a request header whose value joins the derived key
    #[serde(default)]
    pub identify_by_header: Option<String>,
    /// Name of a query parameter whose value joins the derived key
    #[serde(default)]
    pub identify_by_query: Option<String>,
    /// Custom key function; programmatic only, not loadable from a file
    #[serde(skip)]
    pub key_extractor: Option<KeyExtractor>,

    /// Per-path limit overrides; exact path match, highest precedence
    #[serde(default)]
    pub path_limits: HashMap<String, RateLimit>,
    /// Per-method limit overrides; keys are upper-case method names
    #[serde(default)]
    pub method_limits: HashMap<String, RateLimit>,

    /// Paths that bypass rate limiting entirely
    #[serde(default)]
    pub skip_paths: Vec<String>,
    /// Methods that bypass rate limiting (case-insensitive)
    #[serde(default)]
    pub skip_methods: Vec<String>,
    /// Client IPs that bypass rate limiting
    #[serde(default)]
    pub skip_ips: Vec<String>,
    /// Users that bypass rate limiting
    #[serde(default)]
    pub skip_users: Vec<String>,

    /// Once a key is denied, keep denying it for this long (0 disables)
    #[serde(default)]
    pub block_duration_secs: u64,
    /// How often the background sweep runs; limiters idle for twice this
    /// long are evicted
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    /// Maximum number of live per-key limiters (0 = unbounded)
    #[serde(default = "default_memory_limit")]
    pub memory_limit: usize,

    /// Status code of the rejection response
    #[serde(default = "default_error_status_code")]
    pub error_status_code: u16,
    /// Message placed in the rejection body
    #[serde(default = "default_error_message")]
    pub error_message: String,
    /// Emit `X-RateLimit-Limit`/`-Remaining`/`-Reset` headers
    #[serde(default = "default_true")]
    pub include_rate_limit_headers: bool,
    /// Emit a `Retry-After` header on rejections
    #[serde(default = "default_true")]
    pub include_retry_after: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            limit: RateLimit::default(),
            identify_by_ip: true,
            identify_by_user: false,
            identify_by_header: None,
            identify_by_query: None,
            key_extractor: None,
            path_limits: HashMap::new(),
            method_limits: HashMap::new(),
            skip_paths: Vec::new(),
            skip_methods: Vec::new(),
            skip_ips: Vec::new(),
            skip_users: Vec::new(),
            block_duration_secs: 0,
            cleanup_interval_secs: default_cleanup_interval(),
            memory_limit: default_memory_limit(),
            error_status_code: default_error_status_code(),
            error_message: default_error_message(),
            include_rate_limit_headers: true,
            include_retry_after: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_memory_limit() -> usize {
    10000
}

fn default_error_status_code() -> u16 {
    429
}

fn default_error_message() -> String {
    "Rate limit exceeded".to_string()
}

impl RateLimitConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            FloodgateError::Config(format!("Failed to parse rate limit config: {}", e))
        })
    }

    /// Resolve the effective limit for a request.
    ///
    /// A path-specific override takes precedence, then a method-specific one,
    /// then the global default. `method` must already be upper-cased.
    pub fn resolve_limit(&self, path: &str, method: &str) -> RateLimit {
        if let Some(limit) = self.path_limits.get(path) {
            return *limit;
        }
        if let Some(limit) = self.method_limits.get(method) {
            return *limit;
        }
        self.limit
    }

    /// Sweep period for the background cleanup task.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Penalty window applied after a denial, if enabled.
    pub fn block_duration(&self) -> Option<Duration> {
        if self.block_duration_secs > 0 {
            Some(Duration::from_secs(self.block_duration_secs))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RateLimitConfig::default();
        assert_eq!(config.strategy, Strategy::TokenBucket);
        assert!(config.identify_by_ip);
        assert!(!config.identify_by_user);
        assert_eq!(config.error_status_code, 429);
        assert_eq!(config.cleanup_interval(), Duration::from_secs(60));
        assert!(config.block_duration().is_none());
    }

    #[test]
    fn test_parse_yaml_config() {
        let yaml = r#"
strategy: sliding_window
limit:
  requests_per_minute: 120
  burst_size: 10
identify_by_user: true
skip_paths:
  - /healthz
path_limits:
  /api/search:
    requests_per_minute: 30
    burst_size: 5
block_duration_secs: 30
"#;
        let config = RateLimitConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.strategy, Strategy::SlidingWindow);
        assert_eq!(config.limit.requests_per_minute, 120);
        assert!(config.identify_by_user);
        assert_eq!(config.skip_paths, vec!["/healthz"]);
        assert_eq!(config.path_limits["/api/search"].requests_per_minute, 30);
        assert_eq!(config.block_duration(), Some(Duration::from_secs(30)));
        // Unspecified fields fall back to defaults.
        assert_eq!(config.error_status_code, 429);
        assert!(config.identify_by_ip);
    }

    #[test]
    fn test_parse_invalid_yaml_fails() {
        let result = RateLimitConfig::from_yaml("strategy: [not, a, strategy]");
        assert!(matches!(result, Err(FloodgateError::Config(_))));
    }

    #[test]
    fn test_resolve_limit_precedence() {
        let mut config = RateLimitConfig::default();
        config.path_limits.insert(
            "/api/expensive".to_string(),
            RateLimit {
                requests_per_minute: 5,
                ..RateLimit::default()
            },
        );
        config.method_limits.insert(
            "POST".to_string(),
            RateLimit {
                requests_per_minute: 50,
                ..RateLimit::default()
            },
        );

        // Path override wins over method override.
        let limit = config.resolve_limit("/api/expensive", "POST");
        assert_eq!(limit.requests_per_minute, 5);

        // Method override applies when no path matches.
        let limit = config.resolve_limit("/api/other", "POST");
        assert_eq!(limit.requests_per_minute, 50);

        // Global default otherwise.
        let limit = config.resolve_limit("/api/other", "GET");
        assert_eq!(limit, config.limit);
    }
}
