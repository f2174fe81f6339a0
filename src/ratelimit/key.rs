//! Request normalization and identity key derivation.
//!
//! The key is the identity string a quota is tracked against. Derivation is
//! deterministic: identical request attributes always yield the same key.

use std::collections::HashMap;

use super::config::RateLimitConfig;
use crate::http::Request;

/// Fallback key when no identity attribute is available at all.
const ANONYMOUS_KEY: &str = "anonymous";

/// A normalized view of the request attributes rate limiting cares about.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// Upper-cased HTTP method
    pub method: String,
    pub path: String,
    pub ip: String,
    pub user_id: String,
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
}

impl RequestInfo {
    /// Extract and normalize the attributes of a generic request.
    /// Absent fields stay empty.
    pub fn from_request(request: &Request) -> Self {
        Self {
            method: request.method.to_uppercase(),
            path: request.path.clone(),
            ip: request.ip.clone(),
            user_id: request.user_id.clone(),
            headers: request.headers.clone(),
            query: request.query.clone(),
        }
    }
}

/// Derive the quota key for a request.
///
/// A configured [`KeyExtractor`] takes over completely. Otherwise the key is
/// built from the enabled identification switches in fixed order (IP, user,
/// header, query), joining each non-empty part with `|`. With no usable
/// part the key falls back to `ip:<ip>`, and failing that to `anonymous`.
///
/// [`KeyExtractor`]: super::config::KeyExtractor
pub fn derive_key(info: &RequestInfo, config: &RateLimitConfig) -> String {
    if let Some(extractor) = &config.key_extractor {
        return extractor.extract(info);
    }

    let mut parts: Vec<String> = Vec::new();

    if config.identify_by_ip && !info.ip.is_empty() {
        parts.push(format!("ip:{}", info.ip));
    }
    if config.identify_by_user && !info.user_id.is_empty() {
        parts.push(format!("user:{}", info.user_id));
    }
    if let Some(header) = &config.identify_by_header {
        if let Some(value) = info.headers.get(header) {
            if !value.is_empty() {
                parts.push(format!("header:{}", value));
            }
        }
    }
    if let Some(param) = &config.identify_by_query {
        if let Some(value) = info.query.get(param) {
            if !value.is_empty() {
                parts.push(format!("query:{}", value));
            }
        }
    }

    if parts.is_empty() {
        if info.ip.is_empty() {
            ANONYMOUS_KEY.to_string()
        } else {
            format!("ip:{}", info.ip)
        }
    } else {
        parts.join("|")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::config::KeyExtractor;

    fn info(request: &Request) -> RequestInfo {
        RequestInfo::from_request(request)
    }

    #[test]
    fn test_method_is_normalized() {
        let request = Request::new("post", "/api");
        assert_eq!(info(&request).method, "POST");
    }

    #[test]
    fn test_ip_and_user_key() {
        let mut config = RateLimitConfig::default();
        config.identify_by_ip = true;
        config.identify_by_user = true;

        let request = Request::new("GET", "/").with_ip("1.2.3.4").with_user("bob");
        assert_eq!(derive_key(&info(&request), &config), "ip:1.2.3.4|user:bob");
    }

    #[test]
    fn test_key_is_deterministic() {
        let mut config = RateLimitConfig::default();
        config.identify_by_user = true;
        config.identify_by_header = Some("X-Api-Key".to_string());

        let request = Request::new("GET", "/")
            .with_ip("1.2.3.4")
            .with_user("bob")
            .with_header("X-Api-Key", "k1");

        let first = derive_key(&info(&request), &config);
        let second = derive_key(&info(&request), &config);
        assert_eq!(first, second);
        assert_eq!(first, "ip:1.2.3.4|user:bob|header:k1");
    }

    #[test]
    fn test_header_and_query_parts() {
        let mut config = RateLimitConfig::default();
        config.identify_by_ip = false;
        config.identify_by_header = Some("X-Api-Key".to_string());
        config.identify_by_query = Some("token".to_string());

        let request = Request::new("GET", "/")
            .with_header("X-Api-Key", "k1")
            .with_query("token", "t9");
        assert_eq!(derive_key(&info(&request), &config), "header:k1|query:t9");
    }

    #[test]
    fn test_no_switches_falls_back_to_ip() {
        let mut config = RateLimitConfig::default();
        config.identify_by_ip = false;

        let request = Request::new("GET", "/").with_ip("1.2.3.4");
        assert_eq!(derive_key(&info(&request), &config), "ip:1.2.3.4");
    }

    #[test]
    fn test_nothing_available_is_anonymous() {
        let mut config = RateLimitConfig::default();
        config.identify_by_ip = false;

        let request = Request::new("GET", "/");
        assert_eq!(derive_key(&info(&request), &config), "anonymous");
    }

    #[test]
    fn test_empty_values_are_skipped() {
        let mut config = RateLimitConfig::default();
        config.identify_by_ip = true;
        config.identify_by_user = true;

        // User switch is on but the request carries no user.
        let request = Request::new("GET", "/").with_ip("1.2.3.4");
        assert_eq!(derive_key(&info(&request), &config), "ip:1.2.3.4");
    }

    #[test]
    fn test_custom_extractor_wins() {
        let mut config = RateLimitConfig::default();
        config.key_extractor = Some(KeyExtractor::new(|info: &RequestInfo| {
            format!("tenant:{}", info.path)
        }));

        let request = Request::new("GET", "/t42").with_ip("1.2.3.4");
        assert_eq!(derive_key(&info(&request), &config), "tenant:/t42");
    }
}
