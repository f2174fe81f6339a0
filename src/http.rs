//! Generic request and response shapes consumed by the pipeline.
//!
//! Concrete HTTP framework adapters translate their own request/response
//! objects into these shapes before handing them to a [`Pipeline`], and
//! translate the result back into a protocol-level response afterwards.
//!
//! [`Pipeline`]: crate::pipeline::Pipeline

use std::collections::HashMap;

/// A framework-agnostic view of an incoming request.
///
/// Any field the adapter cannot supply is left empty; the pipeline treats
/// missing and empty values identically.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// HTTP method, e.g. `GET` (any casing; stages normalize as needed)
    pub method: String,
    /// Request path, e.g. `/api/users`
    pub path: String,
    /// Client IP address as a string
    pub ip: String,
    /// Authenticated user identifier, if known
    pub user_id: String,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Query string parameters
    pub query: HashMap<String, String>,
}

impl Request {
    /// Create a request for the given method and path; all other fields empty.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set the client IP address.
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    /// Set the authenticated user identifier.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Add a request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Add a query parameter.
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }
}

/// A framework-agnostic response produced by the pipeline.
#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP status code
    pub status_code: u16,
    /// Response headers
    pub headers: HashMap<String, String>,
    /// Response body, typically JSON
    pub body: String,
}

impl Response {
    /// Create an empty response with the given status code.
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            headers: HashMap::new(),
            body: String::new(),
        }
    }

    /// Set the response body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Add a response header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Insert a header on an existing response.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(200)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = Request::new("get", "/api/users")
            .with_ip("1.2.3.4")
            .with_user("bob")
            .with_header("X-Api-Key", "abc")
            .with_query("page", "2");

        assert_eq!(request.method, "get");
        assert_eq!(request.path, "/api/users");
        assert_eq!(request.ip, "1.2.3.4");
        assert_eq!(request.user_id, "bob");
        assert_eq!(request.headers.get("X-Api-Key").map(String::as_str), Some("abc"));
        assert_eq!(request.query.get("page").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let request = Request::default();
        assert!(request.method.is_empty());
        assert!(request.ip.is_empty());
        assert!(request.headers.is_empty());
    }

    #[test]
    fn test_response_headers() {
        let mut response = Response::new(429).with_body("{}");
        response.set_header("Retry-After", "1");

        assert_eq!(response.status_code, 429);
        assert_eq!(response.headers.get("Retry-After").map(String::as_str), Some("1"));
    }
}
