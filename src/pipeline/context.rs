//! Strongly-typed per-request context threaded through the pipeline.

use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::http::Request;

/// Per-request state shared by every stage in a dispatch.
///
/// Stages read and write named, typed fields rather than an ambient
/// string-keyed map, so there are no key collisions and no downcasts.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique identifier for this request, for log correlation
    pub request_id: Uuid,
    /// When the pipeline received the request
    pub received_at: Instant,
    /// Client IP as reported by the adapter
    pub client_ip: Option<String>,
    /// Authenticated user, set by the adapter or an auth stage
    pub user_id: Option<String>,
    /// Distributed trace identifier, if the adapter propagates one
    pub trace_id: Option<String>,
    /// Tenant the request is scoped to, if any
    pub tenant: Option<String>,
}

impl RequestContext {
    /// Create an empty context with a fresh request ID.
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            received_at: Instant::now(),
            client_ip: None,
            user_id: None,
            trace_id: None,
            tenant: None,
        }
    }

    /// Create a context pre-populated from the request's identity fields.
    pub fn for_request(request: &Request) -> Self {
        let mut ctx = Self::new();
        if !request.ip.is_empty() {
            ctx.client_ip = Some(request.ip.clone());
        }
        if !request.user_id.is_empty() {
            ctx.user_id = Some(request.user_id.clone());
        }
        ctx
    }

    /// Time elapsed since the request entered the pipeline.
    pub fn elapsed(&self) -> Duration {
        self.received_at.elapsed()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_ids_are_unique() {
        let a = RequestContext::new();
        let b = RequestContext::new();
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn test_for_request_populates_identity() {
        let request = Request::new("GET", "/").with_ip("1.2.3.4").with_user("bob");
        let ctx = RequestContext::for_request(&request);

        assert_eq!(ctx.client_ip.as_deref(), Some("1.2.3.4"));
        assert_eq!(ctx.user_id.as_deref(), Some("bob"));
        assert!(ctx.trace_id.is_none());
    }

    #[test]
    fn test_empty_fields_stay_none() {
        let ctx = RequestContext::for_request(&Request::new("GET", "/"));
        assert!(ctx.client_ip.is_none());
        assert!(ctx.user_id.is_none());
    }
}
