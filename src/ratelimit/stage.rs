//! The pipeline stage that drives the rate limiter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, trace};

use super::config::RateLimitConfig;
use super::key::{derive_key, RequestInfo};
use super::limiter::Decision;
use super::registry::{CleanupHandle, LimiterRegistry};
use crate::error::Result;
use crate::http::{Request, Response};
use crate::metrics::MetricsSnapshot;
use crate::pipeline::{Next, RequestContext, Stage, StageCore};

/// Default dispatch priority; early enough to shed load before expensive
/// stages run.
const DEFAULT_PRIORITY: i32 = 20;

/// Admission-control stage: derives a key per request, checks its quota,
/// and either forwards the request or returns a structured rejection.
///
/// Must be created inside a tokio runtime; construction spawns the
/// background cleanup task that bounds registry memory.
pub struct RateLimitStage {
    core: StageCore,
    config: RateLimitConfig,
    registry: Arc<LimiterRegistry>,
    cleanup: CleanupHandle,
}

impl RateLimitStage {
    /// Default stage name.
    pub const NAME: &'static str = "rate-limit";

    /// Create the stage with the default name and priority.
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_priority(config, DEFAULT_PRIORITY)
    }

    /// Create the stage with an explicit priority.
    pub fn with_priority(config: RateLimitConfig, priority: i32) -> Self {
        let registry = Arc::new(LimiterRegistry::new(
            config.strategy,
            config.block_duration(),
            config.memory_limit,
        ));
        let cleanup = registry.start_cleanup(config.cleanup_interval());

        Self {
            core: StageCore::new(Self::NAME, priority),
            config,
            registry,
            cleanup,
        }
    }

    /// Enable or disable this stage for subsequent dispatches.
    pub fn set_enabled(&self, enabled: bool) {
        self.core.set_enabled(enabled);
    }

    /// The per-key limiter registry backing this stage.
    pub fn registry(&self) -> &Arc<LimiterRegistry> {
        &self.registry
    }

    /// Stop the background cleanup task. Idempotent.
    pub fn shutdown(&self) {
        self.cleanup.stop();
    }

    /// Snapshot of this stage's counters plus registry occupancy.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.core
            .metrics()
            .snapshot(self.registry.len(), self.registry.evicted_count())
    }

    /// Whether the request bypasses rate limiting entirely.
    fn should_skip(&self, info: &RequestInfo) -> bool {
        self.config.skip_paths.iter().any(|p| p == &info.path)
            || self
                .config
                .skip_methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(&info.method))
            || self.config.skip_ips.iter().any(|ip| ip == &info.ip)
            || (!info.user_id.is_empty()
                && self.config.skip_users.iter().any(|u| u == &info.user_id))
    }

    /// Build the structured rejection for a denied request.
    fn rejection(&self, decision: &Decision) -> Response {
        let retry_after_secs = decision
            .retry_after
            .map(|d| d.as_secs_f64().ceil() as u64)
            .unwrap_or(0);

        let body = serde_json::json!({
            "error": self.config.error_message,
            "retry_after": retry_after_secs,
        })
        .to_string();

        let mut response = Response::new(self.config.error_status_code).with_body(body);
        if self.config.include_retry_after {
            response.set_header("Retry-After", retry_after_secs.to_string());
        }
        if self.config.include_rate_limit_headers {
            annotate(&mut response, decision);
        }
        response
    }
}

impl Drop for RateLimitStage {
    fn drop(&mut self) {
        self.cleanup.stop();
    }
}

/// Attach the quota headers for a decision to a response.
fn annotate(response: &mut Response, decision: &Decision) {
    response.set_header("X-RateLimit-Limit", decision.limit.to_string());
    response.set_header("X-RateLimit-Remaining", decision.remaining.to_string());
    response.set_header(
        "X-RateLimit-Reset",
        ceil_secs(decision.reset_after).to_string(),
    );
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs_f64().ceil() as u64
}

#[async_trait]
impl Stage for RateLimitStage {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn priority(&self) -> i32 {
        self.core.priority()
    }

    fn enabled(&self) -> bool {
        self.core.enabled()
    }

    async fn process(
        &self,
        ctx: &mut RequestContext,
        request: Request,
        next: Next<'_>,
    ) -> Result<Response> {
        self.core.metrics().record_request();
        let info = RequestInfo::from_request(&request);

        if self.should_skip(&info) {
            trace!(
                request_id = %ctx.request_id,
                path = %info.path,
                "Request matches a skip rule, bypassing rate limit"
            );
            return next.run(ctx, request).await;
        }

        let key = derive_key(&info, &self.config);
        let limit = self.config.resolve_limit(&info.path, &info.method);
        let limiter = self.registry.get_or_create(&key, limit);
        let decision = limiter.check(Instant::now());

        if !decision.allowed {
            self.core.metrics().record_blocked();
            debug!(
                request_id = %ctx.request_id,
                key = %key,
                path = %info.path,
                "Rejecting rate-limited request"
            );
            return Ok(self.rejection(&decision));
        }

        self.core.metrics().record_allowed();
        let mut response = next.run(ctx, request).await?;
        if self.config.include_rate_limit_headers {
            annotate(&mut response, &decision);
        }
        Ok(response)
    }
}
