//! End-to-end pipeline behavior, with tracing output enabled.

use std::sync::Arc;

use floodgate::error::FloodgateError;
use tokio_test::{assert_err, assert_ok};
use floodgate::http::{Request, Response};
use floodgate::pipeline::{HandlerFn, Pipeline, RequestContext};
use floodgate::ratelimit::{RateLimit, RateLimitConfig, RateLimitStage};

/// Initialize tracing for the test binary. Safe to call from every test.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "floodgate=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn limited_pipeline(burst: u64) -> (Pipeline, Arc<RateLimitStage>) {
    let config = RateLimitConfig {
        limit: RateLimit {
            requests_per_second: 0.001,
            requests_per_minute: 0,
            burst_size: burst,
            ..RateLimit::default()
        },
        ..RateLimitConfig::default()
    };

    let stage = Arc::new(RateLimitStage::new(config));
    let pipeline = Pipeline::new(Arc::new(HandlerFn(|_: &mut RequestContext, _| {
        Ok(Response::new(200).with_body("ok"))
    })));
    pipeline.add_stage(stage.clone()).unwrap();
    (pipeline, stage)
}

#[tokio::test]
async fn test_rate_limited_pipeline_end_to_end() {
    init_tracing();

    let (pipeline, stage) = limited_pipeline(2);
    let mut ctx = RequestContext::new();
    let request = Request::new("GET", "/api").with_ip("1.2.3.4");

    for _ in 0..2 {
        let response = tokio_test::assert_ok!(pipeline.dispatch(&mut ctx, request.clone()).await);
        assert_eq!(response.status_code, 200);
    }

    let denied = tokio_test::assert_ok!(pipeline.dispatch(&mut ctx, request).await);
    assert_eq!(denied.status_code, 429);
    assert!(denied.headers.contains_key("Retry-After"));

    let metrics = stage.metrics();
    assert_eq!(metrics.total_requests, 3);
    assert_eq!(metrics.allowed_requests, 2);
    assert_eq!(metrics.blocked_requests, 1);

    stage.shutdown();
}

#[tokio::test]
async fn test_handler_error_surfaces_to_caller() {
    init_tracing();

    let pipeline = Pipeline::new(Arc::new(HandlerFn(|_: &mut RequestContext, _| {
        Err(FloodgateError::Upstream(anyhow::anyhow!(
            "backend unavailable"
        )))
    })));

    let mut ctx = RequestContext::new();
    let error =
        tokio_test::assert_err!(pipeline.dispatch(&mut ctx, Request::new("GET", "/")).await);
    assert!(matches!(error, FloodgateError::Upstream(_)));
    assert_eq!(pipeline.metrics().error_count, 1);
}
