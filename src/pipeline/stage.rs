//! The stage abstraction and its continuation.
//!
//! A stage is one named, prioritized unit of request processing. Stages are
//! handed an explicit [`Next`] continuation instead of a raw closure: calling
//! `next.run(..)` forwards the request to the remainder of the chain, and not
//! calling it short-circuits the dispatch with the stage's own response.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::context::RequestContext;
use crate::error::Result;
use crate::http::{Request, Response};
use crate::metrics::Metrics;

/// One unit of request processing in a [`Pipeline`].
///
/// Identity is by `name`; a pipeline rejects duplicate names at registration
/// time. Lower `priority` values run earlier.
///
/// [`Pipeline`]: super::chain::Pipeline
#[async_trait]
pub trait Stage: Send + Sync {
    /// Unique name of this stage within a pipeline.
    fn name(&self) -> &str;

    /// Dispatch order; lower values run first, ties keep insertion order.
    fn priority(&self) -> i32;

    /// Disabled stages are skipped entirely by dispatch.
    fn enabled(&self) -> bool;

    /// Process a request, either forwarding it via `next` or returning a
    /// response directly without calling `next`.
    async fn process(
        &self,
        ctx: &mut RequestContext,
        request: Request,
        next: Next<'_>,
    ) -> Result<Response>;
}

/// Shared state every stage implementation carries by composition.
///
/// Wraps the fields common to all stages (name, priority, enable flag,
/// counters); concrete stages delegate their [`Stage`] accessors to it.
pub struct StageCore {
    name: String,
    priority: i32,
    enabled: AtomicBool,
    metrics: Metrics,
}

impl StageCore {
    /// Create stage state with the given name and priority, enabled.
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
            enabled: AtomicBool::new(true),
            metrics: Metrics::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Enable or disable the owning stage at runtime.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// The stage's request counters.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/// The terminal handler a pipeline forwards to after the last stage.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Produce the final response for a request that passed every stage.
    async fn handle(&self, ctx: &mut RequestContext, request: Request) -> Result<Response>;
}

/// Adapter turning a synchronous closure into a [`Handler`].
pub struct HandlerFn<F>(pub F);

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: Fn(&mut RequestContext, Request) -> Result<Response> + Send + Sync,
{
    async fn handle(&self, ctx: &mut RequestContext, request: Request) -> Result<Response> {
        (self.0)(ctx, request)
    }
}

/// Continuation handed to a stage, representing the rest of the chain.
///
/// Running it consumes it: a stage can forward a request at most once.
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub(crate) fn new(stages: &'a [Arc<dyn Stage>], handler: &'a dyn Handler) -> Self {
        Self { stages, handler }
    }

    /// Forward the request to the next stage, or to the terminal handler if
    /// this stage was the last one.
    pub async fn run(self, ctx: &mut RequestContext, request: Request) -> Result<Response> {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                stage
                    .process(ctx, request, Next::new(rest, self.handler))
                    .await
            }
            None => self.handler.handle(ctx, request).await,
        }
    }
}
