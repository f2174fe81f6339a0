//! The middleware pipeline: an ordered collection of stages around a
//! terminal handler.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use super::context::RequestContext;
use super::observer::Observer;
use super::stage::{Handler, Next, Stage};
use crate::error::{FloodgateError, Result};
use crate::http::{Request, Response};
use crate::metrics::{Metrics, MetricsSnapshot};

/// An ordered, prioritized chain of stages ending in a terminal handler.
///
/// Thread-safe: stages and observers can be added while requests are in
/// flight, and concurrent dispatches share the same stage set.
pub struct Pipeline {
    /// Registered stages, kept sorted by ascending priority.
    /// The sort is stable, so equal priorities keep insertion order.
    stages: RwLock<Vec<Arc<dyn Stage>>>,
    /// Terminal handler invoked when the request clears every stage
    handler: Arc<dyn Handler>,
    /// Observers notified of dispatch lifecycle events
    observers: RwLock<Vec<Arc<dyn Observer>>>,
    /// Most recent observer failure, kept for diagnostics only
    last_observer_error: Mutex<Option<String>>,
    metrics: Metrics,
}

impl Pipeline {
    /// Create a pipeline with no stages around the given terminal handler.
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        Self {
            stages: RwLock::new(Vec::new()),
            handler,
            observers: RwLock::new(Vec::new()),
            last_observer_error: Mutex::new(None),
            metrics: Metrics::new(),
        }
    }

    /// Register a stage.
    ///
    /// Fails if the stage name is empty, or if a stage with the same name is
    /// already registered. Name uniqueness keeps `stage`/`remove_stage`
    /// unambiguous.
    pub fn add_stage(&self, stage: Arc<dyn Stage>) -> Result<()> {
        if stage.name().is_empty() {
            return Err(FloodgateError::Config(
                "stage name must not be empty".to_string(),
            ));
        }

        let mut stages = self.stages.write();
        if stages.iter().any(|s| s.name() == stage.name()) {
            return Err(FloodgateError::DuplicateStage(stage.name().to_string()));
        }

        debug!(
            stage = %stage.name(),
            priority = stage.priority(),
            "Registering pipeline stage"
        );

        stages.push(stage);
        stages.sort_by_key(|s| s.priority());
        Ok(())
    }

    /// Remove the stage with the given name.
    pub fn remove_stage(&self, name: &str) -> Result<()> {
        let mut stages = self.stages.write();
        let before = stages.len();
        stages.retain(|s| s.name() != name);

        if stages.len() == before {
            return Err(FloodgateError::StageNotFound(name.to_string()));
        }

        debug!(stage = %name, "Removed pipeline stage");
        Ok(())
    }

    /// Look up a stage by name.
    pub fn stage(&self, name: &str) -> Option<Arc<dyn Stage>> {
        self.stages.read().iter().find(|s| s.name() == name).cloned()
    }

    /// List registered stage names in dispatch order.
    pub fn stage_names(&self) -> Vec<String> {
        self.stages
            .read()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Register an observer for dispatch lifecycle events.
    pub fn add_observer(&self, observer: Arc<dyn Observer>) {
        self.observers.write().push(observer);
    }

    /// Thread a request through every enabled stage in priority order.
    ///
    /// A stage may short-circuit by returning a response without invoking its
    /// continuation; an error from any stage aborts the remainder of the
    /// chain and propagates to the caller.
    pub async fn dispatch(&self, ctx: &mut RequestContext, request: Request) -> Result<Response> {
        self.metrics.record_request();

        let observers: Vec<Arc<dyn Observer>> = self.observers.read().clone();
        for observer in &observers {
            if let Err(e) = observer.on_request(ctx, &request) {
                self.record_observer_error(&e);
            }
        }

        // The enabled set is fixed per dispatch; toggling a stage mid-flight
        // affects only later requests.
        let enabled: Vec<Arc<dyn Stage>> = self
            .stages
            .read()
            .iter()
            .filter(|s| s.enabled())
            .cloned()
            .collect();

        trace!(
            request_id = %ctx.request_id,
            stages = enabled.len(),
            "Dispatching request"
        );

        let started = Instant::now();
        let result = Next::new(&enabled, self.handler.as_ref())
            .run(ctx, request)
            .await;
        let elapsed = started.elapsed();

        match &result {
            Ok(response) => {
                for observer in &observers {
                    if let Err(e) = observer.on_response(ctx, response, elapsed) {
                        self.record_observer_error(&e);
                    }
                }
            }
            Err(error) => {
                self.metrics.record_error();
                for observer in &observers {
                    if let Err(e) = observer.on_error(ctx, error) {
                        self.record_observer_error(&e);
                    }
                }
            }
        }

        result
    }

    /// The most recent observer failure, if any. Diagnostic only.
    pub fn last_observer_error(&self) -> Option<String> {
        self.last_observer_error.lock().clone()
    }

    /// Snapshot of pipeline-level counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(0, 0)
    }

    fn record_observer_error(&self, error: &anyhow::Error) {
        warn!(error = %error, "Pipeline observer failed");
        *self.last_observer_error.lock() = Some(error.to_string());
    }
}
