//! Pipeline event observers.
//!
//! Observers are notified of request, response, and error events during a
//! dispatch. A failing observer never affects the response path; the pipeline
//! records the failure and moves on.

use std::time::Duration;

use crate::error::FloodgateError;
use crate::http::{Request, Response};
use crate::pipeline::context::RequestContext;

/// Receives dispatch lifecycle events from a [`Pipeline`].
///
/// All methods default to no-ops so implementations only override the events
/// they care about.
///
/// [`Pipeline`]: super::chain::Pipeline
pub trait Observer: Send + Sync {
    /// Called when a request enters the pipeline, before any stage runs.
    fn on_request(&self, _ctx: &RequestContext, _request: &Request) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called after the chain produced a response.
    fn on_response(
        &self,
        _ctx: &RequestContext,
        _response: &Response,
        _elapsed: Duration,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when a stage or the terminal handler returned an error.
    fn on_error(&self, _ctx: &RequestContext, _error: &FloodgateError) -> anyhow::Result<()> {
        Ok(())
    }
}
