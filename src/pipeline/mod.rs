//! Middleware pipeline: named, prioritized stages composed around a
//! terminal handler.

pub mod chain;
pub mod context;
pub mod observer;
pub mod stage;

pub use chain::Pipeline;
pub use context::RequestContext;
pub use observer::Observer;
pub use stage::{Handler, HandlerFn, Next, Stage, StageCore};
