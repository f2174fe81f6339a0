//! Rate limiting: per-key quota tracking, key derivation, and the pipeline
//! stage that ties them together.

pub mod config;
pub mod key;
pub mod limiter;
pub mod registry;
pub mod stage;

pub use config::{KeyExtractor, RateLimit, RateLimitConfig, Strategy};
pub use key::{derive_key, RequestInfo};
pub use limiter::{Decision, RateLimiter};
pub use registry::{CleanupHandle, LimiterRegistry};
pub use stage::RateLimitStage;
