//! Floodgate - Request Middleware Pipeline with Rate Limiting
//!
//! This crate implements a framework-agnostic middleware pipeline: named,
//! prioritized stages composed around a terminal handler, dispatched through
//! an explicit continuation. Its flagship stage is a concurrency-safe rate
//! limiter with three interchangeable algorithms (token bucket, fixed
//! window, sliding window), per-key isolated state, and background eviction
//! of idle keys.

pub mod error;
pub mod http;
pub mod metrics;
pub mod pipeline;
pub mod ratelimit;
