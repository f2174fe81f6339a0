//! Per-key rate limiter implementing the three admission-control algorithms.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::config::{RateLimit, Strategy};

/// Length of the minute window used by the fixed and sliding strategies.
const MINUTE: Duration = Duration::from_secs(60);

/// Outcome of one admission check, with quota metadata for response headers.
#[derive(Debug, Clone, Copy)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// The enforced limit, for `X-RateLimit-Limit`
    pub limit: u64,
    /// Requests left before denial, for `X-RateLimit-Remaining`
    pub remaining: u64,
    /// Time until the quota is fully replenished or the window rolls over
    pub reset_after: Duration,
    /// How long a denied caller should wait before retrying
    pub retry_after: Option<Duration>,
}

/// Quota tracker for a single derived key.
///
/// All mutable state sits behind one mutex; the critical section is bounded
/// (O(1), or O(window size) for the sliding window prune) and never touches
/// I/O, so checks from concurrent tasks serialize cheaply and account
/// exactly.
pub struct RateLimiter {
    key: String,
    limit: RateLimit,
    strategy: Strategy,
    /// Penalty applied after a denial; `None` disables blocking
    block_duration: Option<Duration>,
    state: Mutex<LimiterState>,
}

struct LimiterState {
    /// Token bucket: current tokens, never above `burst_size`
    tokens: f64,
    /// Token bucket: last refill instant
    last_refill: Instant,
    /// Fixed window: when the current window opened
    window_start: Instant,
    /// Fixed window: admissions in the current window
    window_requests: u64,
    /// Sliding window: admission timestamps within the trailing minute
    timestamps: VecDeque<Instant>,
    /// Deny everything until this instant, when block_duration is set
    blocked_until: Option<Instant>,
    total: u64,
    allowed: u64,
    blocked: u64,
    /// Drives idle eviction in the registry
    last_activity: Instant,
}

impl RateLimiter {
    /// Create a limiter for a key. The token bucket starts full.
    pub fn new(key: impl Into<String>, limit: RateLimit, strategy: Strategy) -> Self {
        let now = Instant::now();
        Self {
            key: key.into(),
            limit,
            strategy,
            block_duration: None,
            state: Mutex::new(LimiterState {
                tokens: limit.burst_size as f64,
                last_refill: now,
                window_start: now,
                window_requests: 0,
                timestamps: VecDeque::new(),
                blocked_until: None,
                total: 0,
                allowed: 0,
                blocked: 0,
                last_activity: now,
            }),
        }
    }

    /// Deny a key for this long after any denial.
    pub fn with_block_duration(mut self, duration: Duration) -> Self {
        self.block_duration = Some(duration);
        self
    }

    /// Run one admission check at the given instant.
    ///
    /// Taking `now` as a parameter keeps the algorithms deterministic and
    /// testable without sleeping; callers pass `Instant::now()`.
    pub fn check(&self, now: Instant) -> Decision {
        let mut state = self.state.lock();
        state.total += 1;
        state.last_activity = now;

        if let Some(until) = state.blocked_until {
            if now < until {
                state.blocked += 1;
                trace!(key = %self.key, "Key is in its block window");
                return Decision {
                    allowed: false,
                    limit: self.enforced_limit(),
                    remaining: 0,
                    reset_after: until - now,
                    retry_after: Some(until - now),
                };
            }
            state.blocked_until = None;
        }

        let decision = match self.strategy {
            Strategy::TokenBucket => self.check_token_bucket(&mut state, now),
            Strategy::FixedWindow => self.check_fixed_window(&mut state, now),
            Strategy::SlidingWindow => self.check_sliding_window(&mut state, now),
        };

        if decision.allowed {
            state.allowed += 1;
        } else {
            state.blocked += 1;
            if let Some(duration) = self.block_duration {
                state.blocked_until = Some(now + duration);
            }
            debug!(
                key = %self.key,
                strategy = ?self.strategy,
                remaining = decision.remaining,
                "Rate limit exceeded"
            );
        }

        decision
    }

    fn check_token_bucket(&self, state: &mut LimiterState, now: Instant) -> Decision {
        let rate = self.limit.requests_per_second;
        let burst = self.limit.burst_size as f64;

        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * rate).min(burst);
        state.last_refill = now;

        let allowed = state.tokens >= 1.0;
        if allowed {
            state.tokens -= 1.0;
        }

        let retry_after = if rate > 0.0 {
            Duration::from_secs_f64(1.0 / rate)
        } else {
            Duration::from_secs(1)
        };
        let reset_after = if rate > 0.0 {
            Duration::from_secs_f64(((burst - state.tokens) / rate).max(0.0))
        } else {
            Duration::ZERO
        };

        Decision {
            allowed,
            limit: self.limit.burst_size,
            remaining: state.tokens.floor() as u64,
            reset_after,
            retry_after: if allowed { None } else { Some(retry_after) },
        }
    }

    fn check_fixed_window(&self, state: &mut LimiterState, now: Instant) -> Decision {
        let (window, limit) = self.fixed_window_params();

        if now.duration_since(state.window_start) >= window {
            state.window_start = now;
            state.window_requests = 0;
        }

        let allowed = state.window_requests < limit;
        if allowed {
            state.window_requests += 1;
        }

        let reset_after = window - now.duration_since(state.window_start);

        Decision {
            allowed,
            limit,
            remaining: limit.saturating_sub(state.window_requests),
            reset_after,
            retry_after: if allowed { None } else { Some(reset_after) },
        }
    }

    fn check_sliding_window(&self, state: &mut LimiterState, now: Instant) -> Decision {
        let limit = self.limit.requests_per_minute;

        // Prune everything that has aged out of the trailing window.
        while let Some(oldest) = state.timestamps.front() {
            if now.duration_since(*oldest) >= MINUTE {
                state.timestamps.pop_front();
            } else {
                break;
            }
        }

        let allowed = (state.timestamps.len() as u64) < limit;
        if allowed {
            state.timestamps.push_back(now);
        }

        let until_oldest_expires = state
            .timestamps
            .front()
            .map(|oldest| MINUTE - now.duration_since(*oldest))
            .unwrap_or(MINUTE);

        Decision {
            allowed,
            limit,
            remaining: limit.saturating_sub(state.timestamps.len() as u64),
            reset_after: until_oldest_expires,
            retry_after: if allowed {
                None
            } else {
                Some(until_oldest_expires)
            },
        }
    }

    /// Window length and limit for the fixed window strategy.
    ///
    /// The minute window applies whenever a per-minute limit is configured;
    /// otherwise a one-second window enforces `requests_per_second` truncated
    /// to an integer.
    fn fixed_window_params(&self) -> (Duration, u64) {
        if self.limit.requests_per_minute > 0 {
            (MINUTE, self.limit.requests_per_minute)
        } else {
            (Duration::from_secs(1), self.limit.requests_per_second as u64)
        }
    }

    /// The limit reported in decisions, without running a check.
    fn enforced_limit(&self) -> u64 {
        match self.strategy {
            Strategy::TokenBucket => self.limit.burst_size,
            Strategy::FixedWindow => self.fixed_window_params().1,
            Strategy::SlidingWindow => self.limit.requests_per_minute,
        }
    }

    /// The key this limiter tracks.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The limits this limiter enforces.
    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Instant of the most recent check.
    pub fn last_activity(&self) -> Instant {
        self.state.lock().last_activity
    }

    /// Cumulative (total, allowed, blocked) counters.
    pub fn counters(&self) -> (u64, u64, u64) {
        let state = self.state.lock();
        (state.total, state.allowed, state.blocked)
    }
}
