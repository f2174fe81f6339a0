//! Concurrent registry of per-key limiters, with idle eviction.
//!
//! Lookups take a read lock; only a miss takes the write lock to insert.
//! A background sweep evicts limiters idle beyond twice the cleanup
//! interval, bounding memory under high key cardinality.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info, trace};

use super::config::{RateLimit, Strategy};
use super::limiter::RateLimiter;

/// Map from derived key to its [`RateLimiter`], lazily populated.
pub struct LimiterRegistry {
    limiters: RwLock<HashMap<String, Arc<RateLimiter>>>,
    strategy: Strategy,
    block_duration: Option<Duration>,
    /// Cap on live limiters; 0 means unbounded
    memory_limit: usize,
    /// Limiters removed by sweeps or capacity eviction since creation
    evicted: AtomicU64,
}

impl LimiterRegistry {
    /// Create an empty registry. Every limiter it creates runs the given
    /// strategy and block duration.
    pub fn new(strategy: Strategy, block_duration: Option<Duration>, memory_limit: usize) -> Self {
        Self {
            limiters: RwLock::new(HashMap::new()),
            strategy,
            block_duration,
            memory_limit,
            evicted: AtomicU64::new(0),
        }
    }

    /// Fetch the limiter for a key, creating it on first use.
    ///
    /// The fast path is a read-locked lookup. On a miss the write lock is
    /// taken and the entry re-checked, so concurrent misses for the same key
    /// converge on a single limiter (first insert wins).
    pub fn get_or_create(&self, key: &str, limit: RateLimit) -> Arc<RateLimiter> {
        if let Some(limiter) = self.limiters.read().get(key) {
            return limiter.clone();
        }

        let mut limiters = self.limiters.write();

        if self.memory_limit > 0
            && limiters.len() >= self.memory_limit
            && !limiters.contains_key(key)
        {
            self.evict_stalest(&mut limiters);
        }

        limiters
            .entry(key.to_string())
            .or_insert_with(|| {
                trace!(key = %key, strategy = ?self.strategy, "Creating rate limiter");
                let mut limiter = RateLimiter::new(key, limit, self.strategy);
                if let Some(duration) = self.block_duration {
                    limiter = limiter.with_block_duration(duration);
                }
                Arc::new(limiter)
            })
            .clone()
    }

    /// Remove limiters idle for longer than `idle_threshold`.
    ///
    /// A limiter mid-check is never corrupted: its own mutex serializes the
    /// check, and dropping the map entry only drops one `Arc` reference.
    pub fn sweep(&self, idle_threshold: Duration, now: Instant) -> usize {
        let mut limiters = self.limiters.write();
        let before = limiters.len();

        limiters.retain(|key, limiter| {
            let idle = now.duration_since(limiter.last_activity());
            if idle > idle_threshold {
                trace!(key = %key, idle_secs = idle.as_secs(), "Evicting idle limiter");
                false
            } else {
                true
            }
        });

        let removed = before - limiters.len();
        if removed > 0 {
            self.evicted.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, remaining = limiters.len(), "Swept idle rate limiters");
        }
        removed
    }

    /// Start the background sweep, firing every `interval` and evicting
    /// limiters idle beyond `2 × interval`.
    ///
    /// The returned handle stops the task; the task also ends on its own if
    /// the registry or the handle is dropped.
    pub fn start_cleanup(self: &Arc<Self>, interval: Duration) -> CleanupHandle {
        // tokio panics on a zero interval period.
        let interval = interval.max(Duration::from_millis(1));
        let (tx, mut rx) = watch::channel(false);
        let registry = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(registry) = registry.upgrade() else {
                            break;
                        };
                        registry.sweep(interval * 2, Instant::now());
                    }
                    _ = rx.changed() => {
                        break;
                    }
                }
            }
            info!("Rate limiter cleanup task stopped");
        });

        CleanupHandle { stop: tx }
    }

    /// Number of live limiters.
    pub fn len(&self) -> usize {
        self.limiters.read().len()
    }

    /// Whether the registry holds no limiters.
    pub fn is_empty(&self) -> bool {
        self.limiters.read().is_empty()
    }

    /// Whether a limiter exists for the key.
    pub fn contains(&self, key: &str) -> bool {
        self.limiters.read().contains_key(key)
    }

    /// Limiters evicted since the registry was created.
    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Drop all limiters. Primarily useful for tests.
    pub fn clear(&self) {
        self.limiters.write().clear();
    }

    /// Drop the least recently active limiter to make room. Caller holds the
    /// write lock.
    fn evict_stalest(&self, limiters: &mut HashMap<String, Arc<RateLimiter>>) {
        let stalest = limiters
            .iter()
            .min_by_key(|(_, limiter)| limiter.last_activity())
            .map(|(key, _)| key.clone());

        if let Some(key) = stalest {
            debug!(key = %key, "Registry at capacity, evicting stalest limiter");
            limiters.remove(&key);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Stops a registry's background sweep.
///
/// `stop` is idempotent and safe to call from multiple tasks; the signal is a
/// one-shot watch channel, so it cannot be missed under contention.
pub struct CleanupHandle {
    stop: watch::Sender<bool>,
}

impl CleanupHandle {
    /// Signal the sweep task to stop. Never blocks.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}
