//! Per-(app, endpoint) token bucket rate limiting.
//!
//! [`RateLimiter`] keeps one [`TokenBucket`] per key. Buckets are refilled by
//! the scheduler calling [`RateLimiter::refill_all`] on a fixed interval;
//! [`RateLimiter::try_acquire`] only consumes and never waits.
//!
//! Buckets live in memory only. A restart starts every bucket full.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::time::{Duration, Instant};

use crate::model::AppEndpointKey;

/// Token bucket for a single key.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    rate_per_second: f64,
    tokens_per_ms: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket.
    pub fn new(rate_per_second: u32, capacity: u32) -> Self {
        Self {
            capacity: f64::from(capacity),
            rate_per_second: f64::from(rate_per_second),
            tokens_per_ms: f64::from(rate_per_second) / 1000.0,
            tokens: f64::from(capacity),
            last_refill: Instant::now(),
        }
    }

    /// Adds tokens for the time elapsed since the last refill, capped at capacity.
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.add_elapsed(elapsed);
        self.last_refill = now;
    }

    fn add_elapsed(&mut self, elapsed: Duration) {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        self.tokens = (self.tokens + elapsed_ms * self.tokens_per_ms).min(self.capacity);
    }

    /// Consumes `requested` tokens if available.
    pub fn try_consume(&mut self, requested: u32) -> bool {
        let requested = f64::from(requested);
        if self.tokens >= requested {
            self.tokens -= requested;
            true
        } else {
            false
        }
    }

    /// Changes rate and capacity, settling the elapsed time at the old rate
    /// first. Added capacity is granted as tokens; removed capacity caps them.
    pub fn reconfigure(&mut self, rate_per_second: u32, capacity: u32, now: Instant) {
        self.refill(now);
        let capacity = f64::from(capacity);
        let added = (capacity - self.capacity).max(0.0);
        self.capacity = capacity;
        self.rate_per_second = f64::from(rate_per_second);
        self.tokens_per_ms = self.rate_per_second / 1000.0;
        self.tokens = (self.tokens + added).min(capacity);
    }

    pub fn config(&self) -> BucketConfig {
        BucketConfig {
            rate_per_second: self.rate_per_second(),
            capacity: self.capacity,
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn rate_per_second(&self) -> f64 {
        self.rate_per_second
    }
}

/// Configured limits of a bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketConfig {
    pub rate_per_second: f64,
    pub capacity: f64,
}

/// Concurrent map of token buckets.
///
/// The map lock is held only to look up or replace a bucket; consuming and
/// refilling lock the bucket itself, so different keys never contend.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: RwLock<HashMap<AppEndpointKey, Arc<Mutex<TokenBucket>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tries to take `tokens` from the key's bucket.
    ///
    /// A key without a bucket is always allowed.
    pub fn try_acquire(&self, key: &AppEndpointKey, tokens: u32) -> bool {
        let bucket = self.buckets.read().get(key).cloned();
        match bucket {
            Some(bucket) => bucket.lock().try_consume(tokens),
            None => true,
        }
    }

    /// Installs a fresh, full bucket for `key`, replacing any existing one.
    ///
    /// A zero rate or capacity removes the bucket instead.
    pub fn create_or_update(&self, key: AppEndpointKey, rate_per_second: u32, capacity: u32) {
        if rate_per_second == 0 || capacity == 0 {
            tracing::debug!(key = %key, "non-positive limit, removing rate limiter");
            self.remove(&key);
            return;
        }
        tracing::debug!(key = %key, rate_per_second, capacity, "rate limiter configured");
        self.buckets.write().insert(
            key,
            Arc::new(Mutex::new(TokenBucket::new(rate_per_second, capacity))),
        );
    }

    /// Brings the key's bucket in line with the given limits.
    ///
    /// A missing bucket is created full. A bucket with different limits is
    /// reconfigured in place through [`TokenBucket::reconfigure`]. A zero rate
    /// or capacity removes the bucket. Returns whether
    /// anything changed.
    pub fn sync_limits(&self, key: &AppEndpointKey, rate_per_second: u32, capacity: u32) -> bool {
        if rate_per_second == 0 || capacity == 0 {
            return self.remove(key);
        }
        let wanted = BucketConfig {
            rate_per_second: f64::from(rate_per_second),
            capacity: f64::from(capacity),
        };
        if let Some(bucket) = self.buckets.read().get(key) {
            let mut bucket = bucket.lock();
            if bucket.config() == wanted {
                return false;
            }
            bucket.reconfigure(rate_per_second, capacity, Instant::now());
            return true;
        }

        let mut buckets = self.buckets.write();
        if let Some(bucket) = buckets.get(key) {
            bucket
                .lock()
                .reconfigure(rate_per_second, capacity, Instant::now());
        } else {
            buckets.insert(
                key.clone(),
                Arc::new(Mutex::new(TokenBucket::new(rate_per_second, capacity))),
            );
        }
        true
    }

    /// Removes the key's bucket; later calls treat the key as unconfigured.
    pub fn remove(&self, key: &AppEndpointKey) -> bool {
        self.buckets.write().remove(key).is_some()
    }

    /// Refills every bucket up to now.
    pub fn refill_all(&self) {
        let now = Instant::now();
        let buckets: Vec<_> = self.buckets.read().values().cloned().collect();
        for bucket in buckets {
            bucket.lock().refill(now);
        }
    }

    pub fn config(&self, key: &AppEndpointKey) -> Option<BucketConfig> {
        self.buckets.read().get(key).map(|bucket| bucket.lock().config())
    }

    /// Current token count, `None` for an unconfigured key.
    pub fn available_tokens(&self, key: &AppEndpointKey) -> Option<f64> {
        self.buckets.read().get(key).map(|bucket| bucket.lock().tokens())
    }

    pub fn len(&self) -> usize {
        self.buckets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.read().is_empty()
    }
}
