//! Per-action-class token bucket rate limiting.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

/// Classes of operations that are rate limited independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionClass {
    /// Transcription requests (BYOK system, user manages their own costs).
    Transcription,
    /// Authentication attempts (security critical, strictest limit).
    Authentication,
    /// Window operations (permissive, UI responsiveness).
    WindowOperation,
}

impl std::fmt::Display for ActionClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionClass::Transcription => write!(f, "transcription"),
            ActionClass::Authentication => write!(f, "authentication"),
            ActionClass::WindowOperation => write!(f, "window-operation"),
        }
    }
}

/// A bucket's configured capacity and refill cadence.
///
/// `capacity` tokens refill evenly over `refill_interval`, capped at
/// `capacity`.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    /// Maximum tokens the bucket can hold.
    pub capacity: u32,
    /// Interval over which a full `capacity` worth of tokens refills.
    pub refill_interval: Duration,
}

impl RateLimit {
    /// A limit of `capacity` requests per minute.
    pub fn per_minute(capacity: u32) -> Self {
        Self {
            capacity,
            refill_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    limit: RateLimit,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            tokens: f64::from(limit.capacity),
            last_refill: Instant::now(),
        }
    }

    /// Refill proportionally to elapsed time, capped at capacity.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        let interval = self.limit.refill_interval.as_secs_f64();
        if interval > 0.0 {
            let refilled = self.tokens + elapsed / interval * f64::from(self.limit.capacity);
            self.tokens = refilled.min(f64::from(self.limit.capacity));
        }
        self.last_refill = now;
    }
}

/// Token bucket admission control, one independent bucket per [`ActionClass`].
///
/// Failure policy: if the internal state is unreadable (poisoned lock), the
/// limiter fails open for non-authentication classes and fails closed for
/// [`ActionClass::Authentication`]. Either way the decision is logged.
pub struct RateLimiter {
    buckets: Mutex<HashMap<ActionClass, Bucket>>,
}

impl RateLimiter {
    /// Create a limiter with the production limits: 20 transcriptions,
    /// 3 authentication attempts and 30 window operations per minute.
    pub fn new() -> Self {
        let mut limits = HashMap::new();
        limits.insert(ActionClass::Transcription, RateLimit::per_minute(20));
        limits.insert(ActionClass::Authentication, RateLimit::per_minute(3));
        limits.insert(ActionClass::WindowOperation, RateLimit::per_minute(30));
        Self::with_limits(limits)
    }

    /// Create a limiter with custom limits. Classes not present in `limits`
    /// are never limited.
    pub fn with_limits(limits: HashMap<ActionClass, RateLimit>) -> Self {
        let buckets = limits
            .into_iter()
            .map(|(class, limit)| (class, Bucket::new(limit)))
            .collect();
        Self {
            buckets: Mutex::new(buckets),
        }
    }

    /// Try to consume one token for `class`.
    ///
    /// Returns `true` if the operation is allowed. A denial leaves the bucket
    /// unchanged so that blocked callers do not push the refill horizon out.
    pub fn try_consume(&self, class: ActionClass) -> bool {
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(_) => {
                // Poisoned state: authentication fails closed, everything
                // else fails open.
                let allow = class != ActionClass::Authentication;
                warn!(
                    action = %class,
                    allow,
                    "rate limiter state unreadable, applying failure policy"
                );
                return allow;
            }
        };

        let Some(bucket) = buckets.get_mut(&class) else {
            return true;
        };

        bucket.refill(Instant::now());
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            warn!(action = %class, "rate limit exceeded");
            false
        }
    }

    /// Current token count for `class`, if it is limited.
    ///
    /// Observability helper; the count is refreshed before reading.
    pub fn tokens_remaining(&self, class: ActionClass) -> Option<f64> {
        let mut buckets = self.buckets.lock().ok()?;
        let bucket = buckets.get_mut(&class)?;
        bucket.refill(Instant::now());
        Some(bucket.tokens)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
