//! Time-windowed replay suppression.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::warn;

/// Default deduplication window.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// Tracks recently seen attempt keys and rejects repeats inside a window.
///
/// A live duplicate does not refresh its own window: the entry keeps its
/// first-seen timestamp, so a stream of retries expires at the same moment a
/// single attempt would. Expired entries are evicted opportunistically on
/// every call, bounding memory to the active window regardless of call volume.
pub struct DeduplicationTracker {
    window: Duration,
    attempts: Mutex<HashMap<String, Instant>>,
}

impl DeduplicationTracker {
    /// Tracker with the default 60 second window.
    pub fn new() -> Self {
        Self::with_window(DEFAULT_DEDUP_WINDOW)
    }

    /// Tracker with a custom window.
    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether `key` was already seen inside the window.
    ///
    /// Returns `true` for a duplicate (and does not touch the stored
    /// timestamp). Returns `false` for a new or expired key, recording the
    /// current time for it.
    pub fn is_duplicate(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut attempts = self
            .attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // Opportunistic eviction keeps the map bounded.
        attempts.retain(|_, first_seen| now.duration_since(*first_seen) < self.window);

        if attempts.contains_key(key) {
            warn!(key, "duplicate attempt blocked");
            return true;
        }

        attempts.insert(key.to_string(), now);
        false
    }

    /// Drop every tracked attempt.
    pub fn clear(&self) {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of attempts currently tracked.
    pub fn len(&self) -> usize {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no attempts are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DeduplicationTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_attempt_is_not_duplicate() {
        let tracker = DeduplicationTracker::new();
        assert!(!tracker.is_duplicate("challenge-1:session-1"));
    }

    #[test]
    fn test_repeat_within_window_is_duplicate() {
        let tracker = DeduplicationTracker::new();
        assert!(!tracker.is_duplicate("key"));
        assert!(tracker.is_duplicate("key"));
        assert!(tracker.is_duplicate("key"));
    }

    #[test]
    fn test_distinct_keys_are_independent() {
        let tracker = DeduplicationTracker::new();
        assert!(!tracker.is_duplicate("a"));
        assert!(!tracker.is_duplicate("b"));
        assert!(tracker.is_duplicate("a"));
    }

    #[test]
    fn test_expired_key_is_allowed_again() {
        let tracker = DeduplicationTracker::with_window(Duration::from_millis(50));
        assert!(!tracker.is_duplicate("key"));
        std::thread::sleep(Duration::from_millis(80));
        assert!(!tracker.is_duplicate("key"));
    }

    #[test]
    fn test_duplicate_does_not_extend_window() {
        let tracker = DeduplicationTracker::with_window(Duration::from_millis(500));
        assert!(!tracker.is_duplicate("key"));

        // Retry partway through the window: still blocked, but the
        // first-seen timestamp must not move.
        std::thread::sleep(Duration::from_millis(200));
        assert!(tracker.is_duplicate("key"));

        // Past the original window the key is fresh again, even though the
        // retry landed inside it.
        std::thread::sleep(Duration::from_millis(400));
        assert!(!tracker.is_duplicate("key"));
    }

    #[test]
    fn test_eviction_bounds_memory() {
        let tracker = DeduplicationTracker::with_window(Duration::from_millis(200));
        for i in 0..50 {
            assert!(!tracker.is_duplicate(&format!("key-{i}")));
        }
        assert_eq!(tracker.len(), 50);

        std::thread::sleep(Duration::from_millis(300));
        assert!(!tracker.is_duplicate("fresh"));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_clear() {
        let tracker = DeduplicationTracker::new();
        assert!(!tracker.is_duplicate("key"));
        tracker.clear();
        assert!(tracker.is_empty());
        assert!(!tracker.is_duplicate("key"));
    }
}
