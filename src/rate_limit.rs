use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

use parking_lot::Mutex;

/// Sliding-window request counter keyed by client identity. Good enough for a
/// single-process deployment; counters are not shared across replicas.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    window: Duration,
    max_requests: usize,
    buckets: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            window,
            max_requests,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Records one request for `key` if the window still has room.
    /// Returns false when the caller should be throttled.
    pub fn check_and_count(&self, key: &str) -> bool {
        self.check_and_count_at(key, Instant::now())
    }

    fn check_and_count_at(&self, key: &str, now: Instant) -> bool {
        let cutoff = now.checked_sub(self.window).unwrap_or(now);

        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key.to_string()).or_default();

        while let Some(front) = bucket.front().copied() {
            if front < cutoff {
                bucket.pop_front();
            } else {
                break;
            }
        }

        if bucket.len() >= self.max_requests {
            return false;
        }

        bucket.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_limit_then_blocks() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(60), 3);
        assert!(limiter.check_and_count("1.2.3.4"));
        assert!(limiter.check_and_count("1.2.3.4"));
        assert!(limiter.check_and_count("1.2.3.4"));
        assert!(!limiter.check_and_count("1.2.3.4"));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(60), 1);
        assert!(limiter.check_and_count("a"));
        assert!(!limiter.check_and_count("a"));
        assert!(limiter.check_and_count("b"));
    }

    #[test]
    fn window_expiry_frees_capacity() {
        let limiter = SlidingWindowLimiter::new(Duration::from_millis(10), 1);
        let start = Instant::now();
        assert!(limiter.check_and_count_at("a", start));
        assert!(!limiter.check_and_count_at("a", start));
        assert!(limiter.check_and_count_at("a", start + Duration::from_millis(20)));
    }
}
