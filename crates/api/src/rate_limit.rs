use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Fixed-window request counter per client key. Windows reset lazily on the
/// first request after expiry; no background sweeping.
#[derive(Debug, Clone)]
pub struct IpRateLimiter {
    inner: Arc<Mutex<HashMap<String, WindowState>>>,
    window: Duration,
    max_requests: usize,
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    started: Instant,
    count: usize,
}

impl IpRateLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            window,
            max_requests,
        }
    }

    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut guard = self.inner.lock();
        let state = guard.entry(key.to_string()).or_insert(WindowState {
            started: now,
            count: 0,
        });

        if now.duration_since(state.started) > self.window {
            state.started = now;
            state.count = 0;
        }

        if state.count >= self.max_requests {
            return false;
        }

        state.count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_beyond_the_window_budget_are_rejected() {
        let limiter = IpRateLimiter::new(Duration::from_secs(60), 2);
        assert!(limiter.allow("1.2.3.4"));
        assert!(limiter.allow("1.2.3.4"));
        assert!(!limiter.allow("1.2.3.4"));
        assert!(limiter.allow("5.6.7.8"));
    }

    #[test]
    fn an_expired_window_resets_the_budget() {
        let limiter = IpRateLimiter::new(Duration::from_millis(0), 1);
        assert!(limiter.allow("1.2.3.4"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(limiter.allow("1.2.3.4"));
    }
}
