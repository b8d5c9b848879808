use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Sliding-window request counter keyed by client IP.
#[derive(Debug, Clone)]
pub struct IpRateLimiter {
    inner: Arc<Mutex<Windows>>,
    window: Duration,
    max_requests: usize,
}

#[derive(Debug, Default)]
struct Windows {
    hits: HashMap<String, VecDeque<Instant>>,
    last_sweep: Option<Instant>,
}

impl IpRateLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Windows::default())),
            window,
            max_requests,
        }
    }

    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    fn allow_at(&self, key: &str, now: Instant) -> bool {
        let mut guard = self.inner.lock();
        self.sweep(&mut guard, now);

        let queue = guard.hits.entry(key.to_string()).or_default();
        while queue
            .front()
            .is_some_and(|front| now.duration_since(*front) > self.window)
        {
            queue.pop_front();
        }

        if queue.len() >= self.max_requests {
            return false;
        }

        queue.push_back(now);
        true
    }

    /// Drops keys whose newest hit has left the window, at most once per window.
    fn sweep(&self, windows: &mut Windows, now: Instant) {
        if windows
            .last_sweep
            .is_some_and(|last| now.duration_since(last) <= self.window)
        {
            return;
        }
        let window = self.window;
        windows.hits.retain(|_, queue| {
            queue
                .back()
                .is_some_and(|newest| now.duration_since(*newest) <= window)
        });
        windows.last_sweep = Some(now);
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.inner.lock().hits.len()
    }
}
