//! Per-source sliding-window admission control.
//!
//! State is process-local and intentionally unshared across instances: each
//! instance enforcing its own window degrades gracefully (slightly more
//! admitted traffic) without needing coordination. Eviction of idle sources
//! is a required periodic call owned by the orchestrator, not something the
//! limiter schedules itself.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Configuration for the sliding-window rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum requests admitted per source within one window.
    pub max_requests: usize,
    /// Window length.
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

/// Sliding-window rate limiter keyed by source identifier (sender IP or
/// API key).
#[derive(Debug, Default)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    windows: DashMap<String, Vec<Instant>>,
}

impl RateLimiter {
    /// Create a limiter with the given configuration.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    /// Check and record a request for `source` against the configured
    /// per-window maximum.
    ///
    /// Prunes stamps older than the window, then denies without recording
    /// when the window is already full.
    pub fn check(&self, source: &str) -> bool {
        self.check_with_limit(source, self.config.max_requests)
    }

    /// Like [`check`](Self::check) with a caller-supplied maximum, for call
    /// sites whose limit comes from runtime configuration (the flag gate).
    pub fn check_with_limit(&self, source: &str, max_requests: usize) -> bool {
        let now = Instant::now();
        let mut window = self.windows.entry(source.to_owned()).or_default();

        window.retain(|stamp| now.duration_since(*stamp) < self.config.window);
        if window.len() >= max_requests {
            return false;
        }
        window.push(now);
        true
    }

    /// Requests `source` may still make in the current window.
    pub fn remaining(&self, source: &str) -> usize {
        let now = Instant::now();
        let used = self.windows.get(source).map_or(0, |window| {
            window
                .iter()
                .filter(|stamp| now.duration_since(**stamp) < self.config.window)
                .count()
        });
        self.config.max_requests.saturating_sub(used)
    }

    /// Evict sources with no activity inside the window, bounding memory in
    /// a long-running process. Returns how many sources were evicted.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            window
                .iter()
                .any(|stamp| now.duration_since(*stamp) < self.config.window)
        });
        before - self.windows.len()
    }

    /// Number of sources currently tracked.
    pub fn tracked_sources(&self) -> usize {
        self.windows.len()
    }
}
