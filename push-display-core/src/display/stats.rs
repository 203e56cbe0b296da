//! Pipeline counters and a rolling throughput meter for delivered frames.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

// ── PipelineStats ────────────────────────────────────────────────

/// Lock-free counters updated by the render and delivery loops.
#[derive(Debug, Default)]
pub struct PipelineStats {
    rendered: AtomicU64,
    render_failures: AtomicU64,
    delivered: AtomicU64,
    keep_alives: AtomicU64,
    send_failures: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Frames rendered, encoded and published.
    pub rendered: u64,
    /// Render or encode attempts that failed.
    pub render_failures: u64,
    /// Transfers that reached the device, keep-alives included.
    pub delivered: u64,
    /// Deliveries that fell back to the black keep-alive frame.
    pub keep_alives: u64,
    /// Transfers that failed and dropped the session.
    pub send_failures: u64,
}

impl PipelineStats {
    pub fn record_render(&self) {
        self.rendered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_render_failure(&self) {
        self.render_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self, keep_alive: bool) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        if keep_alive {
            self.keep_alives.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rendered: self.rendered.load(Ordering::Relaxed),
            render_failures: self.render_failures.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            keep_alives: self.keep_alives.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

// ── ThroughputMeter ──────────────────────────────────────────────

/// Rolling-window estimate of bytes written to the device per second.
///
/// Records `(timestamp, bytes)` samples and averages over the most
/// recent `window`.
#[derive(Debug)]
pub struct ThroughputMeter {
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
    total_bytes: u64,
}

impl ThroughputMeter {
    /// Create a meter with a 1-second rolling window.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(1))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(128),
            window,
            total_bytes: 0,
        }
    }

    /// Record that `bytes` were transferred now.
    pub fn record(&mut self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    /// Record with an explicit timestamp (useful for testing).
    pub fn record_at(&mut self, when: Instant, bytes: u64) {
        self.samples.push_back((when, bytes));
        self.total_bytes += bytes;
        self.evict(when);
    }

    /// Throughput in bytes/second over the window.
    pub fn bytes_per_sec(&self) -> u64 {
        let (Some((first, _)), Some((last, _))) = (self.samples.front(), self.samples.back())
        else {
            return 0;
        };
        let elapsed = last.duration_since(*first).max(Duration::from_millis(1));
        (self.total_bytes as f64 / elapsed.as_secs_f64()) as u64
    }

    /// Samples currently inside the window.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&(ts, bytes)) = self.samples.front() {
            if now.duration_since(ts) > self.window {
                self.samples.pop_front();
                self.total_bytes = self.total_bytes.saturating_sub(bytes);
            } else {
                break;
            }
        }
    }
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────
