use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: usize = 120;

/// Event counters shared across pipeline stages.
///
/// # Example
/// ```rust
/// use argus_core::metrics::FlowCounters;
///
/// let counters = FlowCounters::default();
/// counters.frame_captured();
/// assert_eq!(counters.snapshot().frames_captured, 1);
/// ```
#[derive(Debug, Default)]
pub struct FlowCounters {
    frames_captured: AtomicU64,
    frames_rejected: AtomicU64,
    packets_delivered: AtomicU64,
    reader_stalls: AtomicU64,
}

/// Point-in-time copy of [`FlowCounters`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlowSnapshot {
    pub frames_captured: u64,
    pub frames_rejected: u64,
    pub packets_delivered: u64,
    pub reader_stalls: u64,
}

impl FlowCounters {
    /// A raw frame made it through conversion and into the encoder.
    pub fn frame_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    /// A raw frame was dropped before reaching the encoder.
    pub fn frame_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// A complete compressed packet was handed to a caller.
    pub fn packet_delivered(&self) {
        self.packets_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// A read had to wait because the encoder had nothing ready.
    pub fn reader_stall(&self) {
        self.reader_stalls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            packets_delivered: self.packets_delivered.load(Ordering::Relaxed),
            reader_stalls: self.reader_stalls.load(Ordering::Relaxed),
        }
    }
}

/// Rolling latency window for one pipeline stage. Cheap to clone and share.
#[derive(Clone, Default)]
pub struct StageMetrics {
    inner: Arc<StageState>,
}

#[derive(Default)]
struct StageState {
    total: AtomicU64,
    window: Mutex<VecDeque<(Instant, u64)>>,
}

impl StageMetrics {
    /// Record one duration sample.
    pub fn record(&self, elapsed: Duration) {
        let nanos = elapsed.as_nanos().min(u64::MAX as u128) as u64;
        self.inner.total.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut window) = self.inner.window.lock() {
            window.push_back((Instant::now(), nanos));
            while window.len() > DEFAULT_WINDOW {
                window.pop_front();
            }
        }
    }

    /// Samples recorded over the stage's lifetime.
    pub fn total_samples(&self) -> u64 {
        self.inner.total.load(Ordering::Relaxed)
    }

    /// Rolling average latency in milliseconds. `None` until a sample
    /// lands.
    pub fn avg_millis(&self) -> Option<f64> {
        self.inner.window.lock().ok().and_then(|window| {
            if window.is_empty() {
                return None;
            }
            let total: u128 = window.iter().map(|(_, nanos)| *nanos as u128).sum();
            Some(total as f64 / 1_000_000.0 / window.len() as f64)
        })
    }

    /// Rolling throughput in samples per second, from sample arrival
    /// times.
    pub fn rate(&self) -> Option<f64> {
        self.inner.window.lock().ok().and_then(|window| {
            if window.len() < 2 {
                return None;
            }
            let first = window.front()?.0;
            let last = window.back()?.0;
            let span = last.saturating_duration_since(first).as_secs_f64();
            if span > 0.0 {
                Some(window.len() as f64 / span)
            } else {
                None
            }
        })
    }
}
