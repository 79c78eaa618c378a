//! Speed Meter (spec.md §3): rolling throughput accumulator, pausable.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// Width of the rolling window used to compute bytes/sec.
const WINDOW: std::time::Duration = std::time::Duration::from_secs(1);

/// Accumulates bytes reported by chunk workers and produces an
/// instantaneous throughput figure. Safe to share across any number of
/// concurrently-running workers.
pub struct SpeedMeter {
    window_bytes: AtomicU64,
    window_start: std::sync::Mutex<Instant>,
    last_rate: AtomicU64,
    paused: AtomicBool,
}

impl SpeedMeter {
    pub fn new() -> Self {
        Self {
            window_bytes: AtomicU64::new(0),
            window_start: std::sync::Mutex::new(Instant::now()),
            last_rate: AtomicU64::new(0),
            paused: AtomicBool::new(false),
        }
    }

    /// Record bytes just downloaded by a chunk worker.
    pub fn record(&self, bytes: u64) {
        if self.paused.load(Ordering::Relaxed) {
            return;
        }
        self.roll_window_if_needed();
        self.window_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Instantaneous bytes/sec, or 0 while paused.
    pub fn bytes_per_second(&self) -> u64 {
        if self.paused.load(Ordering::Relaxed) {
            return 0;
        }
        self.roll_window_if_needed();
        self.last_rate.load(Ordering::Relaxed)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
        self.last_rate.store(0, Ordering::Relaxed);
        self.window_bytes.store(0, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
        *self.window_start.lock().unwrap() = Instant::now();
        self.window_bytes.store(0, Ordering::Relaxed);
    }

    fn roll_window_if_needed(&self) {
        let mut start = self.window_start.lock().unwrap();
        let elapsed = start.elapsed();
        if elapsed >= WINDOW {
            let bytes = self.window_bytes.swap(0, Ordering::Relaxed);
            let rate = (bytes as f64 / elapsed.as_secs_f64()) as u64;
            self.last_rate.store(rate, Ordering::Relaxed);
            *start = Instant::now();
        }
    }
}

impl Default for SpeedMeter {
    fn default() -> Self {
        Self::new()
    }
}
