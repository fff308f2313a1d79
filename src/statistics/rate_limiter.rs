/*
    Sliding window rate limiter deciding which requests pay for shape computation.

    We keep the admission counts of the current and the previous fixed window. The number
    of admissions in the trailing window is estimated by weighting the previous window's
    count with the part of it that still overlaps the trailing window:

        estimate = previous * (period - elapsed_in_current) / period + current

    A request is admitted while the estimate is below the sampling rate. At a steady
    request rate this lets through `sampling_rate` requests per period, spread over the
    period instead of all at the start of it.
 */
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

pub const SAMPLING_RATE_ALWAYS: i32 = i32::MAX;
pub const WINDOW_PERIOD_MILLIS: u64 = 1000;

pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

pub struct SystemClock {
    start: Instant
}

impl SystemClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

struct Window {
    start: u64,
    previous_count: u64,
    current_count: u64
}

pub struct RateLimiter {
    sampling_rate: AtomicI32,
    window: Mutex<Window>,
    clock: Arc<dyn Clock>
}

impl RateLimiter {
    pub fn new(sampling_rate: i32) -> Self {
        Self::with_clock(sampling_rate, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(sampling_rate: i32, clock: Arc<dyn Clock>) -> Self {
        let start = clock.now_millis();
        Self {
            sampling_rate: AtomicI32::new(sampling_rate),
            window: Mutex::new(Window { start, previous_count: 0, current_count: 0 }),
            clock
        }
    }

    pub fn sampling_rate(&self) -> i32 {
        self.sampling_rate.load(Ordering::Relaxed)
    }

    // Windows that are already running keep their counts
    pub fn set_sampling_rate(&self, sampling_rate: i32) {
        self.sampling_rate.store(sampling_rate, Ordering::Relaxed);
    }

    pub fn admit(&self) -> bool {
        let rate = self.sampling_rate();
        if rate <= 0 {
            return false;
        }
        if rate == SAMPLING_RATE_ALWAYS {
            return true;
        }
        let now = self.clock.now_millis();
        let mut window = self.window.lock();
        window.tick(now);
        let elapsed = now.saturating_sub(window.start).min(WINDOW_PERIOD_MILLIS);
        let overlap = (WINDOW_PERIOD_MILLIS - elapsed) as f64 / WINDOW_PERIOD_MILLIS as f64;
        let estimate = window.previous_count as f64 * overlap + window.current_count as f64;
        if estimate < rate as f64 {
            window.current_count += 1;
            true
        } else {
            false
        }
    }
}

impl Window {
    fn tick(&mut self, now: u64) {
        let elapsed = now.saturating_sub(self.start);
        if elapsed < WINDOW_PERIOD_MILLIS {
            return;
        }
        self.previous_count = if elapsed >= 2 * WINDOW_PERIOD_MILLIS { 0 } else { self.current_count };
        self.current_count = 0;
        self.start = now - elapsed % WINDOW_PERIOD_MILLIS;
    }
}
