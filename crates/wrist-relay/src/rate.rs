use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Rolling count of send completions over a trailing window.
#[derive(Debug, Clone)]
pub struct RateWindow {
    window: Duration,
    min_samples: usize,
    times: VecDeque<Instant>,
}

impl RateWindow {
    pub fn new(window: Duration, min_samples: usize) -> Self {
        Self {
            window,
            min_samples,
            times: VecDeque::new(),
        }
    }

    /// Record a completion at `at` and evict entries that have aged out.
    ///
    /// Entries are kept only while strictly younger than the window. `at`
    /// must not precede earlier records.
    pub fn record(&mut self, at: Instant) {
        self.times.push_back(at);
        self.evict(at);
    }

    /// Drop entries that are no longer strictly younger than the window at
    /// `now`. With no new completions this drains the window, so the rate
    /// falls to undefined once sends stall.
    pub fn evict(&mut self, now: Instant) {
        while let Some(&oldest) = self.times.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.times.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Completions per second over the window, once enough entries exist.
    pub fn rate(&self) -> Option<f64> {
        if self.times.len() >= self.min_samples.max(1) {
            Some(self.times.len() as f64 / self.window.as_secs_f64())
        } else {
            None
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &Instant> {
        self.times.iter()
    }
}
