//! Sliding windows of recent call outcomes
//!
//! A circuit breaker evaluates its failure rate and slow-call rate over the
//! recent call history. Two shapes are supported:
//!
//! - **Count based**: the last `size` calls, kept in a ring buffer.
//! - **Time based**: calls from the last `size` seconds, aggregated into
//!   one-second buckets. Buckets older than the window are discarded lazily
//!   whenever the window is touched.
//!
//! Windows are not synchronized; the owning circuit breaker serializes
//! access.

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

/// Shape of a sliding window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum WindowType {
    /// Last N calls
    CountBased,
    /// Calls within the last N seconds
    TimeBased,
}

impl fmt::Display for WindowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CountBased => write!(f, "COUNT_BASED"),
            Self::TimeBased => write!(f, "TIME_BASED"),
        }
    }
}

/// A single recorded measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Measurement {
    failed: bool,
    slow: bool,
}

/// Aggregated view of a window at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WindowSnapshot {
    /// Calls currently buffered in the window
    pub total_calls: u32,
    /// Buffered calls that failed
    pub failed_calls: u32,
    /// Buffered calls slower than the slow-call threshold
    pub slow_calls: u32,
    /// Buffered calls that were both slow and failed
    pub slow_failed_calls: u32,
}

impl WindowSnapshot {
    /// Buffered calls that succeeded
    pub fn successful_calls(&self) -> u32 {
        self.total_calls - self.failed_calls
    }

    /// Failure rate in percent, or `None` when fewer than `minimum_calls`
    /// have been buffered
    pub fn failure_rate(&self, minimum_calls: u32) -> Option<f32> {
        self.rate_of(self.failed_calls, minimum_calls)
    }

    /// Slow-call rate in percent, or `None` when fewer than `minimum_calls`
    /// have been buffered
    pub fn slow_call_rate(&self, minimum_calls: u32) -> Option<f32> {
        self.rate_of(self.slow_calls, minimum_calls)
    }

    fn rate_of(&self, count: u32, minimum_calls: u32) -> Option<f32> {
        if self.total_calls == 0 || self.total_calls < minimum_calls {
            return None;
        }
        Some(count as f32 * 100.0 / self.total_calls as f32)
    }

    fn add(&mut self, m: Measurement) {
        self.total_calls += 1;
        if m.failed {
            self.failed_calls += 1;
        }
        if m.slow {
            self.slow_calls += 1;
            if m.failed {
                self.slow_failed_calls += 1;
            }
        }
    }

    fn remove(&mut self, m: Measurement) {
        self.total_calls = self.total_calls.saturating_sub(1);
        if m.failed {
            self.failed_calls = self.failed_calls.saturating_sub(1);
        }
        if m.slow {
            self.slow_calls = self.slow_calls.saturating_sub(1);
            if m.failed {
                self.slow_failed_calls = self.slow_failed_calls.saturating_sub(1);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    /// Seconds since the window origin this bucket currently holds
    epoch_second: u64,
    totals: WindowSnapshot,
}

#[derive(Debug)]
enum Storage {
    Count { ring: VecDeque<Measurement>, totals: WindowSnapshot },
    Time { origin: Instant, buckets: Vec<Bucket> },
}

/// Sliding window over call outcomes
#[derive(Debug)]
pub struct SlidingWindow {
    window_type: WindowType,
    size: u32,
    storage: Storage,
}

impl SlidingWindow {
    /// Create a count-based window holding the last `size` calls
    pub fn count_based(size: u32) -> Self {
        let size = size.max(1);
        Self {
            window_type: WindowType::CountBased,
            size,
            storage: Storage::Count {
                ring: VecDeque::with_capacity(size as usize),
                totals: WindowSnapshot::default(),
            },
        }
    }

    /// Create a time-based window covering the last `size_seconds` seconds
    pub fn time_based(size_seconds: u32, origin: Instant) -> Self {
        let size = size_seconds.max(1);
        Self {
            window_type: WindowType::TimeBased,
            size,
            storage: Storage::Time { origin, buckets: vec![Bucket::default(); size as usize] },
        }
    }

    /// Create a window of the given shape
    pub fn new(window_type: WindowType, size: u32, origin: Instant) -> Self {
        match window_type {
            WindowType::CountBased => Self::count_based(size),
            WindowType::TimeBased => Self::time_based(size, origin),
        }
    }

    /// Window shape
    pub fn window_type(&self) -> WindowType {
        self.window_type
    }

    /// Window size (calls or seconds depending on the shape)
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Record one call outcome observed at `now`
    pub fn record(&mut self, failed: bool, slow: bool, now: Instant) -> WindowSnapshot {
        let measurement = Measurement { failed, slow };
        let size = self.size;
        match &mut self.storage {
            Storage::Count { ring, totals } => {
                if ring.len() >= size as usize {
                    if let Some(evicted) = ring.pop_front() {
                        totals.remove(evicted);
                    }
                }
                ring.push_back(measurement);
                totals.add(measurement);
                *totals
            }
            Storage::Time { origin, buckets } => {
                let second = now.saturating_duration_since(*origin).as_secs();
                let index = (second % u64::from(size)) as usize;
                let bucket = &mut buckets[index];
                if bucket.epoch_second != second {
                    *bucket = Bucket { epoch_second: second, totals: WindowSnapshot::default() };
                }
                bucket.totals.add(measurement);
                Self::aggregate(buckets, second, size)
            }
        }
    }

    /// Aggregate the window as seen at `now`
    pub fn snapshot(&self, now: Instant) -> WindowSnapshot {
        match &self.storage {
            Storage::Count { totals, .. } => *totals,
            Storage::Time { origin, buckets } => {
                let second = now.saturating_duration_since(*origin).as_secs();
                Self::aggregate(buckets, second, self.size)
            }
        }
    }

    /// Drop every buffered measurement
    pub fn clear(&mut self, now: Instant) {
        match &mut self.storage {
            Storage::Count { ring, totals } => {
                ring.clear();
                *totals = WindowSnapshot::default();
            }
            Storage::Time { origin, buckets } => {
                *origin = now;
                buckets.iter_mut().for_each(|b| *b = Bucket::default());
            }
        }
    }

    fn aggregate(buckets: &[Bucket], current_second: u64, size: u32) -> WindowSnapshot {
        let oldest = current_second.saturating_sub(u64::from(size) - 1);
        let mut snapshot = WindowSnapshot::default();
        for bucket in buckets {
            if bucket.totals.total_calls == 0
                || bucket.epoch_second < oldest
                || bucket.epoch_second > current_second
            {
                continue;
            }
            snapshot.total_calls += bucket.totals.total_calls;
            snapshot.failed_calls += bucket.totals.failed_calls;
            snapshot.slow_calls += bucket.totals.slow_calls;
            snapshot.slow_failed_calls += bucket.totals.slow_failed_calls;
        }
        snapshot
    }
}
