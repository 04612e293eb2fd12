//! Progress sampling for a running download

use core_library::DownloadProgress;
use std::time::{Duration, Instant};

/// Turns a running byte count into throttled progress samples.
///
/// A sample is produced at most once per `interval`; `bytes_per_second`
/// is computed from the bytes read since the previous sample.
#[derive(Debug)]
pub struct ProgressSampler {
    total_bytes: u64,
    interval: Duration,
    last_sample: Instant,
    last_bytes: u64,
}

impl ProgressSampler {
    /// `total_bytes` is 0 when the length is unknown.
    pub fn new(total_bytes: u64, interval: Duration) -> Self {
        Self::starting_at(total_bytes, interval, Instant::now())
    }

    pub fn starting_at(total_bytes: u64, interval: Duration, now: Instant) -> Self {
        Self {
            total_bytes,
            interval,
            last_sample: now,
            last_bytes: 0,
        }
    }

    pub fn record(&mut self, bytes_read: u64) -> Option<DownloadProgress> {
        self.record_at(bytes_read, Instant::now())
    }

    /// Record that `bytes_read` bytes have been read in total by `now`.
    pub fn record_at(&mut self, bytes_read: u64, now: Instant) -> Option<DownloadProgress> {
        let elapsed = now.saturating_duration_since(self.last_sample);
        if elapsed < self.interval {
            return None;
        }

        let delta = bytes_read.saturating_sub(self.last_bytes);
        let bytes_per_second = (delta as f64 / elapsed.as_secs_f64()) as u64;

        self.last_sample = now;
        self.last_bytes = bytes_read;
        Some(DownloadProgress::new(bytes_read, self.total_bytes, bytes_per_second))
    }
}
