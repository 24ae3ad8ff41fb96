use crate::config::StorageDriveConfig;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use streamdrive_base::RollingAverage;

/// A read queued further up the stream stack, waiting for an estimate of when this drive could
/// finish it
#[derive(Debug, Clone)]
pub struct PendingEstimate {
    pub path: PathBuf,
    pub offset: u64,
    pub size: u64,
    pub estimated_completion: Option<Instant>,
}

impl PendingEstimate {
    pub fn new(
        path: impl Into<PathBuf>,
        offset: u64,
        size: u64,
    ) -> Self {
        PendingEstimate {
            path: path.into(),
            offset,
            size,
            estimated_completion: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EstimateTarget<'a> {
    pub path: &'a Path,
    pub offset: u64,
    pub size: u64,
    // How long the read has already been in flight, zero if it's queued
    pub elapsed: Duration,
}

impl<'a> EstimateTarget<'a> {
    // Saturates so a read ending past u64::MAX is never treated as contiguous with anything
    fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }
}

/// Virtual clock walked over reads in the order the device will service them
#[derive(Debug, Clone)]
pub struct EstimateCursor {
    time: Instant,
    // File and end offset of the previous read
    last: Option<(PathBuf, u64)>,
}

impl EstimateCursor {
    pub fn time(&self) -> Instant {
        self.time
    }

    fn is_contiguous(
        &self,
        path: &Path,
        offset: u64,
    ) -> bool {
        match &self.last {
            Some((last_path, last_end)) => {
                *last_end != u64::MAX && last_path == path && *last_end == offset
            }
            None => false,
        }
    }

    fn set_last(
        &mut self,
        path: &Path,
        end: u64,
    ) {
        match &mut self.last {
            Some((last_path, last_end)) if last_path == path => *last_end = end,
            _ => self.last = Some((path.to_path_buf(), end)),
        }
    }
}

pub struct CompletionEstimator {
    has_seek_penalty: bool,
    average_seek_time: Duration,
    default_bytes_per_second: f64,
    read_bytes: RollingAverage,
    read_seconds: RollingAverage,
}

impl CompletionEstimator {
    pub fn new(config: &StorageDriveConfig) -> Self {
        CompletionEstimator {
            has_seek_penalty: config.flags.has_seek_penalty,
            average_seek_time: config.average_seek_time,
            default_bytes_per_second: config.default_read_bytes_per_second,
            read_bytes: RollingAverage::new(config.throughput_window),
            read_seconds: RollingAverage::new(config.throughput_window),
        }
    }

    pub fn record_read(
        &mut self,
        bytes: u64,
        elapsed: Duration,
    ) {
        self.read_bytes.push(bytes as f64);
        self.read_seconds.push(elapsed.as_secs_f64());
    }

    /// Throughput over the recent window of reads, or the configured default before any read has
    /// been timed
    pub fn bytes_per_second(&self) -> f64 {
        let bytes = self.read_bytes.window_sum();
        let seconds = self.read_seconds.window_sum();
        if bytes > 0.0 && seconds > 0.0 {
            bytes / seconds
        } else {
            self.default_bytes_per_second
        }
    }

    pub fn transfer_time(
        &self,
        bytes: u64,
    ) -> Duration {
        let bytes_per_second = self.bytes_per_second();
        if bytes == 0 || !(bytes_per_second > 0.0) {
            return Duration::ZERO;
        }

        Duration::from_secs_f64(bytes as f64 / bytes_per_second)
    }

    pub fn begin(
        &self,
        now: Instant,
    ) -> EstimateCursor {
        EstimateCursor {
            time: now,
            last: None,
        }
    }

    /// Advances past a read that has already started. It has already paid for its seek.
    pub fn advance_in_flight(
        &self,
        cursor: &mut EstimateCursor,
        target: &EstimateTarget,
    ) -> Instant {
        let remaining = self.transfer_time(target.size).saturating_sub(target.elapsed);
        cursor.time += remaining;
        cursor.set_last(target.path, target.end());
        cursor.time
    }

    /// Advances past a queued read, paying a seek if it doesn't continue where the previous read
    /// left off
    pub fn advance_queued(
        &self,
        cursor: &mut EstimateCursor,
        target: &EstimateTarget,
    ) -> Instant {
        if target.size == 0 {
            return cursor.time;
        }

        if self.has_seek_penalty && !cursor.is_contiguous(target.path, target.offset) {
            cursor.time += self.average_seek_time;
        }

        cursor.time += self.transfer_time(target.size);
        cursor.set_last(target.path, target.end());
        cursor.time
    }

    /// Estimated completion of each active read (in input order) and each queued read (in queue
    /// order). Active reads are walked first, soonest to finish first, then the queue. The returned
    /// cursor may be used to keep estimating reads queued elsewhere.
    pub fn estimate_completion_times(
        &self,
        now: Instant,
        active: &[EstimateTarget],
        queued: &[EstimateTarget],
    ) -> (Vec<Instant>, Vec<Instant>, EstimateCursor) {
        profiling::scope!("CompletionEstimator::estimate_completion_times");
        let mut cursor = self.begin(now);

        let mut order: Vec<(usize, Duration)> = active
            .iter()
            .enumerate()
            .map(|(index, target)| {
                (
                    index,
                    self.transfer_time(target.size).saturating_sub(target.elapsed),
                )
            })
            .collect();
        order.sort_by_key(|(_, remaining)| *remaining);

        let mut active_estimates = vec![now; active.len()];
        for (index, _) in order {
            active_estimates[index] = self.advance_in_flight(&mut cursor, &active[index]);
        }

        let queued_estimates = queued
            .iter()
            .map(|target| self.advance_queued(&mut cursor, target))
            .collect();

        (active_estimates, queued_estimates, cursor)
    }
}
