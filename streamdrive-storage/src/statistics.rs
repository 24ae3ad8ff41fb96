use std::time::Duration;
use streamdrive_base::RollingAverage;

/// A named numeric sample for telemetry
#[derive(Debug, Clone, PartialEq)]
pub struct Statistic {
    pub name: &'static str,
    pub value: f64,
}

impl Statistic {
    pub fn new(
        name: &'static str,
        value: f64,
    ) -> Self {
        Statistic { name, value }
    }
}

/// Snapshot of how busy the device is, used by the scheduler to decide whether to keep polling
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriveStatus {
    pub busy: bool,
    pub active_reads: usize,
    pub pending_requests: usize,
    pub pending_reads: usize,
    // Everything this drive still owes a completion for
    pub queue_depth: usize,
    pub active_bytes: u64,
    // Reads the drive would still take on before it is saturated, counting over-commit. Negative
    // when more is queued than the device should have outstanding.
    pub available_slots: i64,
}

pub(crate) fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

#[derive(Debug, Clone)]
pub struct DriveStatistics {
    pub exists_time_ms: RollingAverage,
    pub metadata_time_ms: RollingAverage,
    pub read_time_ms: RollingAverage,
    pub read_size_bytes: RollingAverage,

    pub reads_completed: u64,
    pub reads_failed: u64,
    pub reads_canceled: u64,
    pub reads_deferred: u64,
    pub deadline_misses: u64,
    pub metadata_cache_hits: u64,
    pub metadata_cache_misses: u64,
}

impl DriveStatistics {
    pub fn new(window: usize) -> Self {
        DriveStatistics {
            exists_time_ms: RollingAverage::new(window),
            metadata_time_ms: RollingAverage::new(window),
            read_time_ms: RollingAverage::new(window),
            read_size_bytes: RollingAverage::new(window),
            reads_completed: 0,
            reads_failed: 0,
            reads_canceled: 0,
            reads_deferred: 0,
            deadline_misses: 0,
            metadata_cache_hits: 0,
            metadata_cache_misses: 0,
        }
    }
}

pub(crate) fn push_average(
    statistics: &mut Vec<Statistic>,
    name: &'static str,
    average: &RollingAverage,
) {
    // Averages with no samples yet are omitted rather than reported as zero
    if let Some(value) = average.average() {
        statistics.push(Statistic::new(name, value));
    }
}

pub(crate) fn push_counter(
    statistics: &mut Vec<Statistic>,
    name: &'static str,
    value: u64,
) {
    statistics.push(Statistic::new(name, value as f64));
}
