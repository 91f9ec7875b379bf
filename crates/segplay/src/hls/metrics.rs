use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

/// Counters for the adaptive pipeline.
///
/// All counters use atomic operations so fetch tasks can record into a shared
/// instance without locking.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Media segments fetched and buffered
    pub segments_fetched: AtomicU64,
    /// Init segments fetched
    pub init_segments_fetched: AtomicU64,
    /// Total bytes received for segments of either kind
    pub bytes_fetched: AtomicU64,
    /// Sum of fetch latencies in milliseconds
    pub fetch_latency_sum_ms: AtomicU64,
    /// Retry attempts made after transient failures
    pub retries: AtomicU64,
    /// Fetches that failed after exhausting their retry budget
    pub fetch_failures: AtomicU64,
    pub variant_switches: AtomicU64,
    /// Completions that arrived after their variant was superseded and were dropped
    pub discarded_completions: AtomicU64,
    pub playlist_refreshes: AtomicU64,
    /// Recoveries that returned the pipeline to healthy
    pub recoveries: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_segment(&self, bytes: u64, latency_ms: u64) {
        self.segments_fetched.fetch_add(1, Ordering::Relaxed);
        self.bytes_fetched.fetch_add(bytes, Ordering::Relaxed);
        self.fetch_latency_sum_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
    }

    pub fn record_init_segment(&self, bytes: u64) {
        self.init_segments_fetched.fetch_add(1, Ordering::Relaxed);
        self.bytes_fetched.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_switch(&self) {
        self.variant_switches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self) {
        self.discarded_completions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh(&self) {
        self.playlist_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recovery(&self) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
    }

    /// Average segment fetch latency in milliseconds; `None` before the first segment.
    pub fn average_fetch_latency_ms(&self) -> Option<f64> {
        let total = self.segments_fetched.load(Ordering::Relaxed);
        if total == 0 {
            return None;
        }
        let sum = self.fetch_latency_sum_ms.load(Ordering::Relaxed);
        Some(sum as f64 / total as f64)
    }

    pub fn log_summary(&self) {
        let snapshot = self.snapshot();
        let avg_latency = self
            .average_fetch_latency_ms()
            .map(|l| format!("{l:.2}ms"))
            .unwrap_or_else(|| "N/A".to_string());

        info!(
            segments = snapshot.segments_fetched,
            init_segments = snapshot.init_segments_fetched,
            bytes = snapshot.bytes_fetched,
            avg_latency = %avg_latency,
            retries = snapshot.retries,
            failures = snapshot.fetch_failures,
            switches = snapshot.variant_switches,
            discarded = snapshot.discarded_completions,
            refreshes = snapshot.playlist_refreshes,
            recoveries = snapshot.recoveries,
            "Playback pipeline summary"
        );
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            segments_fetched: self.segments_fetched.load(Ordering::Relaxed),
            init_segments_fetched: self.init_segments_fetched.load(Ordering::Relaxed),
            bytes_fetched: self.bytes_fetched.load(Ordering::Relaxed),
            fetch_latency_sum_ms: self.fetch_latency_sum_ms.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            variant_switches: self.variant_switches.load(Ordering::Relaxed),
            discarded_completions: self.discarded_completions.load(Ordering::Relaxed),
            playlist_refreshes: self.playlist_refreshes.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of every counter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub segments_fetched: u64,
    pub init_segments_fetched: u64,
    pub bytes_fetched: u64,
    pub fetch_latency_sum_ms: u64,
    pub retries: u64,
    pub fetch_failures: u64,
    pub variant_switches: u64,
    pub discarded_completions: u64,
    pub playlist_refreshes: u64,
    pub recoveries: u64,
}
