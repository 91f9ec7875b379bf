use std::time::Duration;

use crate::config::HttpConfig;
use crate::hls::retry::RetryPolicy;

// --- Top-Level Configuration ---
#[derive(Debug, Clone, Default)]
pub struct HlsConfig {
    pub http: HttpConfig,
    pub playlist_config: PlaylistConfig,
    pub fetcher_config: FetcherConfig,
    pub buffer_config: BufferConfig,
    pub abr_config: AbrConfig,
    pub recovery_config: RecoveryConfig,
}

// --- Playlist Configuration ---
#[derive(Debug, Clone)]
pub struct PlaylistConfig {
    /// Per-attempt timeout for playlist requests
    pub playlist_fetch_timeout: Duration,
    /// Floor for the live refresh interval; the effective interval is
    /// `max(target_duration / 2, live_refresh_interval)`
    pub live_refresh_interval: Duration,
    /// Consecutive failed refreshes tolerated before raising a fatal fault
    pub live_max_refresh_failures: u32,
    /// How far behind the live edge playback starts, in target durations
    pub live_start_offset: f64,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            playlist_fetch_timeout: Duration::from_secs(15),
            live_refresh_interval: Duration::from_secs(1),
            live_max_refresh_failures: 5,
            live_start_offset: 3.0,
        }
    }
}

// --- Fetcher Configuration ---
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Bounded wait for a single attempt; exceeding it counts as a network fault
    pub fetch_timeout: Duration,
    pub max_retries: u32,
    /// Base for exponential backoff
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub retry_jitter: bool,
    /// Segment requests allowed in flight at once for the active variant
    pub max_concurrent_fetches: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(8),
            retry_jitter: true,
            max_concurrent_fetches: 2,
        }
    }
}

impl FetcherConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.retry_base_delay,
            max_delay: self.retry_max_delay,
            jitter: self.retry_jitter,
        }
    }
}

// --- Buffer Configuration ---
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Forward buffer target in seconds; fetching pauses once reached
    pub max_buffer_length: f64,
    /// Seconds of media kept behind the playhead before eviction
    pub back_buffer_length: f64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_buffer_length: 30.0,
            back_buffer_length: 30.0,
        }
    }
}

// --- ABR Configuration ---
#[derive(Debug, Clone)]
pub struct AbrConfig {
    /// Below this many buffered seconds the lowest variant is always chosen
    pub low_water_mark: f64,
    /// Below this many buffered seconds down-switches jump straight to the
    /// sustainable variant; above it they move one step per evaluation
    pub urgent_buffer: f64,
    /// Fraction of the throughput estimate a variant may consume (0 < m < 1)
    pub safety_margin: f64,
    /// Minimum time between two up-switches
    pub min_up_switch_interval: Duration,
    /// Estimate reported before any sample has been recorded
    pub initial_bandwidth_bps: u64,
    pub fast_half_life: Duration,
    pub slow_half_life: Duration,
    /// Samples smaller than this are too noisy to feed the estimator
    pub min_sample_bytes: u64,
}

impl Default for AbrConfig {
    fn default() -> Self {
        Self {
            low_water_mark: 4.0,
            urgent_buffer: 10.0,
            safety_margin: 0.8,
            min_up_switch_interval: Duration::from_secs(2),
            initial_bandwidth_bps: 1_000_000,
            fast_half_life: Duration::from_secs(2),
            slow_half_life: Duration::from_secs(10),
            min_sample_bytes: 16_000,
        }
    }
}

// --- Recovery Configuration ---
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Consecutive recovery attempts allowed before playback is terminated
    pub max_recovery_attempts: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_recovery_attempts: 3,
        }
    }
}
