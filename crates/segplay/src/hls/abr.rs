// Adaptive bitrate selection: throughput estimation and variant choice.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::hls::config::AbrConfig;
use crate::hls::playlist::Manifest;

/// Exponentially weighted moving average where each sample's weight is its
/// duration in seconds.
#[derive(Debug, Clone)]
struct Ewma {
    alpha: f64,
    estimate: f64,
    total_weight: f64,
}

impl Ewma {
    fn new(half_life: Duration) -> Self {
        Self {
            alpha: (0.5_f64.ln() / half_life.as_secs_f64().max(0.001)).exp(),
            estimate: 0.0,
            total_weight: 0.0,
        }
    }

    fn add(&mut self, weight: f64, value: f64) {
        let weight = weight.max(0.0);
        let adjusted = self.alpha.powf(weight);
        self.estimate = value * (1.0 - adjusted) + adjusted * self.estimate;
        self.total_weight += weight;
    }

    /// Bias-corrected estimate; zero before any sample.
    fn value(&self) -> f64 {
        if self.total_weight <= 0.0 {
            return 0.0;
        }
        let zero_factor = 1.0 - self.alpha.powf(self.total_weight);
        self.estimate / zero_factor.max(1e-6)
    }
}

/// Network throughput estimate built from completed fetches.
///
/// Two averages with different half-lives are kept and the lower one is
/// reported, so a sudden drop is picked up quickly while a sudden rise has to
/// persist before it is trusted.
#[derive(Debug, Clone)]
pub struct ThroughputEstimator {
    fast: Ewma,
    slow: Ewma,
    initial_bps: u64,
    min_sample_bytes: u64,
    samples: u64,
}

const MIN_SAMPLE_SECS: f64 = 0.0005;

impl ThroughputEstimator {
    pub fn new(config: &AbrConfig) -> Self {
        Self {
            fast: Ewma::new(config.fast_half_life),
            slow: Ewma::new(config.slow_half_life),
            initial_bps: config.initial_bandwidth_bps,
            min_sample_bytes: config.min_sample_bytes,
            samples: 0,
        }
    }

    /// Records a completed transfer. Returns `false` when the sample was too
    /// small to be meaningful and was dropped.
    pub fn record(&mut self, bytes: u64, elapsed: Duration) -> bool {
        if bytes < self.min_sample_bytes {
            return false;
        }
        let secs = elapsed.as_secs_f64().max(MIN_SAMPLE_SECS);
        let bps = bytes as f64 * 8.0 / secs;
        self.fast.add(secs, bps);
        self.slow.add(secs, bps);
        self.samples += 1;
        true
    }

    /// Estimated bits per second; the configured initial bandwidth until the
    /// first usable sample arrives.
    pub fn estimate_bps(&self) -> u64 {
        if self.samples == 0 {
            return self.initial_bps;
        }
        self.fast.value().min(self.slow.value()).max(0.0).round() as u64
    }

    pub fn sample_count(&self) -> u64 {
        self.samples
    }
}

/// Whether the selector chooses variants itself or follows a caller pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    Auto,
    Manual(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchReason {
    Initial,
    Manual,
    LowBuffer,
    UpSwitch,
    DownSwitch,
    /// Throughput would allow an up-switch but the last one was too recent.
    MinInterval,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbrDecision {
    pub index: usize,
    pub reason: SwitchReason,
    pub changed: bool,
}

/// Selector state. Only [`AbrSelector`] mutates it.
#[derive(Debug, Clone)]
pub struct SelectorState {
    pub mode: SelectionMode,
    /// Index last returned by a selection, `None` before the first one
    pub current: Option<usize>,
    /// Throughput estimate used by the last selection
    pub estimate_bps: u64,
    pub last_switch_at: Option<Instant>,
    last_up_switch_at: Option<Instant>,
}

impl Default for SelectorState {
    fn default() -> Self {
        Self {
            mode: SelectionMode::Auto,
            current: None,
            estimate_bps: 0,
            last_switch_at: None,
            last_up_switch_at: None,
        }
    }
}

pub struct AbrSelector {
    config: AbrConfig,
    estimator: ThroughputEstimator,
    state: SelectorState,
}

impl AbrSelector {
    pub fn new(config: AbrConfig) -> Self {
        let estimator = ThroughputEstimator::new(&config);
        Self {
            config,
            estimator,
            state: SelectorState::default(),
        }
    }

    pub fn state(&self) -> &SelectorState {
        &self.state
    }

    pub fn mode(&self) -> SelectionMode {
        self.state.mode
    }

    pub fn current(&self) -> Option<usize> {
        self.state.current
    }

    pub fn estimate_bps(&self) -> u64 {
        self.estimator.estimate_bps()
    }

    pub fn record_throughput(&mut self, bytes: u64, elapsed: Duration) {
        if self.estimator.record(bytes, elapsed) {
            debug!(
                bytes,
                elapsed_ms = elapsed.as_millis() as u64,
                estimate_bps = self.estimator.estimate_bps(),
                "Throughput sample recorded"
            );
        }
    }

    /// Pins `index`; automatic selection stays off until [`Self::set_auto`].
    pub fn pin(&mut self, index: usize) {
        info!(variant = index, "ABR pinned to manual level");
        self.state.mode = SelectionMode::Manual(index);
    }

    pub fn set_auto(&mut self) {
        if self.state.mode != SelectionMode::Auto {
            info!("ABR returned to automatic selection");
        }
        self.state.mode = SelectionMode::Auto;
    }

    /// Picks the variant to request next and records it as current.
    pub fn select_variant(
        &mut self,
        manifest: &Manifest,
        throughput_bps: u64,
        buffered_secs: f64,
    ) -> usize {
        self.select_variant_at(manifest, throughput_bps, buffered_secs, Instant::now())
            .index
    }

    pub fn select_variant_at(
        &mut self,
        manifest: &Manifest,
        throughput_bps: u64,
        buffered_secs: f64,
        now: Instant,
    ) -> AbrDecision {
        let bandwidths: Vec<u64> = manifest.variants.iter().map(|v| v.bandwidth).collect();
        let decision = self.decide(&bandwidths, throughput_bps, buffered_secs, now);

        self.state.estimate_bps = throughput_bps;
        if decision.changed {
            let previous = self.state.current;
            self.state.last_switch_at = Some(now);
            if matches!(previous, Some(p) if decision.index > p) {
                self.state.last_up_switch_at = Some(now);
            }
            debug!(
                from = ?previous,
                to = decision.index,
                reason = ?decision.reason,
                throughput_bps,
                buffered_secs,
                "ABR decision"
            );
        }
        self.state.current = Some(decision.index);
        decision
    }

    fn decide(
        &self,
        bandwidths: &[u64],
        throughput_bps: u64,
        buffered_secs: f64,
        now: Instant,
    ) -> AbrDecision {
        let Some(highest) = bandwidths.len().checked_sub(1) else {
            return AbrDecision {
                index: 0,
                reason: SwitchReason::Hold,
                changed: false,
            };
        };
        let current = self.state.current.map(|c| c.min(highest));
        let decide = |index: usize, reason: SwitchReason| AbrDecision {
            index,
            reason,
            changed: current != Some(index),
        };

        if let SelectionMode::Manual(pinned) = self.state.mode {
            return decide(pinned.min(highest), SwitchReason::Manual);
        }

        if buffered_secs < self.config.low_water_mark {
            return decide(0, SwitchReason::LowBuffer);
        }

        let budget = throughput_bps as f64 * self.config.safety_margin;
        let sustainable = bandwidths
            .iter()
            .rposition(|&bw| bw as f64 <= budget)
            .unwrap_or(0);

        let Some(current) = current else {
            return decide(sustainable, SwitchReason::Initial);
        };

        if sustainable > current {
            let recently_up = self
                .state
                .last_up_switch_at
                .is_some_and(|at| now.saturating_duration_since(at) < self.config.min_up_switch_interval);
            if recently_up {
                decide(current, SwitchReason::MinInterval)
            } else {
                decide(current + 1, SwitchReason::UpSwitch)
            }
        } else if sustainable < current {
            if buffered_secs < self.config.urgent_buffer {
                decide(sustainable, SwitchReason::DownSwitch)
            } else {
                decide(current - 1, SwitchReason::DownSwitch)
            }
        } else {
            decide(current, SwitchReason::Hold)
        }
    }
}
