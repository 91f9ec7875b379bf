// Playback Facade: the stable command surface over any MediaSource.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::PlayerError;
use crate::source::MediaSource;

/// Distance from the end at which playback counts as finished.
const END_TOLERANCE: f64 = 0.001;

/// Display capabilities, resolved once when the facade is built.
pub trait CapabilityProbe: Send + Sync {
    fn supports_native_fullscreen(&self) -> bool;
}

/// A display with no fullscreen support (headless, embedded).
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessProbe;

impl CapabilityProbe for HeadlessProbe {
    fn supports_native_fullscreen(&self) -> bool {
        false
    }
}

/// A display that offers native fullscreen.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeFullscreenProbe;

impl CapabilityProbe for NativeFullscreenProbe {
    fn supports_native_fullscreen(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullscreenCapability {
    Native,
    None,
}

impl FullscreenCapability {
    pub fn probe(probe: &dyn CapabilityProbe) -> Self {
        if probe.supports_native_fullscreen() {
            Self::Native
        } else {
            Self::None
        }
    }
}

/// Play/pause/seek/volume/rate over a [`MediaSource`]. The same surface
/// drives the adaptive pipeline and a progressive file.
pub struct Player {
    source: Arc<dyn MediaSource>,
    fullscreen: FullscreenCapability,
    current_time: f64,
    paused: bool,
    ended: bool,
    volume: f64,
    muted: bool,
    playback_rate: f64,
    is_fullscreen: bool,
    /// Set once the clock has been moved to the source's start position
    positioned: bool,
}

impl Player {
    pub fn new(source: Arc<dyn MediaSource>, probe: &dyn CapabilityProbe) -> Self {
        let fullscreen = FullscreenCapability::probe(probe);
        debug!(?fullscreen, "Display capabilities probed");
        Self {
            source,
            fullscreen,
            current_time: 0.0,
            paused: true,
            ended: false,
            volume: 1.0,
            muted: false,
            playback_rate: 1.0,
            is_fullscreen: false,
            positioned: false,
        }
    }

    fn check_terminal(&self) -> Result<(), PlayerError> {
        match self.source.terminal_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn position_at_start(&mut self) {
        if self.positioned {
            return;
        }
        if let Some(start) = self.source.start_position() {
            self.current_time = start;
            self.positioned = true;
            self.source.set_playhead(start);
        }
    }

    pub fn play(&mut self) -> Result<(), PlayerError> {
        self.check_terminal()?;
        self.position_at_start();
        if self.ended {
            let start = self.source.seekable_range().map_or(0.0, |r| r.start);
            self.current_time = start;
            self.ended = false;
            self.source.set_playhead(start);
        }
        self.paused = false;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), PlayerError> {
        self.check_terminal()?;
        self.paused = true;
        Ok(())
    }

    /// Moves the playhead to `time`, clamped to the seekable range. When the
    /// target is not buffered, the covering media is fetched before the
    /// clock resumes.
    pub async fn seek(&mut self, time: f64) -> Result<(), PlayerError> {
        self.check_terminal()?;
        if time.is_nan() {
            return Err(PlayerError::invalid_argument("seek time is NaN"));
        }
        let range = self.source.seekable_range().ok_or(PlayerError::NotLoaded)?;
        let target = time.clamp(range.start, range.end.max(range.start));

        debug!(requested = time, target, "Seeking");
        self.current_time = target;
        self.positioned = true;
        self.ended = false;
        self.source.set_playhead(target);

        if self.source.buffered_ahead_of(target) <= 0.0 {
            self.source.ensure_buffered(target).await?;
        }
        Ok(())
    }

    pub fn set_volume(&mut self, volume: f64) -> Result<(), PlayerError> {
        self.check_terminal()?;
        if !(0.0..=1.0).contains(&volume) {
            return Err(PlayerError::invalid_argument(format!(
                "volume {volume} outside [0, 1]"
            )));
        }
        self.volume = volume;
        Ok(())
    }

    pub fn set_muted(&mut self, muted: bool) -> Result<(), PlayerError> {
        self.check_terminal()?;
        self.muted = muted;
        Ok(())
    }

    pub fn set_playback_rate(&mut self, rate: f64) -> Result<(), PlayerError> {
        self.check_terminal()?;
        if !(rate.is_finite() && rate > 0.0) {
            return Err(PlayerError::invalid_argument(format!(
                "playback rate {rate} must be positive"
            )));
        }
        self.playback_rate = rate;
        Ok(())
    }

    pub fn request_fullscreen(&mut self) -> Result<(), PlayerError> {
        self.check_terminal()?;
        match self.fullscreen {
            FullscreenCapability::Native => {
                self.is_fullscreen = true;
                Ok(())
            }
            FullscreenCapability::None => Err(PlayerError::FullscreenUnsupported),
        }
    }

    pub fn exit_fullscreen(&mut self) -> Result<(), PlayerError> {
        self.check_terminal()?;
        self.is_fullscreen = false;
        Ok(())
    }

    /// Advances the clock by `elapsed` scaled by the playback rate. Progress
    /// stops at the edge of the buffered media (a stall) and at the end of
    /// the presentation, which pauses playback and sets `ended`.
    pub fn tick(&mut self, elapsed: Duration) -> Result<(), PlayerError> {
        self.check_terminal()?;
        self.position_at_start();
        if self.paused || self.ended {
            return Ok(());
        }

        let wanted = elapsed.as_secs_f64() * self.playback_rate;
        let available = self.source.buffered_ahead_of(self.current_time);
        self.current_time += wanted.min(available);

        if let Some(duration) = self.source.duration()
            && duration.is_finite()
            && self.current_time + END_TOLERANCE >= duration
        {
            self.current_time = duration;
            self.ended = true;
            self.paused = true;
            info!(duration, "Playback ended");
        }
        self.source.set_playhead(self.current_time);
        Ok(())
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn duration(&self) -> Option<f64> {
        self.source.duration()
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn ended(&self) -> bool {
        self.ended
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn muted(&self) -> bool {
        self.muted
    }

    pub fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    pub fn buffered_ahead_of(&self, time: f64) -> f64 {
        self.source.buffered_ahead_of(time)
    }

    /// Playing, not ended, and nothing buffered at the playhead.
    pub fn stalled(&self) -> bool {
        !self.paused && !self.ended && self.source.buffered_ahead_of(self.current_time) <= 0.0
    }

    pub fn fullscreen_capability(&self) -> FullscreenCapability {
        self.fullscreen
    }

    pub fn is_fullscreen(&self) -> bool {
        self.is_fullscreen
    }

    pub fn terminal_error(&self) -> Option<PlayerError> {
        self.source.terminal_error()
    }
}
