// Media sources behind the playback facade, and the sink they feed.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

use crate::error::{PlayerError, SinkError};
use crate::hls::buffer::{BufferTracker, BufferedRange};
use crate::hls::config::HlsConfig;
use crate::hls::fetcher::SegmentFetcher;
use crate::hls::metrics::PipelineMetrics;
use crate::hls::playlist::SegmentRef;
use crate::hls::recovery::{ErrorRecovery, FaultRecord, FaultStage, RecoveryAction};
use crate::transport::Transport;

/// The decode pipeline that consumes fetched bytes. Implementations are
/// called with the source's state locked and must not call back into it.
pub trait MediaSink: Send + Sync {
    fn append_init(&self, variant: usize, data: &Bytes) -> Result<(), SinkError>;

    fn append_segment(
        &self,
        variant: usize,
        segment: &SegmentRef,
        data: &Bytes,
    ) -> Result<(), SinkError>;

    /// Drops everything appended so far.
    fn reset(&self);
}

/// Discards all media.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MediaSink for NullSink {
    fn append_init(&self, _variant: usize, _data: &Bytes) -> Result<(), SinkError> {
        Ok(())
    }

    fn append_segment(
        &self,
        _variant: usize,
        _segment: &SegmentRef,
        _data: &Bytes,
    ) -> Result<(), SinkError> {
        Ok(())
    }

    fn reset(&self) {}
}

/// What the playback facade drives. The adaptive pipeline and a single
/// progressive file both implement it, so the facade never branches on
/// which one is active.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// `None` until known; infinite for live streams.
    fn duration(&self) -> Option<f64>;

    /// Range a seek may land in. Defaults to `[0, duration]`.
    fn seekable_range(&self) -> Option<BufferedRange> {
        self.duration().map(|d| BufferedRange::new(0.0, d))
    }

    /// Where playback should begin once the source is loaded.
    fn start_position(&self) -> Option<f64> {
        self.duration().map(|_| 0.0)
    }

    fn buffered_ahead_of(&self, time: f64) -> f64;

    fn buffered_ranges(&self) -> Vec<BufferedRange>;

    /// Reports the playback position so buffering can follow it.
    fn set_playhead(&self, time: f64);

    /// Fetches the media covering `time` if it is not buffered yet.
    async fn ensure_buffered(&self, time: f64) -> Result<(), PlayerError>;

    /// The terminal error once playback can no longer continue.
    fn terminal_error(&self) -> Option<PlayerError>;
}

struct ProgressiveState {
    buffer: BufferTracker,
    recovery: ErrorRecovery,
    loaded: bool,
    terminal: Option<PlayerError>,
}

/// A single media file fetched in one piece through the same transport,
/// retry and recovery machinery as the adaptive pipeline.
pub struct ProgressiveSource {
    url: Url,
    duration: f64,
    fetcher: SegmentFetcher,
    sink: Arc<dyn MediaSink>,
    token: CancellationToken,
    state: Mutex<ProgressiveState>,
}

impl ProgressiveSource {
    pub fn new(
        url: Url,
        duration: f64,
        transport: Arc<dyn Transport>,
        config: Arc<HlsConfig>,
        sink: Arc<dyn MediaSink>,
    ) -> Self {
        let metrics = Arc::new(PipelineMetrics::new());
        Self {
            url,
            duration: duration.max(0.0),
            fetcher: SegmentFetcher::new(transport, config.fetcher_config.clone(), metrics),
            sink,
            token: CancellationToken::new(),
            state: Mutex::new(ProgressiveState {
                buffer: BufferTracker::new(),
                recovery: ErrorRecovery::new(&config.recovery_config),
                loaded: false,
                terminal: None,
            }),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().loaded
    }

    fn as_segment(&self) -> SegmentRef {
        SegmentRef {
            sequence: 0,
            uri: self.url.clone(),
            byte_range: None,
            duration: self.duration,
            start: 0.0,
            discontinuity: false,
            init: None,
            key: None,
        }
    }

    /// Fetches the whole file. Failures go through the recovery state
    /// machine; each recovery attempt refetches the file.
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn load(&self) -> Result<(), PlayerError> {
        loop {
            if let Some(err) = self.terminal_error() {
                return Err(err);
            }
            if self.is_loaded() {
                return Ok(());
            }

            let result = self
                .fetcher
                .fetch_segment_ref(0, self.as_segment(), &self.token)
                .await;

            let mut state = self.state.lock();
            let fault = match result {
                Ok(fetched) => match self.sink.append_segment(0, &fetched.segment, &fetched.data) {
                    Ok(()) => {
                        state.buffer.append(fetched.segment.time_range());
                        state.loaded = true;
                        state.recovery.on_recovered();
                        info!(bytes = fetched.data.len(), "Progressive source loaded");
                        return Ok(());
                    }
                    Err(err) => FaultRecord::media(err.fatal, err.to_string()),
                },
                Err(err) if err.is_cancelled() => return Err(err.into()),
                Err(err) => FaultRecord::from_fetch_error(FaultStage::Fetcher, &err, true),
            };

            match state.recovery.on_fault(fault) {
                RecoveryAction::Terminate => {
                    let reason = state
                        .recovery
                        .terminal_reason()
                        .unwrap_or("progressive load failed")
                        .to_string();
                    let err = PlayerError::terminated(reason);
                    state.terminal = Some(err.clone());
                    return Err(err);
                }
                RecoveryAction::ResetMedia => self.sink.reset(),
                action => debug!(?action, "Retrying progressive load"),
            }
        }
    }
}

#[async_trait]
impl MediaSource for ProgressiveSource {
    fn duration(&self) -> Option<f64> {
        Some(self.duration)
    }

    fn buffered_ahead_of(&self, time: f64) -> f64 {
        self.state.lock().buffer.buffered_ahead_of(time)
    }

    fn buffered_ranges(&self) -> Vec<BufferedRange> {
        self.state.lock().buffer.ranges()
    }

    fn set_playhead(&self, _time: f64) {}

    async fn ensure_buffered(&self, _time: f64) -> Result<(), PlayerError> {
        self.load().await
    }

    fn terminal_error(&self) -> Option<PlayerError> {
        self.state.lock().terminal.clone()
    }
}
