use std::time::Duration;

use crate::hls::abr::SwitchReason;
use crate::hls::recovery::{FaultKind, FaultStage, RecoveryState};

/// Events reported by the adaptive pipeline to whoever hosts it.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    ManifestLoaded {
        variants: usize,
        is_live: bool,
        /// `None` for live streams
        duration: Option<f64>,
    },
    VariantSwitched {
        from: Option<usize>,
        to: usize,
        bandwidth: u64,
        reason: SwitchReason,
    },
    InitSegmentLoaded {
        variant: usize,
        bytes: u64,
    },
    SegmentBuffered {
        variant: usize,
        sequence: u64,
        start: f64,
        end: f64,
        bytes: u64,
        elapsed: Duration,
    },
    PlaylistRefreshed {
        variant: usize,
        media_sequence: u64,
        appended: usize,
        evicted: usize,
    },
    SequenceGap {
        variant: usize,
        expected: u64,
        found: u64,
    },
    FaultRaised {
        kind: FaultKind,
        stage: FaultStage,
        fatal: bool,
        message: String,
    },
    RecoveryStateChanged {
        from: RecoveryState,
        to: RecoveryState,
    },
    /// The sink was reset; playback resumes from `resume_at`.
    MediaResetRequested {
        resume_at: f64,
    },
    EndOfStream,
    Terminated {
        reason: String,
    },
}
