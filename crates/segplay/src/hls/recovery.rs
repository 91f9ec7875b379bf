// Error recovery: fault classification and the recovery state machine.

use std::fmt;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::error::FetchError;
use crate::hls::config::RecoveryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    Network,
    Media,
    Other,
}

/// Pipeline stage a fault originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultStage {
    Playlist,
    Fetcher,
    Sink,
    Pipeline,
}

impl fmt::Display for FaultStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Playlist => "playlist",
            Self::Fetcher => "fetcher",
            Self::Sink => "sink",
            Self::Pipeline => "pipeline",
        };
        f.write_str(name)
    }
}

/// A single classified fault. Created where the fault happens, consumed by
/// [`ErrorRecovery::on_fault`], then dropped.
#[derive(Debug, Clone)]
pub struct FaultRecord {
    pub kind: FaultKind,
    pub fatal: bool,
    pub stage: FaultStage,
    pub at: Instant,
    pub message: String,
}

impl FaultRecord {
    pub fn new(kind: FaultKind, fatal: bool, stage: FaultStage, message: impl Into<String>) -> Self {
        Self {
            kind,
            fatal,
            stage,
            at: Instant::now(),
            message: message.into(),
        }
    }

    pub fn network(stage: FaultStage, fatal: bool, message: impl Into<String>) -> Self {
        Self::new(FaultKind::Network, fatal, stage, message)
    }

    pub fn media(fatal: bool, message: impl Into<String>) -> Self {
        Self::new(FaultKind::Media, fatal, FaultStage::Sink, message)
    }

    pub fn other(stage: FaultStage, message: impl Into<String>) -> Self {
        Self::new(FaultKind::Other, true, stage, message)
    }

    pub fn from_fetch_error(stage: FaultStage, err: &FetchError, fatal: bool) -> Self {
        Self::new(err.fault_kind(), fatal, stage, err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Healthy,
    /// Transient trouble handled locally, e.g. a segment fetch being retried.
    Degraded,
    /// Reloading the playlist after a fatal network fault.
    Recovering,
    /// Resetting the decode pipeline after a fatal media fault.
    RecoveringMedia,
    Terminated,
}

impl RecoveryState {
    pub fn is_recovering(&self) -> bool {
        matches!(self, Self::Recovering | Self::RecoveringMedia)
    }
}

/// What the pipeline must do in response to a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Keep going; local retries are handling it.
    Continue,
    ReloadPlaylist,
    /// Reset the sink and resume from the last buffered position.
    ResetMedia,
    Terminate,
}

#[derive(Debug)]
pub struct ErrorRecovery {
    state: RecoveryState,
    attempts: u32,
    max_attempts: u32,
    terminal_reason: Option<String>,
}

impl ErrorRecovery {
    pub fn new(config: &RecoveryConfig) -> Self {
        Self {
            state: RecoveryState::Healthy,
            attempts: 0,
            max_attempts: config.max_recovery_attempts,
            terminal_reason: None,
        }
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    /// Recovery attempts made since the last return to healthy.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_terminated(&self) -> bool {
        self.state == RecoveryState::Terminated
    }

    pub fn terminal_reason(&self) -> Option<&str> {
        self.terminal_reason.as_deref()
    }

    pub fn on_fault(&mut self, fault: FaultRecord) -> RecoveryAction {
        if self.is_terminated() {
            return RecoveryAction::Terminate;
        }

        if !fault.fatal {
            if self.state == RecoveryState::Healthy {
                warn!(stage = %fault.stage, kind = ?fault.kind, message = %fault.message, "Playback degraded");
                self.state = RecoveryState::Degraded;
            }
            return RecoveryAction::Continue;
        }

        self.attempts += 1;
        if self.attempts > self.max_attempts {
            let reason = format!(
                "recovery failed after {} attempts: {}",
                self.max_attempts, fault.message
            );
            return self.terminate(reason);
        }

        match fault.kind {
            FaultKind::Network => {
                warn!(
                    stage = %fault.stage,
                    attempt = self.attempts,
                    max = self.max_attempts,
                    message = %fault.message,
                    "Fatal network fault, reloading playlist"
                );
                self.state = RecoveryState::Recovering;
                RecoveryAction::ReloadPlaylist
            }
            FaultKind::Media => {
                warn!(
                    stage = %fault.stage,
                    attempt = self.attempts,
                    max = self.max_attempts,
                    message = %fault.message,
                    "Fatal media fault, resetting media pipeline"
                );
                self.state = RecoveryState::RecoveringMedia;
                RecoveryAction::ResetMedia
            }
            FaultKind::Other => self.terminate(fault.message),
        }
    }

    /// Marks the current fault as resolved. Returns `true` if the state changed.
    pub fn on_recovered(&mut self) -> bool {
        match self.state {
            RecoveryState::Healthy | RecoveryState::Terminated => false,
            previous => {
                info!(from = ?previous, attempts = self.attempts, "Playback recovered");
                self.state = RecoveryState::Healthy;
                self.attempts = 0;
                true
            }
        }
    }

    /// Enters the absorbing terminal state.
    pub fn terminate(&mut self, reason: impl Into<String>) -> RecoveryAction {
        if !self.is_terminated() {
            let reason = reason.into();
            error!(reason = %reason, "Playback terminated");
            self.state = RecoveryState::Terminated;
            self.terminal_reason = Some(reason);
        }
        RecoveryAction::Terminate
    }
}
