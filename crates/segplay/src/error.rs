use std::time::Duration;

use crate::hls::recovery::FaultKind;

/// Errors produced while parsing a playlist. Every variant aborts the load
/// that produced it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("playlist is not valid UTF-8")]
    NotUtf8,

    #[error("malformed playlist: {reason}")]
    Syntax { reason: String },

    #[error("VOD playlist is missing #EXT-X-ENDLIST")]
    MissingEndList,

    #[error("master playlist declares no playable variants")]
    EmptyMasterPlaylist,

    #[error("expected a media playlist, got a master playlist")]
    UnexpectedMaster,

    #[error("invalid URI `{uri}`: {reason}")]
    InvalidUri { uri: String, reason: String },
}

impl ParseError {
    pub fn syntax(reason: impl Into<String>) -> Self {
        Self::Syntax {
            reason: reason.into(),
        }
    }

    pub fn invalid_uri(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUri {
            uri: uri.into(),
            reason: reason.into(),
        }
    }
}

/// Errors produced while fetching a playlist, init segment or media segment.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("fetch cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("network error for {url}: {reason}")]
    Network {
        url: String,
        reason: String,
        retryable: bool,
    },

    #[error("request for {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("variant {variant} has no segment with sequence number {sequence}")]
    UnknownSegment { variant: usize, sequence: u64 },

    #[error("variant {variant} has no initialization segment")]
    NoInitSegment { variant: usize },

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<FetchError> },
}

impl FetchError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn http_status(status: u16, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    pub fn network(url: impl Into<String>, reason: impl Into<String>, retryable: bool) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.into(),
            retryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled
            | Self::InvalidUrl { .. }
            | Self::UnknownSegment { .. }
            | Self::NoInitSegment { .. }
            | Self::RetriesExhausted { .. } => false,
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            Self::Network { retryable, .. } => *retryable,
            Self::Timeout { .. } => true,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Every fetch failure is a network fault as far as recovery is concerned.
    pub fn fault_kind(&self) -> FaultKind {
        FaultKind::Network
    }
}

/// Raised by a [`MediaSink`](crate::source::MediaSink) that could not accept
/// data. Fatal sink errors trigger a media reset.
#[derive(Debug, Clone, thiserror::Error)]
#[error("media pipeline rejected data: {reason}")]
pub struct SinkError {
    pub reason: String,
    pub fatal: bool,
}

impl SinkError {
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            fatal: true,
        }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            fatal: false,
        }
    }
}

/// Errors surfaced to callers of the playback facade and the pipeline.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlayerError {
    #[error("playlist error: {0}")]
    Parse(#[from] ParseError),

    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("playback terminated: {reason}")]
    Terminated { reason: String },

    #[error("no variant at index {index} ({count} available)")]
    UnknownVariant { index: usize, count: usize },

    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("fullscreen is not supported on this display")]
    FullscreenUnsupported,

    #[error("source has not been loaded")]
    NotLoaded,
}

impl PlayerError {
    pub fn terminated(reason: impl Into<String>) -> Self {
        Self::Terminated {
            reason: reason.into(),
        }
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated { .. })
    }
}

pub type Result<T, E = PlayerError> = std::result::Result<T, E>;
