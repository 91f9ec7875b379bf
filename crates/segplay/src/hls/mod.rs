// Adaptive HLS playback: playlists, buffering, ABR, fetching and recovery

pub mod abr;
pub mod buffer;
pub mod config;
pub mod events;
pub mod fetcher;
pub mod loader;
pub mod metrics;
pub mod pipeline;
pub mod playlist;
pub mod recovery;
pub mod retry;

// Re-exports for easier access
pub use abr::{AbrDecision, AbrSelector, SelectionMode, SelectorState, SwitchReason, ThroughputEstimator};
pub use buffer::{BufferTracker, BufferedRange};
pub use config::{AbrConfig, BufferConfig, FetcherConfig, HlsConfig, PlaylistConfig, RecoveryConfig};
pub use events::PlayerEvent;
pub use fetcher::{FetchedSegment, SegmentFetcher};
pub use loader::PlaylistLoader;
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use pipeline::HlsPipeline;
pub use playlist::{ByteRange, InitSegment, Manifest, MediaTimeline, SegmentRef, Variant};
pub use recovery::{ErrorRecovery, FaultKind, FaultRecord, FaultStage, RecoveryAction, RecoveryState};
pub use retry::RetryPolicy;
