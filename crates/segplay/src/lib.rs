//! Segmented adaptive-playback controller.
//!
//! Loads HLS multivariant and media playlists, keeps a forward buffer filled
//! with segments of the variant chosen by the ABR selector, and recovers from
//! network and media faults within a bounded budget. [`Player`] exposes the
//! same play/pause/seek surface over the adaptive pipeline and over a single
//! progressive file.

pub mod config;
pub mod error;
pub mod hls;
pub mod player;
pub mod proxy;
pub mod source;
pub mod test_utils;
pub mod transport;

pub use config::HttpConfig;
pub use error::{FetchError, ParseError, PlayerError, SinkError};
pub use hls::{HlsConfig, HlsPipeline, Manifest, PlayerEvent};
pub use player::{CapabilityProbe, FullscreenCapability, HeadlessProbe, NativeFullscreenProbe, Player};
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
pub use source::{MediaSink, MediaSource, NullSink, ProgressiveSource};
pub use transport::{HttpTransport, Transport, create_client};
