// Playlist Loader: retrieves and parses multivariant and media playlists.

use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

use crate::error::{FetchError, PlayerError};
use crate::hls::config::HlsConfig;
use crate::hls::metrics::PipelineMetrics;
use crate::hls::playlist::{Manifest, MediaTimeline};
use crate::hls::retry::{RetryAction, retry_with_backoff};
use crate::transport::{Transport, get_with_timeout};

pub struct PlaylistLoader {
    transport: Arc<dyn Transport>,
    config: Arc<HlsConfig>,
    metrics: Arc<PipelineMetrics>,
}

impl PlaylistLoader {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: Arc<HlsConfig>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            transport,
            config,
            metrics,
        }
    }

    /// Loads the playlist at `url`. A media playlist comes back as a
    /// one-variant manifest that is already loaded.
    #[instrument(skip(self, token), fields(url = %url))]
    pub async fn load_manifest(
        &self,
        url: &Url,
        token: &CancellationToken,
    ) -> Result<Manifest, PlayerError> {
        let body = self.fetch(url, token).await?;
        let manifest = Manifest::parse_bytes(&body, url)?;
        info!(
            variants = manifest.len(),
            multivariant = manifest.is_multivariant(),
            "Playlist loaded"
        );
        Ok(manifest)
    }

    #[instrument(skip(self, token), fields(url = %url))]
    pub async fn load_media(
        &self,
        url: &Url,
        token: &CancellationToken,
    ) -> Result<MediaTimeline, PlayerError> {
        let body = self.fetch(url, token).await?;
        let timeline = MediaTimeline::parse_bytes(&body, url)?;
        debug!(
            media_sequence = timeline.media_sequence,
            segments = timeline.segments.len(),
            live = timeline.is_live,
            "Media playlist loaded"
        );
        Ok(timeline)
    }

    async fn fetch(&self, url: &Url, token: &CancellationToken) -> Result<Bytes, FetchError> {
        let transport = self.transport.as_ref();
        let timeout = self.config.playlist_config.playlist_fetch_timeout;
        retry_with_backoff(
            &self.config.fetcher_config.retry_policy(),
            token,
            |_| async move { RetryAction::from(get_with_timeout(transport, url, None, timeout).await) },
            |_, _| self.metrics.record_retry(),
        )
        .await
    }
}
