// HLS Segment Fetcher: retrieves init and media segments with timeout, retry and cancellation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::FetchError;
use crate::hls::config::FetcherConfig;
use crate::hls::metrics::PipelineMetrics;
use crate::hls::playlist::{InitSegment, Manifest, SegmentRef};
use crate::hls::recovery::{FaultRecord, FaultStage};
use crate::hls::retry::{RetryAction, retry_with_backoff};
use crate::transport::{Transport, get_with_timeout};

/// Receives the non-fatal faults raised while a fetch is being retried.
pub type FaultObserver = Arc<dyn Fn(FaultRecord) + Send + Sync>;

/// A media segment that was fetched successfully.
#[derive(Debug, Clone)]
pub struct FetchedSegment {
    pub variant: usize,
    pub segment: SegmentRef,
    pub data: Bytes,
    /// Wall-clock time spent fetching, including retries
    pub elapsed: Duration,
}

pub struct SegmentFetcher {
    transport: Arc<dyn Transport>,
    config: FetcherConfig,
    metrics: Arc<PipelineMetrics>,
    observer: Option<FaultObserver>,
}

impl SegmentFetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: FetcherConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            transport,
            config,
            metrics,
            observer: None,
        }
    }

    pub fn with_fault_observer(mut self, observer: FaultObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Fetches the initialization segment of `variant`.
    pub async fn fetch_init(
        &self,
        manifest: &Manifest,
        variant: usize,
        token: &CancellationToken,
    ) -> Result<Bytes, FetchError> {
        let init = manifest
            .variant(variant)
            .and_then(|v| v.init_segment())
            .cloned()
            .ok_or(FetchError::NoInitSegment { variant })?;
        self.fetch_init_segment(variant, &init, token).await
    }

    /// Fetches the media segment `sequence` of `variant`.
    pub async fn fetch_segment(
        &self,
        manifest: &Manifest,
        variant: usize,
        sequence: u64,
        token: &CancellationToken,
    ) -> Result<FetchedSegment, FetchError> {
        let segment = manifest
            .variant(variant)
            .and_then(|v| v.timeline())
            .and_then(|t| t.segment(sequence))
            .cloned()
            .ok_or(FetchError::UnknownSegment { variant, sequence })?;
        self.fetch_segment_ref(variant, segment, token).await
    }

    #[instrument(skip(self, init, token), fields(uri = %init.uri))]
    pub async fn fetch_init_segment(
        &self,
        variant: usize,
        init: &InitSegment,
        token: &CancellationToken,
    ) -> Result<Bytes, FetchError> {
        let data = self.fetch_with_retries(init, token).await?;
        self.metrics.record_init_segment(data.len() as u64);
        debug!(variant, size = data.len(), "Downloaded init segment");
        Ok(data)
    }

    /// Fetches an already resolved segment. Cancelling `token` aborts the
    /// request and any pending backoff; the caller never sees partial data.
    #[instrument(skip(self, segment, token), fields(msn = segment.sequence))]
    pub async fn fetch_segment_ref(
        &self,
        variant: usize,
        segment: SegmentRef,
        token: &CancellationToken,
    ) -> Result<FetchedSegment, FetchError> {
        let started = Instant::now();
        let target = InitSegment {
            uri: segment.uri.clone(),
            byte_range: segment.byte_range,
        };
        let data = self.fetch_with_retries(&target, token).await?;
        let elapsed = started.elapsed();

        self.metrics
            .record_segment(data.len() as u64, elapsed.as_millis() as u64);
        debug!(
            variant,
            msn = segment.sequence,
            size = data.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Downloaded segment"
        );
        Ok(FetchedSegment {
            variant,
            segment,
            data,
            elapsed,
        })
    }

    async fn fetch_with_retries(
        &self,
        resource: &InitSegment,
        token: &CancellationToken,
    ) -> Result<Bytes, FetchError> {
        let transport = self.transport.as_ref();
        let timeout = self.config.fetch_timeout;
        let url = &resource.uri;
        let range = resource.byte_range;

        let result = retry_with_backoff(
            &self.config.retry_policy(),
            token,
            |_| async move { RetryAction::from(get_with_timeout(transport, url, range, timeout).await) },
            |_, err| {
                self.metrics.record_retry();
                if let Some(observer) = &self.observer {
                    observer(FaultRecord::from_fetch_error(FaultStage::Fetcher, err, false));
                }
            },
        )
        .await;

        if let Err(err) = &result
            && !err.is_cancelled()
        {
            self.metrics.record_fetch_failure();
            warn!(url = %url, error = %err, "Segment fetch failed");
        }
        result
    }
}
