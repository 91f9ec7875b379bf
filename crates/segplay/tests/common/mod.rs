#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use segplay_engine::error::{FetchError, SinkError};
use segplay_engine::hls::{ByteRange, HlsConfig, PlayerEvent, SegmentRef};
use segplay_engine::{MediaSink, Transport};
use tokio::sync::mpsc;
use url::Url;

pub const BASE: &str = "https://cdn.example";

pub fn url(path: &str) -> Url {
    Url::parse(&format!("{BASE}{path}")).unwrap()
}

/// A canned reply for one request.
#[derive(Clone)]
pub struct Reply {
    pub delay: Duration,
    pub result: Result<Bytes, FetchError>,
}

impl Reply {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(body.into()),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Err(FetchError::http_status(status, "scripted")),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Serves scripted replies per path. Each path plays its queue in order and
/// then keeps repeating the last reply; paths without a script get their own
/// path back as the body.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<Vec<String>>,
    default_delay: Mutex<HashMap<String, Duration>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, path: &str, replies: Vec<Reply>) {
        self.scripts.lock().insert(path.to_string(), replies.into());
    }

    /// Delays every unscripted request whose path starts with `prefix`.
    pub fn delay_prefix(&self, prefix: &str, delay: Duration) {
        self.default_delay.lock().insert(prefix.to_string(), delay);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self, path: &str) -> usize {
        self.requests.lock().iter().filter(|p| *p == path).count()
    }

    fn next_reply(&self, path: &str) -> Reply {
        let mut scripts = self.scripts.lock();
        if let Some(queue) = scripts.get_mut(path) {
            let reply = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            if let Some(reply) = reply {
                return reply;
            }
        }
        let delay = self
            .default_delay
            .lock()
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map_or(Duration::ZERO, |(_, d)| *d);
        Reply::ok(path.to_string()).after(delay)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &Url, _range: Option<ByteRange>) -> Result<Bytes, FetchError> {
        let path = url.path().to_string();
        self.requests.lock().push(path.clone());
        let reply = self.next_reply(&path);
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        reply.result
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Appended {
    Init { variant: usize },
    Segment { variant: usize, sequence: u64 },
    Reset,
}

/// Records everything handed to the media pipeline.
#[derive(Default)]
pub struct RecordingSink {
    pub appended: Mutex<Vec<Appended>>,
    reject_once: Mutex<Option<u64>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fails the first append of `sequence` with a fatal decoder error.
    pub fn rejecting_once(sequence: u64) -> Arc<Self> {
        let sink = Self::default();
        *sink.reject_once.lock() = Some(sequence);
        Arc::new(sink)
    }

    pub fn log(&self) -> Vec<Appended> {
        self.appended.lock().clone()
    }
}

impl MediaSink for RecordingSink {
    fn append_init(&self, variant: usize, _data: &Bytes) -> Result<(), SinkError> {
        self.appended.lock().push(Appended::Init { variant });
        Ok(())
    }

    fn append_segment(
        &self,
        variant: usize,
        segment: &SegmentRef,
        _data: &Bytes,
    ) -> Result<(), SinkError> {
        if self
            .reject_once
            .lock()
            .take_if(|rejected| *rejected == segment.sequence)
            .is_some()
        {
            return Err(SinkError::fatal("decoder rejected segment"));
        }
        self.appended.lock().push(Appended::Segment {
            variant,
            sequence: segment.sequence,
        });
        Ok(())
    }

    fn reset(&self) {
        self.appended.lock().push(Appended::Reset);
    }
}

/// A media playlist with an init map and `prefix{i}.m4s` segments.
pub fn media_playlist(
    media_sequence: u64,
    durations: &[f64],
    prefix: &str,
    ended: bool,
) -> String {
    let target = durations.iter().copied().fold(0.0_f64, f64::max).ceil() as u64;
    let mut text = format!(
        "#EXTM3U\n#EXT-X-VERSION:7\n#EXT-X-TARGETDURATION:{target}\n#EXT-X-MEDIA-SEQUENCE:{media_sequence}\n#EXT-X-MAP:URI=\"init.mp4\"\n"
    );
    for (i, d) in durations.iter().enumerate() {
        let sequence = media_sequence + i as u64;
        text.push_str(&format!("#EXTINF:{d:.3},\n{prefix}{sequence}.m4s\n"));
    }
    if ended {
        text.push_str("#EXT-X-ENDLIST\n");
    }
    text
}

/// A multivariant playlist with one variant per `(bandwidth, directory)`.
pub fn master_playlist(variants: &[(u64, &str)]) -> String {
    let mut text = String::from("#EXTM3U\n");
    for (bandwidth, dir) in variants {
        text.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={bandwidth},CODECS=\"avc1.64001f,mp4a.40.2\"\n{dir}/index.m3u8\n"
        ));
    }
    text
}

/// Fast retries and no jitter, so failures resolve quickly under paused time.
pub fn test_config() -> HlsConfig {
    let mut config = HlsConfig::default();
    config.fetcher_config.retry_base_delay = Duration::from_millis(10);
    config.fetcher_config.retry_max_delay = Duration::from_millis(40);
    config.fetcher_config.retry_jitter = false;
    config.playlist_config.live_refresh_interval = Duration::from_millis(100);
    config
}

/// Receives events until `stop` matches one, collecting everything seen.
pub async fn collect_until(
    events: &mut mpsc::UnboundedReceiver<PlayerEvent>,
    limit: Duration,
    stop: impl Fn(&PlayerEvent) -> bool,
) -> Vec<PlayerEvent> {
    let mut seen = Vec::new();
    let _ = tokio::time::timeout(limit, async {
        while let Some(event) = events.recv().await {
            let done = stop(&event);
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await;
    seen
}
