// HLS Playlist Model: parsed multivariant/media playlists and live merging.

use std::sync::Arc;

use m3u8_rs::{MediaPlaylist, MediaPlaylistType, parse_playlist_res};
use tracing::{debug, warn};
use url::Url;

use crate::error::ParseError;
use crate::hls::buffer::BufferedRange;

/// A resolved byte range within a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Value for an HTTP `Range` header (inclusive end).
    pub fn header_value(&self) -> String {
        let last = (self.offset + self.length).saturating_sub(1).max(self.offset);
        format!("bytes={}-{}", self.offset, last)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u64,
    pub height: u64,
}

/// Codec/container metadata required before any media segment of a variant
/// can be decoded. Shared by every segment that follows the same `#EXT-X-MAP`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitSegment {
    pub uri: Url,
    pub byte_range: Option<ByteRange>,
}

/// Encryption parameters declared by `#EXT-X-KEY`. Carried for the sink;
/// segments are not decrypted here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub method: String,
    pub uri: Option<Url>,
    pub iv: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRef {
    pub sequence: u64,
    pub uri: Url,
    pub byte_range: Option<ByteRange>,
    /// Declared `#EXTINF` duration in seconds
    pub duration: f64,
    /// Media time at which this segment starts, derived from the durations
    /// of the segments before it
    pub start: f64,
    pub discontinuity: bool,
    pub init: Option<Arc<InitSegment>>,
    pub key: Option<Arc<KeyInfo>>,
}

impl SegmentRef {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    pub fn time_range(&self) -> BufferedRange {
        BufferedRange::new(self.start, self.end())
    }
}

/// A discontinuity in media sequence numbers observed while merging a live
/// playlist refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceGap {
    pub expected: u64,
    pub found: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub appended: usize,
    pub evicted: usize,
    pub gaps: Vec<SequenceGap>,
    /// The refresh carried `#EXT-X-ENDLIST`
    pub ended: bool,
}

/// The segment list of one variant, as declared by its media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaTimeline {
    pub media_sequence: u64,
    pub target_duration: f64,
    pub segments: Vec<SegmentRef>,
    pub end_list: bool,
    pub is_live: bool,
}

impl MediaTimeline {
    /// Parses a media playlist. Segment and map URIs are resolved against `url`.
    pub fn parse(text: &str, url: &Url) -> Result<Self, ParseError> {
        match parse_playlist_res(text.as_bytes()) {
            Ok(m3u8_rs::Playlist::MediaPlaylist(playlist)) => Self::from_playlist(&playlist, url),
            Ok(m3u8_rs::Playlist::MasterPlaylist(_)) => Err(ParseError::UnexpectedMaster),
            Err(e) => Err(ParseError::syntax(format!("failed to parse media playlist: {e}"))),
        }
    }

    pub fn parse_bytes(bytes: &[u8], url: &Url) -> Result<Self, ParseError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ParseError::NotUtf8)?;
        Self::parse(text, url)
    }

    fn from_playlist(playlist: &MediaPlaylist, url: &Url) -> Result<Self, ParseError> {
        let is_vod = matches!(playlist.playlist_type, Some(MediaPlaylistType::Vod));
        if is_vod && !playlist.end_list {
            return Err(ParseError::MissingEndList);
        }

        for tag in &playlist.unknown_tags {
            debug!(tag = %tag.tag, "Ignoring unknown playlist tag");
        }

        let mut current_init = playlist_level_init(playlist, url)?;
        let mut current_key: Option<Arc<KeyInfo>> = None;
        let mut last_range: Option<(String, u64)> = None;
        let mut segments = Vec::with_capacity(playlist.segments.len());
        let mut start = 0.0;

        for (index, segment) in playlist.segments.iter().enumerate() {
            if let Some(map) = &segment.map {
                current_init = Some(resolve_init(map, url)?);
            }
            if let Some(key) = &segment.key {
                current_key = resolve_key(key, url)?;
            }

            if segment.uri.trim().is_empty() {
                warn!(index, "Skipping segment with an empty URI");
                continue;
            }
            let uri = url
                .join(segment.uri.trim())
                .map_err(|e| ParseError::invalid_uri(&segment.uri, e.to_string()))?;

            // An omitted offset continues from the previous sub-range of the same resource.
            let byte_range = segment.byte_range.as_ref().map(|range| {
                let offset = range.offset.unwrap_or_else(|| match &last_range {
                    Some((prev_uri, prev_end)) if prev_uri == uri.as_str() => *prev_end,
                    _ => 0,
                });
                ByteRange {
                    offset,
                    length: range.length,
                }
            });
            if let Some(range) = &byte_range {
                last_range = Some((uri.to_string(), range.end()));
            }

            let sequence = playlist
                .media_sequence
                .checked_add(index as u64)
                .ok_or_else(|| {
                    ParseError::syntax(format!(
                        "media sequence {} overflows at segment {index}",
                        playlist.media_sequence
                    ))
                })?;
            let duration = f64::from(segment.duration).max(0.0);
            segments.push(SegmentRef {
                sequence,
                uri,
                byte_range,
                duration,
                start,
                discontinuity: segment.discontinuity,
                init: current_init.clone(),
                key: current_key.clone(),
            });
            start += duration;
        }

        Ok(Self {
            media_sequence: playlist.media_sequence,
            target_duration: playlist.target_duration as f64,
            segments,
            end_list: playlist.end_list,
            is_live: !playlist.end_list && !is_vod,
        })
    }

    pub fn first_sequence(&self) -> Option<u64> {
        self.segments.first().map(|s| s.sequence)
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.segments.last().map(|s| s.sequence)
    }

    pub fn start_time(&self) -> f64 {
        self.segments.first().map_or(0.0, |s| s.start)
    }

    pub fn end_time(&self) -> f64 {
        self.segments.last().map_or(0.0, SegmentRef::end)
    }

    pub fn segment(&self, sequence: u64) -> Option<&SegmentRef> {
        // Live merges may leave sequence gaps, so positions are not index-aligned.
        let index = self
            .segments
            .binary_search_by_key(&sequence, |s| s.sequence)
            .ok()?;
        self.segments.get(index)
    }

    /// The segment whose time range covers `time`.
    pub fn segment_at(&self, time: f64) -> Option<&SegmentRef> {
        let index = self.segments.partition_point(|s| s.end() <= time);
        self.segments.get(index).filter(|s| s.start <= time)
    }

    pub fn init_segment(&self) -> Option<&Arc<InitSegment>> {
        self.segments.iter().find_map(|s| s.init.as_ref())
    }

    /// Shifts every start time by `offset` seconds.
    fn shift(&mut self, offset: f64) {
        if offset == 0.0 {
            return;
        }
        for segment in &mut self.segments {
            segment.start += offset;
        }
    }

    /// Places this timeline on the media-time axis of `reference` using
    /// media sequence numbers, which are aligned across variants.
    pub fn align_to(&mut self, reference: &MediaTimeline) {
        let Some((sequence, start)) = self.segments.first().map(|s| (s.sequence, s.start)) else {
            return;
        };
        let anchor = if let Some(same) = reference.segment(sequence) {
            Some(same.start)
        } else if let Some(last) = reference.segments.last()
            && last.sequence < sequence
        {
            let missing = (sequence - last.sequence - 1) as f64;
            Some(last.end() + missing * reference.target_duration)
        } else if let Some(head) = reference.segments.first()
            && sequence < head.sequence
        {
            let missing = (head.sequence - sequence) as f64;
            Some(head.start - missing * self.target_duration)
        } else {
            None
        };
        if let Some(anchor) = anchor {
            self.shift(anchor - start);
        }
    }

    /// Folds a refreshed live playlist into this timeline.
    ///
    /// Segments newer than the last known sequence number are appended with
    /// start times continuing the existing timeline; segments that fell out of
    /// the server's window (sequence below the refresh's media sequence) are
    /// evicted. Sequence gaps are reported, never fatal.
    pub fn merge(&mut self, update: MediaTimeline) -> MergeReport {
        let mut report = MergeReport {
            ended: update.end_list,
            ..Default::default()
        };

        let Some(mut last) = self.segments.last().map(|s| (s.sequence, s.end())) else {
            *self = update;
            report.appended = self.segments.len();
            return report;
        };

        for mut segment in update.segments {
            if segment.sequence <= last.0 {
                continue;
            }
            let expected = last.0 + 1;
            let mut start = last.1;
            if segment.sequence != expected {
                report.gaps.push(SequenceGap {
                    expected,
                    found: segment.sequence,
                });
                start += (segment.sequence - expected) as f64 * update.target_duration;
            }
            segment.start = start;
            last = (segment.sequence, segment.end());
            self.segments.push(segment);
            report.appended += 1;
        }

        let before = self.segments.len();
        self.segments.retain(|s| s.sequence >= update.media_sequence);
        report.evicted = before - self.segments.len();

        self.media_sequence = self.first_sequence().unwrap_or(update.media_sequence);
        self.target_duration = update.target_duration;
        self.end_list = update.end_list;
        self.is_live = update.is_live;

        report
    }
}

/// One quality rendition of the content.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    /// Declared bitrate in bits per second (0 when unknown)
    pub bandwidth: u64,
    pub resolution: Option<Resolution>,
    pub codecs: Option<String>,
    /// URI of this variant's media playlist
    pub uri: Url,
    timeline: Option<MediaTimeline>,
}

impl Variant {
    pub fn new(bandwidth: u64, uri: Url) -> Self {
        Self {
            bandwidth,
            resolution: None,
            codecs: None,
            uri,
            timeline: None,
        }
    }

    pub fn with_timeline(mut self, timeline: MediaTimeline) -> Self {
        self.timeline = Some(timeline);
        self
    }

    pub fn timeline(&self) -> Option<&MediaTimeline> {
        self.timeline.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.timeline.is_some()
    }

    pub fn segments(&self) -> &[SegmentRef] {
        self.timeline.as_ref().map_or(&[], |t| t.segments.as_slice())
    }

    pub fn init_segment(&self) -> Option<&Arc<InitSegment>> {
        self.timeline.as_ref().and_then(MediaTimeline::init_segment)
    }
}

/// A parsed playlist: the variants available and the stream-level flags
/// derived from the media playlists loaded so far.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub url: Url,
    /// Sorted by ascending bandwidth; index 0 is the lowest variant
    pub variants: Vec<Variant>,
    pub is_live: bool,
    pub target_duration: f64,
    pub end_list: bool,
    multivariant: bool,
}

impl Manifest {
    /// Parses either a multivariant (master) playlist or a single media
    /// playlist. Unknown tags are ignored.
    pub fn parse(text: &str, url: &Url) -> Result<Self, ParseError> {
        match parse_playlist_res(text.as_bytes()) {
            Ok(m3u8_rs::Playlist::MasterPlaylist(master)) => {
                let mut variants = Vec::with_capacity(master.variants.len());
                for stream in master.variants.iter().filter(|v| !v.is_i_frame) {
                    let uri = url
                        .join(stream.uri.trim())
                        .map_err(|e| ParseError::invalid_uri(&stream.uri, e.to_string()))?;
                    variants.push(Variant {
                        bandwidth: stream.bandwidth,
                        resolution: stream.resolution.map(|r| Resolution {
                            width: r.width,
                            height: r.height,
                        }),
                        codecs: stream.codecs.clone(),
                        uri,
                        timeline: None,
                    });
                }
                if variants.is_empty() {
                    return Err(ParseError::EmptyMasterPlaylist);
                }
                variants.sort_by_key(|v| v.bandwidth);

                Ok(Self {
                    url: url.clone(),
                    variants,
                    is_live: false,
                    target_duration: 0.0,
                    end_list: false,
                    multivariant: true,
                })
            }
            Ok(m3u8_rs::Playlist::MediaPlaylist(playlist)) => {
                let timeline = MediaTimeline::from_playlist(&playlist, url)?;
                Ok(Self::from_media(url.clone(), timeline))
            }
            Err(e) => Err(ParseError::syntax(format!("failed to parse playlist: {e}"))),
        }
    }

    pub fn parse_bytes(bytes: &[u8], url: &Url) -> Result<Self, ParseError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ParseError::NotUtf8)?;
        Self::parse(text, url)
    }

    /// A single-variant manifest for a playlist that had no master.
    pub fn from_media(url: Url, timeline: MediaTimeline) -> Self {
        let mut manifest = Self {
            url: url.clone(),
            variants: vec![Variant::new(0, url)],
            is_live: false,
            target_duration: 0.0,
            end_list: false,
            multivariant: false,
        };
        manifest.apply_flags(&timeline);
        manifest.variants[0].timeline = Some(timeline);
        manifest
    }

    pub fn is_multivariant(&self) -> bool {
        self.multivariant
    }

    pub fn variant(&self, index: usize) -> Option<&Variant> {
        self.variants.get(index)
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    /// Any variant whose media playlist has been loaded.
    pub fn loaded_timeline(&self) -> Option<&MediaTimeline> {
        self.variants.iter().find_map(Variant::timeline)
    }

    /// Presentation duration: `None` until a media playlist is loaded,
    /// infinite for live streams.
    pub fn duration(&self) -> Option<f64> {
        let timeline = self.loaded_timeline()?;
        if self.is_live {
            Some(f64::INFINITY)
        } else {
            Some(timeline.end_time())
        }
    }

    fn apply_flags(&mut self, timeline: &MediaTimeline) {
        self.is_live = timeline.is_live;
        self.end_list = timeline.end_list;
        self.target_duration = timeline.target_duration;
    }

    /// Installs the media playlist of variant `index`, replacing any earlier
    /// one and aligning its start times with the most recently refreshed
    /// variant loaded before it.
    pub fn attach_media(&mut self, index: usize, mut timeline: MediaTimeline) -> bool {
        if index >= self.variants.len() {
            return false;
        }
        if let Some(reference) = self
            .variants
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .filter_map(|(_, v)| v.timeline.as_ref())
            .max_by_key(|t| t.last_sequence())
        {
            timeline.align_to(reference);
        }
        self.apply_flags(&timeline);
        self.variants[index].timeline = Some(timeline);
        true
    }

    /// Merges a refreshed media playlist into variant `index`.
    pub fn merge_media(&mut self, index: usize, update: MediaTimeline) -> Option<MergeReport> {
        let variant = self.variants.get_mut(index)?;
        let report = match variant.timeline.as_mut() {
            Some(existing) => existing.merge(update),
            None => {
                let appended = update.segments.len();
                let ended = update.end_list;
                variant.timeline = Some(update);
                MergeReport {
                    appended,
                    ended,
                    ..Default::default()
                }
            }
        };
        for gap in &report.gaps {
            warn!(
                variant = index,
                expected = gap.expected,
                found = gap.found,
                "Media sequence gap in refreshed playlist"
            );
        }
        if let Some((is_live, end_list, target_duration)) = self.variants[index]
            .timeline
            .as_ref()
            .map(|t| (t.is_live, t.end_list, t.target_duration))
        {
            self.is_live = is_live;
            self.end_list = end_list;
            self.target_duration = target_duration;
        }
        Some(report)
    }
}

/// Parses raw playlist text into a [`Manifest`].
pub fn parse(text: &str, url: &Url) -> Result<Manifest, ParseError> {
    Manifest::parse(text, url)
}

/// Merges a newly parsed manifest into an existing one, variant by variant.
pub fn merge(mut existing: Manifest, update: Manifest) -> Manifest {
    if existing.variants.len() != update.variants.len() {
        warn!(
            existing = existing.variants.len(),
            update = update.variants.len(),
            "Variant count changed between refreshes; merging the common prefix"
        );
    }
    for (index, variant) in update.variants.into_iter().enumerate() {
        if let Some(timeline) = variant.timeline {
            existing.merge_media(index, timeline);
        }
    }
    existing
}

fn resolve_init(map: &m3u8_rs::Map, url: &Url) -> Result<Arc<InitSegment>, ParseError> {
    let uri = url
        .join(map.uri.trim())
        .map_err(|e| ParseError::invalid_uri(&map.uri, e.to_string()))?;
    Ok(Arc::new(InitSegment {
        uri,
        byte_range: map.byte_range.as_ref().map(|r| ByteRange {
            offset: r.offset.unwrap_or(0),
            length: r.length,
        }),
    }))
}

fn resolve_key(key: &m3u8_rs::Key, url: &Url) -> Result<Option<Arc<KeyInfo>>, ParseError> {
    let method = match &key.method {
        m3u8_rs::KeyMethod::None => return Ok(None),
        m3u8_rs::KeyMethod::AES128 => "AES-128".to_string(),
        m3u8_rs::KeyMethod::SampleAES => "SAMPLE-AES".to_string(),
        m3u8_rs::KeyMethod::Other(other) => other.clone(),
    };
    let uri = key
        .uri
        .as_deref()
        .map(|uri| {
            url.join(uri)
                .map_err(|e| ParseError::invalid_uri(uri, e.to_string()))
        })
        .transpose()?;
    Ok(Some(Arc::new(KeyInfo {
        method,
        uri,
        iv: key.iv.clone(),
    })))
}

/// Init segment of an `#EXT-X-MAP` declared before the first segment, which
/// the parser leaves among the playlist-level unknown tags.
fn playlist_level_init(
    playlist: &MediaPlaylist,
    url: &Url,
) -> Result<Option<Arc<InitSegment>>, ParseError> {
    let Some(attrs) = playlist
        .unknown_tags
        .iter()
        .rev()
        .find(|t| t.tag == "X-MAP")
        .and_then(|t| t.rest.as_deref())
    else {
        return Ok(None);
    };

    let mut uri = None;
    let mut byte_range = None;
    for (key, value) in attribute_list(attrs) {
        if key.eq_ignore_ascii_case("URI") {
            uri = Some(value);
        } else if key.eq_ignore_ascii_case("BYTERANGE") {
            byte_range = parse_byte_range(value);
        }
    }

    let Some(uri) = uri else {
        return Ok(None);
    };
    let uri = url
        .join(uri)
        .map_err(|e| ParseError::invalid_uri(uri, e.to_string()))?;
    Ok(Some(Arc::new(InitSegment { uri, byte_range })))
}

/// `length[@offset]`; a missing offset starts the resource.
fn parse_byte_range(value: &str) -> Option<ByteRange> {
    let (length, offset) = match value.split_once('@') {
        Some((length, offset)) => (length, Some(offset)),
        None => (value, None),
    };
    Some(ByteRange {
        length: length.trim().parse().ok()?,
        offset: match offset {
            Some(offset) => offset.trim().parse().ok()?,
            None => 0,
        },
    })
}

/// Splits `KEY=value,KEY="quoted, value"` into trimmed pairs with quotes removed.
fn attribute_list(attrs: &str) -> impl Iterator<Item = (&str, &str)> {
    let mut pairs = Vec::new();
    let mut quoted = false;
    let mut from = 0;
    for (idx, ch) in attrs.char_indices().chain(std::iter::once((attrs.len(), ','))) {
        match ch {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                pairs.push(&attrs[from..idx]);
                from = idx + 1;
            }
            _ => {}
        }
    }
    pairs.into_iter().filter_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        Some((key.trim(), value))
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn base_url() -> Url {
        Url::parse("https://cdn.example/video/master.m3u8").unwrap()
    }

    pub(crate) fn vod_playlist(durations: &[f64]) -> String {
        let mut out = String::from(
            "#EXTM3U\n#EXT-X-VERSION:7\n#EXT-X-TARGETDURATION:6\n#EXT-X-PLAYLIST-TYPE:VOD\n#EXT-X-MEDIA-SEQUENCE:0\n#EXT-X-MAP:URI=\"init.mp4\"\n",
        );
        for (i, d) in durations.iter().enumerate() {
            out.push_str(&format!("#EXTINF:{d:.3},\nseg{i}.m4s\n"));
        }
        out.push_str("#EXT-X-ENDLIST\n");
        out
    }

    fn live_playlist(first_seq: u64, count: u64) -> String {
        let mut out = format!(
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:{first_seq}\n"
        );
        for seq in first_seq..first_seq + count {
            out.push_str(&format!("#EXTINF:4.0,\nlive{seq}.ts\n"));
        }
        out
    }

    const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=2000000,RESOLUTION=1280x720,CODECS=\"avc1.4d401f,mp4a.40.2\"
hi/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=500000,RESOLUTION=640x360
lo/index.m3u8
#EXT-X-I-FRAME-STREAM-INF:BANDWIDTH=90000,URI=\"lo/iframes.m3u8\"
#EXT-X-STREAM-INF:BANDWIDTH=1000000,RESOLUTION=960x540
mid/index.m3u8
";

    #[test]
    fn master_variants_sorted_by_bandwidth() {
        let manifest = parse(MASTER, &base_url()).unwrap();
        assert!(manifest.is_multivariant());
        let bandwidths: Vec<u64> = manifest.variants.iter().map(|v| v.bandwidth).collect();
        assert_eq!(bandwidths, vec![500_000, 1_000_000, 2_000_000]);
        assert_eq!(
            manifest.variants[0].uri.as_str(),
            "https://cdn.example/video/lo/index.m3u8"
        );
        assert_eq!(
            manifest.variants[2].resolution,
            Some(Resolution {
                width: 1280,
                height: 720
            })
        );
        assert!(manifest.variants.iter().all(|v| !v.is_loaded()));
        assert_eq!(manifest.duration(), None);
    }

    #[test]
    fn vod_media_playlist_builds_contiguous_timeline() {
        let manifest = parse(&vod_playlist(&[6.0, 6.0, 6.0]), &base_url()).unwrap();
        assert!(!manifest.is_multivariant());
        assert!(!manifest.is_live);
        assert!(manifest.end_list);
        assert_eq!(manifest.target_duration, 6.0);
        assert_eq!(manifest.duration(), Some(18.0));

        let segments = manifest.variants[0].segments();
        assert_eq!(segments.len(), 3);
        for (i, segment) in segments.iter().enumerate() {
            assert_eq!(segment.sequence, i as u64);
            assert_eq!(segment.start, 6.0 * i as f64);
        }
        let init = segments[0].init.as_ref().expect("init segment");
        assert_eq!(init.uri.as_str(), "https://cdn.example/video/init.mp4");
        assert!(Arc::ptr_eq(init, segments[2].init.as_ref().unwrap()));
    }

    #[test]
    fn vod_without_endlist_is_rejected() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXT-X-PLAYLIST-TYPE:VOD\n#EXTINF:6.0,\na.ts\n";
        assert_eq!(
            parse(text, &base_url()).unwrap_err(),
            ParseError::MissingEndList
        );
    }

    #[test]
    fn unknown_tags_are_tolerated() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXT-X-VENDOR-THING:foo=bar\n#EXTINF:6.0,\n#EXT-X-ANOTHER-ONE\na.ts\n#EXT-X-ENDLIST\n";
        let manifest = parse(text, &base_url()).unwrap();
        assert_eq!(manifest.variants[0].segments().len(), 1);
    }

    #[test]
    fn garbage_is_a_syntax_error() {
        assert!(matches!(
            parse("this is not a playlist", &base_url()),
            Err(ParseError::Syntax { .. })
        ));
    }

    #[test]
    fn byte_range_offsets_are_inferred() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXTINF:2.0,\n#EXT-X-BYTERANGE:100@0\nall.ts\n#EXTINF:2.0,\n#EXT-X-BYTERANGE:50\nall.ts\n#EXT-X-ENDLIST\n";
        let timeline = MediaTimeline::parse(text, &base_url()).unwrap();
        assert_eq!(
            timeline.segments[1].byte_range,
            Some(ByteRange {
                offset: 100,
                length: 50
            })
        );
        assert_eq!(
            timeline.segments[1].byte_range.unwrap().header_value(),
            "bytes=100-149"
        );
    }

    #[test]
    fn key_applies_until_replaced() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXT-X-KEY:METHOD=AES-128,URI=\"k1.key\"\n#EXTINF:2.0,\na.ts\n#EXTINF:2.0,\nb.ts\n#EXT-X-KEY:METHOD=NONE\n#EXTINF:2.0,\nc.ts\n#EXT-X-ENDLIST\n";
        let timeline = MediaTimeline::parse(text, &base_url()).unwrap();
        let key = timeline.segments[1].key.as_ref().expect("key carried forward");
        assert_eq!(key.method, "AES-128");
        assert_eq!(
            key.uri.as_ref().map(Url::as_str),
            Some("https://cdn.example/video/k1.key")
        );
        assert!(timeline.segments[2].key.is_none());
    }

    #[test]
    fn segment_lookup_by_time_and_sequence() {
        let timeline = MediaTimeline::parse(&vod_playlist(&[6.0, 4.0, 6.0]), &base_url()).unwrap();
        assert_eq!(timeline.segment_at(0.0).map(|s| s.sequence), Some(0));
        assert_eq!(timeline.segment_at(6.0).map(|s| s.sequence), Some(1));
        assert_eq!(timeline.segment_at(15.9).map(|s| s.sequence), Some(2));
        assert!(timeline.segment_at(16.0).is_none());
        assert_eq!(timeline.segment(2).map(|s| s.start), Some(10.0));
        assert!(timeline.segment(3).is_none());
    }

    #[test]
    fn live_merge_appends_and_evicts() {
        let url = base_url();
        let mut timeline = MediaTimeline::parse(&live_playlist(10, 3), &url).unwrap();
        assert!(timeline.is_live);

        let report = timeline.merge(MediaTimeline::parse(&live_playlist(11, 4), &url).unwrap());
        assert_eq!(report.appended, 2);
        assert_eq!(report.evicted, 1);
        assert!(report.gaps.is_empty());
        assert_eq!(timeline.first_sequence(), Some(11));
        assert_eq!(timeline.last_sequence(), Some(14));
        // Start times continue the existing axis.
        assert_eq!(timeline.segment(13).map(|s| s.start), Some(12.0));
        assert_eq!(timeline.segment(14).map(|s| s.start), Some(16.0));
    }

    #[test]
    fn live_merge_reports_gap_without_failing() {
        let url = base_url();
        let mut timeline = MediaTimeline::parse(&live_playlist(0, 2), &url).unwrap();
        let report = timeline.merge(MediaTimeline::parse(&live_playlist(4, 2), &url).unwrap());
        assert_eq!(
            report.gaps,
            vec![SequenceGap {
                expected: 2,
                found: 4
            }]
        );
        // Two missing 4 s segments are accounted for on the time axis.
        assert_eq!(timeline.segment(4).map(|s| s.start), Some(16.0));
        assert_eq!(timeline.first_sequence(), Some(4));
    }

    #[test]
    fn merge_marks_end_of_stream() {
        let url = base_url();
        let mut manifest = parse(&live_playlist(0, 2), &url).unwrap();
        assert!(manifest.is_live);
        let mut ended = live_playlist(0, 3);
        ended.push_str("#EXT-X-ENDLIST\n");
        manifest = merge(manifest, parse(&ended, &url).unwrap());
        assert!(!manifest.is_live);
        assert!(manifest.end_list);
        assert_eq!(manifest.duration(), Some(12.0));
    }

    #[test]
    fn attached_variant_aligns_on_sequence_numbers() {
        let url = base_url();
        let mut manifest = parse(MASTER, &url).unwrap();
        let mut first = MediaTimeline::parse(&live_playlist(20, 3), &url).unwrap();
        first.shift(100.0);
        assert!(manifest.attach_media(0, first));

        let second = MediaTimeline::parse(&live_playlist(21, 3), &url).unwrap();
        assert!(manifest.attach_media(2, second));
        let aligned = manifest.variants[2].timeline().unwrap();
        assert_eq!(aligned.segment(21).map(|s| s.start), Some(104.0));
        assert!(manifest.is_live);
    }

    #[test]
    fn media_sequence_overflow_is_a_syntax_error() {
        let text = format!(
            "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:{}\n#EXTINF:4.0,\na.ts\n#EXTINF:4.0,\nb.ts\n",
            u64::MAX
        );
        assert!(matches!(
            MediaTimeline::parse(&text, &base_url()),
            Err(ParseError::Syntax { .. })
        ));
    }

    #[test]
    fn playlist_level_map_carries_byte_range() {
        let text = "#EXTM3U\n#EXT-X-VERSION:7\n#EXT-X-TARGETDURATION:4\n#EXT-X-MAP:URI=\"init,v1.mp4\",BYTERANGE=\"720@0\"\n#EXTINF:4.0,\n#EXT-X-BYTERANGE:1000@720\nmedia.mp4\n#EXT-X-ENDLIST\n";
        let timeline = MediaTimeline::parse(text, &base_url()).unwrap();
        let init = timeline.segments[0].init.as_deref().unwrap();
        assert_eq!(init.uri.as_str(), "https://cdn.example/video/init,v1.mp4");
        assert_eq!(
            init.byte_range,
            Some(ByteRange {
                offset: 0,
                length: 720
            })
        );
    }

    #[test]
    fn live_merge_skips_known_sequences() {
        let url = base_url();
        let mut timeline = MediaTimeline::parse(&live_playlist(5, 3), &url).unwrap();
        let report = timeline.merge(MediaTimeline::parse(&live_playlist(5, 3), &url).unwrap());
        assert_eq!(report.appended, 0);
        assert_eq!(report.evicted, 0);
        assert_eq!(timeline.segments.len(), 3);
        assert_eq!(timeline.segment(7).map(|s| s.start), Some(8.0));
    }
}
