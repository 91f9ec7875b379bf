// Buffer Tracker: the set of media-time ranges available for playback.

use std::collections::BTreeMap;

const MICROS_PER_SEC: f64 = 1_000_000.0;

/// Ranges are stored in whole microseconds so that adjacency is exact:
/// a segment ending at `t` and the next one starting at `t` always touch.
fn to_micros(seconds: f64) -> i64 {
    (seconds * MICROS_PER_SEC).round() as i64
}

fn to_seconds(micros: i64) -> f64 {
    micros as f64 / MICROS_PER_SEC
}

/// A half-open span `[start, end)` of media time, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferedRange {
    pub start: f64,
    pub end: f64,
}

impl BufferedRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    pub fn contains(&self, time: f64) -> bool {
        self.start <= time && time < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Non-overlapping buffered ranges keyed by start time. Insertion merges
/// overlapping and adjacent ranges, so the result does not depend on the
/// order in which segments complete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferTracker {
    ranges: BTreeMap<i64, i64>,
}

impl BufferTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, range: BufferedRange) {
        let mut start = to_micros(range.start);
        let mut end = to_micros(range.end);
        if end <= start {
            return;
        }

        if let Some((&prev_start, &prev_end)) = self.ranges.range(..=start).next_back()
            && prev_end >= start
        {
            start = prev_start;
            end = end.max(prev_end);
            self.ranges.remove(&prev_start);
        }

        while let Some((&next_start, &next_end)) = self.ranges.range(start..=end).next() {
            end = end.max(next_end);
            self.ranges.remove(&next_start);
        }

        self.ranges.insert(start, end);
    }

    /// Drops everything before `time`, trimming a range that straddles it.
    pub fn evict(&mut self, before: f64) {
        let cut = to_micros(before);
        let stale: Vec<i64> = self.ranges.range(..cut).map(|(&start, _)| start).collect();
        for start in stale {
            if let Some(end) = self.ranges.remove(&start)
                && end > cut
            {
                self.ranges.insert(cut, end);
            }
        }
    }

    /// Seconds of contiguous media available from `time` onwards; zero when
    /// `time` is not inside any range (a stall).
    pub fn buffered_ahead_of(&self, time: f64) -> f64 {
        let at = to_micros(time);
        match self.ranges.range(..=at).next_back() {
            Some((_, &end)) if end > at => to_seconds(end - at),
            _ => 0.0,
        }
    }

    pub fn contains(&self, time: f64) -> bool {
        self.buffered_ahead_of(time) > 0.0
    }

    /// Whether `range` lies entirely inside a single buffered range.
    pub fn covers(&self, range: BufferedRange) -> bool {
        let start = to_micros(range.start);
        let end = to_micros(range.end);
        matches!(
            self.ranges.range(..=start).next_back(),
            Some((_, &buffered_end)) if buffered_end >= end
        )
    }

    pub fn ranges(&self) -> Vec<BufferedRange> {
        self.ranges
            .iter()
            .map(|(&start, &end)| BufferedRange::new(to_seconds(start), to_seconds(end)))
            .collect()
    }

    pub fn total_buffered(&self) -> f64 {
        self.ranges
            .iter()
            .map(|(&start, &end)| to_seconds(end - start))
            .sum()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tracker_from(ranges: &[(f64, f64)]) -> BufferTracker {
        let mut tracker = BufferTracker::new();
        for &(start, end) in ranges {
            tracker.append(BufferedRange::new(start, end));
        }
        tracker
    }

    #[test]
    fn three_contiguous_segments_merge() {
        let tracker = tracker_from(&[(0.0, 6.0), (6.0, 12.0), (12.0, 18.0)]);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.buffered_ahead_of(0.0), 18.0);
        assert_eq!(tracker.buffered_ahead_of(10.0), 8.0);
    }

    #[test]
    fn gap_keeps_ranges_separate_until_filled() {
        let mut tracker = tracker_from(&[(0.0, 6.0), (12.0, 18.0)]);
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.buffered_ahead_of(0.0), 6.0);
        assert_eq!(tracker.buffered_ahead_of(8.0), 0.0);

        tracker.append(BufferedRange::new(6.0, 12.0));
        assert_eq!(tracker.ranges(), vec![BufferedRange::new(0.0, 18.0)]);
    }

    #[test]
    fn overlapping_append_swallows_inner_ranges() {
        let mut tracker = tracker_from(&[(2.0, 3.0), (4.0, 5.0), (7.0, 9.0)]);
        tracker.append(BufferedRange::new(1.0, 8.0));
        assert_eq!(tracker.ranges(), vec![BufferedRange::new(1.0, 9.0)]);
    }

    #[test]
    fn range_end_is_exclusive() {
        let tracker = tracker_from(&[(0.0, 6.0)]);
        assert_eq!(tracker.buffered_ahead_of(6.0), 0.0);
        assert!(!tracker.contains(6.0));
        assert_eq!(tracker.buffered_ahead_of(-1.0), 0.0);
    }

    #[test]
    fn evict_trims_straddling_range() {
        let mut tracker = tracker_from(&[(0.0, 6.0), (8.0, 20.0)]);
        tracker.evict(10.0);
        assert_eq!(tracker.ranges(), vec![BufferedRange::new(10.0, 20.0)]);
        tracker.evict(25.0);
        assert!(tracker.is_empty());
    }

    #[test]
    fn covers_requires_single_range() {
        let tracker = tracker_from(&[(0.0, 6.0), (7.0, 12.0)]);
        assert!(tracker.covers(BufferedRange::new(1.0, 6.0)));
        assert!(!tracker.covers(BufferedRange::new(5.0, 8.0)));
        assert!(!tracker.covers(BufferedRange::new(12.0, 13.0)));
    }

    #[test]
    fn empty_ranges_are_ignored() {
        let tracker = tracker_from(&[(5.0, 5.0), (6.0, 4.0)]);
        assert!(tracker.is_empty());
    }

    fn segment_ranges(durations: &[u32]) -> Vec<(f64, f64)> {
        let mut start = 0.0;
        durations
            .iter()
            .map(|&d| {
                let d = f64::from(d) / 10.0;
                let range = (start, start + d);
                start += d;
                range
            })
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Completions arriving in any order produce the same range set as
        /// completions processed in sequence order.
        #[test]
        fn prop_merge_is_order_independent(
            (segments, shuffled) in prop::collection::vec((1u32..100, any::<bool>()), 1..40)
                .prop_flat_map(|segments| {
                    let indices: Vec<usize> = (0..segments.len()).collect();
                    (Just(segments), Just(indices).prop_shuffle())
                })
        ) {
            let durations: Vec<u32> = segments.iter().map(|(d, _)| *d).collect();
            // Drop some segments so the expected result has holes.
            let present: Vec<(f64, f64)> = segment_ranges(&durations)
                .into_iter()
                .zip(segments.iter())
                .filter(|(_, (_, keep))| *keep)
                .map(|(range, _)| range)
                .collect();

            let in_order = tracker_from(&present);

            let mut out_of_order = BufferTracker::new();
            for index in shuffled.into_iter().filter(|&i| i < present.len()) {
                let (start, end) = present[index];
                out_of_order.append(BufferedRange::new(start, end));
            }

            prop_assert_eq!(in_order, out_of_order);
        }

        #[test]
        fn prop_buffered_ahead_is_never_negative(
            ranges in prop::collection::vec((0u32..1000, 1u32..100), 0..30),
            sample in -100i32..1200,
        ) {
            let ranges: Vec<(f64, f64)> = ranges
                .into_iter()
                .map(|(start, len)| (f64::from(start) / 10.0, f64::from(start + len) / 10.0))
                .collect();
            let tracker = tracker_from(&ranges);
            let t = f64::from(sample) / 10.0;
            let ahead = tracker.buffered_ahead_of(t);
            prop_assert!(ahead >= 0.0);
            if !tracker.ranges().iter().any(|r| r.contains(t)) {
                prop_assert_eq!(ahead, 0.0);
            }
        }

        #[test]
        fn prop_ranges_never_overlap(
            ranges in prop::collection::vec((0u32..1000, 1u32..100), 0..30),
        ) {
            let ranges: Vec<(f64, f64)> = ranges
                .into_iter()
                .map(|(start, len)| (f64::from(start) / 10.0, f64::from(start + len) / 10.0))
                .collect();
            let merged = tracker_from(&ranges).ranges();
            for pair in merged.windows(2) {
                prop_assert!(pair[0].end < pair[1].start);
            }
        }
    }
}
