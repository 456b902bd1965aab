//! Segment boundary arithmetic.
//!
//! All arithmetic is done on [`Duration`] (integer nanoseconds), so sums of
//! segment durations are exact and never drift from the total.

use std::time::Duration;

use vs_core::{Error, Result};

/// Number of segments needed to cover `total` with segments of `target`.
///
/// Ceiling division: an exact multiple yields exactly `total / target`
/// segments, never a trailing zero-length one. Returns 0 when either input
/// is zero.
pub fn segment_count(total: Duration, target: Duration) -> u32 {
    let total = total.as_nanos();
    let target = target.as_nanos();
    if total == 0 || target == 0 {
        return 0;
    }
    total.div_ceil(target) as u32
}

/// `[start, end)` of segment `index`, or `None` past the end.
///
/// The last segment absorbs the remainder and is never longer than `target`.
pub fn segment_interval(
    index: u32,
    target: Duration,
    total: Duration,
) -> Option<(Duration, Duration)> {
    if index >= segment_count(total, target) {
        return None;
    }
    let start = target * index;
    let end = (start + target).min(total);
    Some((start, end))
}

/// Durations of every segment covering `total`.
pub fn segment_durations(total: Duration, target: Duration) -> Vec<Duration> {
    (0..segment_count(total, target))
        .filter_map(|i| segment_interval(i, target, total).map(|(s, e)| e - s))
        .collect()
}

/// Merge independently segmented timelines into their least common
/// refinement: every boundary of every input is a boundary of the output.
///
/// All inputs must cover the same total duration.
pub fn merge_timelines(groups: &[Vec<Duration>]) -> Result<Vec<Duration>> {
    let Some(first) = groups.first() else {
        return Ok(Vec::new());
    };
    let total: Duration = first.iter().sum();

    let mut boundaries = Vec::new();
    for (i, group) in groups.iter().enumerate() {
        let group_total: Duration = group.iter().sum();
        if group_total != total {
            return Err(Error::Internal(format!(
                "timeline {i} covers {group_total:?} but timeline 0 covers {total:?}"
            )));
        }
        let mut at = Duration::ZERO;
        for d in group {
            at += *d;
            boundaries.push(at);
        }
    }
    boundaries.sort();
    boundaries.dedup();

    let mut merged = Vec::with_capacity(boundaries.len());
    let mut prev = Duration::ZERO;
    for b in boundaries {
        if b > prev {
            merged.push(b - prev);
            prev = b;
        }
    }
    Ok(merged)
}

/// The segmentation of one representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timeline {
    /// Fixed-length segments; boundaries are computed on demand.
    Constant { target: Duration, total: Duration },
    /// Arbitrary segment starts (keyframe-aligned transmuxing). `starts[0]`
    /// is always zero and every start is below `total`.
    Explicit { starts: Vec<Duration>, total: Duration },
}

impl Timeline {
    pub fn constant(total: Duration, target: Duration) -> Self {
        Timeline::Constant { target, total }
    }

    /// Build from segment durations.
    pub fn from_durations(durations: &[Duration]) -> Self {
        let mut starts = Vec::with_capacity(durations.len());
        let mut at = Duration::ZERO;
        for d in durations.iter().filter(|d| !d.is_zero()) {
            starts.push(at);
            at += *d;
        }
        Timeline::Explicit { starts, total: at }
    }

    /// Keyframe-aligned segmentation: a new segment starts at the first
    /// keyframe at least `min_segment` after the current segment's start.
    pub fn from_keyframes(keyframes: &[Duration], min_segment: Duration, total: Duration) -> Self {
        if total.is_zero() {
            return Timeline::Explicit {
                starts: Vec::new(),
                total,
            };
        }
        let mut starts = vec![Duration::ZERO];
        let mut last = Duration::ZERO;
        for &kf in keyframes {
            if kf >= total {
                break;
            }
            if kf > last && kf >= last + min_segment {
                starts.push(kf);
                last = kf;
            }
        }
        Timeline::Explicit { starts, total }
    }

    pub fn total(&self) -> Duration {
        match self {
            Timeline::Constant { total, .. } | Timeline::Explicit { total, .. } => *total,
        }
    }

    pub fn len(&self) -> u32 {
        match self {
            Timeline::Constant { target, total } => segment_count(*total, *target),
            Timeline::Explicit { starts, .. } => starts.len() as u32,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `[start, end)` of segment `index`, or `None` past the end.
    pub fn interval(&self, index: u32) -> Option<(Duration, Duration)> {
        match self {
            Timeline::Constant { target, total } => segment_interval(index, *target, *total),
            Timeline::Explicit { starts, total } => {
                let i = index as usize;
                let start = *starts.get(i)?;
                let end = starts.get(i + 1).copied().unwrap_or(*total);
                Some((start, end))
            }
        }
    }

    /// Every segment duration, in order.
    pub fn durations(&self) -> Vec<Duration> {
        (0..self.len())
            .filter_map(|i| self.interval(i).map(|(s, e)| e - s))
            .collect()
    }

    /// Index of the segment containing `at`.
    pub fn index_at(&self, at: Duration) -> Option<u32> {
        if at >= self.total() {
            return None;
        }
        match self {
            Timeline::Constant { target, .. } => {
                Some((at.as_nanos() / target.as_nanos().max(1)) as u32)
            }
            Timeline::Explicit { starts, .. } => {
                let pos = starts.partition_point(|s| *s <= at);
                pos.checked_sub(1).map(|i| i as u32)
            }
        }
    }

    /// Longest segment, used for HLS target durations.
    pub fn max_duration(&self) -> Duration {
        match self {
            Timeline::Constant { target, total } => (*target).min(*total),
            Timeline::Explicit { .. } => self.durations().into_iter().max().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn ms(m: u64) -> Duration {
        Duration::from_millis(m)
    }

    #[test]
    fn twelve_seconds_in_fives() {
        assert_eq!(segment_count(secs(12), secs(5)), 3);
        assert_eq!(segment_durations(secs(12), secs(5)), vec![secs(5), secs(5), secs(2)]);
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        assert_eq!(segment_count(secs(10), secs(5)), 2);
        assert_eq!(segment_durations(secs(10), secs(5)), vec![secs(5), secs(5)]);
        assert_eq!(segment_interval(2, secs(5), secs(10)), None);
    }

    #[test]
    fn durations_sum_to_total() {
        let targets = [ms(250), ms(999), ms(4992), ms(5000), ms(6006)];
        let totals = [ms(1), ms(4991), ms(4992), ms(10_000), ms(7_265_432), secs(3 * 3600)];
        for &target in &targets {
            for &total in &totals {
                let durs = segment_durations(total, target);
                assert_eq!(durs.iter().sum::<Duration>(), total, "{total:?}/{target:?}");
                assert_eq!(durs.len() as u128, total.as_nanos().div_ceil(target.as_nanos()));
                let last = *durs.last().unwrap();
                assert!(last > Duration::ZERO && last <= target);
            }
        }
    }

    #[test]
    fn zero_inputs() {
        assert_eq!(segment_count(Duration::ZERO, secs(5)), 0);
        assert_eq!(segment_count(secs(5), Duration::ZERO), 0);
        assert!(segment_durations(Duration::ZERO, secs(5)).is_empty());
    }

    #[test]
    fn interval_is_index_addressable() {
        let total = Duration::from_secs(2 * 3600) + ms(1234);
        assert_eq!(
            segment_interval(1440, secs(5), total),
            Some((secs(7200), total))
        );
        assert_eq!(segment_interval(3, secs(5), total), Some((secs(15), secs(20))));
    }

    #[test]
    fn merge_refines_boundaries() {
        let video = vec![secs(5), secs(5), secs(2)];
        let audio = vec![ms(4992), ms(4992), ms(2016)];
        let merged = merge_timelines(&[video.clone(), audio.clone()]).unwrap();
        assert_eq!(
            merged,
            vec![ms(4992), ms(8), ms(4984), ms(16), ms(2000)]
        );
        let total: Duration = merged.iter().sum();
        assert_eq!(total, video.iter().sum::<Duration>());
        assert_eq!(total, audio.iter().sum::<Duration>());
    }

    #[test]
    fn merge_identical_is_identity() {
        let durs = segment_durations(secs(12), secs(5));
        assert_eq!(merge_timelines(&[durs.clone(), durs.clone()]).unwrap(), durs);
        assert!(merge_timelines(&[]).unwrap().is_empty());
    }

    #[test]
    fn merge_rejects_mismatched_totals() {
        assert!(merge_timelines(&[vec![secs(5)], vec![secs(6)]]).is_err());
    }

    #[test]
    fn constant_timeline_matches_free_functions() {
        let tl = Timeline::constant(secs(12), secs(5));
        assert_eq!(tl.len(), 3);
        assert_eq!(tl.durations(), segment_durations(secs(12), secs(5)));
        assert_eq!(tl.index_at(secs(11)), Some(2));
        assert_eq!(tl.index_at(secs(12)), None);
        assert_eq!(tl.max_duration(), secs(5));
    }

    #[test]
    fn keyframe_timeline() {
        let kfs: Vec<Duration> = [0, 2002, 4004, 6006, 8008, 10010, 12012]
            .iter()
            .map(|&m| ms(m))
            .collect();
        let tl = Timeline::from_keyframes(&kfs, secs(5), ms(13_000));
        assert_eq!(tl.len(), 3);
        assert_eq!(tl.interval(0), Some((ms(0), ms(6006))));
        assert_eq!(tl.interval(1), Some((ms(6006), ms(12012))));
        assert_eq!(tl.interval(2), Some((ms(12012), ms(13_000))));
        assert_eq!(tl.durations().iter().sum::<Duration>(), ms(13_000));
        assert_eq!(tl.index_at(ms(7000)), Some(1));
        assert_eq!(tl.max_duration(), ms(6006));
    }

    #[test]
    fn zero_minimum_never_yields_empty_segments() {
        let kfs = [secs(0), secs(0), secs(2), secs(2), secs(4)];
        let tl = Timeline::from_keyframes(&kfs, Duration::ZERO, secs(6));
        assert_eq!(tl.len(), 3);
        assert!(tl.durations().iter().all(|d| !d.is_zero()));
        assert_eq!(tl.interval(1), Some((secs(2), secs(4))));
    }

    #[test]
    fn keyframe_timeline_without_keyframes_is_one_segment() {
        let tl = Timeline::from_keyframes(&[], secs(5), secs(30));
        assert_eq!(tl.durations(), vec![secs(30)]);
    }

    #[test]
    fn from_durations_round_trip() {
        let durs = vec![ms(4992), ms(8), ms(5000)];
        let tl = Timeline::from_durations(&durs);
        assert_eq!(tl.durations(), durs);
        assert_eq!(tl.total(), ms(10_000));
    }
}
