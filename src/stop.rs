//! Stop-period detection.
//!
//! A stop is a run of points that stay within `max_dist` of the run's first
//! point, never exceed `max_speed`, and last at least `min_time`.

use crate::config::StopParams;
use crate::geometry;
use crate::track::Track;

/// Inclusive index range of one detected stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopSpan {
    pub start: usize,
    pub end: usize,
}

/// Scan forward from `i` and return the last index of the stop starting
/// there, or `None` when the stationary run is too short.
///
/// `times` are seconds since the track start and `speeds` the current speed
/// signal, both indexed like `track.points`.
pub fn detect_stop(
    track: &Track,
    times: &[f64],
    speeds: &[f64],
    i: usize,
    params: &StopParams,
) -> Option<usize> {
    let n = track.len();
    let anchor = &track.points[i];

    for j in i + 1..n {
        let moved = geometry::distance(anchor, &track.points[j]) > params.max_dist;
        if moved || speeds[j] > params.max_speed {
            let elapsed = times[j - 1] - times[i];
            return (elapsed >= params.min_time).then_some(j - 1);
        }
        if j == n - 1 {
            let elapsed = times[j] - times[i];
            return (elapsed >= params.min_time).then_some(j);
        }
    }
    None
}

/// Every stop of the track, found in one greedy forward pass.
///
/// A scan is only started from a point slower than `max_speed`; after a stop
/// the next scan resumes just past its end.
pub fn stop_spans(track: &Track, times: &[f64], speeds: &[f64], params: &StopParams) -> Vec<StopSpan> {
    let mut spans = Vec::new();
    let mut i = 0;
    while i < track.len() {
        if speeds[i] < params.max_speed {
            if let Some(end) = detect_stop(track, times, speeds, i, params) {
                spans.push(StopSpan { start: i, end });
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }
    spans
}

/// Replace every value inside a span by the mean of that span's values.
pub fn smooth_spans(values: &[f64], spans: &[StopSpan]) -> Vec<f64> {
    let mut out = values.to_vec();
    for span in spans {
        let slice = &values[span.start..=span.end];
        let mean = slice.iter().sum::<f64>() / slice.len() as f64;
        out[span.start..=span.end].fill(mean);
    }
    out
}
