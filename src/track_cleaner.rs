//! Cuts raw recordings into trip segments and drops the unusable ones.

use std::collections::HashSet;

use tracing::debug;

use crate::config::CleaningParams;
use crate::error::{Result, TrackError};
use crate::geometry;
use crate::track::{Point, Track};

/// Split wherever two consecutive samples are more than `max_delay` seconds
/// apart. Every point must carry a timestamp.
pub fn split_on_delay(points: &[Point], max_delay: f64) -> Result<Vec<Vec<Point>>> {
    let mut segments = Vec::new();
    let mut current: Vec<Point> = Vec::new();
    let mut previous: Option<chrono::DateTime<chrono::FixedOffset>> = None;

    for (index, point) in points.iter().enumerate() {
        let time = point.time.ok_or(TrackError::MissingField {
            index,
            field: "time",
        })?;
        if let Some(prev) = previous {
            let gap = (time - prev).num_milliseconds() as f64 / 1e3;
            if gap > max_delay {
                segments.push(std::mem::take(&mut current));
            }
        }
        current.push(point.clone());
        previous = Some(time);
    }
    if !current.is_empty() {
        segments.push(current);
    }
    Ok(segments)
}

/// Enough distinct positions, and first and last point far enough apart.
pub fn passes_quality(points: &[Point], min_points: usize, min_distance: f64) -> bool {
    let distinct: HashSet<(u64, u64)> = points
        .iter()
        .map(|p| (p.lat.to_bits(), p.lon.to_bits()))
        .collect();
    if distinct.len() < min_points {
        return false;
    }
    match (points.first(), points.last()) {
        (Some(first), Some(last)) => geometry::distance(first, last) >= min_distance,
        _ => false,
    }
}

/// Cut `raw` into segments named `<raw name>_<k>`, keeping only those that
/// pass the quality check. Only position, time and elevation are carried
/// over; derived fields are recomputed later.
pub fn clean_track(raw: &Track, params: &CleaningParams) -> Result<Vec<Track>> {
    let segments = split_on_delay(&raw.points, params.max_delay)?;
    let total = segments.len();

    let kept: Vec<Track> = segments
        .into_iter()
        .filter(|segment| passes_quality(segment, params.min_points, params.min_distance))
        .enumerate()
        .map(|(k, segment)| {
            let points = segment
                .into_iter()
                .map(|p| Point {
                    time: p.time,
                    elevation: p.elevation,
                    ..Point::new(p.lat, p.lon)
                })
                .collect();
            Track::new(format!("{}_{k}", raw.name), points)
        })
        .collect();

    debug!(track = %raw.name, segments = total, kept = kept.len(), "raw track cleaned");
    Ok(kept)
}
