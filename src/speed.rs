//! Speed signal: raw derivation from positions and timestamps, then the
//! time-windowed cleaning cascade.

use tracing::debug;

use crate::cascade::{Bounds, Cleaned, CleaningCascade};
use crate::config::{Config, StopParams};
use crate::error::Result;
use crate::geometry::{self, EPSILON};
use crate::robust::RobustEstimator;
use crate::stop::{self, StopSpan};
use crate::track::{Field, Track};

/// Distance over elapsed time between consecutive points, in m/s.
///
/// Both distance and elapsed time are floored at [`EPSILON`]. Index 0 takes
/// the speed of index 1.
pub fn raw_speeds(track: &Track, times: &[f64]) -> Vec<f64> {
    let mut speeds = Vec::with_capacity(track.len());
    speeds.push(0.0);
    for (i, pair) in track.points.windows(2).enumerate() {
        let dist = geometry::distance(&pair[0], &pair[1]).max(EPSILON);
        let elapsed = (times[i + 1] - times[i]).max(EPSILON);
        speeds.push(dist / elapsed);
    }
    if speeds.len() > 1 {
        speeds[0] = speeds[1];
    }
    speeds
}

pub fn speed_cascade(config: &Config) -> CleaningCascade {
    CleaningCascade {
        field: Field::Speed,
        estimator: RobustEstimator::new(config.speed.reestimate_radius_s, config.window.min_points),
        values: Bounds::new(0.0, config.speed.max_allowed_speed),
        rates: Bounds::new(config.speed.min_deceleration, config.speed.max_acceleration),
        decimals: 3,
    }
}

/// Compute and clean the speed of every point. The track itself is not
/// modified; see [`apply`] for that.
pub fn compute(track: &Track, config: &Config) -> Result<Cleaned> {
    track.validate_shape()?;
    let times = track.seconds()?;
    let raw = raw_speeds(track, &times);
    debug!(track = %track.name, points = raw.len(), "raw speeds derived");

    speed_cascade(config).run(&times, &raw, |speeds| {
        stop::stop_spans(track, &times, speeds, &config.stop)
    })
}

/// Write the cleaned speed into the track.
pub fn apply(track: &mut Track, config: &Config) -> Result<Cleaned> {
    let cleaned = compute(track, config)?;
    track.set_column(Field::Speed, &cleaned.values)?;
    Ok(cleaned)
}

/// Stop spans of a track whose speed has already been computed.
pub fn stops_of(track: &Track, params: &StopParams) -> Result<Vec<StopSpan>> {
    let times = track.seconds()?;
    let speeds = track.column(Field::Speed)?;
    Ok(stop::stop_spans(track, &times, &speeds, params))
}
