//! Slope signal, in percent grade.
//!
//! The raw slope is the derivative of a smoothing spline of elevation against
//! cumulated distance. It is cleaned by the distance-windowed cascade, whose
//! stop smoothing reuses the spans detected on the finished speed signal.

use tracing::debug;

use crate::cascade::{Bounds, Cleaned, CleaningCascade};
use crate::config::{Config, SlopeParams};
use crate::error::{Result, TrackError};
use crate::robust::RobustEstimator;
use crate::spline::{self, SmoothingSpline};
use crate::stop::StopSpan;
use crate::track::{Field, Track};

/// `100 * d(elevation)/d(distance)` at every point.
///
/// Points sharing a cumulated distance are merged into one knot holding
/// their mean elevation before fitting, and all of them get that knot's slope.
pub fn raw_slopes(distances: &[f64], elevations: &[f64], smoothing: f64) -> Result<Vec<f64>> {
    let (knots, values, owner) = spline::collapse_duplicates(distances, elevations);
    if knots.len() < 2 {
        return Err(TrackError::Spline(
            "all points share the same cumulated distance".to_string(),
        ));
    }
    let fitted = SmoothingSpline::fit(&knots, &values, smoothing)?;
    let grades = fitted.knot_derivatives();
    Ok(owner.into_iter().map(|k| 100.0 * grades[k]).collect())
}

pub fn slope_cascade(config: &Config) -> CleaningCascade {
    let SlopeParams {
        max_allowed_slope,
        max_slope_rate,
        reestimate_radius_m,
        ..
    } = config.slope;
    CleaningCascade {
        field: Field::Slope,
        estimator: RobustEstimator::new(reestimate_radius_m, config.window.min_points),
        values: Bounds::symmetric(max_allowed_slope),
        rates: Bounds::symmetric(max_slope_rate),
        decimals: 3,
    }
}

/// Compute and clean the slope of a track that already carries elevation and
/// cumulated distance. `stops` are the speed-derived stop spans.
pub fn compute(track: &Track, config: &Config, stops: &[StopSpan]) -> Result<Cleaned> {
    track.validate_shape()?;
    let distances = track.column(Field::CumulatedDist)?;
    let elevations = track.column(Field::Elevation)?;
    if let Some(index) = distances.windows(2).position(|w| w[1] < w[0]) {
        return Err(TrackError::Spline(format!(
            "cumulated distance decreases at point {}",
            index + 1
        )));
    }

    let raw = raw_slopes(&distances, &elevations, config.slope.smoothing)?;
    debug!(track = %track.name, points = raw.len(), "raw slopes derived");

    slope_cascade(config).run(&distances, &raw, |_| stops.to_vec())
}

pub fn apply(track: &mut Track, config: &Config, stops: &[StopSpan]) -> Result<Cleaned> {
    let cleaned = compute(track, config, stops)?;
    track.set_column(Field::Slope, &cleaned.values)?;
    Ok(cleaned)
}
