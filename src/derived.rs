//! Single-pass signals: cumulated distance, azimuth and turns.

use crate::error::Result;
use crate::geometry;
use crate::track::{round_to, Field, Track};

/// Running sum of haversine distances in metres, rounded to centimetres.
pub fn cumulated_distances(track: &Track) -> Vec<f64> {
    let mut total = 0.0;
    let mut out = Vec::with_capacity(track.len());
    out.push(0.0);
    for pair in track.points.windows(2) {
        total += geometry::distance(&pair[0], &pair[1]);
        out.push(round_to(total, 2));
    }
    out
}

/// Bearing from each point's predecessor, in [0, 360). Index 0 takes the
/// bearing of index 1.
pub fn azimuths(track: &Track) -> Vec<f64> {
    let mut out = Vec::with_capacity(track.len());
    out.push(0.0);
    for pair in track.points.windows(2) {
        let rounded = round_to(geometry::bearing(&pair[0], &pair[1]), 1);
        out.push(if rounded >= 360.0 { 0.0 } else { rounded });
    }
    if out.len() > 1 {
        out[0] = out[1];
    }
    out
}

/// Signed change of azimuth between consecutive points, wrapped into
/// [-180, 180].
pub fn turns(azimuths: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(azimuths.len());
    out.push(0.0);
    for pair in azimuths.windows(2) {
        let mut turn = pair[1] - pair[0];
        if turn.abs() > 180.0 {
            turn -= turn.signum() * 360.0;
        }
        out.push(round_to(turn, 1));
    }
    if out.len() > 1 {
        out[0] = out[1];
    }
    out
}

pub fn apply_cumulated_dist(track: &mut Track) -> Result<()> {
    track.validate_shape()?;
    let values = cumulated_distances(track);
    track.set_column(Field::CumulatedDist, &values)
}

pub fn apply_azimuth(track: &mut Track) -> Result<()> {
    track.validate_shape()?;
    let values = azimuths(track);
    track.set_column(Field::Azimuth, &values)
}

pub fn apply_turns(track: &mut Track) -> Result<()> {
    track.validate_shape()?;
    let values = turns(&track.column(Field::Azimuth)?);
    track.set_column(Field::Turns, &values)
}
