//! Neighbourhood selection around a pivot point, keyed by elapsed time or by
//! cumulated distance.
//!
//! The first and last points of a track never join a window: their derived
//! value is a copy of their neighbour's, so they carry no information of
//! their own.

use crate::error::{Result, TrackError};
use crate::track::{Field, Track};

/// Abscissa along which neighbours are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measure {
    /// Seconds since the first point.
    Time,
    /// Metres along the track (`cumulated_dist`).
    Distance,
}

impl Measure {
    pub fn values(self, track: &Track) -> Result<Vec<f64>> {
        match self {
            Measure::Time => track.seconds(),
            Measure::Distance => track.column(Field::CumulatedDist),
        }
    }
}

/// Half-width of a window, in the unit of its measure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Radius {
    Seconds(f64),
    Meters(f64),
}

impl Radius {
    pub fn measure(self) -> Measure {
        match self {
            Radius::Seconds(_) => Measure::Time,
            Radius::Meters(_) => Measure::Distance,
        }
    }

    pub fn value(self) -> f64 {
        match self {
            Radius::Seconds(v) | Radius::Meters(v) => v,
        }
    }
}

/// Indices selected around `pivot`, in collection order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub pivot: usize,
    pub members: Vec<usize>,
}

/// Select the neighbours of `pivot` whose measure lies within `radius`.
///
/// Collection order is: the pivot (unless `exclude_pivot`), the points
/// before it scanning backwards, then the points after it scanning forwards.
/// With `min_count = Some(n)`, the window is then padded with the closest
/// remaining neighbour until it holds `n` points, drawing from one side only
/// once the other is exhausted. Equal distances favour the later point.
pub fn select(
    measures: &[f64],
    pivot: usize,
    radius: f64,
    exclude_pivot: bool,
    min_count: Option<usize>,
) -> Result<Window> {
    let n = measures.len();
    debug_assert!(pivot < n);
    let first = 1;
    let last = n.saturating_sub(2);
    let center = measures[pivot];

    let mut members = Vec::new();
    if !exclude_pivot {
        members.push(pivot);
    }

    // `before` is the next candidate below the pivot, `after` the next above.
    let mut before = if pivot > first { Some(pivot - 1) } else { None };
    while let Some(j) = before {
        if center - measures[j] > radius {
            break;
        }
        members.push(j);
        before = if j > first { Some(j - 1) } else { None };
    }

    let mut after = if pivot < last { Some(pivot + 1) } else { None };
    while let Some(k) = after {
        if measures[k] - center > radius {
            break;
        }
        members.push(k);
        after = if k < last { Some(k + 1) } else { None };
    }

    let Some(required) = min_count else {
        return Ok(Window { pivot, members });
    };

    while members.len() < required {
        let take_before = match (before, after) {
            (None, None) => {
                return Err(TrackError::InsufficientWindow {
                    index: pivot,
                    required,
                    found: members.len(),
                })
            }
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(j), Some(k)) => center - measures[j] < measures[k] - center,
        };
        if take_before {
            if let Some(j) = before {
                members.push(j);
                before = if j > first { Some(j - 1) } else { None };
            }
        } else if let Some(k) = after {
            members.push(k);
            after = if k < last { Some(k + 1) } else { None };
        }
    }

    Ok(Window { pivot, members })
}

impl Track {
    /// Window around point `i`, measured along the radius' own abscissa.
    pub fn window(
        &self,
        i: usize,
        radius: Radius,
        exclude_pivot: bool,
        min_count: Option<usize>,
    ) -> Result<Window> {
        let measures = radius.measure().values(self)?;
        select(&measures, i, radius.value(), exclude_pivot, min_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{epoch_plus, Point};

    fn seconds(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64).collect()
    }

    #[test]
    fn test_symmetric_window_with_pivot() {
        let w = select(&seconds(20), 10, 2.0, false, None).unwrap();
        assert_eq!(w.members, vec![10, 9, 8, 11, 12]);
    }

    #[test]
    fn test_excluded_pivot() {
        let w = select(&seconds(20), 10, 2.0, true, None).unwrap();
        assert_eq!(w.members, vec![9, 8, 11, 12]);
    }

    #[test]
    fn test_track_ends_never_join() {
        let w = select(&seconds(6), 2, 10.0, true, None).unwrap();
        assert_eq!(w.members, vec![1, 3, 4]);
    }

    #[test]
    fn test_padding_takes_closest_neighbour() {
        // gaps: 1 s before the pivot, 3 s after
        let measures = vec![0.0, 1.0, 2.0, 3.0, 6.0, 9.0, 12.0, 15.0, 18.0];
        let w = select(&measures, 3, 0.5, true, Some(4)).unwrap();
        assert_eq!(w.members, vec![2, 1, 4, 5]);
    }

    #[test]
    fn test_padding_ties_prefer_later_point() {
        let w = select(&seconds(20), 10, 0.5, true, Some(2)).unwrap();
        assert_eq!(w.members, vec![11, 9]);
    }

    #[test]
    fn test_padding_draws_from_other_side_when_exhausted() {
        let w = select(&seconds(12), 2, 1.0, true, Some(5)).unwrap();
        assert_eq!(w.members, vec![1, 3, 4, 5, 6]);
    }

    #[test]
    fn test_insufficient_window() {
        let err = select(&seconds(5), 2, 1.0, true, Some(5)).unwrap_err();
        assert!(matches!(
            err,
            TrackError::InsufficientWindow {
                index: 2,
                required: 5,
                found: 2
            }
        ));
    }

    #[test]
    fn test_padding_disabled() {
        let w = select(&seconds(20), 10, 0.5, true, None).unwrap();
        assert!(w.members.is_empty());
    }

    #[test]
    fn test_distance_measure_window() {
        let measures = vec![0.0, 4.0, 9.0, 15.0, 22.0, 30.0, 39.0];
        let w = select(&measures, 3, 10.0, true, Some(3)).unwrap();
        assert_eq!(w.members, vec![2, 4, 1]);
    }

    #[test]
    fn test_track_window_is_deterministic() {
        let points = (0..15)
            .map(|i| Point::new(48.7 + i as f64 * 2e-5, 2.2).with_time(epoch_plus(i as f64)))
            .collect();
        let track = Track::new("w", points);
        let a = track.window(7, Radius::Seconds(5.0), true, Some(5)).unwrap();
        let b = track.window(7, Radius::Seconds(5.0), true, Some(5)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.members, vec![6, 5, 4, 3, 2, 8, 9, 10, 11, 12]);
    }
}
