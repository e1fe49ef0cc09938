//! Robust local re-estimation of a single sample.
//!
//! A cubic is fitted to the pivot's neighbours (the pivot itself is left out)
//! under the soft-L1 loss `rho(z) = 2 * (sqrt(1 + z) - 1)` applied to squared
//! residuals, then evaluated at the pivot's own abscissa. The loss grows
//! linearly for large residuals, so a lone outlier in the neighbourhood bends
//! the fit far less than it would under plain least squares.
//!
//! The minimisation is iteratively reweighted least squares started from the
//! zero coefficient vector, with a fixed iteration budget: the result is a
//! deterministic function of the window contents.

use nalgebra::{DMatrix, DVector};

use crate::error::{Result, TrackError};
use crate::track::{Field, Track};
use crate::window::{self, Radius};

const MAX_ITERATIONS: usize = 100;
const TOLERANCE: f64 = 1e-10;
/// Singular values below this are treated as zero in each weighted solve.
const SINGULAR_EPS: f64 = 1e-12;

/// `c3*t^3 + c2*t^2 + c1*t + c0`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cubic {
    pub c3: f64,
    pub c2: f64,
    pub c1: f64,
    pub c0: f64,
}

impl Cubic {
    pub fn eval(&self, t: f64) -> f64 {
        ((self.c3 * t + self.c2) * t + self.c1) * t + self.c0
    }
}

/// Soft-L1 cubic fit of `values` against `offsets`.
///
/// Offsets are rescaled to [-1, 1] internally for conditioning; the returned
/// coefficients are in the caller's units.
pub fn fit_cubic(offsets: &[f64], values: &[f64]) -> std::result::Result<Cubic, &'static str> {
    debug_assert_eq!(offsets.len(), values.len());
    let n = offsets.len();
    if n == 0 {
        return Err("no samples to fit");
    }

    let scale = offsets.iter().fold(0.0_f64, |m, t| m.max(t.abs()));
    let scale = if scale > 0.0 { scale } else { 1.0 };

    let design = DMatrix::from_fn(n, 4, |row, col| {
        let u = offsets[row] / scale;
        u.powi(3 - col as i32)
    });
    let target = DVector::from_column_slice(values);

    let mut coeffs = DVector::<f64>::zeros(4);
    for _ in 0..MAX_ITERATIONS {
        let residuals = &design * &coeffs - &target;
        let sqrt_weights = residuals.map(|r| (1.0 + r * r).powf(-0.25));

        let mut weighted = design.clone();
        for (mut row, w) in weighted.row_iter_mut().zip(sqrt_weights.iter()) {
            row *= *w;
        }
        let rhs = target.component_mul(&sqrt_weights);

        let next = weighted.svd(true, true).solve(&rhs, SINGULAR_EPS)?;
        let step = (&next - &coeffs).norm();
        let converged = step <= TOLERANCE * (1.0 + coeffs.norm());
        coeffs = next;
        if converged {
            break;
        }
    }

    if coeffs.iter().any(|c| !c.is_finite()) {
        return Err("fit diverged");
    }

    Ok(Cubic {
        c3: coeffs[0] / scale.powi(3),
        c2: coeffs[1] / scale.powi(2),
        c1: coeffs[2] / scale,
        c0: coeffs[3],
    })
}

/// Re-estimates one sample of a signal from its windowed neighbourhood.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobustEstimator {
    pub radius: f64,
    pub min_points: usize,
}

impl RobustEstimator {
    pub fn new(radius: f64, min_points: usize) -> Self {
        Self { radius, min_points }
    }

    /// Value of `values` at point `i` as predicted by its neighbours.
    pub fn reestimate(&self, measures: &[f64], values: &[f64], i: usize) -> Result<f64> {
        let window = window::select(measures, i, self.radius, true, Some(self.min_points))?;
        let center = measures[i];
        let offsets: Vec<f64> = window.members.iter().map(|&j| measures[j] - center).collect();
        let targets: Vec<f64> = window.members.iter().map(|&j| values[j]).collect();

        let cubic = fit_cubic(&offsets, &targets).map_err(|e| TrackError::estimation(i, e))?;
        let estimate = cubic.eval(0.0);
        if !estimate.is_finite() {
            return Err(TrackError::estimation(i, "non-finite estimate"));
        }
        Ok(estimate)
    }
}

impl Track {
    /// Robust estimate of `field` at point `i` along the radius' measure.
    pub fn reestimate(&self, i: usize, field: Field, radius: Radius, min_points: usize) -> Result<f64> {
        let measures = radius.measure().values(self)?;
        let values = self.column(field)?;
        RobustEstimator::new(radius.value(), min_points).reestimate(&measures, &values, i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{epoch_plus, Point};
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_exact_cubic_is_recovered() {
        let offsets = [-3.0, -2.0, -1.0, 1.0, 2.0, 3.0];
        let values: Vec<f64> = offsets
            .iter()
            .map(|t| 0.5 * t * t * t - t * t + 2.0 * t + 7.0)
            .collect();
        let cubic = fit_cubic(&offsets, &values).unwrap();
        assert_abs_diff_eq!(cubic.c0, 7.0, epsilon = 1e-6);
        assert_abs_diff_eq!(cubic.c3, 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(cubic.eval(1.5), 0.5 * 3.375 - 2.25 + 3.0 + 7.0, epsilon = 1e-6);
    }

    #[test]
    fn test_single_outlier_has_bounded_influence() {
        let offsets = [-5.0, -4.0, -3.0, -2.0, -1.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let mut values = [2.0; 10];
        values[8] = 100.0;
        let cubic = fit_cubic(&offsets, &values).unwrap();
        // plain least squares lands near 4.6 here
        assert!((cubic.c0 - 2.0).abs() < 0.2, "c0 = {}", cubic.c0);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let offsets = [-2.0, -1.0, 1.0, 2.5, 4.0];
        let values = [1.0, 3.0, -2.0, 8.0, 0.5];
        assert_eq!(fit_cubic(&offsets, &values), fit_cubic(&offsets, &values));
    }

    #[test]
    fn test_degenerate_offsets_still_fit() {
        let cubic = fit_cubic(&[0.0, 0.0, 0.0, 0.0, 0.0], &[3.0; 5]).unwrap();
        assert_abs_diff_eq!(cubic.c0, 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_reestimate_ignores_corrupted_pivot() {
        let measures: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let mut values = vec![4.2, 4.2, 4.1, 4.25, 4.15, 55.0, 4.2, 4.1, 4.18, 4.2];
        let estimator = RobustEstimator::new(5.0, 5);
        let v = estimator.reestimate(&measures, &values, 5).unwrap();
        assert!((4.0..4.4).contains(&v), "estimate {v}");

        // the pivot's own value must not matter
        values[5] = -300.0;
        assert_eq!(estimator.reestimate(&measures, &values, 5).unwrap(), v);
    }

    #[test]
    fn test_track_reestimate() {
        let points = (0..12)
            .map(|i| {
                let mut p = Point::new(48.7, 2.2 + i as f64 * 5e-5).with_time(epoch_plus(i as f64));
                p.speed = Some(if i == 6 { 40.0 } else { 3.0 + 0.1 * i as f64 });
                p
            })
            .collect();
        let track = Track::new("r", points);
        let v = track.reestimate(6, Field::Speed, Radius::Seconds(5.0), 5).unwrap();
        assert_abs_diff_eq!(v, 3.6, epsilon = 0.05);
    }

    #[test]
    fn test_reestimate_needs_enough_neighbours() {
        let measures = [0.0, 1.0, 2.0, 3.0];
        let values = [1.0, 1.0, 9.0, 1.0];
        let err = RobustEstimator::new(5.0, 5)
            .reestimate(&measures, &values, 2)
            .unwrap_err();
        assert!(matches!(err, TrackError::InsufficientWindow { index: 2, .. }));
    }
}
