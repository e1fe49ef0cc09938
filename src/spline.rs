//! Cubic smoothing spline of elevation against cumulated distance.
//!
//! Reinsch formulation with natural end conditions: among all cubic splines
//! with knots at the data abscissae, take the smoothest one whose residual
//! sum of squares equals the smoothing factor `s`. When a straight line
//! already fits within `s`, the least-squares line is used.
//!
//! For a penalty weight `alpha`, the second derivatives `gamma` at interior
//! knots solve `(R + alpha * Q'Q) gamma = Q'y` and the fitted values are
//! `y - alpha * Q gamma`. The residual grows monotonically with `alpha`, so
//! `alpha` is found by bisection in log space. `R + alpha * Q'Q` is
//! symmetric positive definite and pentadiagonal, solved in O(n).

use crate::error::{Result, TrackError};

const BRACKET_STEPS: usize = 40;
const BISECTION_STEPS: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct SmoothingSpline {
    knots: Vec<f64>,
    values: Vec<f64>,
    /// Second derivative at every knot, zero at both ends.
    second: Vec<f64>,
}

impl SmoothingSpline {
    /// Fit a spline through strictly increasing `x`.
    pub fn fit(x: &[f64], y: &[f64], s: f64) -> Result<Self> {
        if x.len() != y.len() {
            return Err(TrackError::Spline(format!(
                "{} abscissae for {} values",
                x.len(),
                y.len()
            )));
        }
        if x.len() < 2 {
            return Err(TrackError::Spline(format!(
                "need at least two distinct abscissae, got {}",
                x.len()
            )));
        }
        if x.iter().chain(y).any(|v| !v.is_finite()) {
            return Err(TrackError::Spline("non-finite input".to_string()));
        }
        if x.windows(2).any(|w| w[1] <= w[0]) {
            return Err(TrackError::Spline(
                "abscissae must be strictly increasing".to_string(),
            ));
        }

        if x.len() == 2 {
            return Ok(Self::line_through(x, y));
        }

        let system = System::new(x, y);
        if s <= 0.0 {
            return Ok(system.spline(0.0));
        }
        if least_squares_line_rss(x, y) <= s {
            return Ok(Self::least_squares_line(x, y));
        }

        // Bracket alpha so that rss(lo) < s <= rss(hi).
        let mut alpha = 1.0;
        let (mut lo, mut hi);
        if system.rss(alpha) < s {
            let mut steps = 0;
            while system.rss(alpha) < s {
                alpha *= 10.0;
                steps += 1;
                if steps > BRACKET_STEPS || !alpha.is_finite() {
                    return Ok(Self::least_squares_line(x, y));
                }
            }
            lo = alpha / 10.0;
            hi = alpha;
        } else {
            let mut steps = 0;
            while system.rss(alpha) >= s {
                alpha /= 10.0;
                steps += 1;
                if steps > BRACKET_STEPS {
                    return Ok(system.spline(alpha));
                }
            }
            lo = alpha;
            hi = alpha * 10.0;
        }

        for _ in 0..BISECTION_STEPS {
            let mid = (lo * hi).sqrt();
            if system.rss(mid) < s {
                lo = mid;
            } else {
                hi = mid;
            }
            if hi / lo - 1.0 < 1e-12 {
                break;
            }
        }

        let spline = system.spline((lo * hi).sqrt());
        if spline.values.iter().chain(&spline.second).any(|v| !v.is_finite()) {
            return Err(TrackError::Spline("ill-conditioned smoothing system".to_string()));
        }
        Ok(spline)
    }

    fn line_through(x: &[f64], y: &[f64]) -> Self {
        Self {
            knots: x.to_vec(),
            values: y.to_vec(),
            second: vec![0.0; x.len()],
        }
    }

    fn least_squares_line(x: &[f64], y: &[f64]) -> Self {
        let (slope, intercept) = fit_line(x, y);
        Self {
            knots: x.to_vec(),
            values: x.iter().map(|&xi| intercept + slope * xi).collect(),
            second: vec![0.0; x.len()],
        }
    }

    /// First derivative at every knot.
    pub fn knot_derivatives(&self) -> Vec<f64> {
        let n = self.knots.len();
        let mut out = Vec::with_capacity(n);
        for i in 0..n - 1 {
            let h = self.knots[i + 1] - self.knots[i];
            out.push(
                (self.values[i + 1] - self.values[i]) / h
                    - h * (2.0 * self.second[i] + self.second[i + 1]) / 6.0,
            );
        }
        let h = self.knots[n - 1] - self.knots[n - 2];
        out.push(
            (self.values[n - 1] - self.values[n - 2]) / h
                + h * (self.second[n - 2] + 2.0 * self.second[n - 1]) / 6.0,
        );
        out
    }
}

/// Evaluation helpers used to check fits.
#[cfg(test)]
impl SmoothingSpline {
    /// Fitted value at each knot.
    pub fn fitted(&self) -> &[f64] {
        &self.values
    }

    /// Residual sum of squares against `y`.
    pub fn rss(&self, y: &[f64]) -> f64 {
        self.values.iter().zip(y).map(|(a, b)| (a - b).powi(2)).sum()
    }

    /// First derivative at `x`; outside the knot range the end pieces are extended.
    pub fn derivative(&self, x: f64) -> f64 {
        let i = self.interval(x);
        let h = self.knots[i + 1] - self.knots[i];
        let a = (self.knots[i + 1] - x) / h;
        let b = 1.0 - a;
        (self.values[i + 1] - self.values[i]) / h
            - (3.0 * a * a - 1.0) / 6.0 * h * self.second[i]
            + (3.0 * b * b - 1.0) / 6.0 * h * self.second[i + 1]
    }

    pub fn eval(&self, x: f64) -> f64 {
        let i = self.interval(x);
        let h = self.knots[i + 1] - self.knots[i];
        let a = (self.knots[i + 1] - x) / h;
        let b = 1.0 - a;
        a * self.values[i]
            + b * self.values[i + 1]
            + ((a * a * a - a) * self.second[i] + (b * b * b - b) * self.second[i + 1]) * h * h
                / 6.0
    }

    fn interval(&self, x: f64) -> usize {
        let last = self.knots.len() - 2;
        match self.knots.partition_point(|&k| k <= x) {
            0 => 0,
            p => (p - 1).min(last),
        }
    }
}

/// Banded pieces of the smoothing system for one data set.
struct System<'a> {
    y: &'a [f64],
    /// Column k of Q has entries (qa, qb, qc) on rows k, k+1, k+2.
    qa: Vec<f64>,
    qb: Vec<f64>,
    qc: Vec<f64>,
    r0: Vec<f64>,
    r1: Vec<f64>,
    g0: Vec<f64>,
    g1: Vec<f64>,
    g2: Vec<f64>,
    qty: Vec<f64>,
    knots: &'a [f64],
}

impl<'a> System<'a> {
    fn new(x: &'a [f64], y: &'a [f64]) -> Self {
        let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
        let m = x.len() - 2;

        let qa: Vec<f64> = (0..m).map(|k| 1.0 / h[k]).collect();
        let qc: Vec<f64> = (0..m).map(|k| 1.0 / h[k + 1]).collect();
        let qb: Vec<f64> = (0..m).map(|k| -(qa[k] + qc[k])).collect();

        let r0 = (0..m).map(|k| (h[k] + h[k + 1]) / 3.0).collect();
        let r1 = (0..m).map(|k| h[k + 1] / 6.0).collect();

        let g0 = (0..m).map(|k| qa[k] * qa[k] + qb[k] * qb[k] + qc[k] * qc[k]).collect();
        let g1 = (0..m)
            .map(|k| {
                if k + 1 < m {
                    qb[k] * qa[k + 1] + qc[k] * qb[k + 1]
                } else {
                    0.0
                }
            })
            .collect();
        let g2 = (0..m)
            .map(|k| if k + 2 < m { qc[k] * qa[k + 2] } else { 0.0 })
            .collect();
        let qty = (0..m)
            .map(|k| qa[k] * y[k] + qb[k] * y[k + 1] + qc[k] * y[k + 2])
            .collect();

        Self {
            y,
            qa,
            qb,
            qc,
            r0,
            r1,
            g0,
            g1,
            g2,
            qty,
            knots: x,
        }
    }

    /// Interior second derivatives and residuals `y - fitted` for `alpha`.
    fn solve(&self, alpha: f64) -> (Vec<f64>, Vec<f64>) {
        let m = self.qa.len();
        let d0: Vec<f64> = (0..m).map(|k| self.r0[k] + alpha * self.g0[k]).collect();
        let d1: Vec<f64> = (0..m).map(|k| self.r1[k] + alpha * self.g1[k]).collect();
        let d2: Vec<f64> = (0..m).map(|k| alpha * self.g2[k]).collect();
        let gamma = solve_pentadiagonal(&d0, &d1, &d2, &self.qty);

        let mut residuals = vec![0.0; m + 2];
        for k in 0..m {
            residuals[k] += alpha * self.qa[k] * gamma[k];
            residuals[k + 1] += alpha * self.qb[k] * gamma[k];
            residuals[k + 2] += alpha * self.qc[k] * gamma[k];
        }
        (gamma, residuals)
    }

    fn rss(&self, alpha: f64) -> f64 {
        let (_, residuals) = self.solve(alpha);
        residuals.iter().map(|r| r * r).sum()
    }

    fn spline(&self, alpha: f64) -> SmoothingSpline {
        let (gamma, residuals) = self.solve(alpha);
        let values = self.y.iter().zip(&residuals).map(|(y, r)| y - r).collect();
        let mut second = Vec::with_capacity(gamma.len() + 2);
        second.push(0.0);
        second.extend(gamma);
        second.push(0.0);
        SmoothingSpline {
            knots: self.knots.to_vec(),
            values,
            second,
        }
    }
}

/// LDL' solve of a symmetric pentadiagonal system given by its main
/// diagonal `d0` and the first and second super-diagonals `d1`, `d2`.
fn solve_pentadiagonal(d0: &[f64], d1: &[f64], d2: &[f64], b: &[f64]) -> Vec<f64> {
    let m = d0.len();
    let mut d = vec![0.0; m];
    let mut l1 = vec![0.0; m];
    let mut l2 = vec![0.0; m];

    for k in 0..m {
        let mut dk = d0[k];
        if k >= 1 {
            dk -= l1[k - 1] * l1[k - 1] * d[k - 1];
        }
        if k >= 2 {
            dk -= l2[k - 2] * l2[k - 2] * d[k - 2];
        }
        d[k] = dk;
        if k + 1 < m {
            let mut off = d1[k];
            if k >= 1 {
                off -= l2[k - 1] * d[k - 1] * l1[k - 1];
            }
            l1[k] = off / dk;
        }
        if k + 2 < m {
            l2[k] = d2[k] / dk;
        }
    }

    let mut z = vec![0.0; m];
    for k in 0..m {
        let mut v = b[k];
        if k >= 1 {
            v -= l1[k - 1] * z[k - 1];
        }
        if k >= 2 {
            v -= l2[k - 2] * z[k - 2];
        }
        z[k] = v;
    }

    let mut x = vec![0.0; m];
    for k in (0..m).rev() {
        let mut v = z[k] / d[k];
        if k + 1 < m {
            v -= l1[k] * x[k + 1];
        }
        if k + 2 < m {
            v -= l2[k] * x[k + 2];
        }
        x[k] = v;
    }
    x
}

fn fit_line(x: &[f64], y: &[f64]) -> (f64, f64) {
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let sxx: f64 = x.iter().map(|xi| (xi - mean_x).powi(2)).sum();
    let sxy: f64 = x.iter().zip(y).map(|(xi, yi)| (xi - mean_x) * (yi - mean_y)).sum();
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    (slope, mean_y - slope * mean_x)
}

fn least_squares_line_rss(x: &[f64], y: &[f64]) -> f64 {
    let (slope, intercept) = fit_line(x, y);
    x.iter()
        .zip(y)
        .map(|(xi, yi)| (yi - intercept - slope * xi).powi(2))
        .sum()
}

/// Merge runs of equal abscissae into one knot holding their mean value.
/// Returns the merged data and, for every input sample, its knot index.
pub fn collapse_duplicates(x: &[f64], y: &[f64]) -> (Vec<f64>, Vec<f64>, Vec<usize>) {
    let mut knots = Vec::with_capacity(x.len());
    let mut values = Vec::with_capacity(x.len());
    let mut owner = Vec::with_capacity(x.len());

    let mut i = 0;
    while i < x.len() {
        let mut j = i + 1;
        while j < x.len() && x[j] == x[i] {
            j += 1;
        }
        let mean = y[i..j].iter().sum::<f64>() / (j - i) as f64;
        knots.push(x[i]);
        values.push(mean);
        owner.extend(std::iter::repeat(knots.len() - 1).take(j - i));
        i = j;
    }
    (knots, values, owner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn grid(n: usize, step: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 * step).collect()
    }

    #[test]
    fn test_interpolating_spline_recovers_quadratic_slope() {
        let x = grid(30, 5.0);
        let y: Vec<f64> = x.iter().map(|v| 0.001 * v * v).collect();
        let spline = SmoothingSpline::fit(&x, &y, 0.0).unwrap();
        let d = spline.knot_derivatives();
        // natural end conditions only disturb the first few knots
        for i in 10..20 {
            assert_abs_diff_eq!(d[i], 0.002 * x[i], epsilon = 1e-3);
        }
        assert_abs_diff_eq!(spline.rss(&y), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_straight_profile_gives_constant_grade() {
        let x = grid(40, 4.0);
        let y: Vec<f64> = x.iter().map(|v| 100.0 + 0.05 * v).collect();
        let spline = SmoothingSpline::fit(&x, &y, 20.0).unwrap();
        for d in spline.knot_derivatives() {
            assert_abs_diff_eq!(d, 0.05, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_residual_matches_smoothing_factor() {
        let x = grid(30, 5.0);
        let y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, v)| 100.0 + 0.05 * v + if i % 2 == 0 { -1.5 } else { 1.5 })
            .collect();
        let spline = SmoothingSpline::fit(&x, &y, 20.0).unwrap();
        assert_abs_diff_eq!(spline.rss(&y), 20.0, epsilon = 1e-3);
        // the zig-zag is smoothed away in the middle of the track
        let d = spline.knot_derivatives();
        for i in 8..22 {
            assert!((d[i] - 0.05).abs() < 0.1, "derivative {} at knot {i}", d[i]);
        }
    }

    #[test]
    fn test_derivative_and_eval_agree_with_knots() {
        let x = vec![0.0, 3.0, 7.0, 12.0, 20.0, 21.0, 30.0];
        let y = vec![5.0, 6.0, 4.5, 7.0, 9.0, 8.5, 10.0];
        let spline = SmoothingSpline::fit(&x, &y, 1.0).unwrap();
        let at_knots = spline.knot_derivatives();
        for (i, &xi) in x.iter().enumerate() {
            assert_abs_diff_eq!(spline.derivative(xi), at_knots[i], epsilon = 1e-9);
            assert_abs_diff_eq!(spline.eval(xi), spline.fitted()[i], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_two_knots_is_a_line() {
        let spline = SmoothingSpline::fit(&[0.0, 10.0], &[2.0, 3.0], 20.0).unwrap();
        assert_eq!(spline.knot_derivatives(), vec![0.1, 0.1]);
    }

    #[test]
    fn test_rejects_bad_abscissae() {
        assert!(SmoothingSpline::fit(&[0.0], &[1.0], 1.0).is_err());
        assert!(SmoothingSpline::fit(&[0.0, 1.0, 1.0], &[1.0, 2.0, 3.0], 1.0).is_err());
        assert!(SmoothingSpline::fit(&[0.0, f64::NAN, 2.0], &[1.0, 2.0, 3.0], 1.0).is_err());
    }

    #[test]
    fn test_collapse_duplicates() {
        let (x, y, owner) =
            collapse_duplicates(&[0.0, 1.0, 1.0, 1.0, 2.0, 3.0, 3.0], &[1.0, 2.0, 4.0, 6.0, 5.0, 7.0, 9.0]);
        assert_eq!(x, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(y, vec![1.0, 4.0, 5.0, 8.0]);
        assert_eq!(owner, vec![0, 1, 1, 1, 2, 3, 3]);
    }

    #[test]
    fn test_pentadiagonal_solver() {
        // [4 1 1 0; 1 4 1 1; 1 1 4 1; 0 1 1 4] x = b with x = [1, 2, 3, 4]
        let d0 = [4.0, 4.0, 4.0, 4.0];
        let d1 = [1.0, 1.0, 1.0, 0.0];
        let d2 = [1.0, 1.0, 0.0, 0.0];
        let b = [9.0, 16.0, 22.0, 21.0];
        let x = solve_pentadiagonal(&d0, &d1, &d2, &b);
        for (got, want) in x.iter().zip([1.0, 2.0, 3.0, 4.0]) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-12);
        }
    }
}
