//! The windowed robust-cleaning cascade shared by the speed and slope signals.
//!
//! A raw signal goes through three passes, each reading the previous pass's
//! complete output:
//!
//! 1. outlier interpolation: samples outside the allowed value range are
//!    re-estimated from their neighbours and clamped into the range;
//! 2. stop smoothing: samples inside a stop span take the span's mean;
//! 3. rate clamping: samples whose rate of change from the (unchanged)
//!    predecessor leaves the allowed rate range are re-estimated, and if the
//!    re-estimate still violates the bound, pinned to the bound itself.
//!
//! Index 0 has no predecessor, so it is never re-estimated: after every pass
//! it takes the value of index 1.

use tracing::debug;

use crate::error::Result;
use crate::geometry::EPSILON;
use crate::robust::RobustEstimator;
use crate::stop::{self, StopSpan};
use crate::track::{round_to, Field};

/// Closed interval `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub fn new(min: f64, max: f64) -> Self {
        debug_assert!(min <= max);
        Self { min, max }
    }

    pub fn symmetric(limit: f64) -> Self {
        Self::new(-limit, limit)
    }

    pub fn contains(&self, v: f64) -> bool {
        v >= self.min && v <= self.max
    }

    pub fn clamp(&self, v: f64) -> f64 {
        v.clamp(self.min, self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CleaningCascade {
    pub field: Field,
    pub estimator: RobustEstimator,
    pub values: Bounds,
    /// Allowed change per unit of measure between consecutive samples.
    pub rates: Bounds,
    /// Decimal places kept in the final output.
    pub decimals: i32,
}

/// How many samples each pass touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleaningStats {
    pub outliers: usize,
    pub stop_spans: usize,
    pub stop_points: usize,
    pub rate_violations: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cleaned {
    pub values: Vec<f64>,
    pub stats: CleaningStats,
}

impl CleaningCascade {
    /// Run the three passes over `raw`.
    ///
    /// `measures` is the abscissa shared by the robust estimator and the rate
    /// computation. `spans` receives the outlier-free signal and returns the
    /// stop spans to smooth over. Output is rounded to `decimals` without
    /// leaving the value bounds.
    pub fn run<F>(&self, measures: &[f64], raw: &[f64], spans: F) -> Result<Cleaned>
    where
        F: FnOnce(&[f64]) -> Vec<StopSpan>,
    {
        debug_assert_eq!(measures.len(), raw.len());
        let mut stats = CleaningStats::default();

        let (values, outliers) = self.interpolate_outliers(measures, raw)?;
        stats.outliers = outliers;

        let spans = spans(&values);
        stats.stop_spans = spans.len();
        stats.stop_points = spans.iter().map(|s| s.end - s.start + 1).sum();
        let values = self.smooth_stops(&values, &spans);

        let (values, rate_violations) = self.clamp_rates(measures, &values)?;
        stats.rate_violations = rate_violations;

        debug!(
            field = %self.field,
            outliers = stats.outliers,
            stop_spans = stats.stop_spans,
            rate_violations = stats.rate_violations,
            "cleaning cascade finished"
        );

        let values = values.into_iter().map(|v| self.round_within(v)).collect();
        Ok(Cleaned { values, stats })
    }

    /// Round to `decimals`, towards the inside of the value bounds when plain
    /// rounding would step over one.
    fn round_within(&self, v: f64) -> f64 {
        let rounded = round_to(v, self.decimals);
        let factor = 10f64.powi(self.decimals);
        if rounded > self.values.max {
            (self.values.max * factor).floor() / factor
        } else if rounded < self.values.min {
            (self.values.min * factor).ceil() / factor
        } else {
            rounded
        }
    }

    /// Re-estimate every sample outside the value range.
    pub fn interpolate_outliers(&self, measures: &[f64], input: &[f64]) -> Result<(Vec<f64>, usize)> {
        let mut out = input.to_vec();
        let mut replaced = 0;
        for i in 1..input.len() {
            if self.values.contains(input[i]) {
                continue;
            }
            let estimate = self.estimator.reestimate(measures, input, i)?;
            out[i] = self.values.clamp(estimate);
            debug!(field = %self.field, index = i, from = input[i], to = out[i], "outlier replaced");
            replaced += 1;
        }
        copy_first(&mut out);
        Ok((out, replaced))
    }

    pub fn smooth_stops(&self, input: &[f64], spans: &[StopSpan]) -> Vec<f64> {
        let mut out = stop::smooth_spans(input, spans);
        copy_first(&mut out);
        out
    }

    /// Bound the rate of change between consecutive samples.
    pub fn clamp_rates(&self, measures: &[f64], input: &[f64]) -> Result<(Vec<f64>, usize)> {
        let mut out = input.to_vec();
        let mut replaced = 0;
        for i in 1..input.len() {
            let step = (measures[i] - measures[i - 1]).max(EPSILON);
            let previous = input[i - 1];
            if self.rates.contains((input[i] - previous) / step) {
                continue;
            }

            let estimate = self
                .values
                .clamp(self.estimator.reestimate(measures, input, i)?);
            let rate = (estimate - previous) / step;
            out[i] = if rate > self.rates.max {
                self.values.clamp(previous + self.rates.max * step)
            } else if rate < self.rates.min {
                self.values.clamp(previous + self.rates.min * step)
            } else {
                estimate
            };
            replaced += 1;
        }
        copy_first(&mut out);
        Ok((out, replaced))
    }
}

fn copy_first(values: &mut [f64]) {
    if values.len() > 1 {
        values[0] = values[1];
    }
}
