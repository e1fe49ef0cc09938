//! Tunable parameters for the speed and slope cascades, stop detection and
//! ingestion cleaning.
//!
//! Every section has physically motivated defaults for urban cycling; a JSON
//! file only needs to mention the values it changes:
//!
//! ```json
//! { "speed": { "max_allowed_speed": 16.7 }, "stop": { "min_time": 8.0 } }
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};

/// Bounds used by the speed cascade. Speeds in m/s, accelerations in m/s².
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedParams {
    pub max_allowed_speed: f64,
    pub max_acceleration: f64,
    pub min_deceleration: f64,
    /// Half-width of the time window used to re-estimate a sample (s).
    pub reestimate_radius_s: f64,
}

impl Default for SpeedParams {
    fn default() -> Self {
        Self {
            max_allowed_speed: 50.0 / 3.6,
            max_acceleration: 5.0,
            min_deceleration: -5.0,
            reestimate_radius_s: 5.0,
        }
    }
}

/// Bounds used by the slope cascade. Slopes in %, slope rate in %/m.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlopeParams {
    /// Target residual sum of squares of the elevation spline (m²).
    pub smoothing: f64,
    pub max_allowed_slope: f64,
    pub max_slope_rate: f64,
    /// Half-width of the distance window used to re-estimate a sample (m).
    pub reestimate_radius_m: f64,
}

impl Default for SlopeParams {
    fn default() -> Self {
        Self {
            smoothing: 20.0,
            max_allowed_slope: 25.0,
            max_slope_rate: 3.0,
            reestimate_radius_m: 10.0,
        }
    }
}

/// Stationarity criteria for a stop period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopParams {
    /// Maximum straight-line distance from the stop's first point (m).
    pub max_dist: f64,
    /// Maximum speed of any point in the stop (m/s).
    pub max_speed: f64,
    /// Minimum duration of a stop (s).
    pub min_time: f64,
}

impl Default for StopParams {
    fn default() -> Self {
        Self {
            max_dist: 5.0,
            max_speed: 5.0 / 3.6,
            min_time: 5.0,
        }
    }
}

/// Rules applied when raw recordings are cut into tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningParams {
    /// A gap longer than this between two samples starts a new track (s).
    pub max_delay: f64,
    /// Minimum number of distinct positions in a kept track.
    pub min_points: usize,
    /// Minimum distance between first and last point of a kept track (m).
    pub min_distance: f64,
}

impl Default for CleaningParams {
    fn default() -> Self {
        Self {
            max_delay: 10.0,
            min_points: 10,
            min_distance: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowParams {
    /// Minimum number of neighbours fed to the robust local fit.
    pub min_points: usize,
}

impl Default for WindowParams {
    fn default() -> Self {
        Self { min_points: 5 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub speed: SpeedParams,
    pub slope: SlopeParams,
    pub stop: StopParams,
    pub cleaning: CleaningParams,
    pub window: WindowParams,
}

impl Config {
    /// Load a configuration file, falling back to defaults for absent keys.
    pub fn from_path(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: Config = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.speed;
        positive("speed.max_allowed_speed", s.max_allowed_speed)?;
        positive("speed.max_acceleration", s.max_acceleration)?;
        positive("speed.reestimate_radius_s", s.reestimate_radius_s)?;
        if !(s.min_deceleration < 0.0) {
            return Err(TrackError::invalid_config(format!(
                "speed.min_deceleration must be negative, got {}",
                s.min_deceleration
            )));
        }

        let sl = &self.slope;
        if !(sl.smoothing >= 0.0) {
            return Err(TrackError::invalid_config(format!(
                "slope.smoothing must be >= 0, got {}",
                sl.smoothing
            )));
        }
        positive("slope.max_allowed_slope", sl.max_allowed_slope)?;
        positive("slope.max_slope_rate", sl.max_slope_rate)?;
        positive("slope.reestimate_radius_m", sl.reestimate_radius_m)?;

        positive("stop.max_dist", self.stop.max_dist)?;
        positive("stop.max_speed", self.stop.max_speed)?;
        positive("stop.min_time", self.stop.min_time)?;

        positive("cleaning.max_delay", self.cleaning.max_delay)?;
        if self.cleaning.min_points < 2 {
            return Err(TrackError::invalid_config(
                "cleaning.min_points must be at least 2",
            ));
        }

        // A cubic has four coefficients.
        if self.window.min_points < 4 {
            return Err(TrackError::invalid_config(format!(
                "window.min_points must be at least 4, got {}",
                self.window.min_points
            )));
        }
        Ok(())
    }
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(TrackError::invalid_config(format!(
            "{name} must be a positive number, got {value}"
        )))
    }
}
