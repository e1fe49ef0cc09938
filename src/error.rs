//! Error types shared by every stage of the signal pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackError {
    #[error("track too short: need at least {min} points, got {actual}")]
    TooFewPoints { min: usize, actual: usize },

    #[error("time goes backwards at point {index}")]
    NonMonotonicTime { index: usize },

    #[error("point {index} is missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("point {index} has an invalid coordinate ({lat}, {lon})")]
    InvalidCoordinate { index: usize, lat: f64, lon: f64 },

    #[error("window around point {index} holds {found} points, {required} required")]
    InsufficientWindow {
        index: usize,
        required: usize,
        found: usize,
    },

    #[error("robust estimation failed at point {index}: {reason}")]
    Estimation { index: usize, reason: String },

    #[error("non-finite {field} produced at point {index}")]
    NonFinite { field: &'static str, index: usize },

    #[error("spline fit failed: {0}")]
    Spline(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot parse timestamp '{0}'")]
    TimeParse(String),

    #[error("failed to parse GPX file: {0}")]
    GpxParse(String),

    #[error("malformed track file: {0}")]
    Format(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, TrackError>;

impl TrackError {
    #[must_use]
    pub fn estimation(index: usize, reason: impl Into<String>) -> Self {
        Self::Estimation {
            index,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// True for errors caused by the track's content rather than by the
    /// environment (files, parsing).
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Self::TooFewPoints { .. }
                | Self::NonMonotonicTime { .. }
                | Self::MissingField { .. }
                | Self::InvalidCoordinate { .. }
                | Self::InsufficientWindow { .. }
                | Self::Estimation { .. }
                | Self::NonFinite { .. }
                | Self::Spline(_)
        )
    }
}
