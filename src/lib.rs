//! Derivation and cleaning of per-point signals on GPS tracks.
//!
//! A [`Track`] gets its speed, cumulated distance, slope, azimuth and turns
//! computed by a [`TrackPipeline`]. Speed and slope go through the same
//! cleaning cascade: outlying samples are re-estimated from a robust local
//! fit, stop periods are flattened, and rates of change are clamped to
//! physically plausible bounds.

pub mod batch;
pub mod cascade;
pub mod config;
pub mod derived;
pub mod error;
pub mod geometry;
pub mod gpx_reader;
pub mod pipeline;
pub mod robust;
pub mod slope;
pub mod speed;
pub mod spline;
pub mod stop;
pub mod track;
pub mod track_cleaner;
pub mod track_files;
pub mod window;

pub use batch::{clean_folder, extract_folder, process_batch, TrackOutcome, TrackReport};
pub use config::Config;
pub use error::{Result, TrackError};
pub use pipeline::{plan_stages, Always, Never, OverwritePolicy, Stage, TrackPipeline};
pub use track::{Field, Point, Track};
