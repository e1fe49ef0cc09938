//! Stage ordering and per-track orchestration of the signal pipelines.

use std::fmt;
use std::str::FromStr;

use tracing::{debug, info};

use crate::cascade::CleaningStats;
use crate::config::Config;
use crate::derived;
use crate::error::{Result, TrackError};
use crate::slope;
use crate::speed;
use crate::track::{Field, Track};

/// One derived field. Stages always run in declaration order, since later
/// stages read the fields written by earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Speed,
    CumulatedDist,
    Slope,
    Azimuth,
    Turns,
}

impl Stage {
    pub const ORDER: [Stage; 5] = [
        Stage::Speed,
        Stage::CumulatedDist,
        Stage::Slope,
        Stage::Azimuth,
        Stage::Turns,
    ];

    /// Field written by this stage.
    pub fn field(self) -> Field {
        match self {
            Stage::Speed => Field::Speed,
            Stage::CumulatedDist => Field::CumulatedDist,
            Stage::Slope => Field::Slope,
            Stage::Azimuth => Field::Azimuth,
            Stage::Turns => Field::Turns,
        }
    }

    /// Fields that must be present on every point before the stage runs.
    /// Timestamps are checked by the speed stage itself.
    pub fn requires(self) -> &'static [Field] {
        match self {
            Stage::Speed | Stage::CumulatedDist | Stage::Azimuth => &[],
            Stage::Slope => &[Field::Elevation, Field::CumulatedDist, Field::Speed],
            Stage::Turns => &[Field::Azimuth],
        }
    }

    pub fn name(self) -> &'static str {
        self.field().name()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self> {
        Stage::ORDER
            .into_iter()
            .find(|stage| stage.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                TrackError::invalid_config(format!(
                    "unknown stage '{s}', expected one of: speed, cumulated_dist, slope, azimuth, turns"
                ))
            })
    }
}

/// Decides whether a field that some tracks already carry is recomputed.
///
/// Asked once per stage for a whole batch; a declined stage is skipped on
/// every track.
pub trait OverwritePolicy: Sync {
    fn overwrite(&self, stage: Stage, existing: usize, total: usize) -> bool;
}

impl<F> OverwritePolicy for F
where
    F: Fn(Stage, usize, usize) -> bool + Sync,
{
    fn overwrite(&self, stage: Stage, existing: usize, total: usize) -> bool {
        self(stage, existing, total)
    }
}

/// Recompute everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Always;

impl OverwritePolicy for Always {
    fn overwrite(&self, _: Stage, _: usize, _: usize) -> bool {
        true
    }
}

/// Keep every field that is already present.
#[derive(Debug, Clone, Copy, Default)]
pub struct Never;

impl OverwritePolicy for Never {
    fn overwrite(&self, _: Stage, _: usize, _: usize) -> bool {
        false
    }
}

/// Requested stages in execution order, minus those the policy declines to
/// recompute.
pub fn plan_stages(tracks: &[Track], requested: &[Stage], policy: &dyn OverwritePolicy) -> Vec<Stage> {
    let mut stages = requested.to_vec();
    stages.sort();
    stages.dedup();

    stages
        .into_iter()
        .filter(|&stage| {
            let existing = tracks.iter().filter(|t| t.has_field(stage.field())).count();
            if existing == 0 || policy.overwrite(stage, existing, tracks.len()) {
                true
            } else {
                info!(%stage, existing, "keeping previously computed values");
                false
            }
        })
        .collect()
}

/// What one pipeline run did to a track.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    pub stages: Vec<Stage>,
    pub speed: Option<CleaningStats>,
    pub slope: Option<CleaningStats>,
}

#[derive(Debug, Clone, Default)]
pub struct TrackPipeline {
    pub config: Config,
}

impl TrackPipeline {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run `stages` on `track` in stage order.
    ///
    /// The track is only modified when every stage succeeds. An invalid
    /// configuration fails before any stage runs.
    pub fn run(&self, track: &mut Track, stages: &[Stage]) -> Result<RunStats> {
        self.config.validate()?;
        track.validate_shape()?;
        let mut ordered = stages.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut work = track.clone();
        let mut stats = RunStats::default();
        for stage in ordered {
            for &field in stage.requires() {
                if let Some(index) = work.points.iter().position(|p| p.get(field).is_none()) {
                    return Err(TrackError::MissingField {
                        index,
                        field: field.name(),
                    });
                }
            }
            debug!(track = %work.name, %stage, "running stage");

            match stage {
                Stage::Speed => {
                    stats.speed = Some(speed::apply(&mut work, &self.config)?.stats);
                }
                Stage::CumulatedDist => derived::apply_cumulated_dist(&mut work)?,
                Stage::Slope => {
                    let stops = speed::stops_of(&work, &self.config.stop)?;
                    stats.slope = Some(slope::apply(&mut work, &self.config, &stops)?.stats);
                }
                Stage::Azimuth => derived::apply_azimuth(&mut work)?,
                Stage::Turns => derived::apply_turns(&mut work)?,
            }
            stats.stages.push(stage);
        }

        *track = work;
        Ok(stats)
    }
}
