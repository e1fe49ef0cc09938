//! Batch processing of track folders.
//!
//! Each track is processed independently and in parallel. A failing track is
//! reported and skipped; it never stops the rest of the batch.

use std::path::{Path, PathBuf};

use csv::Writer;
use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::config::CleaningParams;
use crate::error::{Result, TrackError};
use crate::geometry;
use crate::gpx_reader::read_gpx_track;
use crate::pipeline::{plan_stages, OverwritePolicy, RunStats, Stage, TrackPipeline};
use crate::track::{Field, Track};
use crate::track_cleaner::clean_track;
use crate::track_files::{self, discover, read_track, write_track};

/// Result of running the pipeline on one track.
#[derive(Debug)]
pub struct TrackOutcome {
    pub name: String,
    pub result: Result<RunStats>,
}

impl TrackOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run `stages` on every track in parallel, one outcome per track in input
/// order. Failed tracks are left unmodified.
pub fn process_batch(tracks: &mut [Track], pipeline: &TrackPipeline, stages: &[Stage]) -> Vec<TrackOutcome> {
    tracks
        .par_iter_mut()
        .map(|track| {
            let result = pipeline.run(track, stages);
            match &result {
                Ok(_) => info!(track = %track.name, "track processed"),
                Err(e) if e.is_data_error() => warn!(track = %track.name, error = %e, "track rejected"),
                Err(e) => error!(track = %track.name, error = %e, "track failed"),
            }
            TrackOutcome {
                name: track.name.clone(),
                result,
            }
        })
        .collect()
}

/// One row of the batch report.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackReport {
    pub name: String,
    pub points: usize,
    pub length_km: f64,
    pub duration_min: f64,
    pub mean_speed_kmh: Option<f64>,
    pub max_speed_kmh: Option<f64>,
    pub mean_abs_slope: Option<f64>,
    pub stop_spans: usize,
    pub speed_outliers: usize,
    pub speed_rate_fixes: usize,
    pub slope_outliers: usize,
    pub slope_rate_fixes: usize,
    pub status: String,
}

impl TrackReport {
    pub fn failed(name: &str, error: &TrackError) -> Self {
        Self {
            name: name.to_string(),
            points: 0,
            length_km: 0.0,
            duration_min: 0.0,
            mean_speed_kmh: None,
            max_speed_kmh: None,
            mean_abs_slope: None,
            stop_spans: 0,
            speed_outliers: 0,
            speed_rate_fixes: 0,
            slope_outliers: 0,
            slope_rate_fixes: 0,
            status: format!("ERROR: {error}"),
        }
    }

    pub fn from_track(track: &Track, stats: &RunStats) -> Self {
        let length_m = match track.column(Field::CumulatedDist) {
            Ok(dist) => dist.last().copied().unwrap_or(0.0),
            Err(_) => track
                .points
                .windows(2)
                .map(|w| geometry::distance(&w[0], &w[1]))
                .sum(),
        };
        let duration_s = track
            .seconds()
            .ok()
            .and_then(|s| s.last().copied())
            .unwrap_or(0.0);

        let speeds = track.column(Field::Speed).ok();
        let mean_speed_kmh = speeds.as_deref().and_then(mean).map(|v| v * 3.6);
        let max_speed_kmh = speeds
            .as_deref()
            .and_then(|s| s.iter().copied().reduce(f64::max))
            .map(|v| v * 3.6);
        let mean_abs_slope = track
            .column(Field::Slope)
            .ok()
            .and_then(|s| mean(&s.iter().map(|v| v.abs()).collect::<Vec<_>>()));

        let speed = stats.speed.unwrap_or_default();
        let slope = stats.slope.unwrap_or_default();
        Self {
            name: track.name.clone(),
            points: track.len(),
            length_km: length_m / 1000.0,
            duration_min: duration_s / 60.0,
            mean_speed_kmh,
            max_speed_kmh,
            mean_abs_slope,
            stop_spans: speed.stop_spans,
            speed_outliers: speed.outliers,
            speed_rate_fixes: speed.rate_violations,
            slope_outliers: slope.outliers,
            slope_rate_fixes: slope.rate_violations,
            status: "SUCCESS".to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "SUCCESS"
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub stages: Vec<Stage>,
    pub reports: Vec<TrackReport>,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.succeeded()
    }
}

/// Run the pipeline on every JSON track under `data_dir` and save the
/// successful ones in place.
pub fn extract_folder(
    data_dir: &Path,
    pipeline: &TrackPipeline,
    requested: &[Stage],
    policy: &dyn OverwritePolicy,
    report_path: Option<&Path>,
) -> Result<BatchSummary> {
    let files = discover(data_dir, &["json"])?;
    if files.is_empty() {
        return Err(TrackError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no track files in {}", data_dir.display()),
        )));
    }

    let mut reports = Vec::new();
    let mut paths: Vec<PathBuf> = Vec::new();
    let mut tracks: Vec<Track> = Vec::new();
    for path in files {
        match read_track(&path) {
            Ok(track) => {
                paths.push(path);
                tracks.push(track);
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "cannot load track");
                reports.push(TrackReport::failed(&track_files::file_stem(&path), &e));
            }
        }
    }
    info!(tracks = tracks.len(), "tracks loaded");

    let stages = plan_stages(&tracks, requested, policy);
    let outcomes = process_batch(&mut tracks, pipeline, &stages);

    for ((track, path), outcome) in tracks.iter().zip(&paths).zip(outcomes) {
        let report = match outcome.result {
            Ok(stats) => match write_track(track, path) {
                Ok(()) => TrackReport::from_track(track, &stats),
                Err(e) => TrackReport::failed(&outcome.name, &e),
            },
            Err(e) => TrackReport::failed(&outcome.name, &e),
        };
        reports.push(report);
    }

    let summary = BatchSummary { stages, reports };
    if let Some(path) = report_path {
        save_report(&summary.reports, path)?;
    }
    Ok(summary)
}

/// Outcome of cleaning one raw recording.
#[derive(Debug)]
pub struct CleanOutcome {
    pub source: PathBuf,
    pub result: Result<Vec<String>>,
}

/// Cut every raw JSON or GPX recording under `input_dir` into trip
/// segments and write the kept ones to `output_dir`.
pub fn clean_folder(input_dir: &Path, output_dir: &Path, params: &CleaningParams) -> Result<Vec<CleanOutcome>> {
    let files = discover(input_dir, &["json", "gpx"])?;
    if files.is_empty() {
        return Err(TrackError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no raw recordings in {}", input_dir.display()),
        )));
    }
    std::fs::create_dir_all(output_dir)?;

    let outcomes = files
        .into_par_iter()
        .map(|source| {
            let result = clean_file(&source, output_dir, params);
            if let Err(e) = &result {
                warn!(file = %source.display(), error = %e, "cannot clean recording");
            }
            CleanOutcome { source, result }
        })
        .collect();
    Ok(outcomes)
}

fn clean_file(source: &Path, output_dir: &Path, params: &CleaningParams) -> Result<Vec<String>> {
    let is_gpx = source
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gpx"));
    let raw = if is_gpx {
        read_gpx_track(source)?
    } else {
        read_track(source)?
    };

    let mut written = Vec::new();
    for segment in clean_track(&raw, params)? {
        write_track(&segment, &track_files::track_path(output_dir, &segment))?;
        written.push(segment.name);
    }
    Ok(written)
}

pub fn save_report(reports: &[TrackReport], csv_path: &Path) -> Result<()> {
    let mut wtr = Writer::from_path(csv_path)?;
    wtr.write_record([
        "Track_Name",
        "Points",
        "Length_km",
        "Duration_min",
        "Mean_Speed_kmh",
        "Max_Speed_kmh",
        "Mean_Abs_Slope_%",
        "Stop_Spans",
        "Speed_Outliers",
        "Speed_Rate_Fixes",
        "Slope_Outliers",
        "Slope_Rate_Fixes",
        "Processing_Status",
    ])?;

    let opt = |v: Option<f64>| v.map(|v| format!("{v:.2}")).unwrap_or_default();
    for r in reports {
        wtr.write_record([
            r.name.clone(),
            r.points.to_string(),
            format!("{:.3}", r.length_km),
            format!("{:.1}", r.duration_min),
            opt(r.mean_speed_kmh),
            opt(r.max_speed_kmh),
            opt(r.mean_abs_slope),
            r.stop_spans.to_string(),
            r.speed_outliers.to_string(),
            r.speed_rate_fixes.to_string(),
            r.slope_outliers.to_string(),
            r.slope_rate_fixes.to_string(),
            r.status.clone(),
        ])?;
    }
    wtr.flush()?;
    info!(path = %csv_path.display(), "batch report written");
    Ok(())
}

pub fn print_extract_summary(summary: &BatchSummary) {
    println!("\n🎯 EXTRACTION SUMMARY");
    println!("=====================");
    let stages: Vec<&str> = summary.stages.iter().map(|s| s.name()).collect();
    if stages.is_empty() {
        println!("Stages run: none");
    } else {
        println!("Stages run: {}", stages.join(" → "));
    }
    println!("Total tracks: {}", summary.reports.len());
    println!("✅ Successful: {}", summary.succeeded());
    println!("❌ Errors: {}", summary.failed());

    let ok: Vec<&TrackReport> = summary.reports.iter().filter(|r| r.is_success()).collect();
    if !ok.is_empty() {
        let total_km: f64 = ok.iter().map(|r| r.length_km).sum();
        let stops: usize = ok.iter().map(|r| r.stop_spans).sum();
        let speed_fixes: usize = ok.iter().map(|r| r.speed_outliers + r.speed_rate_fixes).sum();
        let slope_fixes: usize = ok.iter().map(|r| r.slope_outliers + r.slope_rate_fixes).sum();
        println!("\n📊 SIGNALS:");
        println!("Total distance: {total_km:.1} km");
        println!("Stop periods smoothed: {stops}");
        println!("Speed samples re-estimated: {speed_fixes}");
        println!("Slope samples re-estimated: {slope_fixes}");
    }

    for failed in summary.reports.iter().filter(|r| !r.is_success()) {
        println!("   ❌ {}: {}", failed.name, failed.status);
    }
}

pub fn print_clean_summary(outcomes: &[CleanOutcome]) {
    let segments: usize = outcomes
        .iter()
        .filter_map(|o| o.result.as_ref().ok())
        .map(Vec::len)
        .sum();
    let errors = outcomes.iter().filter(|o| o.result.is_err()).count();

    println!("\n🧹 CLEANING SUMMARY");
    println!("===================");
    println!("Raw recordings: {}", outcomes.len());
    println!("✅ Trip segments kept: {segments}");
    println!("❌ Unreadable recordings: {errors}");
    for outcome in outcomes {
        if let Err(e) = &outcome.result {
            println!("   ❌ {}: {e}", outcome.source.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pipeline::{Always, Never};
    use crate::track::{epoch_plus, Point};

    fn ride(name: &str, n: usize) -> Track {
        let points = (0..n)
            .map(|i| {
                Point::new(48.7 + i as f64 * 4.0 / 111_195.08, 2.2)
                    .with_time(epoch_plus(i as f64))
                    .with_elevation(60.0 + 0.2 * i as f64)
            })
            .collect();
        Track::new(name, points)
    }

    #[test]
    fn test_failing_track_does_not_stop_batch() {
        let mut broken = ride("broken", 15);
        broken.points[7].time = Some(epoch_plus(2.0));
        let mut tracks = vec![ride("a", 15), broken, ride("b", 15)];

        let outcomes = process_batch(&mut tracks, &TrackPipeline::default(), &Stage::ORDER);
        let ok: Vec<bool> = outcomes.iter().map(TrackOutcome::is_success).collect();
        assert_eq!(ok, vec![true, false, true]);
        assert!(matches!(
            outcomes[1].result,
            Err(TrackError::NonMonotonicTime { index: 7 })
        ));
        assert!(tracks[0].has_field(Field::Turns));
        assert!(!tracks[1].has_field(Field::Speed));
    }

    #[test]
    fn test_report_from_processed_track() {
        let mut track = ride("r", 31);
        let stats = TrackPipeline::default().run(&mut track, &Stage::ORDER).unwrap();
        let report = TrackReport::from_track(&track, &stats);
        assert!(report.is_success());
        assert_eq!(report.points, 31);
        assert!((report.length_km - 0.12).abs() < 1e-3);
        assert!((report.duration_min - 0.5).abs() < 1e-9);
        let mean_speed = report.mean_speed_kmh.unwrap();
        assert!((mean_speed - 14.4).abs() < 0.1, "{mean_speed}");
        assert!((report.mean_abs_slope.unwrap() - 5.0).abs() < 0.05);
    }

    #[test]
    fn test_extract_folder_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        for track in [ride("one", 20), ride("two", 25)] {
            write_track(&track, &track_files::track_path(dir.path(), &track)).unwrap();
        }
        std::fs::write(dir.path().join("bad.json"), "[1, 2").unwrap();
        let report = dir.path().join("report.csv");

        let pipeline = TrackPipeline::new(Config::default());
        let summary = extract_folder(dir.path(), &pipeline, &Stage::ORDER, &Never, Some(&report)).unwrap();
        assert_eq!(summary.stages, Stage::ORDER.to_vec());
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed(), 1);

        let saved = read_track(&dir.path().join("one.json")).unwrap();
        assert!(saved.has_field(Field::Slope));

        let csv = std::fs::read_to_string(&report).unwrap();
        assert_eq!(csv.lines().count(), 4);
        assert!(csv.lines().any(|l| l.starts_with("bad,") && l.contains("ERROR")));

        // everything is computed now, so a keep-existing run does nothing
        let again = extract_folder(dir.path(), &pipeline, &Stage::ORDER, &Never, None).unwrap();
        assert!(again.stages.is_empty());
        let forced = extract_folder(dir.path(), &pipeline, &[Stage::Azimuth], &Always, None).unwrap();
        assert_eq!(forced.stages, vec![Stage::Azimuth]);
    }

    #[test]
    fn test_empty_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_folder(dir.path(), &TrackPipeline::default(), &Stage::ORDER, &Always, None);
        assert!(matches!(err, Err(TrackError::Io(_))));
    }

    #[test]
    fn test_clean_folder_writes_segments() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();

        let mut raw = ride("commute", 15);
        let mut second = ride("x", 15);
        for (i, p) in second.points.iter_mut().enumerate() {
            p.time = Some(epoch_plus(100.0 + i as f64));
        }
        raw.points.extend(second.points);
        write_track(&raw, &input.path().join("commute.json")).unwrap();
        std::fs::write(input.path().join("broken.gpx"), "<gpx").unwrap();

        let outcomes = clean_folder(input.path(), output.path(), &CleaningParams::default()).unwrap();
        assert_eq!(outcomes.len(), 2);
        let written: Vec<String> = outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .flatten()
            .cloned()
            .collect();
        assert_eq!(written, vec!["commute_0", "commute_1"]);
        let segment = read_track(&output.path().join("commute_1.json")).unwrap();
        assert_eq!(segment.len(), 15);
    }
}
