//! JSON track files and input discovery.
//!
//! A track file is an object keyed `"point0"`, `"point1"`, ... in index
//! order. A plain array of points is accepted on input as well.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{Result, TrackError};
use crate::track::{Point, Track};

#[derive(Deserialize)]
#[serde(untagged)]
enum TrackFile {
    List(Vec<Point>),
    Keyed(HashMap<String, Point>),
}

/// Serializes points as the keyed object, in index order.
struct KeyedPoints<'a>(&'a [Point]);

impl Serialize for KeyedPoints<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (i, point) in self.0.iter().enumerate() {
            map.serialize_entry(&format!("point{i}"), point)?;
        }
        map.end()
    }
}

fn keyed_to_points(keyed: HashMap<String, Point>) -> Result<Vec<Point>> {
    let mut indexed = Vec::with_capacity(keyed.len());
    for (key, point) in keyed {
        let index = key
            .strip_prefix("point")
            .and_then(|n| n.parse::<usize>().ok())
            .ok_or_else(|| TrackError::Format(format!("unexpected key '{key}'")))?;
        indexed.push((index, point));
    }
    indexed.sort_by_key(|(index, _)| *index);
    if let Some(pos) = indexed.iter().enumerate().position(|(pos, (index, _))| pos != *index) {
        return Err(TrackError::Format(format!("point{pos} is missing")));
    }
    Ok(indexed.into_iter().map(|(_, p)| p).collect())
}

/// Parse a track from JSON text.
pub fn parse_track(name: &str, json: &str) -> Result<Track> {
    let points = match serde_json::from_str::<TrackFile>(json) {
        Ok(TrackFile::List(points)) => points,
        Ok(TrackFile::Keyed(keyed)) => keyed_to_points(keyed)?,
        // untagged errors say nothing useful; report the keyed layout's error
        Err(_) => keyed_to_points(serde_json::from_str(json)?)?,
    };
    Ok(Track::new(name, points))
}

/// Read a JSON track file. The track is named after the file stem.
pub fn read_track(path: &Path) -> Result<Track> {
    let json = fs::read_to_string(path)?;
    parse_track(&file_stem(path), &json)
}

fn write_keyed<W: Write>(writer: W, track: &Track) -> Result<()> {
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(writer, formatter);
    KeyedPoints(&track.points).serialize(&mut ser)?;
    Ok(())
}

/// Write `track` to `path`, replacing any existing file.
pub fn write_track(track: &Track, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    write_keyed(&mut writer, track)?;
    writer.flush()?;
    Ok(())
}

/// Destination of `track` inside `folder`.
pub fn track_path(folder: &Path, track: &Track) -> PathBuf {
    folder.join(format!("{}.json", clean_filename(&track.name)))
}

/// Files under `folder` whose extension is one of `extensions`
/// (case-insensitive), sorted by path.
pub fn discover(folder: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(folder) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| extensions.iter().any(|want| ext.eq_ignore_ascii_case(want)))
            .unwrap_or(false);
        if matches {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "track".to_string())
}

fn clean_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::Field;

    const KEYED: &str = r#"{
        "point1": {"lat": 48.7001, "lon": 2.2, "time": "2023-06-26T11:14:04+00:00"},
        "point0": {"lat": 48.7, "lon": 2.2, "time": "2023-06-26T11:14:03+00:00"},
        "point2": {"lat": 48.7002, "lon": 2.2, "time": "2023-06-26T11:14:05+00:00", "elevation": 41.5}
    }"#;

    #[test]
    fn test_keyed_points_are_ordered_by_index() {
        let track = parse_track("t", KEYED).unwrap();
        assert_eq!(track.len(), 3);
        assert_eq!(track.points[0].lat, 48.7);
        assert_eq!(track.points[2].elevation, Some(41.5));
        assert_eq!(track.seconds().unwrap(), vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_array_layout() {
        let json = r#"[{"lat": 1.0, "lon": 2.0}, {"lat": 1.5, "lon": 2.5, "speed": 3.25}]"#;
        let track = parse_track("a", json).unwrap();
        assert_eq!(track.points[1].speed, Some(3.25));
    }

    #[test]
    fn test_gap_in_keys_is_rejected() {
        let json = r#"{"point0": {"lat": 1.0, "lon": 2.0}, "point2": {"lat": 1.0, "lon": 2.0}}"#;
        assert!(matches!(parse_track("g", json), Err(TrackError::Format(_))));
        let json = r#"{"p0": {"lat": 1.0, "lon": 2.0}}"#;
        assert!(matches!(parse_track("g", json), Err(TrackError::Format(_))));
    }

    #[test]
    fn test_written_file_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut track = parse_track("ride_0", KEYED).unwrap();
        track.set_column(Field::Speed, &[1.0, 1.0, 2.5]).unwrap();

        let path = track_path(dir.path(), &track);
        write_track(&track, &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.find("\"point0\"").unwrap() < text.find("\"point1\"").unwrap());
        assert!(text.contains("\n    \"point0\""));

        let back = read_track(&path).unwrap();
        assert_eq!(back, track);
    }

    #[test]
    fn test_discover_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        for name in ["b.json", "a.GPX", "nested/c.json", "notes.txt"] {
            fs::write(dir.path().join(name), "{}").unwrap();
        }
        let found = discover(dir.path(), &["json", "gpx"]).unwrap();
        let names: Vec<String> = found
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["a.GPX", "b.json", "nested/c.json"]);
    }

    #[test]
    fn test_clean_filename() {
        assert_eq!(clean_filename("a/b:c "), "a_b_c");
    }
}
