//! Tolerant GPX reading.
//!
//! Files are parsed as-is first. When that fails, a second attempt is made
//! after a few repairs that never touch coordinates, times or elevations:
//! adding a missing XML declaration or GPX version, closing tags of a
//! truncated file, and dropping characters that are invalid in XML 1.0.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use gpx::{read, Gpx};
use tracing::{debug, warn};

use crate::error::{Result, TrackError};
use crate::track::{parse_time, Point, Track};
use crate::track_files::file_stem;

/// Read a GPX file into one raw track holding the points of every track
/// segment in file order. The track is named after the file stem.
pub fn read_gpx_track(path: &Path) -> Result<Track> {
    let content = fs::read_to_string(path)?;
    let gpx = parse_tolerantly(&content)?;
    let points = gpx_points(&gpx)?;
    debug!(file = %path.display(), points = points.len(), "GPX file read");
    Ok(Track::new(file_stem(path), points))
}

pub fn parse_tolerantly(content: &str) -> Result<Gpx> {
    match parse_standard(content) {
        Ok(gpx) => Ok(gpx),
        Err(first) => {
            warn!(error = %first, "standard GPX parsing failed, retrying with repairs");
            parse_standard(&apply_minimal_safe_repairs(content))
                .map_err(|_| TrackError::GpxParse(first.to_string()))
        }
    }
}

fn parse_standard(content: &str) -> Result<Gpx> {
    read(Cursor::new(content.as_bytes())).map_err(|e| TrackError::GpxParse(e.to_string()))
}

fn gpx_points(gpx: &Gpx) -> Result<Vec<Point>> {
    let mut points = Vec::new();
    for track in &gpx.tracks {
        for segment in &track.segments {
            for waypoint in &segment.points {
                let geo = waypoint.point();
                let mut point = Point::new(geo.y(), geo.x());
                point.elevation = waypoint.elevation;
                if let Some(time) = &waypoint.time {
                    let iso = time
                        .format()
                        .map_err(|e| TrackError::GpxParse(e.to_string()))?;
                    point.time = Some(parse_time(&iso)?);
                }
                points.push(point);
            }
        }
    }
    Ok(points)
}

fn apply_minimal_safe_repairs(content: &str) -> String {
    let mut repaired = remove_invalid_xml_chars(content.trim_start_matches('\u{feff}'));

    if !repaired.trim_start().starts_with("<?xml") {
        repaired = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{repaired}");
    }
    close_unclosed_tags(&add_gpx_version(&repaired))
}

fn add_gpx_version(content: &str) -> String {
    let Some(start) = content.find("<gpx") else {
        return content.to_string();
    };
    let Some(len) = content[start..].find('>') else {
        return content.to_string();
    };
    let tag = &content[start..start + len];
    if tag.contains(" version=") {
        return content.to_string();
    }
    format!(
        "{} version=\"1.1\"{}",
        &content[..start + len],
        &content[start + len..]
    )
}

fn close_unclosed_tags(content: &str) -> String {
    let mut repaired = content.trim_end().to_string();
    if repaired.ends_with("</gpx>") || !repaired.contains("<gpx") {
        return repaired;
    }
    // drop a partially written trailing point
    if repaired.matches("<trkpt").count() > repaired.matches("</trkpt>").count() {
        if let Some(end) = repaired.rfind("</trkpt>") {
            repaired.truncate(end + "</trkpt>".len());
        }
    }
    for (open, close) in [("<trkseg>", "</trkseg>"), ("<trk>", "</trk>")] {
        let missing = repaired.matches(open).count().saturating_sub(repaired.matches(close).count());
        for _ in 0..missing {
            repaired.push('\n');
            repaired.push_str(close);
        }
    }
    repaired.push_str("\n</gpx>");
    repaired
}

fn remove_invalid_xml_chars(content: &str) -> String {
    content
        .chars()
        .filter(|&c| {
            matches!(c, '\t' | '\n' | '\r')
                || ('\u{20}'..='\u{D7FF}').contains(&c)
                || ('\u{E000}'..='\u{FFFD}').contains(&c)
                || c >= '\u{10000}'
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GPX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
  <trk>
    <trkseg>
      <trkpt lat="48.7000" lon="2.2000"><ele>81.5</ele><time>2023-06-26T11:14:03Z</time></trkpt>
      <trkpt lat="48.7001" lon="2.2001"><ele>81.9</ele><time>2023-06-26T11:14:04Z</time></trkpt>
    </trkseg>
    <trkseg>
      <trkpt lat="48.7002" lon="2.2002"><time>2023-06-26T11:14:30Z</time></trkpt>
    </trkseg>
  </trk>
</gpx>"#;

    #[test]
    fn test_segments_are_concatenated() {
        let gpx = parse_tolerantly(GPX).unwrap();
        let points = gpx_points(&gpx).unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].lat, 48.7);
        assert_eq!(points[0].lon, 2.2);
        assert_eq!(points[1].elevation, Some(81.9));
        assert_eq!(points[2].elevation, None);
        let track = Track::new("g", points);
        assert_eq!(track.seconds().unwrap(), vec![0.0, 1.0, 27.0]);
    }

    #[test]
    fn test_truncated_file_is_repaired() {
        let cut = GPX.find("<trkseg>\n      <trkpt lat=\"48.7002\"").unwrap();
        let truncated = &GPX[..cut];
        assert!(parse_standard(truncated).is_err());
        let gpx = parse_tolerantly(truncated).unwrap();
        assert_eq!(gpx_points(&gpx).unwrap().len(), 2);
    }

    #[test]
    fn test_point_cut_mid_write_is_dropped() {
        let cut = GPX.find("<time>2023-06-26T11:14:04Z").unwrap();
        let gpx = parse_tolerantly(&GPX[..cut]).unwrap();
        assert_eq!(gpx_points(&gpx).unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_characters_are_dropped() {
        let dirty = GPX.replace("creator=\"test\"", "creator=\"te\u{1}st\"");
        let gpx = parse_tolerantly(&dirty).unwrap();
        assert_eq!(gpx_points(&gpx).unwrap().len(), 3);
    }

    #[test]
    fn test_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("morning_ride.gpx");
        fs::write(&path, GPX).unwrap();
        let track = read_gpx_track(&path).unwrap();
        assert_eq!(track.name, "morning_ride");
        assert_eq!(track.len(), 3);
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(matches!(parse_tolerantly("not xml at all"), Err(TrackError::GpxParse(_))));
    }
}
