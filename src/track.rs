//! Track representation: an owned, index-addressable sequence of points
//! whose derived fields are filled in place by the pipeline stages.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use geo::{point, Point as GeoPoint};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};

/// One GPS sample plus every signal derived for it so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "iso_time")]
    pub time: Option<DateTime<FixedOffset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cumulated_dist: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slope: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azimuth: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turns: Option<f64>,
}

impl Point {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            time: None,
            speed: None,
            elevation: None,
            cumulated_dist: None,
            slope: None,
            azimuth: None,
            turns: None,
        }
    }

    pub fn with_time(mut self, time: DateTime<FixedOffset>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_elevation(mut self, elevation: f64) -> Self {
        self.elevation = Some(elevation);
        self
    }

    /// Position as a `geo` point (x = lon, y = lat).
    pub fn position(&self) -> GeoPoint<f64> {
        point!(x: self.lon, y: self.lat)
    }

    pub fn get(&self, field: Field) -> Option<f64> {
        match field {
            Field::Speed => self.speed,
            Field::Elevation => self.elevation,
            Field::CumulatedDist => self.cumulated_dist,
            Field::Slope => self.slope,
            Field::Azimuth => self.azimuth,
            Field::Turns => self.turns,
        }
    }

    pub fn set(&mut self, field: Field, value: f64) {
        let slot = match field {
            Field::Speed => &mut self.speed,
            Field::Elevation => &mut self.elevation,
            Field::CumulatedDist => &mut self.cumulated_dist,
            Field::Slope => &mut self.slope,
            Field::Azimuth => &mut self.azimuth,
            Field::Turns => &mut self.turns,
        };
        *slot = Some(value);
    }
}

/// Numeric per-point signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Speed,
    Elevation,
    CumulatedDist,
    Slope,
    Azimuth,
    Turns,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::Speed => "speed",
            Field::Elevation => "elevation",
            Field::CumulatedDist => "cumulated_dist",
            Field::Slope => "slope",
            Field::Azimuth => "azimuth",
            Field::Turns => "turns",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One trip segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub name: String,
    pub points: Vec<Point>,
}

impl Track {
    pub fn new(name: impl Into<String>, points: Vec<Point>) -> Self {
        Self {
            name: name.into(),
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// At least two points, all with finite in-range coordinates.
    pub fn validate_shape(&self) -> Result<()> {
        if self.points.len() < 2 {
            return Err(TrackError::TooFewPoints {
                min: 2,
                actual: self.points.len(),
            });
        }
        for (index, p) in self.points.iter().enumerate() {
            let valid = p.lat.is_finite()
                && p.lon.is_finite()
                && (-90.0..=90.0).contains(&p.lat)
                && (-180.0..=180.0).contains(&p.lon);
            if !valid {
                return Err(TrackError::InvalidCoordinate {
                    index,
                    lat: p.lat,
                    lon: p.lon,
                });
            }
        }
        Ok(())
    }

    /// Seconds elapsed since the first point. Fails on missing or
    /// decreasing timestamps.
    pub fn seconds(&self) -> Result<Vec<f64>> {
        let mut out = Vec::with_capacity(self.points.len());
        let mut origin: Option<DateTime<FixedOffset>> = None;
        let mut previous = f64::NEG_INFINITY;
        for (index, p) in self.points.iter().enumerate() {
            let time = p.time.ok_or(TrackError::MissingField {
                index,
                field: "time",
            })?;
            let origin = *origin.get_or_insert(time);
            let elapsed = (time - origin)
                .num_microseconds()
                .map(|us| us as f64 / 1e6)
                .unwrap_or_else(|| (time - origin).num_milliseconds() as f64 / 1e3);
            if elapsed < previous {
                return Err(TrackError::NonMonotonicTime { index });
            }
            previous = elapsed;
            out.push(elapsed);
        }
        Ok(out)
    }

    /// Every value of `field`, failing on the first point that lacks it.
    pub fn column(&self, field: Field) -> Result<Vec<f64>> {
        self.points
            .iter()
            .enumerate()
            .map(|(index, p)| {
                p.get(field).ok_or(TrackError::MissingField {
                    index,
                    field: field.name(),
                })
            })
            .collect()
    }

    /// Overwrite `field` on every point. Refuses non-finite values so that a
    /// numerical failure never reaches the persisted track.
    pub fn set_column(&mut self, field: Field, values: &[f64]) -> Result<()> {
        debug_assert_eq!(values.len(), self.points.len());
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(TrackError::NonFinite {
                field: field.name(),
                index,
            });
        }
        for (p, &v) in self.points.iter_mut().zip(values) {
            p.set(field, v);
        }
        Ok(())
    }

    /// True when every point already carries `field`.
    pub fn has_field(&self, field: Field) -> bool {
        !self.points.is_empty() && self.points.iter().all(|p| p.get(field).is_some())
    }
}

/// Parse an ISO-8601 timestamp. Offsets are kept; naive values are UTC.
pub fn parse_time(raw: &str) -> Result<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t);
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%:z"] {
        if let Ok(t) = DateTime::parse_from_str(raw, fmt) {
            return Ok(t);
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc().fixed_offset());
        }
    }
    Err(TrackError::TimeParse(raw.to_string()))
}

/// Round to `decimals` decimal places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

mod iso_time {
    use chrono::{DateTime, FixedOffset, SecondsFormat};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &Option<DateTime<FixedOffset>>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match time {
            Some(t) => s.serialize_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, false)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Option<DateTime<FixedOffset>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(d)?;
        raw.map(|r| super::parse_time(&r).map_err(de::Error::custom))
            .transpose()
    }
}

/// Timestamp `seconds` after the Unix epoch, for building tracks in tests.
#[cfg(test)]
pub(crate) fn epoch_plus(seconds: f64) -> DateTime<FixedOffset> {
    use chrono::{TimeZone, Utc};
    let micros = (seconds * 1e6).round() as i64;
    let base = Utc.timestamp_opt(0, 0).unwrap();
    (base + chrono::Duration::microseconds(micros)).fixed_offset()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timed_track(times: &[f64]) -> Track {
        let points = times
            .iter()
            .enumerate()
            .map(|(i, &t)| Point::new(48.7 + i as f64 * 1e-4, 2.2).with_time(epoch_plus(t)))
            .collect();
        Track::new("t", points)
    }

    #[test]
    fn test_parse_time_variants() {
        let a = parse_time("2023-06-26T11:14:03+00:00").unwrap();
        let b = parse_time("2023-06-26T11:14:03Z").unwrap();
        let c = parse_time("2023-06-26 11:14:03").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        let d = parse_time("2023-06-26T13:14:03.500+02:00").unwrap();
        assert_eq!((d - a).num_milliseconds(), 500);
        assert!(matches!(parse_time("yesterday"), Err(TrackError::TimeParse(_))));
    }

    #[test]
    fn test_seconds_relative_to_start() {
        let track = timed_track(&[0.0, 1.0, 2.5, 2.5, 4.0]);
        assert_eq!(track.seconds().unwrap(), vec![0.0, 1.0, 2.5, 2.5, 4.0]);
    }

    #[test]
    fn test_seconds_rejects_backwards_time() {
        let track = timed_track(&[0.0, 2.0, 1.0]);
        assert!(matches!(
            track.seconds(),
            Err(TrackError::NonMonotonicTime { index: 2 })
        ));
    }

    #[test]
    fn test_missing_time_is_reported() {
        let mut track = timed_track(&[0.0, 1.0, 2.0]);
        track.points[1].time = None;
        assert!(matches!(
            track.seconds(),
            Err(TrackError::MissingField { index: 1, field: "time" })
        ));
    }

    #[test]
    fn test_validate_shape() {
        assert!(matches!(
            timed_track(&[0.0]).validate_shape(),
            Err(TrackError::TooFewPoints { min: 2, actual: 1 })
        ));
        let mut track = timed_track(&[0.0, 1.0]);
        track.points[0].lat = f64::NAN;
        assert!(matches!(
            track.validate_shape(),
            Err(TrackError::InvalidCoordinate { index: 0, .. })
        ));
    }

    #[test]
    fn test_columns() {
        let mut track = timed_track(&[0.0, 1.0, 2.0]);
        assert!(!track.has_field(Field::Speed));
        assert!(track.column(Field::Speed).is_err());

        track.set_column(Field::Speed, &[1.0, 2.0, 3.0]).unwrap();
        assert!(track.has_field(Field::Speed));
        assert_eq!(track.column(Field::Speed).unwrap(), vec![1.0, 2.0, 3.0]);

        let err = track.set_column(Field::Slope, &[0.0, f64::INFINITY, 0.0]);
        assert!(matches!(err, Err(TrackError::NonFinite { index: 1, .. })));
        assert!(!track.has_field(Field::Slope));
    }

    #[test]
    fn test_point_json_round_trip_keeps_time() {
        let json = r#"{"lat": 48.71, "lon": 2.21, "time": "2023-06-26T11:14:03+00:00", "speed": 4.2}"#;
        let p: Point = serde_json::from_str(json).unwrap();
        assert_eq!(p.speed, Some(4.2));
        assert!(p.slope.is_none());

        let back = serde_json::to_string(&p).unwrap();
        assert!(back.contains("2023-06-26T11:14:03+00:00"));
        assert!(!back.contains("slope"));
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(4.16666, 3), 4.167);
        assert_eq!(round_to(-12.34, 1), -12.3);
    }
}
