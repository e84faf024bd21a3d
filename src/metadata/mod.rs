//! Best-effort EXIF enrichment: capture timestamp and GPS coordinates
//!
//! Nothing in here returns an error to the caller. A sub-field that cannot be
//! read, is missing or is malformed is simply absent from [`ExifData`].

use chrono::NaiveDateTime;
use exif::{Exif, In, Rational, Tag, Value};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Format used by the EXIF `DateTimeOriginal` tag
const EXIF_DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Enrichment attached to an indexed image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExifData {
    /// ISO-8601 capture timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// `[longitude, latitude]` in decimal degrees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<[f64; 2]>,
}

impl ExifData {
    pub fn is_empty(&self) -> bool {
        self.date.is_none() && self.location.is_none()
    }
}

/// Reference hemisphere of a GPS coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hemisphere {
    North,
    South,
    East,
    West,
}

impl Hemisphere {
    pub fn parse(reference: &str) -> Option<Self> {
        match reference.trim() {
            "N" | "n" => Some(Self::North),
            "S" | "s" => Some(Self::South),
            "E" | "e" => Some(Self::East),
            "W" | "w" => Some(Self::West),
            _ => None,
        }
    }

    fn is_negative(self) -> bool {
        matches!(self, Self::South | Self::West)
    }
}

/// Degrees/minutes/seconds triplet
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dms {
    pub degrees: f64,
    pub minutes: f64,
    pub seconds: f64,
}

impl Dms {
    pub fn new(degrees: f64, minutes: f64, seconds: f64) -> Self {
        Self {
            degrees,
            minutes,
            seconds,
        }
    }

    /// Decode the three EXIF rationals of a GPS coordinate
    ///
    /// Returns `None` unless there are exactly three components with non-zero
    /// denominators.
    pub fn from_rationals(parts: &[Rational]) -> Option<Self> {
        match parts {
            [d, m, s] => Some(Self::new(
                rational_to_f64(d)?,
                rational_to_f64(m)?,
                rational_to_f64(s)?,
            )),
            _ => None,
        }
    }

    /// Convert to signed decimal degrees
    pub fn to_decimal(self, hemisphere: Hemisphere) -> f64 {
        let value = self.degrees + self.minutes / 60.0 + self.seconds / 3600.0;
        if hemisphere.is_negative() {
            -value
        } else {
            value
        }
    }
}

fn rational_to_f64(r: &Rational) -> Option<f64> {
    if r.denom == 0 {
        return None;
    }
    Some(r.num as f64 / r.denom as f64)
}

/// Parse an EXIF timestamp (`2021:06:01 12:30:45`) into ISO-8601
pub fn parse_capture_date(raw: &str) -> Option<String> {
    let raw = raw.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    NaiveDateTime::parse_from_str(raw, EXIF_DATE_FORMAT)
        .ok()
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
}

/// Extract enrichment from the image at `path`
///
/// Files that cannot be opened or carry no EXIF block yield an empty
/// [`ExifData`].
pub fn extract(path: &Path) -> ExifData {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            tracing::debug!("Cannot open {:?} for EXIF extraction: {}", path, e);
            return ExifData::default();
        }
    };

    let exif = match exif::Reader::new().read_from_container(&mut BufReader::new(file)) {
        Ok(exif) => exif,
        Err(e) => {
            tracing::debug!("No EXIF data in {:?}: {}", path, e);
            return ExifData::default();
        }
    };

    let data = from_exif(&exif);
    if data.date.is_none() {
        tracing::debug!("Unable to get capture date for {:?}", path);
    }
    if data.location.is_none() {
        tracing::debug!("Unable to get GPS location for {:?}", path);
    }
    data
}

/// Read the capture date and GPS location out of a decoded EXIF block
pub fn from_exif(exif: &Exif) -> ExifData {
    let date = ascii_field(exif, Tag::DateTimeOriginal).and_then(|s| parse_capture_date(&s));

    let latitude = coordinate(
        exif,
        Tag::GPSLatitude,
        Tag::GPSLatitudeRef,
        [Hemisphere::North, Hemisphere::South],
    );
    let longitude = coordinate(
        exif,
        Tag::GPSLongitude,
        Tag::GPSLongitudeRef,
        [Hemisphere::East, Hemisphere::West],
    );
    let location = match (longitude, latitude) {
        (Some(lon), Some(lat)) => Some([lon, lat]),
        _ => None,
    };

    ExifData { date, location }
}

/// One signed coordinate; the reference must name a hemisphere of `axis`
fn coordinate(exif: &Exif, value_tag: Tag, ref_tag: Tag, axis: [Hemisphere; 2]) -> Option<f64> {
    let dms = match &exif.get_field(value_tag, In::PRIMARY)?.value {
        Value::Rational(parts) => Dms::from_rationals(parts)?,
        _ => return None,
    };
    let hemisphere = Hemisphere::parse(&ascii_field(exif, ref_tag)?)?;
    if !axis.contains(&hemisphere) {
        return None;
    }
    Some(dms.to_decimal(hemisphere))
}

fn ascii_field(exif: &Exif, tag: Tag) -> Option<String> {
    match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Ascii(parts) => parts
            .first()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exif::experimental::Writer;
    use exif::Field;
    use tempfile::TempDir;

    fn field(tag: Tag, value: Value) -> Field {
        Field {
            tag,
            ifd_num: In::PRIMARY,
            value,
        }
    }

    fn dms(d: u32, m: u32, s: u32) -> Value {
        Value::Rational(vec![
            Rational { num: d, denom: 1 },
            Rational { num: m, denom: 1 },
            Rational { num: s, denom: 1 },
        ])
    }

    fn ascii(text: &str) -> Value {
        Value::Ascii(vec![text.as_bytes().to_vec()])
    }

    /// Write `fields` as a bare TIFF/EXIF file and return its path
    fn tiff_with(temp: &TempDir, name: &str, fields: &[Field]) -> std::path::PathBuf {
        let mut writer = Writer::new();
        for f in fields {
            writer.push_field(f);
        }
        let mut buf = std::io::Cursor::new(Vec::new());
        writer.write(&mut buf, false).unwrap();

        let path = temp.path().join(name);
        std::fs::write(&path, buf.into_inner()).unwrap();
        path
    }

    fn southwest_fields() -> Vec<Field> {
        vec![
            field(Tag::GPSLatitude, dms(10, 30, 0)),
            field(Tag::GPSLatitudeRef, ascii("S")),
            field(Tag::GPSLongitude, dms(2, 15, 0)),
            field(Tag::GPSLongitudeRef, ascii("W")),
            field(Tag::DateTimeOriginal, ascii("2021:06:01 12:30:45")),
        ]
    }

    #[test]
    fn test_extract_gps_and_date_from_exif_block() {
        let temp = TempDir::new().unwrap();
        let path = tiff_with(&temp, "southwest.tif", &southwest_fields());

        let data = extract(&path);
        assert_eq!(data.location, Some([-2.25, -10.5]));
        assert_eq!(data.date.as_deref(), Some("2021-06-01T12:30:45"));

        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["location"], serde_json::json!([-2.25, -10.5]));
    }

    #[test]
    fn test_gps_without_reference_has_no_location() {
        let temp = TempDir::new().unwrap();
        let fields: Vec<Field> = southwest_fields()
            .into_iter()
            .filter(|f| f.tag != Tag::GPSLatitudeRef)
            .collect();
        let path = tiff_with(&temp, "noref.tif", &fields);

        let data = extract(&path);
        assert_eq!(data.location, None);
        assert_eq!(data.date.as_deref(), Some("2021-06-01T12:30:45"));
    }

    #[test]
    fn test_reference_on_wrong_axis_is_rejected() {
        let temp = TempDir::new().unwrap();
        let fields: Vec<Field> = southwest_fields()
            .into_iter()
            .map(|f| match f.tag {
                Tag::GPSLatitudeRef => field(Tag::GPSLatitudeRef, ascii("E")),
                _ => f,
            })
            .collect();
        let path = tiff_with(&temp, "swapped.tif", &fields);

        assert_eq!(extract(&path).location, None);
    }

    #[test]
    fn test_dms_north_and_south() {
        let dms = Dms::new(10.0, 30.0, 0.0);
        assert_eq!(dms.to_decimal(Hemisphere::North), 10.5);
        assert_eq!(dms.to_decimal(Hemisphere::South), -10.5);
    }

    #[test]
    fn test_dms_east_and_west() {
        let dms = Dms::new(2.0, 17.0, 40.2);
        let east = dms.to_decimal(Hemisphere::East);
        assert!((east - 2.294_5).abs() < 1e-9);
        assert_eq!(dms.to_decimal(Hemisphere::West), -east);
    }

    #[test]
    fn test_dms_from_rationals() {
        let parts = [
            Rational { num: 48, denom: 1 },
            Rational { num: 51, denom: 1 },
            Rational { num: 2916, denom: 100 },
        ];
        let dms = Dms::from_rationals(&parts).unwrap();
        assert_eq!(dms, Dms::new(48.0, 51.0, 29.16));
    }

    #[test]
    fn test_malformed_rationals() {
        let zero_denominator = [
            Rational { num: 48, denom: 1 },
            Rational { num: 51, denom: 0 },
            Rational { num: 29, denom: 1 },
        ];
        assert!(Dms::from_rationals(&zero_denominator).is_none());

        let too_short = [Rational { num: 48, denom: 1 }];
        assert!(Dms::from_rationals(&too_short).is_none());
    }

    #[test]
    fn test_hemisphere_parse() {
        assert_eq!(Hemisphere::parse("S"), Some(Hemisphere::South));
        assert_eq!(Hemisphere::parse("W "), Some(Hemisphere::West));
        assert_eq!(Hemisphere::parse("X"), None);
        assert_eq!(Hemisphere::parse(""), None);
    }

    #[test]
    fn test_parse_capture_date() {
        assert_eq!(
            parse_capture_date("2021:06:01 12:30:45"),
            Some("2021-06-01T12:30:45".to_string())
        );
        assert_eq!(
            parse_capture_date("2021:06:01 12:30:45\0"),
            Some("2021-06-01T12:30:45".to_string())
        );
        assert_eq!(parse_capture_date("0000:00:00 00:00:00"), None);
        assert_eq!(parse_capture_date("yesterday"), None);
    }

    #[test]
    fn test_file_without_exif_has_no_location() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("plain.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        let data = extract(&path);
        assert!(data.location.is_none());
        assert!(data.date.is_none());

        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let data = extract(Path::new("/nonexistent/photo.jpg"));
        assert!(data.is_empty());
    }
}
