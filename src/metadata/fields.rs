/// Custom tag schema for camera-trap observations
///
/// Text formats of the three tagged fields:
/// - date: `YYYY:MM:DD HH:MM:SS` (Exif DateTimeOriginal)
/// - location: three strings `name`, `elevation`, `id`, plus standard GPS
/// - species: one string per species, `name, scientific name, count`

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::error::{MetadataError, MetadataResult};
use crate::state::{Catalog, Observation};

/// Exif date format
pub const DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// IFD0 → Exif sub-directory
pub const TAG_EXIF_IFD: u16 = 0x8769;
/// IFD0 → GPS sub-directory
pub const TAG_GPS_IFD: u16 = 0x8825;
/// Exif → interoperability sub-directory
pub const TAG_INTEROP_IFD: u16 = 0xA005;
/// Exif DateTimeOriginal
pub const TAG_DATE_TIME_ORIGINAL: u16 = 0x9003;

pub const TAG_GPS_VERSION: u16 = 0x0000;
pub const TAG_GPS_LATITUDE_REF: u16 = 0x0001;
pub const TAG_GPS_LATITUDE: u16 = 0x0002;
pub const TAG_GPS_LONGITUDE_REF: u16 = 0x0003;
pub const TAG_GPS_LONGITUDE: u16 = 0x0004;

/// IFD0 → private tagging sub-directory
pub const TAG_TAGGING_IFD: u16 = 0xCA00;
/// Tagging directory: location entry (3 strings)
pub const TAG_LOCATION_ENTRY: u16 = 0xCA01;
/// Tagging directory: species entries (one string per species)
pub const TAG_SPECIES_ENTRY: u16 = 0xCA02;
/// Tagging directory: start of the region appended by the last rewrite
pub const TAG_LAYOUT_MARK: u16 = 0xCA0F;

/// A recoverable problem with one field. The field is skipped, the rest of
/// the file is still used.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldIssue {
    #[error("unparsable date {0:?}")]
    MalformedDate(String),

    #[error("location field has {0} values, expected 3")]
    LocationArity(usize),

    #[error("unparsable location elevation {0:?}")]
    MalformedElevation(String),

    #[error("unreadable GPS {0}")]
    MalformedGps(&'static str),

    #[error("species entry {0:?} is not `name, scientific name, count`")]
    MalformedSpecies(String),

    #[error("species entry {0:?} has an invalid count")]
    MalformedCount(String),

    #[error("unreadable {0} directory")]
    UnreadableDirectory(&'static str),
}

/// Location fields as found in a file, before catalog resolution
#[derive(Debug, Clone, PartialEq)]
pub struct RawLocation {
    pub name: String,
    pub id: String,
    pub elevation: f64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// One species entry as found in a file, before catalog resolution
#[derive(Debug, Clone, PartialEq)]
pub struct RawSpecies {
    pub name: String,
    pub scientific_name: String,
    pub count: u32,
}

/// Everything read from one file's metadata. `Default` is the empty result
/// of a file without metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedMetadata {
    pub date: Option<NaiveDateTime>,
    pub location: Option<RawLocation>,
    pub species: Vec<RawSpecies>,
    /// Fields skipped while parsing
    pub issues: Vec<FieldIssue>,
}

pub fn parse_date(text: &str) -> Result<NaiveDateTime, FieldIssue> {
    NaiveDateTime::parse_from_str(text.trim(), DATE_FORMAT)
        .map_err(|_| FieldIssue::MalformedDate(text.to_string()))
}

pub fn format_date(date: &NaiveDateTime) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse `name, scientific name, count`
pub fn parse_species_entry(text: &str) -> Result<RawSpecies, FieldIssue> {
    let parts: Vec<&str> = text.split(',').filter(|part| !part.is_empty()).collect();
    let [name, scientific_name, count] = parts.as_slice() else {
        return Err(FieldIssue::MalformedSpecies(text.to_string()));
    };
    let count = count
        .trim()
        .parse::<u32>()
        .map_err(|_| FieldIssue::MalformedCount(text.to_string()))?;
    Ok(RawSpecies {
        name: name.trim().to_string(),
        scientific_name: scientific_name.trim().to_string(),
        count,
    })
}

pub fn format_species_entry(name: &str, scientific_name: &str, count: u32) -> String {
    format!("{}, {}, {}", name, scientific_name, count)
}

/// Parse the three location strings (GPS is read separately)
pub fn parse_location_values(values: &[String]) -> Result<RawLocation, FieldIssue> {
    let [name, elevation, id] = values else {
        return Err(FieldIssue::LocationArity(values.len()));
    };
    let elevation_value = elevation
        .trim()
        .parse::<f64>()
        .map_err(|_| FieldIssue::MalformedElevation(elevation.clone()))?;
    Ok(RawLocation {
        name: name.clone(),
        id: id.clone(),
        elevation: elevation_value,
        latitude: None,
        longitude: None,
    })
}

/// Elevation as stored in the location field; whole numbers keep a
/// trailing `.0` so files stay readable by the desktop app
pub fn format_elevation(elevation: f64) -> String {
    if elevation.is_finite() && elevation.fract() == 0.0 && elevation.abs() < 1e15 {
        format!("{:.1}", elevation)
    } else {
        format!("{}", elevation)
    }
}

/// Split decimal degrees into degree/minute/second rationals
pub fn degrees_to_dms(value: f64) -> [(u32, u32); 3] {
    let value = value.abs();
    let degrees = value.floor();
    let minutes_total = (value - degrees) * 60.0;
    let minutes = minutes_total.floor();
    let seconds = (minutes_total - minutes) * 60.0;
    [
        (degrees as u32, 1),
        (minutes as u32, 1),
        ((seconds * 1_000_000.0).round() as u32, 1_000_000),
    ]
}

/// Combine degree/minute/second rationals into decimal degrees
pub fn dms_to_degrees(parts: &[(u32, u32)]) -> Option<f64> {
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    let mut value = 0.0;
    let mut scale = 1.0;
    for (numerator, denominator) in parts {
        if *denominator == 0 {
            return None;
        }
        value += *numerator as f64 / *denominator as f64 / scale;
        scale *= 60.0;
    }
    Some(value)
}

/// Location values to write
#[derive(Debug, Clone, PartialEq)]
pub struct LocationValues {
    /// name, elevation, id
    pub fields: [String; 3],
    /// (latitude, longitude), only for a valid location
    pub gps: Option<(f64, f64)>,
}

/// The tagged fields of an observation, rendered for the file
#[derive(Debug, Clone, PartialEq)]
pub struct TagValues {
    pub date: String,
    pub location: Option<LocationValues>,
    pub species: Vec<String>,
}

impl TagValues {
    /// Render an observation's current state, looking names up in the catalog
    pub fn from_observation(observation: &Observation, catalog: &Catalog) -> MetadataResult<Self> {
        let location = match observation.location() {
            Some(id) => {
                let location = catalog
                    .location(id)
                    .ok_or_else(|| MetadataError::UnknownEntity(format!("{:?}", id)))?;
                let gps = match (location.is_valid(), location.latitude, location.longitude) {
                    (true, Some(lat), Some(lng)) => Some((lat, lng)),
                    _ => None,
                };
                Some(LocationValues {
                    fields: [
                        location.name.clone(),
                        format_elevation(location.elevation),
                        location.id.clone(),
                    ],
                    gps,
                })
            }
            None => None,
        };

        let species = observation
            .species()
            .iter()
            .map(|entry| {
                catalog
                    .species(entry.species)
                    .map(|s| format_species_entry(&s.name, &s.scientific_name, entry.amount))
                    .ok_or_else(|| MetadataError::UnknownEntity(format!("{:?}", entry.species)))
            })
            .collect::<MetadataResult<Vec<_>>>()?;

        Ok(Self {
            date: format_date(&observation.date()),
            location,
            species,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Location, Species};
    use chrono::NaiveDate;

    #[test]
    fn test_date_format() {
        let date = parse_date("2015:07:21 02:02:44").unwrap();
        assert_eq!(
            date,
            NaiveDate::from_ymd_opt(2015, 7, 21)
                .unwrap()
                .and_hms_opt(2, 2, 44)
                .unwrap()
        );
        assert_eq!(format_date(&date), "2015:07:21 02:02:44");
    }

    #[test]
    fn test_malformed_dates() {
        assert!(parse_date("").is_err());
        assert!(parse_date("    :  :     :  :  ").is_err());
        assert!(parse_date("2015-07-21 02:02:44").is_err());
    }

    #[test]
    fn test_species_entry() {
        let species = parse_species_entry("Bobcat, Lynx rufus, 2").unwrap();
        assert_eq!(species.name, "Bobcat");
        assert_eq!(species.scientific_name, "Lynx rufus");
        assert_eq!(species.count, 2);
        assert_eq!(
            format_species_entry(&species.name, &species.scientific_name, species.count),
            "Bobcat, Lynx rufus, 2"
        );
    }

    #[test]
    fn test_species_entry_wrong_arity() {
        assert!(matches!(
            parse_species_entry("Bobcat, Lynx rufus"),
            Err(FieldIssue::MalformedSpecies(_))
        ));
        assert!(matches!(
            parse_species_entry("a, b, c, 1"),
            Err(FieldIssue::MalformedSpecies(_))
        ));
    }

    #[test]
    fn test_species_entry_bad_count() {
        assert!(matches!(
            parse_species_entry("Bobcat, Lynx rufus, two"),
            Err(FieldIssue::MalformedCount(_))
        ));
        assert!(matches!(
            parse_species_entry("Bobcat, Lynx rufus, -1"),
            Err(FieldIssue::MalformedCount(_))
        ));
    }

    #[test]
    fn test_location_values() {
        let values = vec!["North Wash".to_string(), "1520.0".to_string(), "NW1".to_string()];
        let loc = parse_location_values(&values).unwrap();
        assert_eq!(loc.name, "North Wash");
        assert_eq!(loc.id, "NW1");
        assert_eq!(loc.elevation, 1520.0);

        assert_eq!(
            parse_location_values(&values[..2]),
            Err(FieldIssue::LocationArity(2))
        );
        let bad = vec!["a".to_string(), "high".to_string(), "b".to_string()];
        assert!(matches!(
            parse_location_values(&bad),
            Err(FieldIssue::MalformedElevation(_))
        ));
    }

    #[test]
    fn test_elevation_text() {
        assert_eq!(format_elevation(1520.0), "1520.0");
        assert_eq!(format_elevation(-3.25), "-3.25");
        assert_eq!("1520.0".parse::<f64>().unwrap(), 1520.0);
    }

    #[test]
    fn test_dms_conversion_keeps_storage_precision() {
        for value in [32.12346, 0.00001, 110.98765, 89.99999, 45.5] {
            let dms = degrees_to_dms(value);
            let back = dms_to_degrees(&dms).unwrap();
            assert_eq!(crate::state::data::round_coordinate(back), value);
        }
        assert_eq!(dms_to_degrees(&[(1, 0), (0, 1), (0, 1)]), None);
        assert_eq!(dms_to_degrees(&[]), None);
    }

    #[test]
    fn test_tag_values_from_observation() {
        let mut catalog = Catalog::new();
        let site = catalog.add_location(Location::new("Wash", "W1", Some(31.5), Some(-111.25), 812.0));
        let bobcat = catalog.add_species(Species::new("Bobcat", "Lynx rufus"));

        let date = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(6, 30, 0)
            .unwrap();
        let mut obs = Observation::new("/tmp/x.jpg", date);
        obs.set_location(Some(site));
        obs.add_species(bobcat, 2);

        let values = TagValues::from_observation(&obs, &catalog).unwrap();
        assert_eq!(values.date, "2024:05:01 06:30:00");
        let location = values.location.unwrap();
        assert_eq!(location.fields, ["Wash".to_string(), "812.0".to_string(), "W1".to_string()]);
        assert_eq!(location.gps, Some((31.5, -111.25)));
        assert_eq!(values.species, vec!["Bobcat, Lynx rufus, 2"]);
    }

    #[test]
    fn test_tag_values_without_coordinates_skip_gps() {
        let mut catalog = Catalog::new();
        let site = catalog.add_location(Location::new("Box", "B", None, None, 0.0));
        let date = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let mut obs = Observation::new("/tmp/x.jpg", date);
        obs.set_location(Some(site));

        let values = TagValues::from_observation(&obs, &catalog).unwrap();
        assert_eq!(values.location.unwrap().gps, None);
        assert!(values.species.is_empty());
    }
}
