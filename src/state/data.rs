/// Shared data structures for the tagging state
///
/// These structs represent the data model that flows between
/// the metadata codec, the catalog and the analysis engine.

use serde::{Deserialize, Serialize};

/// Decimal places kept for latitude/longitude
pub const COORDINATE_DECIMALS: i32 = 5;

/// Round a coordinate to the fixed storage precision
pub fn round_coordinate(value: f64) -> f64 {
    let scale = 10f64.powi(COORDINATE_DECIMALS);
    (value * scale).round() / scale
}

fn included_by_default() -> bool {
    true
}

/// Stable handle of a location inside the catalog arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocationId(pub(crate) usize);

/// Stable handle of a species inside the catalog arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpeciesId(pub(crate) usize);

impl LocationId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl SpeciesId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A camera site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Human readable name (e.g., "North Wash")
    pub name: String,
    /// Short site code, compared case-insensitively
    pub id: String,
    /// Degrees north, rounded to `COORDINATE_DECIMALS`
    pub latitude: Option<f64>,
    /// Degrees east, rounded to `COORDINATE_DECIMALS`
    pub longitude: Option<f64>,
    /// Meters
    pub elevation: f64,
    /// Part of the current analysis selection (never persisted)
    #[serde(skip, default = "included_by_default")]
    pub included: bool,
}

impl Location {
    pub fn new(
        name: impl Into<String>,
        id: impl Into<String>,
        latitude: Option<f64>,
        longitude: Option<f64>,
        elevation: f64,
    ) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            latitude: latitude.map(round_coordinate),
            longitude: longitude.map(round_coordinate),
            elevation,
            included: true,
        }
    }

    /// Both coordinates present and inside ±90° / ±180°
    pub fn is_valid(&self) -> bool {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => {
                (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng)
            }
            _ => false,
        }
    }
}

/// An animal species
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Species {
    /// Common name (e.g., "Bobcat")
    pub name: String,
    /// Scientific name (e.g., "Lynx rufus")
    pub scientific_name: String,
    /// Part of the current analysis selection (never persisted)
    #[serde(skip, default = "included_by_default")]
    pub included: bool,
}

impl Species {
    pub fn new(name: impl Into<String>, scientific_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scientific_name: scientific_name.into(),
            included: true,
        }
    }
}

/// A species tagged on one image together with how many animals were seen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeciesEntry {
    pub species: SpeciesId,
    pub amount: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinates_are_rounded() {
        let loc = Location::new("Ridge", "R1", Some(32.123456789), Some(-110.987654321), 900.0);
        assert_eq!(loc.latitude, Some(32.12346));
        assert_eq!(loc.longitude, Some(-110.98765));
    }

    #[test]
    fn test_location_validity() {
        assert!(Location::new("a", "a", Some(90.0), Some(-180.0), 0.0).is_valid());
        assert!(!Location::new("a", "a", Some(90.5), Some(0.0), 0.0).is_valid());
        assert!(!Location::new("a", "a", Some(0.0), Some(181.0), 0.0).is_valid());
        assert!(!Location::new("a", "a", None, Some(0.0), 0.0).is_valid());
        assert!(!Location::new("a", "a", Some(0.0), None, 0.0).is_valid());
    }

    #[test]
    fn test_included_flag_is_not_serialized() {
        let mut species = Species::new("Bobcat", "Lynx rufus");
        species.included = false;

        let json = serde_json::to_string(&species).unwrap();
        assert!(!json.contains("included"));

        let restored: Species = serde_json::from_str(&json).unwrap();
        assert!(restored.included);
    }
}
