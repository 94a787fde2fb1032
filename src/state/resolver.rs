/// Entity resolution of parsed tag fields against the catalog
///
/// Both lookups are first-match in catalog scan order. The scan is linear,
/// which is fine for the few hundred sites and species a survey carries.

use tracing::debug;

use super::catalog::Catalog;
use super::data::{
    round_coordinate, Location, LocationId, Species, SpeciesEntry, SpeciesId, COORDINATE_DECIMALS,
};
use crate::metadata::fields::{ParsedMetadata, RawLocation};

/// Two coordinates match when they differ by less than 0.0001°, expressed in
/// units of the storage precision so that rounded values compare exactly.
const COORDINATE_TOLERANCE_UNITS: f64 = 10.0;

fn coordinate_matches(known: Option<f64>, incoming: Option<f64>) -> bool {
    match (known, incoming) {
        (Some(a), Some(b)) => {
            let scale = 10f64.powi(COORDINATE_DECIMALS);
            let units = ((round_coordinate(a) - round_coordinate(b)) * scale).round();
            units.abs() < COORDINATE_TOLERANCE_UNITS
        }
        (None, None) => true,
        _ => false,
    }
}

/// Case-insensitive string equality (full Unicode lowercase)
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// Catalog entries an image's parsed tags resolved to
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedTags {
    pub location: Option<LocationId>,
    /// One entry per distinct species, duplicates already merged
    pub species: Vec<SpeciesEntry>,
}

impl Catalog {
    /// First location with the same id (any case) and coordinates within
    /// tolerance. Elevation is not compared.
    pub fn find_location(&self, raw: &RawLocation) -> Option<LocationId> {
        self.locations()
            .find(|(_, known)| {
                eq_ignore_case(&known.id, &raw.id)
                    && coordinate_matches(known.latitude, raw.latitude)
                    && coordinate_matches(known.longitude, raw.longitude)
            })
            .map(|(id, _)| id)
    }

    /// Return the matching location or register a new one built from `raw`
    pub fn resolve_location(&mut self, raw: &RawLocation) -> LocationId {
        if let Some(id) = self.find_location(raw) {
            return id;
        }
        debug!("New location {} ({})", raw.name, raw.id);
        self.add_location(Location::new(
            raw.name.clone(),
            raw.id.clone(),
            raw.latitude,
            raw.longitude,
            raw.elevation,
        ))
    }

    /// First species whose common and scientific names both match (any case)
    pub fn find_species(&self, name: &str, scientific_name: &str) -> Option<SpeciesId> {
        self.all_species()
            .find(|(_, known)| {
                eq_ignore_case(&known.name, name)
                    && eq_ignore_case(&known.scientific_name, scientific_name)
            })
            .map(|(id, _)| id)
    }

    /// Return the matching species or register a new one
    pub fn resolve_species(&mut self, name: &str, scientific_name: &str) -> SpeciesId {
        if let Some(id) = self.find_species(name, scientific_name) {
            return id;
        }
        debug!("New species {} ({})", name, scientific_name);
        self.add_species(Species::new(name, scientific_name))
    }

    /// Resolve every parsed field of one image, registering unknown entities
    pub fn resolve(&mut self, parsed: &ParsedMetadata) -> ResolvedTags {
        let location = parsed.location.as_ref().map(|raw| self.resolve_location(raw));

        let mut species: Vec<SpeciesEntry> = Vec::with_capacity(parsed.species.len());
        for raw in &parsed.species {
            let id = self.resolve_species(&raw.name, &raw.scientific_name);
            match species.iter_mut().find(|entry| entry.species == id) {
                Some(entry) => entry.amount = entry.amount.saturating_add(raw.count),
                None => species.push(SpeciesEntry {
                    species: id,
                    amount: raw.count,
                }),
            }
        }

        ResolvedTags { location, species }
    }
}
