use std::path::Path;

use tracing::info;

use super::data::{Location, LocationId, Species, SpeciesId};
use crate::error::Result;

/// The Catalog holds every known location and species for a session.
///
/// Entries live in append-only arenas and are addressed by `LocationId` /
/// `SpeciesId`, so all observations that refer to the same site share one
/// record and edits to it are seen everywhere. Nothing is ever removed,
/// which keeps every handed-out id valid for the lifetime of the catalog.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Catalog {
    locations: Vec<Location>,
    species: Vec<Species>,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a location and return its handle
    pub fn add_location(&mut self, location: Location) -> LocationId {
        self.locations.push(location);
        LocationId(self.locations.len() - 1)
    }

    /// Register a species and return its handle
    pub fn add_species(&mut self, species: Species) -> SpeciesId {
        self.species.push(species);
        SpeciesId(self.species.len() - 1)
    }

    pub fn location(&self, id: LocationId) -> Option<&Location> {
        self.locations.get(id.0)
    }

    pub fn location_mut(&mut self, id: LocationId) -> Option<&mut Location> {
        self.locations.get_mut(id.0)
    }

    pub fn species(&self, id: SpeciesId) -> Option<&Species> {
        self.species.get(id.0)
    }

    pub fn species_mut(&mut self, id: SpeciesId) -> Option<&mut Species> {
        self.species.get_mut(id.0)
    }

    /// All locations in insertion (scan) order
    pub fn locations(&self) -> impl Iterator<Item = (LocationId, &Location)> {
        self.locations
            .iter()
            .enumerate()
            .map(|(i, loc)| (LocationId(i), loc))
    }

    /// All species in insertion (scan) order
    pub fn all_species(&self) -> impl Iterator<Item = (SpeciesId, &Species)> {
        self.species
            .iter()
            .enumerate()
            .map(|(i, species)| (SpeciesId(i), species))
    }

    pub fn location_count(&self) -> usize {
        self.locations.len()
    }

    pub fn species_count(&self) -> usize {
        self.species.len()
    }

    /// Whether a location id refers to a valid (geo-located) site
    pub fn location_is_valid(&self, id: LocationId) -> bool {
        self.location(id).map_or(false, Location::is_valid)
    }

    // ========== Analysis selection ==========

    /// Species whose common or scientific name contains `text` (any case),
    /// sorted by common name
    pub fn search_species(&self, text: &str) -> Vec<SpeciesId> {
        let needle = text.to_lowercase();
        let mut found: Vec<SpeciesId> = self
            .all_species()
            .filter(|(_, s)| {
                s.name.to_lowercase().contains(&needle)
                    || s.scientific_name.to_lowercase().contains(&needle)
            })
            .map(|(id, _)| id)
            .collect();
        found.sort_by(|a, b| self.species[a.0].name.cmp(&self.species[b.0].name));
        found
    }

    /// Locations whose name or id contains `text` (any case), sorted by name
    pub fn search_locations(&self, text: &str) -> Vec<LocationId> {
        let needle = text.to_lowercase();
        let mut found: Vec<LocationId> = self
            .locations()
            .filter(|(_, l)| {
                l.name.to_lowercase().contains(&needle) || l.id.to_lowercase().contains(&needle)
            })
            .map(|(id, _)| id)
            .collect();
        found.sort_by(|a, b| self.locations[a.0].name.cmp(&self.locations[b.0].name));
        found
    }

    /// Select all species (`true`) or none (`false`) for analysis
    pub fn set_all_species_included(&mut self, included: bool) {
        self.species.iter_mut().for_each(|s| s.included = included);
    }

    /// Select all locations (`true`) or none (`false`) for analysis
    pub fn set_all_locations_included(&mut self, included: bool) {
        self.locations.iter_mut().for_each(|l| l.included = included);
    }

    pub fn included_species(&self) -> impl Iterator<Item = SpeciesId> + '_ {
        self.all_species().filter(|(_, s)| s.included).map(|(id, _)| id)
    }

    pub fn included_locations(&self) -> impl Iterator<Item = LocationId> + '_ {
        self.locations().filter(|(_, l)| l.included).map(|(id, _)| id)
    }

    // ========== Project persistence ==========

    /// Convert to JSON string for the project file
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse from JSON string (from the project file)
    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Save the catalog to a project file
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        info!(
            "Saved catalog ({} locations, {} species) to {}",
            self.locations.len(),
            self.species.len(),
            path.display()
        );
        Ok(())
    }

    /// Load a catalog from a project file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let catalog = Self::from_json(&json)?;
        info!(
            "Loaded catalog ({} locations, {} species) from {}",
            catalog.locations.len(),
            catalog.species.len(),
            path.display()
        );
        Ok(catalog)
    }
}
