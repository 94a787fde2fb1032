/// One tagged photograph and the operations the UI layer uses to edit it

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime};
use tracing::warn;

use super::catalog::Catalog;
use super::data::{LocationId, SpeciesEntry, SpeciesId};
use crate::metadata::{self, fields::ParsedMetadata};

/// How far an image has been tagged. Derived on every read, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagStatus {
    /// Valid location and at least one species
    Complete,
    /// Species present, location missing or invalid
    SpeciesOnly,
    /// Valid location, no species
    LocationOnly,
    /// Neither
    Untagged,
}

/// One image with its timestamp, site and species counts
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    path: PathBuf,
    date: NaiveDateTime,
    location: Option<LocationId>,
    species: Vec<SpeciesEntry>,
    /// In-memory state differs from the file's metadata
    dirty: bool,
}

impl Observation {
    /// Build a clean observation from already-resolved fields
    pub fn new(path: impl Into<PathBuf>, date: NaiveDateTime) -> Self {
        Self {
            path: path.into(),
            date,
            location: None,
            species: Vec::new(),
            dirty: false,
        }
    }

    /// Read the file's metadata, resolve it against the catalog (registering
    /// unknown sites and species) and return a clean observation.
    ///
    /// Unreadable metadata is not fatal: the image comes back untagged and
    /// dated from the file system.
    pub fn ingest(path: &Path, catalog: &mut Catalog) -> Self {
        let parsed = match metadata::read_metadata(path) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Could not read metadata of {}: {}", path.display(), e);
                ParsedMetadata::default()
            }
        };
        Self::from_parsed(path, &parsed, catalog)
    }

    /// Resolve a parse result into an observation
    pub fn from_parsed(path: &Path, parsed: &ParsedMetadata, catalog: &mut Catalog) -> Self {
        let date = parsed.date.unwrap_or_else(|| fallback_date(path));
        let tags = catalog.resolve(parsed);
        Self {
            path: path.to_path_buf(),
            date,
            location: tags.location,
            species: tags.species,
            dirty: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn date(&self) -> NaiveDateTime {
        self.date
    }

    pub fn location(&self) -> Option<LocationId> {
        self.location
    }

    /// Species entries in tagging order
    pub fn species(&self) -> &[SpeciesEntry] {
        &self.species
    }

    /// Count tagged for a species, if present
    pub fn amount_of(&self, species: SpeciesId) -> Option<u32> {
        self.species
            .iter()
            .find(|entry| entry.species == species)
            .map(|entry| entry.amount)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_date(&mut self, date: NaiveDateTime) {
        self.date = date;
        self.dirty = true;
    }

    /// Replace (or clear) the site this image was taken at
    pub fn set_location(&mut self, location: Option<LocationId>) {
        self.location = location;
        self.dirty = true;
    }

    /// Tag a species. Tagging a species that is already present adds to its
    /// count instead of creating a second entry.
    pub fn add_species(&mut self, species: SpeciesId, amount: u32) {
        match self.species.iter_mut().find(|entry| entry.species == species) {
            Some(entry) => entry.amount = entry.amount.saturating_add(amount),
            None => self.species.push(SpeciesEntry { species, amount }),
        }
        self.dirty = true;
    }

    /// Untag a species; no-op when it is not present
    pub fn remove_species(&mut self, species: SpeciesId) {
        let before = self.species.len();
        self.species.retain(|entry| entry.species != species);
        if self.species.len() != before {
            self.dirty = true;
        }
    }

    /// Tagging progress, recomputed from the current state
    pub fn status(&self, catalog: &Catalog) -> TagStatus {
        let location_valid = self
            .location
            .map_or(false, |id| catalog.location_is_valid(id));
        let has_species = !self.species.is_empty();
        match (location_valid, has_species) {
            (true, true) => TagStatus::Complete,
            (false, true) => TagStatus::SpeciesOnly,
            (true, false) => TagStatus::LocationOnly,
            (false, false) => TagStatus::Untagged,
        }
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Force the next save to rewrite this image
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

/// Timestamp used when the metadata carries no usable date: the file's
/// modification time, or now if even that is unavailable.
fn fallback_date(path: &Path) -> NaiveDateTime {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(|modified| DateTime::<Local>::from(modified).naive_local())
        .unwrap_or_else(|_| Local::now().naive_local())
}
