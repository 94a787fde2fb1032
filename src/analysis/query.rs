/// Composable filters over a set of observations

use std::collections::HashSet;

use chrono::{NaiveDate, NaiveDateTime};

use crate::state::{Catalog, LocationId, Observation, SpeciesId};

/// A conjunction of optional predicates. Unset predicates accept everything.
///
/// Running a query never touches the observations; the same query can be
/// run any number of times.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationQuery {
    species_only: Option<SpeciesId>,
    included_species: Option<HashSet<SpeciesId>>,
    included_locations: Option<HashSet<LocationId>>,
    /// Exclusive bounds
    date_range: Option<(NaiveDateTime, NaiveDateTime)>,
}

impl ObservationQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query matching the catalog's current analysis selection
    pub fn from_selection(catalog: &Catalog) -> Self {
        Self::new()
            .species_in(catalog.included_species())
            .locations_in(catalog.included_locations())
    }

    /// Keep observations that contain this species
    pub fn species_only(mut self, species: SpeciesId) -> Self {
        self.species_only = Some(species);
        self
    }

    /// Keep observations with at least one species in the set
    pub fn species_in(mut self, species: impl IntoIterator<Item = SpeciesId>) -> Self {
        self.included_species = Some(species.into_iter().collect());
        self
    }

    /// Keep observations taken at a location in the set. Observations with
    /// no location never match.
    pub fn locations_in(mut self, locations: impl IntoIterator<Item = LocationId>) -> Self {
        self.included_locations = Some(locations.into_iter().collect());
        self
    }

    /// Keep observations strictly after `start` and strictly before `end`.
    /// A missing bound is open.
    pub fn date_range(mut self, start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Self {
        self.date_range = Some((
            start.unwrap_or(NaiveDateTime::MIN),
            end.unwrap_or(NaiveDateTime::MAX),
        ));
        self
    }

    /// Calendar-day variant of `date_range`: both bounds are midnight of the
    /// given day, so the end day itself is excluded
    pub fn day_range(self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        let midnight = |day: NaiveDate| day.and_time(chrono::NaiveTime::MIN);
        self.date_range(start.map(midnight), end.map(midnight))
    }

    pub fn matches(&self, observation: &Observation) -> bool {
        if let Some(species) = self.species_only {
            if observation.amount_of(species).is_none() {
                return false;
            }
        }
        if let Some(included) = &self.included_species {
            if !observation
                .species()
                .iter()
                .any(|entry| included.contains(&entry.species))
            {
                return false;
            }
        }
        if let Some(included) = &self.included_locations {
            if !observation.location().map_or(false, |l| included.contains(&l)) {
                return false;
            }
        }
        if let Some((start, end)) = self.date_range {
            let date = observation.date();
            if !(date > start && date < end) {
                return false;
            }
        }
        true
    }

    /// Matching observations, in input order
    pub fn run<'a, I>(&self, observations: I) -> Vec<&'a Observation>
    where
        I: IntoIterator<Item = &'a Observation>,
    {
        observations.into_iter().filter(|o| self.matches(o)).collect()
    }
}
