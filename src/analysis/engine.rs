/// Detection events and accumulation statistics over a filtered image set

use std::collections::{BTreeMap, HashMap};

use chrono::{Duration, NaiveDateTime};
use tracing::debug;

use super::interval::EventInterval;
use crate::state::{LocationId, Observation, SpeciesId};

/// A run of images of one species at one site, each within the event
/// interval of the previous one
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionEvent {
    pub species: SpeciesId,
    pub location: Option<LocationId>,
    /// Date of the first image
    pub start: NaiveDateTime,
    /// Date of the last image
    pub end: NaiveDateTime,
    /// Number of images in the event
    pub images: usize,
    /// Largest count of the species in any single image of the event
    pub max_count: u32,
}

impl DetectionEvent {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// First day a species was seen, counted from the first day of the survey
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulationPoint {
    pub species: SpeciesId,
    pub first_seen: NaiveDateTime,
    /// 1 for species seen on the survey's first calendar day
    pub day: i64,
}

/// Per-species totals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeciesTally {
    pub species: SpeciesId,
    /// Images containing the species
    pub images: usize,
    /// Independent detection events
    pub events: usize,
    /// Sum over events of the largest count seen in each event
    pub animals: u64,
}

/// Results computed from one immutable snapshot of observations
#[derive(Debug, Clone)]
pub struct Analysis<'a> {
    observations: Vec<&'a Observation>,
    interval: EventInterval,
    events: Vec<DetectionEvent>,
}

impl<'a> Analysis<'a> {
    /// Sort the observations by date (stable for equal dates) and group
    /// them into detection events
    pub fn new(mut observations: Vec<&'a Observation>, interval: EventInterval) -> Self {
        observations.sort_by_key(|o| o.date());
        let events = group_events(&observations, interval);
        debug!(
            "Analysed {} images into {} events ({} minute interval)",
            observations.len(),
            events.len(),
            interval.minutes()
        );
        Self {
            observations,
            interval,
            events,
        }
    }

    /// Observations in date order
    pub fn observations(&self) -> &[&'a Observation] {
        &self.observations
    }

    pub fn interval(&self) -> EventInterval {
        self.interval
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Detection events ordered by start date
    pub fn events(&self) -> &[DetectionEvent] {
        &self.events
    }

    pub fn events_of(&self, species: SpeciesId) -> impl Iterator<Item = &DetectionEvent> + '_ {
        self.events.iter().filter(move |e| e.species == species)
    }

    /// Every species present, in order of first appearance
    pub fn species(&self) -> Vec<SpeciesId> {
        let mut seen = Vec::new();
        for observation in &self.observations {
            for entry in observation.species() {
                if !seen.contains(&entry.species) {
                    seen.push(entry.species);
                }
            }
        }
        seen
    }

    /// Day of first detection for each species, ordered by that day.
    ///
    /// Days are calendar days; the time of day is ignored.
    pub fn accumulation_curve(&self) -> Vec<AccumulationPoint> {
        let Some(first) = self.observations.first() else {
            return Vec::new();
        };
        let first_day = first.date().date();

        let mut curve = Vec::new();
        for observation in &self.observations {
            for entry in observation.species() {
                if curve.iter().any(|p: &AccumulationPoint| p.species == entry.species) {
                    continue;
                }
                let first_seen = observation.date();
                curve.push(AccumulationPoint {
                    species: entry.species,
                    first_seen,
                    day: (first_seen.date() - first_day).num_days() + 1,
                });
            }
        }
        curve
    }

    /// Totals per species, in order of first appearance
    pub fn species_tallies(&self) -> Vec<SpeciesTally> {
        self.species()
            .into_iter()
            .map(|species| {
                let images = self
                    .observations
                    .iter()
                    .filter(|o| o.amount_of(species).is_some())
                    .count();
                let (events, animals) = self
                    .events_of(species)
                    .fold((0usize, 0u64), |(n, sum), e| (n + 1, sum + e.max_count as u64));
                SpeciesTally {
                    species,
                    images,
                    events,
                    animals,
                }
            })
            .collect()
    }

    /// Number of events per (species, location) pair
    pub fn events_by_location(&self) -> BTreeMap<(SpeciesId, Option<LocationId>), usize> {
        let mut table = BTreeMap::new();
        for event in &self.events {
            *table.entry((event.species, event.location)).or_insert(0) += 1;
        }
        table
    }

    /// Dates of the first and last observation
    pub fn date_span(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        Some((self.observations.first()?.date(), self.observations.last()?.date()))
    }
}

/// One forward pass over date-sorted observations. Each (species, location)
/// pair has at most one open event; an image extends it when it is no more
/// than `interval` after the event's last image, otherwise it starts a new one.
fn group_events(sorted: &[&Observation], interval: EventInterval) -> Vec<DetectionEvent> {
    let gap = interval.duration();
    let mut events: Vec<DetectionEvent> = Vec::new();
    let mut open: HashMap<(SpeciesId, Option<LocationId>), usize> = HashMap::new();

    for observation in sorted {
        let date = observation.date();
        for entry in observation.species() {
            let key = (entry.species, observation.location());
            let current = open
                .get(&key)
                .copied()
                .filter(|&i| date - events[i].end <= gap);
            match current {
                Some(i) => {
                    let event = &mut events[i];
                    event.end = date;
                    event.images += 1;
                    event.max_count = event.max_count.max(entry.amount);
                }
                None => {
                    open.insert(key, events.len());
                    events.push(DetectionEvent {
                        species: entry.species,
                        location: observation.location(),
                        start: date,
                        end: date,
                        images: 1,
                        max_count: entry.amount,
                    });
                }
            }
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Catalog, Location, Species};
    use chrono::NaiveDate;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, 1)
            .unwrap()
            .and_hms_opt(22, 0, 0)
            .unwrap()
    }

    fn obs(minutes: i64, location: Option<LocationId>, species: &[(SpeciesId, u32)]) -> Observation {
        let mut o = Observation::new(format!("/cam/{}.jpg", minutes), start() + Duration::minutes(minutes));
        o.set_location(location);
        for (id, amount) in species {
            o.add_species(*id, *amount);
        }
        o
    }

    fn catalog() -> (Catalog, LocationId, LocationId, SpeciesId, SpeciesId) {
        let mut catalog = Catalog::new();
        let wash = catalog.add_location(Location::new("Wash", "W", Some(31.0), Some(-111.0), 800.0));
        let ridge = catalog.add_location(Location::new("Ridge", "R", Some(31.5), Some(-111.5), 1400.0));
        let a = catalog.add_species(Species::new("Javelina", "Pecari tajacu"));
        let b = catalog.add_species(Species::new("Coati", "Nasua narica"));
        (catalog, wash, ridge, a, b)
    }

    #[test]
    fn test_events_split_on_gaps() {
        let (_, wash, _, a, _) = catalog();
        let observations: Vec<Observation> = [0, 10, 45, 46, 200]
            .iter()
            .map(|m| obs(*m, Some(wash), &[(a, 1)]))
            .collect();

        let analysis = Analysis::new(observations.iter().collect(), EventInterval::new(30));
        let spans: Vec<(i64, i64, usize)> = analysis
            .events()
            .iter()
            .map(|e| {
                (
                    (e.start - start()).num_minutes(),
                    (e.end - start()).num_minutes(),
                    e.images,
                )
            })
            .collect();
        assert_eq!(spans, vec![(0, 10, 2), (45, 46, 2), (200, 200, 1)]);
    }

    #[test]
    fn test_gap_equal_to_interval_extends_event() {
        let (_, wash, _, a, _) = catalog();
        let observations = vec![obs(0, Some(wash), &[(a, 1)]), obs(30, Some(wash), &[(a, 1)])];
        let analysis = Analysis::new(observations.iter().collect(), EventInterval::new(30));
        assert_eq!(analysis.events().len(), 1);
    }

    #[test]
    fn test_events_are_per_species_and_location() {
        let (_, wash, ridge, a, b) = catalog();
        let observations = vec![
            obs(0, Some(wash), &[(a, 2)]),
            obs(5, Some(ridge), &[(a, 1)]),
            obs(10, Some(wash), &[(a, 4), (b, 1)]),
            obs(15, None, &[(a, 1)]),
        ];
        let analysis = Analysis::new(observations.iter().collect(), EventInterval::new(30));

        let events = analysis.events();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].location, Some(wash));
        assert_eq!(events[0].images, 2);
        assert_eq!(events[0].max_count, 4);

        let table = analysis.events_by_location();
        assert_eq!(table[&(a, Some(wash))], 1);
        assert_eq!(table[&(a, Some(ridge))], 1);
        assert_eq!(table[&(a, None)], 1);
        assert_eq!(table[&(b, Some(wash))], 1);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let (_, wash, _, a, _) = catalog();
        let observations = vec![
            obs(200, Some(wash), &[(a, 1)]),
            obs(0, Some(wash), &[(a, 1)]),
            obs(10, Some(wash), &[(a, 1)]),
        ];
        let analysis = Analysis::new(observations.iter().collect(), EventInterval::default());
        assert_eq!(analysis.events().len(), 2);
        assert_eq!(analysis.date_span(), Some((start(), start() + Duration::minutes(200))));
    }

    #[test]
    fn test_accumulation_curve() {
        let (_, wash, _, a, b) = catalog();
        let day = 24 * 60;
        let observations = vec![
            obs(0, Some(wash), &[(a, 1)]),
            obs(day, Some(wash), &[(a, 1)]),
            // 22:00 plus 4 days and 3 hours falls on the sixth calendar day
            obs(4 * day + 3 * 60, Some(wash), &[(b, 1)]),
        ];
        let analysis = Analysis::new(observations.iter().collect(), EventInterval::default());
        let curve = analysis.accumulation_curve();

        assert_eq!(curve.len(), 2);
        assert_eq!((curve[0].species, curve[0].day), (a, 1));
        assert_eq!((curve[1].species, curve[1].day), (b, 6));
    }

    #[test]
    fn test_accumulation_counts_calendar_days() {
        let (_, wash, _, a, b) = catalog();
        let observations = vec![
            obs(0, Some(wash), &[(a, 1)]),
            obs(4 * 24 * 60, Some(wash), &[(b, 1)]),
        ];
        let analysis = Analysis::new(observations.iter().collect(), EventInterval::default());
        let curve = analysis.accumulation_curve();
        assert_eq!(curve[1].day, 5);
    }

    #[test]
    fn test_empty_input() {
        let analysis = Analysis::new(Vec::new(), EventInterval::default());
        assert!(analysis.is_empty());
        assert!(analysis.events().is_empty());
        assert!(analysis.accumulation_curve().is_empty());
        assert!(analysis.species_tallies().is_empty());
        assert_eq!(analysis.date_span(), None);
    }

    #[test]
    fn test_species_tallies() {
        let (_, wash, _, a, b) = catalog();
        let observations = vec![
            obs(0, Some(wash), &[(a, 2)]),
            obs(10, Some(wash), &[(a, 3), (b, 1)]),
            obs(100, Some(wash), &[(a, 1)]),
        ];
        let analysis = Analysis::new(observations.iter().collect(), EventInterval::new(30));

        assert_eq!(
            analysis.species_tallies(),
            vec![
                SpeciesTally {
                    species: a,
                    images: 3,
                    events: 2,
                    animals: 4,
                },
                SpeciesTally {
                    species: b,
                    images: 1,
                    events: 1,
                    animals: 1,
                },
            ]
        );
    }
}
