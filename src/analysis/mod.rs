/// Survey analysis module
///
/// This module handles:
/// - The event interval entered by the user (interval.rs)
/// - Filtering observations by species, location and date (query.rs)
/// - Detection events, accumulation curve and tallies (engine.rs)
///
/// Everything here is pure computation over borrowed observations.

pub mod engine;
pub mod interval;
pub mod query;

pub use engine::{AccumulationPoint, Analysis, DetectionEvent, SpeciesTally};
pub use interval::{EventInterval, DEFAULT_EVENT_INTERVAL_MINUTES};
pub use query::ObservationQuery;
