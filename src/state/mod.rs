/// State management module
///
/// This module handles all tagging state, including:
/// - Shared data structures (data.rs)
/// - The session catalog of sites and species (catalog.rs)
/// - Matching parsed tags to catalog entries (resolver.rs)
/// - Per-image observations and their edit operations (observation.rs)

pub mod catalog;
pub mod data;
pub mod observation;
pub mod resolver;

pub use catalog::Catalog;
pub use data::{Location, LocationId, Species, SpeciesEntry, SpeciesId};
pub use observation::{Observation, TagStatus};
pub use resolver::ResolvedTags;
