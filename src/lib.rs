/// Camera-trap photo tagging core
///
/// Reads and writes species, site and date tags embedded in image metadata,
/// keeps a session catalog of sites and species, and analyses tagged images
/// into detection events and species accumulation.

pub mod analysis;
pub mod config;
pub mod error;
pub mod ingest;
pub mod metadata;
pub mod state;

pub use analysis::{Analysis, EventInterval, ObservationQuery};
pub use config::Settings;
pub use error::{Error, MetadataError, Result};
pub use state::{Catalog, Location, LocationId, Observation, Species, SpeciesId, TagStatus};
