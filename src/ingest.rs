/// Batch ingestion of image folders and batch saving of edited tags
///
/// Parsing is parallel per file. Resolution against the catalog happens on
/// one thread, in path order, so a batch always builds the same catalog no
/// matter how the parse work was scheduled.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use rayon::prelude::*;
use tokio::task;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Settings;
use crate::error::{MetadataError, Result};
use crate::metadata::{self, fields::ParsedMetadata};
use crate::state::{Catalog, Observation};

/// Outcome of ingesting a batch of files
#[derive(Debug, Default)]
pub struct IngestReport {
    /// One observation per file, in path order
    pub observations: Vec<Observation>,
    /// Files whose metadata could not be read; they are still ingested as
    /// untagged observations
    pub unreadable: Vec<(PathBuf, MetadataError)>,
    /// Malformed fields skipped across the batch
    pub skipped_fields: usize,
}

/// Outcome of saving dirty observations
#[derive(Debug, Default)]
pub struct SaveReport {
    pub saved: usize,
    /// Files that were not written; their observations stay dirty
    pub failed: Vec<(PathBuf, MetadataError)>,
}

/// All files under `root` with an accepted extension, sorted by path
pub fn collect_image_paths(root: &Path, settings: &Settings) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(settings.follow_symlinks)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && settings.accepts(e.path()))
        .map(|e| e.into_path())
        .collect();
    paths.sort();
    debug!("Found {} images under {}", paths.len(), root.display());
    paths
}

/// Parse every file in parallel, then resolve the results into observations
pub fn ingest_paths(paths: &[PathBuf], catalog: &mut Catalog) -> IngestReport {
    let parsed: Vec<_> = paths
        .par_iter()
        .map(|path| (path, metadata::read_metadata(path)))
        .collect();

    let mut report = IngestReport::default();
    for (path, result) in parsed {
        let parsed = match result {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Could not read metadata of {}: {}", path.display(), e);
                report.unreadable.push((path.clone(), e));
                ParsedMetadata::default()
            }
        };
        report.skipped_fields += parsed.issues.len();
        report
            .observations
            .push(Observation::from_parsed(path, &parsed, catalog));
    }

    info!(
        "Ingested {} images ({} unreadable, {} fields skipped); catalog has {} locations and {} species",
        report.observations.len(),
        report.unreadable.len(),
        report.skipped_fields,
        catalog.location_count(),
        catalog.species_count()
    );
    report
}

/// Scan a folder and ingest every accepted file in it
pub fn ingest_folder(root: &Path, settings: &Settings, catalog: &mut Catalog) -> IngestReport {
    let paths = collect_image_paths(root, settings);
    ingest_paths(&paths, catalog)
}

/// `ingest_folder` on the blocking thread pool, for callers running an
/// async event loop. The catalog is handed back together with the report.
pub async fn ingest_folder_async(
    root: PathBuf,
    settings: Settings,
    mut catalog: Catalog,
) -> Result<(Catalog, IngestReport)> {
    task::spawn_blocking(move || {
        let report = ingest_folder(&root, &settings, &mut catalog);
        (catalog, report)
    })
    .await
    .map_err(Into::into)
}

/// One lock per file path, so that two writers never rewrite the same file
/// at the same time
#[derive(Debug, Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding `path`
    pub fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(path.to_path_buf()).or_default().clone()
    }

    /// Write one observation while holding its path lock
    pub fn write(&self, observation: &mut Observation, catalog: &Catalog) -> std::result::Result<(), MetadataError> {
        let lock = self.lock_for(observation.path());
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        metadata::write_metadata(observation, catalog)
    }
}

/// Write every dirty observation back to its file, in parallel.
/// Failures are collected; they never stop the rest of the batch.
pub fn save_dirty(observations: &mut [Observation], catalog: &Catalog, locks: &PathLocks) -> SaveReport {
    let results: Vec<_> = observations
        .par_iter_mut()
        .filter(|o| o.is_dirty())
        .map(|o| (o.path().to_path_buf(), locks.write(o, catalog)))
        .collect();

    let mut report = SaveReport::default();
    for (path, result) in results {
        match result {
            Ok(()) => report.saved += 1,
            Err(e) => {
                warn!("Could not save {}: {}", path.display(), e);
                report.failed.push((path, e));
            }
        }
    }
    info!("Saved {} images, {} failed", report.saved, report.failed.len());
    report
}
