use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sanimal::analysis::{Analysis, EventInterval, ObservationQuery};
use sanimal::config::Settings;
use sanimal::ingest::{self, PathLocks};
use sanimal::metadata::fields::{parse_species_entry, RawLocation};
use sanimal::state::{Catalog, LocationId, SpeciesId, TagStatus};

/// Tag camera-trap photos and analyse detections
#[derive(Debug, Parser)]
#[command(name = "sanimal", version, about)]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Project catalog to load before and save after the command
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read every image in a folder and summarise its tags
    Scan {
        folder: PathBuf,
    },
    /// Filter tagged images and print detection statistics
    Analyze(AnalyzeArgs),
    /// Add tags to images and write them into the files
    Tag(TagArgs),
}

#[derive(Debug, Args)]
struct AnalyzeArgs {
    folder: PathBuf,

    /// Event interval in minutes; invalid values mean 30
    #[arg(long)]
    interval: Option<String>,

    /// Only images after the start of this day (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Only images before the start of this day (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,

    /// Only species matching this text (repeatable)
    #[arg(long = "species")]
    species: Vec<String>,

    /// Only locations matching this text (repeatable)
    #[arg(long = "location")]
    locations: Vec<String>,
}

#[derive(Debug, Args)]
struct TagArgs {
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Species as "name, scientific name, count" (repeatable)
    #[arg(long = "species")]
    species: Vec<String>,

    /// Location name
    #[arg(long, requires = "site_id")]
    site: Option<String>,

    /// Location id
    #[arg(long, requires = "site")]
    site_id: Option<String>,

    #[arg(long, requires = "site", allow_hyphen_values = true)]
    latitude: Option<f64>,

    #[arg(long, requires = "site", allow_hyphen_values = true)]
    longitude: Option<f64>,

    #[arg(long, requires = "site", default_value_t = 0.0, allow_hyphen_values = true)]
    elevation: f64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let catalog_path = cli.catalog.clone().or_else(|| settings.catalog.clone());
    let catalog = match &catalog_path {
        Some(path) if path.exists() => Catalog::load(path)?,
        _ => Catalog::new(),
    };

    let catalog = match cli.command {
        Command::Scan { folder } => scan(folder, &settings, catalog).await?,
        Command::Analyze(args) => analyze(args, &settings, catalog).await?,
        Command::Tag(args) => tag(args, catalog)?,
    };

    if let Some(path) = &catalog_path {
        catalog
            .save(path)
            .with_context(|| format!("saving catalog to {}", path.display()))?;
    }
    Ok(())
}

async fn scan(folder: PathBuf, settings: &Settings, catalog: Catalog) -> anyhow::Result<Catalog> {
    println!("🔍 Scanning folder: {}", folder.display());
    let (catalog, report) = ingest::ingest_folder_async(folder, settings.clone(), catalog).await?;

    let mut by_status: BTreeMap<&str, usize> = BTreeMap::new();
    for observation in &report.observations {
        let label = match observation.status(&catalog) {
            TagStatus::Complete => "complete",
            TagStatus::SpeciesOnly => "species only",
            TagStatus::LocationOnly => "location only",
            TagStatus::Untagged => "untagged",
        };
        *by_status.entry(label).or_insert(0) += 1;
    }

    println!("✅ {} images", report.observations.len());
    for (label, count) in &by_status {
        println!("   {:>14}: {}", label, count);
    }
    for (path, error) in &report.unreadable {
        println!("⚠️  {}: {}", path.display(), error);
    }
    if report.skipped_fields > 0 {
        println!("⚠️  {} malformed fields skipped", report.skipped_fields);
    }

    println!("📍 Locations:");
    for (_, location) in catalog.locations() {
        let coordinates = match (location.latitude, location.longitude) {
            (Some(lat), Some(lng)) => format!("{:.5}, {:.5}", lat, lng),
            _ => "no coordinates".to_string(),
        };
        println!("   {} [{}] {} ({} m)", location.name, location.id, coordinates, location.elevation);
    }
    println!("🐾 Species:");
    for (_, species) in catalog.all_species() {
        println!("   {} ({})", species.name, species.scientific_name);
    }
    Ok(catalog)
}

/// Limit the catalog's analysis selection to entries matching any of the
/// search texts; no texts selects everything
fn narrow_selection(catalog: &mut Catalog, species: &[String], locations: &[String]) {
    catalog.set_all_species_included(species.is_empty());
    for text in species {
        for id in catalog.search_species(text) {
            if let Some(species) = catalog.species_mut(id) {
                species.included = true;
            }
        }
    }

    catalog.set_all_locations_included(locations.is_empty());
    for text in locations {
        for id in catalog.search_locations(text) {
            if let Some(location) = catalog.location_mut(id) {
                location.included = true;
            }
        }
    }
}

async fn analyze(args: AnalyzeArgs, settings: &Settings, catalog: Catalog) -> anyhow::Result<Catalog> {
    let (mut catalog, report) =
        ingest::ingest_folder_async(args.folder.clone(), settings.clone(), catalog).await?;
    narrow_selection(&mut catalog, &args.species, &args.locations);

    let interval = args
        .interval
        .as_deref()
        .map(EventInterval::parse)
        .unwrap_or_else(|| settings.event_interval());
    let selected = ObservationQuery::from_selection(&catalog)
        .day_range(args.from, args.to)
        .run(&report.observations);
    let analysis = Analysis::new(selected, interval);

    if analysis.is_empty() {
        println!("📊 No images match the selection");
        return Ok(catalog);
    }
    print_analysis(&analysis, &catalog);
    Ok(catalog)
}

fn print_analysis(analysis: &Analysis<'_>, catalog: &Catalog) {
    let species_name = |id: SpeciesId| catalog.species(id).map_or("?", |s| s.name.as_str());
    let location_name = |id: Option<LocationId>| {
        id.and_then(|id| catalog.location(id))
            .map_or("(no location)", |l| l.name.as_str())
    };

    if let Some((first, last)) = analysis.date_span() {
        println!(
            "📊 {} images from {} to {}, {} minute events",
            analysis.observations().len(),
            first,
            last,
            analysis.interval().minutes()
        );
    }

    println!("\n{:<28} {:>7} {:>7} {:>8}", "Species", "Images", "Events", "Animals");
    for tally in analysis.species_tallies() {
        println!(
            "{:<28} {:>7} {:>7} {:>8}",
            species_name(tally.species),
            tally.images,
            tally.events,
            tally.animals
        );
    }

    println!("\nAccumulation (first day seen):");
    for point in analysis.accumulation_curve() {
        println!("  day {:>4}  {}", point.day, species_name(point.species));
    }

    println!("\nEvents by location:");
    for ((species, location), count) in analysis.events_by_location() {
        println!(
            "  {:<28} {:<24} {:>5}",
            species_name(species),
            location_name(location),
            count
        );
    }
}

fn tag(args: TagArgs, mut catalog: Catalog) -> anyhow::Result<Catalog> {
    let mut report = ingest::ingest_paths(&args.files, &mut catalog);

    let location = match (&args.site, &args.site_id) {
        (Some(name), Some(id)) => Some(catalog.resolve_location(&RawLocation {
            name: name.clone(),
            id: id.clone(),
            elevation: args.elevation,
            latitude: args.latitude,
            longitude: args.longitude,
        })),
        _ => None,
    };

    let mut species = Vec::new();
    for text in &args.species {
        let Ok(entry) = parse_species_entry(text) else {
            bail!("species {:?} is not \"name, scientific name, count\"", text);
        };
        let id = catalog.resolve_species(&entry.name, &entry.scientific_name);
        species.push((id, entry.count));
    }

    for observation in &mut report.observations {
        if location.is_some() {
            observation.set_location(location);
        }
        for (id, count) in &species {
            observation.add_species(*id, *count);
        }
    }

    let saved = ingest::save_dirty(&mut report.observations, &catalog, &PathLocks::new());
    println!("💾 Tagged {} images", saved.saved);
    for (path, error) in &saved.failed {
        println!("⚠️  {}: {}", display(path), error);
    }
    Ok(catalog)
}

fn display(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag_args(args: &[&str]) -> Result<TagArgs, clap::Error> {
        let cli = Cli::try_parse_from(["sanimal", "tag", "a.jpg"].iter().chain(args))?;
        match cli.command {
            Command::Tag(args) => Ok(args),
            other => panic!("parsed {:?}", other),
        }
    }

    #[test]
    fn test_coordinates_need_a_site() {
        assert!(tag_args(&["--latitude", "31.7"]).is_err());
        assert!(tag_args(&["--longitude", "-110.4"]).is_err());
        assert!(tag_args(&["--elevation", "910"]).is_err());
    }

    #[test]
    fn test_site_with_coordinates() {
        let args = tag_args(&[
            "--site", "Spring", "--site-id", "SP1", "--latitude", "31.7", "--longitude", "-110.4",
        ])
        .unwrap();
        assert_eq!(args.site.as_deref(), Some("Spring"));
        assert_eq!(args.longitude, Some(-110.4));
        assert_eq!(args.elevation, 0.0);
    }

    #[test]
    fn test_species_without_site() {
        let args = tag_args(&["--species", "Coati, Nasua narica, 2"]).unwrap();
        assert_eq!(args.species.len(), 1);
        assert!(args.site.is_none());
    }
}
