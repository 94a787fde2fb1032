/// Image metadata codec
///
/// This module handles:
/// - Reading date, location and species tags from JPEG and TIFF files
/// - Writing them back without disturbing any other metadata
/// - Replacing files atomically so a failed write never corrupts an image
///
/// Layers:
/// - tiff.rs: TIFF directory reader and append-only rewriter
/// - jpeg.rs: JPEG segment scanner and APP1 splicing
/// - fields.rs: the custom tag schema and its text formats
/// - tags.rs: mapping between the schema and TIFF directories

pub mod fields;
pub mod jpeg;
pub mod tags;
pub mod tiff;

use std::fs;
use std::io::Write;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{MetadataError, MetadataResult};
use crate::state::{Catalog, Observation};
use fields::{ParsedMetadata, TagValues};
use tiff::TiffBlock;

fn is_tiff(bytes: &[u8]) -> bool {
    bytes.starts_with(b"II\x2a\x00") || bytes.starts_with(b"MM\x00\x2a")
}

/// Read the tagged fields of an image file.
///
/// A JPEG without an Exif segment yields an empty result. Individual
/// malformed fields are skipped and listed in `ParsedMetadata::issues`.
pub fn read_metadata(path: &Path) -> MetadataResult<ParsedMetadata> {
    let bytes = fs::read(path).map_err(|e| MetadataError::io(path, e))?;
    let parsed = parse_bytes(&bytes, path)?;
    for issue in &parsed.issues {
        warn!("{}: {}", path.display(), issue);
    }
    Ok(parsed)
}

/// Parse file contents already in memory
pub fn parse_bytes(bytes: &[u8], path: &Path) -> MetadataResult<ParsedMetadata> {
    if jpeg::is_jpeg(bytes) {
        let layout = jpeg::scan(bytes)?;
        match layout.exif {
            Some(exif) => tags::extract(&TiffBlock::parse(bytes[exif.tiff].to_vec())?),
            None => Ok(ParsedMetadata::default()),
        }
    } else if is_tiff(bytes) {
        tags::extract(&TiffBlock::parse(bytes.to_vec())?)
    } else {
        Err(MetadataError::UnsupportedFormat(path.to_path_buf()))
    }
}

/// Produce the new file contents with `values` written into them
pub fn rewrite_bytes(bytes: &[u8], values: &TagValues, path: &Path) -> MetadataResult<Vec<u8>> {
    if jpeg::is_jpeg(bytes) {
        let layout = jpeg::scan(bytes)?;
        let block = match &layout.exif {
            Some(exif) => TiffBlock::parse(bytes[exif.tiff.clone()].to_vec())?,
            None => TiffBlock::new_empty(),
        };
        let tiff = tags::apply(&block, values)?;
        jpeg::splice(bytes, &layout, &tiff)
    } else if is_tiff(bytes) {
        tags::apply(&TiffBlock::parse(bytes.to_vec())?, values)
    } else {
        Err(MetadataError::UnsupportedFormat(path.to_path_buf()))
    }
}

/// Persist an observation's tags into its file and mark it clean.
///
/// On any failure the file is left as it was and the observation stays
/// dirty.
pub fn write_metadata(observation: &mut Observation, catalog: &Catalog) -> MetadataResult<()> {
    let path = observation.path().to_path_buf();
    let values = TagValues::from_observation(observation, catalog)?;
    let bytes = fs::read(&path).map_err(|e| MetadataError::io(&path, e))?;
    let rewritten = rewrite_bytes(&bytes, &values, &path)?;

    if rewritten == bytes {
        debug!("{} already up to date", path.display());
    } else {
        replace_atomically(&path, &rewritten)?;
        info!("💾 Saved tags to {}", path.display());
    }
    observation.mark_clean();
    Ok(())
}

/// Write to a temporary file next to `path`, then rename it over `path`
fn replace_atomically(path: &Path, bytes: &[u8]) -> MetadataResult<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut file = tempfile::Builder::new()
        .prefix(".sanimal-")
        .tempfile_in(parent)
        .map_err(|e| MetadataError::io(path, e))?;
    file.write_all(bytes).map_err(|e| MetadataError::io(path, e))?;
    file.as_file()
        .sync_all()
        .map_err(|e| MetadataError::io(path, e))?;

    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(file.path(), meta.permissions())
            .map_err(|e| MetadataError::io(path, e))?;
    }

    file.persist(path)
        .map_err(|e| MetadataError::io(path, e.error))?;
    Ok(())
}
