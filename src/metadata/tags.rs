/// Reading the tagged fields out of a TIFF block and writing them back

use tracing::debug;

use super::fields::*;
use super::tiff::{field_type, ByteOrder, Directory, Entry, TiffBlock};
use crate::error::MetadataResult;
use crate::state::data::round_coordinate;

/// Read date, location and species from a block.
///
/// Only a broken first directory is an error; broken sub-directories and
/// fields are recorded as issues and skipped.
pub fn extract(block: &TiffBlock) -> MetadataResult<ParsedMetadata> {
    let ifd0 = block.read_ifd0()?;
    let order = block.order();
    let mut parsed = ParsedMetadata::default();

    let sub_directory = |tag: u16, name: &'static str, issues: &mut Vec<FieldIssue>| {
        block.read_sub_directory(&ifd0, tag).unwrap_or_else(|e| {
            debug!("Skipping {} directory: {}", name, e);
            issues.push(FieldIssue::UnreadableDirectory(name));
            None
        })
    };
    let exif = sub_directory(TAG_EXIF_IFD, "Exif", &mut parsed.issues);
    let gps = sub_directory(TAG_GPS_IFD, "GPS", &mut parsed.issues);
    let tagging = sub_directory(TAG_TAGGING_IFD, "tagging", &mut parsed.issues);

    if let Some(date) = exif.as_ref().and_then(|d| d.get(TAG_DATE_TIME_ORIGINAL)) {
        match date.ascii_strings().as_slice() {
            [text] => match parse_date(text) {
                Ok(date) => parsed.date = Some(date),
                Err(issue) => parsed.issues.push(issue),
            },
            other => parsed.issues.push(FieldIssue::MalformedDate(other.join("\0"))),
        }
    }

    let Some(tagging) = tagging else {
        return Ok(parsed);
    };

    if let Some(entry) = tagging.get(TAG_LOCATION_ENTRY) {
        match parse_location_values(&entry.ascii_strings()) {
            Ok(mut location) => {
                if let Some(gps) = &gps {
                    location.latitude =
                        read_coordinate(gps, order, TAG_GPS_LATITUDE_REF, TAG_GPS_LATITUDE, "S", &mut parsed.issues);
                    location.longitude =
                        read_coordinate(gps, order, TAG_GPS_LONGITUDE_REF, TAG_GPS_LONGITUDE, "W", &mut parsed.issues);
                }
                parsed.location = Some(location);
            }
            Err(issue) => parsed.issues.push(issue),
        }
    }

    if let Some(entry) = tagging.get(TAG_SPECIES_ENTRY) {
        for text in entry.ascii_strings() {
            match parse_species_entry(&text) {
                Ok(species) => parsed.species.push(species),
                Err(issue) => parsed.issues.push(issue),
            }
        }
    }

    Ok(parsed)
}

fn read_coordinate(
    gps: &Directory,
    order: ByteOrder,
    ref_tag: u16,
    value_tag: u16,
    negative_ref: &str,
    issues: &mut Vec<FieldIssue>,
) -> Option<f64> {
    let entry = gps.get(value_tag)?;
    let Some(degrees) = dms_to_degrees(&entry.as_rationals(order)) else {
        issues.push(FieldIssue::MalformedGps(if value_tag == TAG_GPS_LATITUDE {
            "latitude"
        } else {
            "longitude"
        }));
        return None;
    };
    let negative = gps
        .get(ref_tag)
        .and_then(|r| r.ascii_strings().into_iter().next())
        .map_or(false, |r| r.trim().eq_ignore_ascii_case(negative_ref));
    Some(round_coordinate(if negative { -degrees } else { degrees }))
}

/// Tags whose values are offsets into the block
const OFFSET_TAGS: [u16; 5] = [
    0x0111, // StripOffsets
    0x0144, // TileOffsets
    0x014A, // SubIFDs
    0x0201, // JPEGInterchangeFormat
    TAG_INTEROP_IFD,
];

/// Whether a kept entry depends only on bytes before `mark`
fn refers_below(entry: &Entry, order: ByteOrder, mark: usize) -> bool {
    let below = |offset: u32| (offset as usize) < mark;
    let pointers_below = !(entry.kind == field_type::IFD || OFFSET_TAGS.contains(&entry.tag))
        || entry
            .u32_values(order)
            .into_iter()
            .all(|offset| offset == 0 || below(offset));
    pointers_below && entry.source_offset(order).map_or(true, below)
}

/// Length of the block prefix a rewrite must keep.
///
/// A previous rewrite records where its appended region starts. That region
/// can be dropped when everything in it is about to be written again and
/// no entry kept from the rewritten directories (or from the next directory
/// in the chain) points into it; otherwise the whole block is kept. Offsets
/// stored inside value bytes, such as those of maker notes, are not
/// followed.
fn preserved_length(
    block: &TiffBlock,
    ifd0: &Directory,
    exif: Option<&Directory>,
    gps: Option<&Directory>,
    tagging: Option<&Directory>,
) -> usize {
    let len = block.len();
    let order = block.order();
    let Some(mark) = tagging
        .and_then(|d| d.get(TAG_LAYOUT_MARK))
        .and_then(|e| e.as_u32(order))
        .map(|m| m as usize)
    else {
        return len;
    };
    if mark < 8 || mark > len {
        return len;
    }

    let rewritten_above_mark = [Some(ifd0), exif, gps, tagging]
        .into_iter()
        .flatten()
        .all(|dir| dir.offset as usize >= mark);
    if !rewritten_above_mark {
        return len;
    }

    let next = match ifd0.next {
        0 => None,
        offset if (offset as usize) < mark => match block.read_directory(offset) {
            Ok(dir) => Some(dir),
            Err(_) => return len,
        },
        _ => return len,
    };

    // Entries a rewrite replaces may point anywhere
    let kept: [(Option<&Directory>, &[u16]); 5] = [
        (Some(ifd0), &[TAG_EXIF_IFD, TAG_GPS_IFD, TAG_TAGGING_IFD]),
        (exif, &[TAG_DATE_TIME_ORIGINAL]),
        (gps, &[TAG_GPS_LATITUDE, TAG_GPS_LONGITUDE]),
        (tagging, &[TAG_LOCATION_ENTRY, TAG_SPECIES_ENTRY, TAG_LAYOUT_MARK]),
        (next.as_ref(), &[]),
    ];
    let kept_below_mark = kept.into_iter().all(|(dir, replaced)| {
        dir.map_or(true, |dir| {
            dir.entries
                .iter()
                .filter(|e| !replaced.contains(&e.tag))
                .all(|e| refers_below(e, order, mark))
        })
    });

    if kept_below_mark {
        mark
    } else {
        len
    }
}

fn gps_entries(order: ByteOrder, (latitude, longitude): (f64, f64)) -> [Entry; 4] {
    [
        Entry::ascii(TAG_GPS_LATITUDE_REF, &[if latitude < 0.0 { "S" } else { "N" }]),
        Entry::rationals(TAG_GPS_LATITUDE, order, &degrees_to_dms(latitude)),
        Entry::ascii(TAG_GPS_LONGITUDE_REF, &[if longitude < 0.0 { "W" } else { "E" }]),
        Entry::rationals(TAG_GPS_LONGITUDE, order, &degrees_to_dms(longitude)),
    ]
}

/// Write the tagged fields into a block, returning the new block bytes.
///
/// The date, location and species fields are removed and replaced as a
/// whole. Valid coordinates are written to GPS; a location without them
/// clears the GPS coordinates so they cannot attach to it on a later read.
/// Everything else in the block is preserved.
pub fn apply(block: &TiffBlock, values: &TagValues) -> MetadataResult<Vec<u8>> {
    let order = block.order();
    let ifd0 = block.read_ifd0()?;
    let exif = block.read_sub_directory(&ifd0, TAG_EXIF_IFD)?;
    let gps = block.read_sub_directory(&ifd0, TAG_GPS_IFD)?;
    let tagging = block.read_sub_directory(&ifd0, TAG_TAGGING_IFD)?;

    let keep_len = preserved_length(block, &ifd0, exif.as_ref(), gps.as_ref(), tagging.as_ref());
    let mut appender = block.begin_rewrite(keep_len);

    // Children first so parents can point at them
    let mut tagging = tagging.unwrap_or_else(Directory::empty);
    tagging.remove(TAG_LOCATION_ENTRY);
    tagging.remove(TAG_SPECIES_ENTRY);
    if let Some(location) = &values.location {
        tagging.set(Entry::ascii(TAG_LOCATION_ENTRY, &location.fields));
    }
    if !values.species.is_empty() {
        tagging.set(Entry::ascii(TAG_SPECIES_ENTRY, &values.species));
    }
    tagging.set(Entry::long(TAG_LAYOUT_MARK, order, appender.mark()));
    let tagging_offset = appender.append_directory(tagging.entries, 0)?;

    let coordinates = values.location.as_ref().and_then(|l| l.gps);
    let gps = match (gps, coordinates) {
        (Some(mut dir), Some(coords)) => {
            gps_entries(order, coords).into_iter().for_each(|e| dir.set(e));
            Some(dir)
        }
        (None, Some(coords)) => {
            let mut dir = Directory::empty();
            dir.set(Entry::new(TAG_GPS_VERSION, field_type::BYTE, 4, vec![2, 3, 0, 0]));
            gps_entries(order, coords).into_iter().for_each(|e| dir.set(e));
            Some(dir)
        }
        (Some(mut dir), None) if values.location.is_some() => {
            for tag in [
                TAG_GPS_LATITUDE_REF,
                TAG_GPS_LATITUDE,
                TAG_GPS_LONGITUDE_REF,
                TAG_GPS_LONGITUDE,
            ] {
                dir.remove(tag);
            }
            Some(dir)
        }
        (dir, None) => dir,
    };
    let gps_offset = match gps {
        Some(dir) => Some(appender.append_directory(dir.entries, dir.next)?),
        None => None,
    };

    let mut exif = exif.unwrap_or_else(Directory::empty);
    exif.set(Entry::ascii(TAG_DATE_TIME_ORIGINAL, &[values.date.as_str()]));
    let exif_offset = appender.append_directory(exif.entries, exif.next)?;

    let mut ifd0_entries = ifd0.entries;
    let mut set_pointer = |tag: u16, offset: u32| {
        ifd0_entries.retain(|e| e.tag != tag);
        ifd0_entries.push(Entry::long(tag, order, offset));
    };
    set_pointer(TAG_EXIF_IFD, exif_offset);
    if let Some(offset) = gps_offset {
        set_pointer(TAG_GPS_IFD, offset);
    }
    set_pointer(TAG_TAGGING_IFD, tagging_offset);
    let ifd0_offset = appender.append_directory(ifd0_entries, ifd0.next)?;

    debug!(
        "Rewrote metadata block: kept {} of {} bytes",
        keep_len,
        block.len()
    );
    Ok(appender.finish(ifd0_offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::tiff::tests::fixture_block;

    fn values() -> TagValues {
        TagValues {
            date: "2024:05:01 06:30:00".into(),
            location: Some(LocationValues {
                fields: ["North Wash".into(), "1520.0".into(), "NW1".into()],
                gps: Some((32.12346, -110.98765)),
            }),
            species: vec!["Bobcat, Lynx rufus, 2".into(), "Coyote, Canis latrans, 1".into()],
        }
    }

    fn reparse(bytes: Vec<u8>) -> ParsedMetadata {
        extract(&TiffBlock::parse(bytes).unwrap()).unwrap()
    }

    #[test]
    fn test_empty_block_has_no_fields() {
        let parsed = extract(&TiffBlock::new_empty()).unwrap();
        assert_eq!(parsed, ParsedMetadata::default());
    }

    #[test]
    fn test_apply_then_extract() {
        let out = apply(&TiffBlock::new_empty(), &values()).unwrap();
        let parsed = reparse(out);

        assert_eq!(parsed.date.map(|d| format_date(&d)).as_deref(), Some("2024:05:01 06:30:00"));
        let location = parsed.location.unwrap();
        assert_eq!(location.name, "North Wash");
        assert_eq!(location.id, "NW1");
        assert_eq!(location.elevation, 1520.0);
        assert_eq!(location.latitude, Some(32.12346));
        assert_eq!(location.longitude, Some(-110.98765));
        assert_eq!(parsed.species.len(), 2);
        assert_eq!(parsed.species[1].name, "Coyote");
        assert!(parsed.issues.is_empty());
    }

    #[test]
    fn test_apply_keeps_foreign_metadata() {
        let original = fixture_block();
        let out = apply(&TiffBlock::parse(original.clone()).unwrap(), &values()).unwrap();
        assert_eq!(&out[8..original.len()], &original[8..]);

        let block = TiffBlock::parse(out).unwrap();
        let ifd0 = block.read_ifd0().unwrap();
        assert_eq!(ifd0.get(0x010F).unwrap().ascii_strings(), vec!["ACME"]);
        assert_eq!(ifd0.next, 70);
        let exif = block.read_sub_directory(&ifd0, TAG_EXIF_IFD).unwrap().unwrap();
        assert_eq!(exif.get(0x927C).unwrap().data, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(exif.get(TAG_DATE_TIME_ORIGINAL).is_some());
    }

    #[test]
    fn test_repeated_rewrites_reclaim_their_region() {
        let block = TiffBlock::parse(fixture_block()).unwrap();
        let first = apply(&block, &values()).unwrap();
        let second = apply(&TiffBlock::parse(first.clone()).unwrap(), &values()).unwrap();
        let third = apply(&TiffBlock::parse(second.clone()).unwrap(), &values()).unwrap();

        assert_eq!(first, second);
        assert_eq!(second, third);
    }

    #[test]
    fn test_fields_are_replaced_not_merged() {
        let first = apply(&TiffBlock::new_empty(), &values()).unwrap();

        let mut changed = values();
        changed.species = vec!["Gray Fox, Urocyon cinereoargenteus, 4".into()];
        changed.location = None;
        let second = apply(&TiffBlock::parse(first).unwrap(), &changed).unwrap();

        let parsed = reparse(second);
        assert_eq!(parsed.species.len(), 1);
        assert_eq!(parsed.species[0].count, 4);
        assert!(parsed.location.is_none());
    }

    #[test]
    fn test_location_without_coordinates_clears_stale_gps() {
        let first = apply(&TiffBlock::new_empty(), &values()).unwrap();

        let mut no_gps = values();
        no_gps.location = Some(LocationValues {
            fields: ["Box".into(), "0.0".into(), "B".into()],
            gps: None,
        });
        let second = apply(&TiffBlock::parse(first).unwrap(), &no_gps).unwrap();

        let block = TiffBlock::parse(second.clone()).unwrap();
        let ifd0 = block.read_ifd0().unwrap();
        let gps = block.read_sub_directory(&ifd0, TAG_GPS_IFD).unwrap().unwrap();
        assert!(gps.get(TAG_GPS_VERSION).is_some());
        assert!(gps.get(TAG_GPS_LATITUDE).is_none());

        let location = reparse(second).location.unwrap();
        assert_eq!(location.id, "B");
        assert_eq!(location.latitude, None);
        assert_eq!(location.longitude, None);
    }

    #[test]
    fn test_clearing_location_keeps_gps() {
        let first = apply(&TiffBlock::new_empty(), &values()).unwrap();

        let mut cleared = values();
        cleared.location = None;
        let second = apply(&TiffBlock::parse(first).unwrap(), &cleared).unwrap();

        let block = TiffBlock::parse(second).unwrap();
        let ifd0 = block.read_ifd0().unwrap();
        let gps = block.read_sub_directory(&ifd0, TAG_GPS_IFD).unwrap().unwrap();
        assert!(gps.get(TAG_GPS_LATITUDE).is_some());
        assert!(extract(&block).unwrap().location.is_none());
    }

    #[test]
    fn test_foreign_pointer_into_appended_region_keeps_it() {
        let first = apply(&TiffBlock::parse(fixture_block()).unwrap(), &values()).unwrap();
        let mark = fixture_block().len() as u32;

        // Another tool adds a sub-IFD after our region and links it from IFD0
        let block = TiffBlock::parse(first).unwrap();
        let ifd0 = block.read_ifd0().unwrap();
        let mut appender = block.begin_rewrite(block.len());
        let sub_ifd = appender
            .append_directory(vec![Entry::long(0x0100, ByteOrder::Big, 640)], 0)
            .unwrap();
        assert!(sub_ifd > mark);
        let mut entries = ifd0.entries;
        entries.push(Entry::long(0x014A, ByteOrder::Big, sub_ifd));
        let ifd0_offset = appender.append_directory(entries, ifd0.next).unwrap();
        let edited = appender.finish(ifd0_offset);

        let out = apply(&TiffBlock::parse(edited.clone()).unwrap(), &values()).unwrap();
        assert_eq!(&out[..edited.len()][8..], &edited[8..]);

        let block = TiffBlock::parse(out).unwrap();
        let ifd0 = block.read_ifd0().unwrap();
        let pointer = ifd0.get(0x014A).unwrap().as_u32(ByteOrder::Big).unwrap();
        let sub = block.read_directory(pointer).unwrap();
        assert_eq!(sub.get(0x0100).unwrap().as_u32(ByteOrder::Big), Some(640));
    }

    #[test]
    fn test_malformed_species_are_skipped_individually() {
        let mut bad = values();
        bad.species = vec![
            "Bobcat, Lynx rufus".into(),
            "Coyote, Canis latrans, 3".into(),
            "Deer, Odocoileus, many".into(),
        ];
        let parsed = reparse(apply(&TiffBlock::new_empty(), &bad).unwrap());

        assert_eq!(parsed.species.len(), 1);
        assert_eq!(parsed.species[0].name, "Coyote");
        assert_eq!(parsed.issues.len(), 2);
    }

    #[test]
    fn test_wrong_location_arity_is_no_location() {
        let block = TiffBlock::new_empty();
        let mut appender = block.begin_rewrite(block.len());
        let tagging = appender
            .append_directory(vec![Entry::ascii(TAG_LOCATION_ENTRY, &["Only", "Two"])], 0)
            .unwrap();
        let ifd0 = appender
            .append_directory(vec![Entry::long(TAG_TAGGING_IFD, ByteOrder::Little, tagging)], 0)
            .unwrap();

        let parsed = reparse(appender.finish(ifd0));
        assert!(parsed.location.is_none());
        assert_eq!(parsed.issues, vec![FieldIssue::LocationArity(2)]);
    }
}
