/// JPEG segment scanner and APP1 Exif splicing

use std::ops::Range;

use crate::error::{MetadataError, MetadataResult};

/// Identifier at the start of an Exif APP1 payload
pub const EXIF_HEADER: &[u8; 6] = b"Exif\0\0";

/// Largest APP1 payload a 16-bit segment length can describe
pub const MAX_SEGMENT_PAYLOAD: usize = 65533;

const MARKER_SOI: u8 = 0xD8;
const MARKER_EOI: u8 = 0xD9;
const MARKER_SOS: u8 = 0xDA;
const MARKER_APP0: u8 = 0xE0;
const MARKER_APP1: u8 = 0xE1;

pub fn is_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 3 && bytes[0] == 0xFF && bytes[1] == MARKER_SOI && bytes[2] == 0xFF
}

/// Location of an Exif APP1 segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExifSegment {
    /// Whole segment, marker included
    pub segment: Range<usize>,
    /// The TIFF block inside the payload
    pub tiff: Range<usize>,
}

/// Segment layout of the metadata part of a JPEG file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JpegLayout {
    /// First Exif APP1 segment, if any
    pub exif: Option<ExifSegment>,
    /// Where a new APP1 segment goes: after SOI and any leading APP0
    pub insert_at: usize,
}

fn malformed(message: impl Into<String>) -> MetadataError {
    MetadataError::MalformedJpeg(message.into())
}

/// Walk the marker segments up to the start of the compressed image data
pub fn scan(bytes: &[u8]) -> MetadataResult<JpegLayout> {
    if !is_jpeg(bytes) {
        return Err(malformed("missing start of image marker"));
    }

    let mut layout = JpegLayout {
        exif: None,
        insert_at: 2,
    };
    let mut leading_app0 = true;
    let mut pos = 2;

    loop {
        if pos >= bytes.len() || bytes[pos] != 0xFF {
            return Err(malformed(format!("expected a marker at offset {}", pos)));
        }
        // Any number of 0xFF fill bytes may precede a marker
        while pos + 1 < bytes.len() && bytes[pos + 1] == 0xFF {
            pos += 1;
        }
        let Some(&marker) = bytes.get(pos + 1) else {
            return Err(malformed("file ends inside a marker"));
        };

        match marker {
            MARKER_SOS | MARKER_EOI => return Ok(layout),
            0x01 | 0xD0..=0xD7 => {
                pos += 2;
                continue;
            }
            _ => {}
        }

        let Some(length) = bytes
            .get(pos + 2..pos + 4)
            .map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
        else {
            return Err(malformed("file ends inside a segment header"));
        };
        let end = pos + 2 + length;
        if length < 2 || end > bytes.len() {
            return Err(malformed(format!(
                "segment 0x{:02X} at offset {} overruns the file",
                marker, pos
            )));
        }

        let payload = pos + 4..end;
        if marker == MARKER_APP1
            && layout.exif.is_none()
            && bytes[payload.clone()].starts_with(EXIF_HEADER)
        {
            layout.exif = Some(ExifSegment {
                segment: pos..end,
                tiff: payload.start + EXIF_HEADER.len()..end,
            });
        }

        if leading_app0 && marker == MARKER_APP0 {
            layout.insert_at = end;
        } else {
            leading_app0 = false;
        }
        pos = end;
    }
}

/// Build the file with `tiff` as its Exif block, replacing the existing
/// Exif segment or inserting a new one. Nothing else is touched.
pub fn splice(bytes: &[u8], layout: &JpegLayout, tiff: &[u8]) -> MetadataResult<Vec<u8>> {
    let payload_len = EXIF_HEADER.len() + tiff.len();
    if payload_len > MAX_SEGMENT_PAYLOAD {
        return Err(MetadataError::SegmentTooLarge(payload_len));
    }

    let mut segment = Vec::with_capacity(payload_len + 4);
    segment.extend_from_slice(&[0xFF, MARKER_APP1]);
    segment.extend_from_slice(&((payload_len + 2) as u16).to_be_bytes());
    segment.extend_from_slice(EXIF_HEADER);
    segment.extend_from_slice(tiff);

    let replaced = match &layout.exif {
        Some(exif) => exif.segment.clone(),
        None => layout.insert_at..layout.insert_at,
    };

    let mut out = Vec::with_capacity(bytes.len() - replaced.len() + segment.len());
    out.extend_from_slice(&bytes[..replaced.start]);
    out.extend_from_slice(&segment);
    out.extend_from_slice(&bytes[replaced.end..]);
    Ok(out)
}
