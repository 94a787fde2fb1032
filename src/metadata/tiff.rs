/// TIFF directory reader and lossless rewriter
///
/// A rewrite never moves or touches bytes of the source block. Directories
/// that change are serialized again after the preserved region and the
/// pointers leading to them are patched; every out-of-line value that still
/// lies inside the preserved region keeps its original offset, so maker
/// notes, thumbnails and image strips that use absolute offsets stay valid.

use crate::error::{MetadataError, MetadataResult};

/// Size of a directory entry on disk
const ENTRY_SIZE: usize = 12;

/// TIFF field types used by this crate
pub mod field_type {
    pub const BYTE: u16 = 1;
    pub const ASCII: u16 = 2;
    pub const SHORT: u16 = 3;
    pub const LONG: u16 = 4;
    pub const RATIONAL: u16 = 5;
    pub const UNDEFINED: u16 = 7;
    pub const IFD: u16 = 13;
}

/// Bytes per value for a field type, `None` for types this reader does not know
fn unit_size(kind: u16) -> Option<usize> {
    match kind {
        1 | 2 | 6 | 7 => Some(1),
        3 | 8 => Some(2),
        4 | 9 | 11 | 13 => Some(4),
        5 | 10 | 12 => Some(8),
        _ => None,
    }
}

fn malformed(message: impl Into<String>) -> MetadataError {
    MetadataError::MalformedTiff(message.into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// "II"
    Little,
    /// "MM"
    Big,
}

impl ByteOrder {
    pub fn read_u16(self, b: &[u8]) -> u16 {
        let bytes = [b[0], b[1]];
        match self {
            ByteOrder::Little => u16::from_le_bytes(bytes),
            ByteOrder::Big => u16::from_be_bytes(bytes),
        }
    }

    pub fn read_u32(self, b: &[u8]) -> u32 {
        let bytes = [b[0], b[1], b[2], b[3]];
        match self {
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        }
    }

    pub fn u16_bytes(self, value: u16) -> [u8; 2] {
        match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }

    pub fn u32_bytes(self, value: u32) -> [u8; 4] {
        match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }
}

/// One directory entry
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub tag: u16,
    pub kind: u16,
    pub count: u32,
    /// Value bytes in the block's byte order (empty when `opaque`)
    pub data: Vec<u8>,
    /// The value/offset field exactly as read
    raw: [u8; 4],
    /// Where out-of-line data was found in the source block
    origin: Option<u32>,
    /// Unknown type or unreadable value: re-emitted with `raw` untouched
    opaque: bool,
}

impl Entry {
    /// A new entry from value bytes already in the target byte order
    pub fn new(tag: u16, kind: u16, count: u32, data: Vec<u8>) -> Self {
        Self {
            tag,
            kind,
            count,
            data,
            raw: [0; 4],
            origin: None,
            opaque: false,
        }
    }

    /// ASCII entry holding one or more NUL-terminated strings
    pub fn ascii<S: AsRef<str>>(tag: u16, values: &[S]) -> Self {
        let mut data = Vec::new();
        for value in values {
            data.extend_from_slice(value.as_ref().as_bytes());
            data.push(0);
        }
        let count = data.len() as u32;
        Self::new(tag, field_type::ASCII, count, data)
    }

    pub fn long(tag: u16, order: ByteOrder, value: u32) -> Self {
        Self::new(tag, field_type::LONG, 1, order.u32_bytes(value).to_vec())
    }

    pub fn rationals(tag: u16, order: ByteOrder, values: &[(u32, u32)]) -> Self {
        let mut data = Vec::with_capacity(values.len() * 8);
        for (numerator, denominator) in values {
            data.extend_from_slice(&order.u32_bytes(*numerator));
            data.extend_from_slice(&order.u32_bytes(*denominator));
        }
        Self::new(tag, field_type::RATIONAL, values.len() as u32, data)
    }

    /// Strings of an ASCII entry. Trailing NULs are dropped, inner NULs
    /// separate values.
    pub fn ascii_strings(&self) -> Vec<String> {
        if self.kind != field_type::ASCII {
            return Vec::new();
        }
        let end = self
            .data
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        if end == 0 {
            return Vec::new();
        }
        self.data[..end]
            .split(|&b| b == 0)
            .map(|part| String::from_utf8_lossy(part).into_owned())
            .collect()
    }

    /// First value of a SHORT, LONG or IFD entry
    pub fn as_u32(&self, order: ByteOrder) -> Option<u32> {
        match self.kind {
            field_type::SHORT if self.data.len() >= 2 => Some(order.read_u16(&self.data) as u32),
            field_type::LONG | field_type::IFD if self.data.len() >= 4 => {
                Some(order.read_u32(&self.data))
            }
            _ => None,
        }
    }

    /// (numerator, denominator) pairs of a RATIONAL entry
    pub fn as_rationals(&self, order: ByteOrder) -> Vec<(u32, u32)> {
        if self.kind != field_type::RATIONAL {
            return Vec::new();
        }
        self.data
            .chunks_exact(8)
            .map(|pair| (order.read_u32(&pair[0..4]), order.read_u32(&pair[4..8])))
            .collect()
    }

    /// Every value of a SHORT, LONG or IFD entry
    pub fn u32_values(&self, order: ByteOrder) -> Vec<u32> {
        match self.kind {
            field_type::SHORT => self
                .data
                .chunks_exact(2)
                .map(|v| order.read_u16(v) as u32)
                .collect(),
            field_type::LONG | field_type::IFD => {
                self.data.chunks_exact(4).map(|v| order.read_u32(v)).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Offset in the source block this entry's value depends on: where its
    /// out-of-line value was read from, or the raw field of an opaque entry
    pub fn source_offset(&self, order: ByteOrder) -> Option<u32> {
        if self.opaque {
            Some(order.read_u32(&self.raw))
        } else {
            self.origin
        }
    }
}

/// A parsed image file directory
#[derive(Debug, Clone, PartialEq)]
pub struct Directory {
    /// Offset of the directory in the source block
    pub offset: u32,
    pub entries: Vec<Entry>,
    /// Offset of the next directory in the chain, 0 at the end
    pub next: u32,
}

impl Directory {
    /// An empty directory that does not exist in any block yet
    pub fn empty() -> Self {
        Self {
            offset: 0,
            entries: Vec::new(),
            next: 0,
        }
    }

    pub fn get(&self, tag: u16) -> Option<&Entry> {
        self.entries.iter().find(|e| e.tag == tag)
    }

    pub fn remove(&mut self, tag: u16) {
        self.entries.retain(|e| e.tag != tag);
    }

    /// Insert an entry, replacing any entry with the same tag
    pub fn set(&mut self, entry: Entry) {
        self.remove(entry.tag);
        self.entries.push(entry);
    }
}

/// The TIFF structure that holds Exif data (a whole TIFF file, or the
/// payload of a JPEG APP1 segment)
#[derive(Debug, Clone)]
pub struct TiffBlock {
    bytes: Vec<u8>,
    order: ByteOrder,
}

impl TiffBlock {
    /// Validate the header and take ownership of the bytes
    pub fn parse(bytes: Vec<u8>) -> MetadataResult<Self> {
        if bytes.len() < 8 {
            return Err(malformed("block shorter than a TIFF header"));
        }
        let order = match &bytes[0..2] {
            b"II" => ByteOrder::Little,
            b"MM" => ByteOrder::Big,
            _ => return Err(malformed("unknown byte order mark")),
        };
        if order.read_u16(&bytes[2..4]) != 42 {
            return Err(malformed("bad TIFF magic number"));
        }
        let block = Self { bytes, order };
        if block.ifd0_offset() as usize >= block.bytes.len() {
            return Err(malformed("first directory offset out of bounds"));
        }
        Ok(block)
    }

    /// A little-endian block with an empty first directory
    pub fn new_empty() -> Self {
        let order = ByteOrder::Little;
        let mut bytes = b"II".to_vec();
        bytes.extend_from_slice(&order.u16_bytes(42));
        bytes.extend_from_slice(&order.u32_bytes(8));
        bytes.extend_from_slice(&order.u16_bytes(0));
        bytes.extend_from_slice(&order.u32_bytes(0));
        Self { bytes, order }
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn ifd0_offset(&self) -> u32 {
        self.order.read_u32(&self.bytes[4..8])
    }

    pub fn read_ifd0(&self) -> MetadataResult<Directory> {
        self.read_directory(self.ifd0_offset())
    }

    /// Read the directory at `offset`
    pub fn read_directory(&self, offset: u32) -> MetadataResult<Directory> {
        let start = offset as usize;
        let len = self.bytes.len();
        if start + 2 > len {
            return Err(malformed(format!("directory at {} out of bounds", offset)));
        }
        let count = self.order.read_u16(&self.bytes[start..]) as usize;
        let entries_end = start + 2 + count * ENTRY_SIZE;
        if entries_end + 4 > len {
            return Err(malformed(format!("directory at {} is truncated", offset)));
        }

        let entries = (0..count)
            .map(|i| self.read_entry(start + 2 + i * ENTRY_SIZE))
            .collect();
        let next = self.order.read_u32(&self.bytes[entries_end..]);

        Ok(Directory {
            offset,
            entries,
            next,
        })
    }

    fn read_entry(&self, at: usize) -> Entry {
        let b = &self.bytes[at..at + ENTRY_SIZE];
        let tag = self.order.read_u16(&b[0..2]);
        let kind = self.order.read_u16(&b[2..4]);
        let count = self.order.read_u32(&b[4..8]);
        let raw = [b[8], b[9], b[10], b[11]];

        let mut entry = Entry {
            tag,
            kind,
            count,
            data: Vec::new(),
            raw,
            origin: None,
            opaque: true,
        };

        let Some(size) = unit_size(kind).and_then(|unit| unit.checked_mul(count as usize)) else {
            return entry;
        };
        if size <= 4 {
            entry.data = raw[..size].to_vec();
            entry.opaque = false;
        } else {
            let value_offset = self.order.read_u32(&raw);
            let start = value_offset as usize;
            if let Some(bytes) = start
                .checked_add(size)
                .and_then(|end| self.bytes.get(start..end))
            {
                entry.data = bytes.to_vec();
                entry.origin = Some(value_offset);
                entry.opaque = false;
            }
        }
        entry
    }

    /// Follow a pointer entry of `parent` to its sub-directory
    pub fn read_sub_directory(
        &self,
        parent: &Directory,
        pointer_tag: u16,
    ) -> MetadataResult<Option<Directory>> {
        match parent.get(pointer_tag).and_then(|e| e.as_u32(self.order)) {
            Some(offset) => self.read_directory(offset).map(Some),
            None => Ok(None),
        }
    }

    /// Start a rewrite that preserves `bytes[..keep_len]` verbatim
    pub fn begin_rewrite(&self, keep_len: usize) -> Appender {
        let keep_len = keep_len.min(self.bytes.len());
        let mut out = self.bytes[..keep_len].to_vec();
        if out.len() % 2 == 1 {
            out.push(0);
        }
        let mark = out.len();
        Appender {
            out,
            order: self.order,
            keep_len,
            mark,
        }
    }
}

/// Appends re-serialized directories after the preserved part of a block
#[derive(Debug)]
pub struct Appender {
    out: Vec<u8>,
    order: ByteOrder,
    keep_len: usize,
    mark: usize,
}

impl Appender {
    /// Offset where appended data starts
    pub fn mark(&self) -> u32 {
        self.mark as u32
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Serialize a directory (entries sorted by tag) followed by its
    /// out-of-line values, returning the directory's offset
    pub fn append_directory(&mut self, mut entries: Vec<Entry>, next: u32) -> MetadataResult<u32> {
        entries.sort_by_key(|e| e.tag);

        let offset = self.out.len();
        let mut value_cursor = offset + 2 + entries.len() * ENTRY_SIZE + 4;
        let mut values: Vec<&[u8]> = Vec::new();
        let mut fields: Vec<[u8; 4]> = Vec::with_capacity(entries.len());

        for entry in &entries {
            let field = if entry.opaque {
                entry.raw
            } else if entry.data.len() <= 4 {
                let mut inline = [0u8; 4];
                inline[..entry.data.len()].copy_from_slice(&entry.data);
                inline
            } else if let Some(origin) = entry
                .origin
                .filter(|o| *o as usize + entry.data.len() <= self.keep_len)
            {
                self.order.u32_bytes(origin)
            } else {
                let placed = u32::try_from(value_cursor)
                    .map_err(|_| malformed("rewritten block exceeds 4 GiB"))?;
                values.push(&entry.data);
                value_cursor += entry.data.len() + entry.data.len() % 2;
                self.order.u32_bytes(placed)
            };
            fields.push(field);
        }

        let order = self.order;
        self.out.extend_from_slice(&order.u16_bytes(entries.len() as u16));
        for (entry, field) in entries.iter().zip(&fields) {
            self.out.extend_from_slice(&order.u16_bytes(entry.tag));
            self.out.extend_from_slice(&order.u16_bytes(entry.kind));
            self.out.extend_from_slice(&order.u32_bytes(entry.count));
            self.out.extend_from_slice(field);
        }
        self.out.extend_from_slice(&order.u32_bytes(next));
        for value in values {
            self.out.extend_from_slice(value);
            if value.len() % 2 == 1 {
                self.out.push(0);
            }
        }

        u32::try_from(offset).map_err(|_| malformed("rewritten block exceeds 4 GiB"))
    }

    /// Point the header at the new first directory and return the block bytes
    pub fn finish(mut self, ifd0_offset: u32) -> Vec<u8> {
        let pointer = self.order.u32_bytes(ifd0_offset);
        self.out[4..8].copy_from_slice(&pointer);
        self.out
    }
}
