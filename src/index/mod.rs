//! Container index: entry model and the best-effort index parser.
//!
//! # Entry layout (all big-endian)
//! ```text
//! u32 name_len | name (UTF-8, name_len bytes) | u32 offset | u32 size
//! ```
//! `offset` is in package coordinates, so the entry's bytes live at
//! `decoded[offset + 1 .. offset + 1 + size]`.
//!
//! # Stop rule
//! Packages stay under 16 MiB, so every name length field starts with a zero
//! byte.  The parser keeps decoding entries while the byte under the cursor
//! is `0x00` and treats the first non-zero byte as the start of the data
//! region.  This is an assumption about the producer, not a guarantee of the
//! format; anything that contradicts it is recorded as an [`IndexDiagnostic`]
//! instead of failing the parse.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::header::{head_intact, PackageHeader, ENTRY_OVERHEAD, INDEX_OFFSET};

const PATH_SEPARATOR: u8 = b'/';

// ── FileEntry ────────────────────────────────────────────────────────────────

/// One file in the container: a `/`-rooted name and a byte range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileEntry {
    pub name:   String,
    pub offset: u32,
    pub size:   u32,
}

impl FileEntry {
    pub fn new(name: impl Into<String>, offset: u32, size: u32) -> Self {
        Self { name: name.into(), offset, size }
    }

    /// Size of this entry once serialized into the index block.
    pub fn encoded_len(&self) -> usize {
        ENTRY_OVERHEAD + self.name.len()
    }

    /// Package-coordinate end (exclusive).
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.size as u64
    }

    /// Decoded-stream range holding this entry's bytes.
    pub fn decoded_range(&self) -> std::ops::Range<usize> {
        let start = self.offset as usize + 1;
        start..start + self.size as usize
    }
}

// ── Parse result ─────────────────────────────────────────────────────────────

/// How the parser found the first index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexAnchor {
    /// Head markers were intact; entries start at `INDEX_OFFSET`.
    Header,
    /// Head was opaque; entries located by scanning from the base offset.
    Scan { start: usize },
    /// No entry stream could be located.
    Absent,
}

/// A contradiction of the parser's format assumptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndexDiagnostic {
    /// An entry's fields ran past the end of the stream.
    Truncated { at: usize },
    /// An entry name was not valid UTF-8; it was kept with replacement
    /// characters.
    BadName { at: usize },
    /// The declared entry count disagrees with the number of entries parsed.
    EntryCountMismatch { declared: u32, parsed: usize },
    /// The declared index length disagrees with the parsed data start.
    IndexLengthMismatch { declared: u32, parsed: usize },
    /// Declared index + body lengths do not cover the stream.
    StreamLengthMismatch { declared: u64, actual: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedIndex {
    pub entries:    Vec<FileEntry>,
    /// Decoded-stream position of the first data byte.
    pub data_start: usize,
    pub anchor:     IndexAnchor,
    pub diagnostics: Vec<IndexDiagnostic>,
}

// ── Parser ───────────────────────────────────────────────────────────────────

/// Locate and decode the run of index entries in `decoded`.
pub fn parse_index(decoded: &[u8], base_offset: usize) -> ParsedIndex {
    let mut diagnostics = Vec::new();
    let header = PackageHeader::from_decoded(decoded).filter(|_| head_intact(decoded));

    let anchor = if header.is_some() {
        IndexAnchor::Header
    } else {
        match scan_for_entries(decoded, base_offset) {
            Some(start) => IndexAnchor::Scan { start },
            None        => IndexAnchor::Absent,
        }
    };

    let (entries, data_start) = match anchor {
        IndexAnchor::Header         => decode_entries(decoded, INDEX_OFFSET, &mut diagnostics),
        IndexAnchor::Scan { start } => decode_entries(decoded, start, &mut diagnostics),
        IndexAnchor::Absent         => (Vec::new(), first_non_zero(decoded, base_offset)),
    };
    let data_start = data_start.min(decoded.len());

    if let Some(hdr) = header {
        let parsed = data_start.saturating_sub(INDEX_OFFSET);
        let declared = decoded.get(INDEX_OFFSET - 4..INDEX_OFFSET).map_or(0, BigEndian::read_u32);
        if declared as usize != entries.len() {
            warn!(declared, parsed = entries.len(), "declared entry count disagrees with parsed index");
            diagnostics.push(IndexDiagnostic::EntryCountMismatch { declared, parsed: entries.len() });
        }
        if hdr.index_len as usize != parsed {
            warn!(declared = hdr.index_len, parsed, "declared index length disagrees with parsed index");
            diagnostics.push(IndexDiagnostic::IndexLengthMismatch { declared: hdr.index_len, parsed });
        }
        if !hdr.lengths_consistent(decoded.len()) {
            diagnostics.push(IndexDiagnostic::StreamLengthMismatch {
                declared: hdr.index_len as u64 + hdr.body_len as u64,
                actual:   decoded.len().saturating_sub(INDEX_OFFSET),
            });
        }
    }

    debug!(?anchor, entries = entries.len(), data_start, "index parsed");
    ParsedIndex { entries, data_start, anchor, diagnostics }
}

/// Find the entry stream without trusting the head: the first `/` past
/// `base_offset` sits inside some entry name, the next zero byte is the high
/// byte of that entry's offset field, and eight bytes later the next entry
/// begins.
fn scan_for_entries(decoded: &[u8], base_offset: usize) -> Option<usize> {
    let tail = decoded.get(base_offset..)?;
    let slash = base_offset + memchr::memchr(PATH_SEPARATOR, tail)?;
    let zero = slash + memchr::memchr(0, &decoded[slash..])?;
    Some(zero + 8)
}

fn first_non_zero(decoded: &[u8], from: usize) -> usize {
    decoded
        .get(from..)
        .and_then(|tail| tail.iter().position(|&b| b != 0))
        .map_or(decoded.len(), |p| from + p)
}

fn decode_entries(
    decoded:     &[u8],
    start:       usize,
    diagnostics: &mut Vec<IndexDiagnostic>,
) -> (Vec<FileEntry>, usize) {
    let mut entries = Vec::new();
    let mut cursor = start;

    loop {
        match decoded.get(cursor) {
            None => break,
            Some(&b) if b != 0 => break,
            Some(_) => {}
        }

        let Some(len_field) = decoded.get(cursor..cursor + 4) else {
            diagnostics.push(IndexDiagnostic::Truncated { at: cursor });
            break;
        };
        let name_len = BigEndian::read_u32(len_field) as usize;
        let name_start = cursor + 4;
        let Some(fields) = name_start
            .checked_add(name_len)
            .and_then(|name_end| decoded.get(name_start..name_end.checked_add(8)?))
        else {
            diagnostics.push(IndexDiagnostic::Truncated { at: cursor });
            break;
        };

        let raw_name = &fields[..name_len];
        if std::str::from_utf8(raw_name).is_err() {
            warn!(at = cursor, "entry name is not valid UTF-8");
            diagnostics.push(IndexDiagnostic::BadName { at: cursor });
        }
        let name = String::from_utf8_lossy(raw_name);
        let offset = BigEndian::read_u32(&fields[name_len..]);
        let size = BigEndian::read_u32(&fields[name_len + 4..]);
        entries.push(FileEntry::new(name, offset, size));
        cursor = name_start + name_len + 8;
    }

    (entries, cursor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BASE_OFFSET;
    use crate::header::PackageHeader;

    fn push_entry(buf: &mut Vec<u8>, name: &str, offset: u32, size: u32) {
        push_raw_entry(buf, name.as_bytes(), offset, size);
    }

    fn push_raw_entry(buf: &mut Vec<u8>, name: &[u8], offset: u32, size: u32) {
        buf.extend_from_slice(&(name.len() as u32).to_be_bytes());
        buf.extend_from_slice(name);
        buf.extend_from_slice(&offset.to_be_bytes());
        buf.extend_from_slice(&size.to_be_bytes());
    }

    /// Decoded stream: key byte, header, index, then `body`.
    fn stream(entries: &[FileEntry], body: &[u8]) -> Vec<u8> {
        let index_len: usize = entries.iter().map(FileEntry::encoded_len).sum();
        let mut buf = vec![0x66];
        PackageHeader::new(index_len as u32, body.len() as u32).write(&mut buf).unwrap();
        buf.extend_from_slice(&(entries.len() as u32).to_be_bytes());
        for e in entries {
            push_entry(&mut buf, &e.name, e.offset, e.size);
        }
        buf.extend_from_slice(body);
        buf
    }

    #[test]
    fn parses_intact_header() {
        let entries = vec![
            FileEntry::new("/a.js", 0x50, 3),
            FileEntry::new("/pages/index.html", 0x53, 4),
        ];
        let data_start = INDEX_OFFSET + entries.iter().map(FileEntry::encoded_len).sum::<usize>();
        let decoded = stream(&entries, b"\x01abcdefg");
        let parsed = parse_index(&decoded, BASE_OFFSET);
        assert_eq!(parsed.anchor, IndexAnchor::Header);
        assert_eq!(parsed.entries, entries);
        assert_eq!(parsed.data_start, data_start);
        assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);
    }

    #[test]
    fn scans_past_opaque_head() {
        // Index long enough to straddle the base offset; head scrambled.
        let entries: Vec<FileEntry> = (0..80)
            .map(|i| FileEntry::new(format!("/dir/file_{i:03}.js"), 0x1000 + i * 16, 16))
            .collect();
        let mut decoded = stream(&entries, b"\x7fdata");
        for b in &mut decoded[..BASE_OFFSET] {
            *b = 0xCC;
        }
        let parsed = parse_index(&decoded, BASE_OFFSET);
        assert!(matches!(parsed.anchor, IndexAnchor::Scan { .. }));
        let tail = &entries[entries.len() - parsed.entries.len()..];
        assert_eq!(parsed.entries, tail);
        assert!(!parsed.entries.is_empty());
        assert_eq!(parsed.data_start, decoded.len() - 5);
    }

    #[test]
    fn absent_index_falls_back_to_first_non_zero() {
        let mut decoded = vec![0xCC; BASE_OFFSET];
        decoded.extend_from_slice(&[0, 0, 0, 0x42, 0x43]);
        let parsed = parse_index(&decoded, BASE_OFFSET);
        assert_eq!(parsed.anchor, IndexAnchor::Absent);
        assert!(parsed.entries.is_empty());
        assert_eq!(parsed.data_start, BASE_OFFSET + 3);
    }

    #[test]
    fn truncated_entry_is_diagnosed() {
        let mut decoded = stream(&[], b"");
        decoded.extend_from_slice(&[0, 0, 0, 40, b'/', b'x']);
        let parsed = parse_index(&decoded, BASE_OFFSET);
        assert!(parsed.entries.is_empty());
        assert!(parsed.diagnostics.contains(&IndexDiagnostic::Truncated { at: INDEX_OFFSET }));
    }

    #[test]
    fn declared_length_mismatch_is_diagnosed() {
        let entries = vec![FileEntry::new("/a", 0x40, 1)];
        let mut decoded = stream(&entries, b"\x09");
        // Claim a longer index than is present.
        decoded[6..10].copy_from_slice(&100u32.to_be_bytes());
        let parsed = parse_index(&decoded, BASE_OFFSET);
        assert_eq!(parsed.entries, entries);
        assert!(parsed
            .diagnostics
            .iter()
            .any(|d| matches!(d, IndexDiagnostic::IndexLengthMismatch { declared: 100, .. })));
    }

    #[test]
    fn invalid_name_does_not_end_the_index() {
        let names: [&[u8]; 3] = [b"/a.js", b"/\xff\xfe.js", b"/c.wxss"];
        let index_len: usize = names.iter().map(|n| ENTRY_OVERHEAD + n.len()).sum();
        let mut decoded = vec![0x66];
        PackageHeader::new(index_len as u32, 1).write(&mut decoded).unwrap();
        decoded.extend_from_slice(&3u32.to_be_bytes());
        for (i, name) in names.iter().enumerate() {
            push_raw_entry(&mut decoded, name, 0x100 + i as u32, 1);
        }
        decoded.push(0x2a);

        let parsed = parse_index(&decoded, BASE_OFFSET);
        assert_eq!(parsed.entries.len(), 3);
        assert_eq!(parsed.data_start, INDEX_OFFSET + index_len);
        assert_eq!(parsed.entries[1].name, "/\u{fffd}\u{fffd}.js");
        assert_eq!(parsed.entries[2], FileEntry::new("/c.wxss", 0x102, 1));
        let second_at = INDEX_OFFSET + ENTRY_OVERHEAD + names[0].len();
        assert_eq!(parsed.diagnostics, [IndexDiagnostic::BadName { at: second_at }]);
    }

    #[test]
    fn declared_count_mismatch_is_diagnosed() {
        let entries = vec![FileEntry::new("/a", 0x40, 1), FileEntry::new("/b", 0x41, 1)];
        let mut decoded = stream(&entries, b"\x09\x0a");
        decoded[INDEX_OFFSET - 4..INDEX_OFFSET].copy_from_slice(&5u32.to_be_bytes());
        let parsed = parse_index(&decoded, BASE_OFFSET);
        assert_eq!(parsed.entries, entries);
        assert_eq!(parsed.diagnostics, [IndexDiagnostic::EntryCountMismatch { declared: 5, parsed: 2 }]);
    }

    #[test]
    fn decoded_range_skips_key_byte() {
        let e = FileEntry::new("/app-config.json", 0x410, 32);
        assert_eq!(e.decoded_range(), 0x411..0x431);
        assert_eq!(e.encoded_len(), 28);
    }
}
