//! Missing-index accounting.
//!
//! The index block spans `INDEX_OFFSET .. data_start`; every entry occupies
//! `12 + name_len` bytes of it.  Whatever the entry list does not account for
//! belongs to entries nobody has recovered yet.

use serde::Serialize;

use crate::header::{ENTRY_OVERHEAD, INDEX_OFFSET};
use crate::index::FileEntry;

/// A placeholder needs more unaccounted bytes than this: the entry overhead
/// plus a name longer than the bare `/`.
const PLACEHOLDER_MIN: i64 = 13;

/// Rough encoded size of a typical entry, used for the missing-file estimate.
const TYPICAL_ENTRY_LEN: f64 = 30.0;

/// Package-coordinate byte range no entry covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Gap {
    pub start: u64,
    pub end:   u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexAudit {
    /// Index bytes not explained by the entry list (negative when the list
    /// claims more than the index holds).
    pub unknown_index_len: i64,
    pub gaps:              Vec<Gap>,
    pub estimated_missing: usize,
    /// Empty-file entry sized to fill the unexplained index bytes exactly.
    pub placeholder:       Option<FileEntry>,
}

impl IndexAudit {
    pub fn is_complete(&self) -> bool {
        self.unknown_index_len <= 0 || self.placeholder.is_some()
    }
}

pub fn audit_index(entries: &[FileEntry], data_start: usize) -> IndexAudit {
    let accounted: i64 = entries.iter().map(|e| e.encoded_len() as i64).sum();
    let unknown = data_start as i64 - accounted - INDEX_OFFSET as i64;
    if unknown <= 0 {
        return IndexAudit { unknown_index_len: unknown, gaps: Vec::new(), estimated_missing: 0, placeholder: None };
    }

    let data_offset = data_start.saturating_sub(1) as u64;
    let mut gaps = Vec::new();
    let mut last = data_offset;
    for e in entries {
        if e.offset as u64 > last {
            gaps.push(Gap { start: last, end: e.offset as u64 });
        }
        last = e.end();
    }

    if gaps.is_empty() && unknown > PLACEHOLDER_MIN {
        let name_len = (unknown - ENTRY_OVERHEAD as i64) as usize;
        let name = format!("/{}", "0".repeat(name_len - 1));
        return IndexAudit {
            unknown_index_len: unknown,
            gaps,
            estimated_missing: 0,
            placeholder: Some(FileEntry::new(name, data_offset as u32, 0)),
        };
    }

    IndexAudit {
        unknown_index_len: unknown,
        gaps,
        estimated_missing: (unknown as f64 / TYPICAL_ENTRY_LEN).round() as usize,
        placeholder: None,
    }
}
