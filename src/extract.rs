//! Per-entry export.
//!
//! Entry offsets are package coordinates; the bytes live one position later
//! in the decoded stream (see [`FileEntry::decoded_range`]).  Every entry is
//! written independently and failures are reported per file.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::index::FileEntry;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Entry range {start}..{end} exceeds stream length {len}")]
    OutOfRange { start: usize, end: usize, len: usize },
    #[error("Entry name escapes the output directory: {0}")]
    UnsafePath(String),
    #[error("IO error writing {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Borrow an entry's bytes out of the decoded stream.
pub fn entry_bytes<'a>(decoded: &'a [u8], entry: &FileEntry) -> Result<&'a [u8], ExtractError> {
    let range = entry.decoded_range();
    decoded.get(range.clone()).ok_or(ExtractError::OutOfRange {
        start: range.start,
        end:   range.end,
        len:   decoded.len(),
    })
}

/// Map a `/`-rooted entry name onto a path below `root`.
///
/// Rejects names that would leave `root` (`..`, drive prefixes) and names
/// with no file component.
pub fn output_path(root: &Path, name: &str) -> Result<PathBuf, ExtractError> {
    let rel = Path::new(name.trim_start_matches('/'));
    let mut out = root.to_path_buf();
    let mut parts = 0;
    for c in rel.components() {
        match c {
            Component::Normal(p) => {
                out.push(p);
                parts += 1;
            }
            Component::CurDir => {}
            _ => return Err(ExtractError::UnsafePath(name.to_owned())),
        }
    }
    if parts == 0 {
        return Err(ExtractError::UnsafePath(name.to_owned()));
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedFile {
    pub name:   String,
    pub path:   PathBuf,
    pub size:   u64,
    /// BLAKE3 of the written bytes, hex.
    pub blake3: String,
}

#[derive(Debug, Serialize)]
pub struct ExportFailure {
    pub name:  String,
    pub error: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ExportReport {
    pub written:  Vec<ExportedFile>,
    pub failures: Vec<ExportFailure>,
}

impl ExportReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

fn export_one(decoded: &[u8], entry: &FileEntry, root: &Path) -> Result<ExportedFile, ExtractError> {
    let data = entry_bytes(decoded, entry)?;
    let path = output_path(root, &entry.name)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ExtractError::Io { path: parent.to_owned(), source })?;
    }
    fs::write(&path, data).map_err(|source| ExtractError::Io { path: path.clone(), source })?;
    Ok(ExportedFile {
        name:   entry.name.clone(),
        path,
        size:   data.len() as u64,
        blake3: blake3::hash(data).to_hex().to_string(),
    })
}

/// Write every entry below `root`.  Never stops early.
pub fn export_entries(decoded: &[u8], entries: &[FileEntry], root: &Path) -> ExportReport {
    let mut report = ExportReport::default();
    for entry in entries {
        match export_one(decoded, entry, root) {
            Ok(file) => {
                debug!(name = %file.name, size = file.size, "exported");
                report.written.push(file);
            }
            Err(e) => {
                warn!(name = %entry.name, error = %e, "export failed");
                report.failures.push(ExportFailure { name: entry.name.clone(), error: e.to_string() });
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_one_past_the_offset() {
        let decoded = b"\x66ABCDEFG";
        let e = FileEntry::new("/x", 2, 3);
        assert_eq!(entry_bytes(decoded, &e).unwrap(), b"CDE");
        let past = FileEntry::new("/y", 5, 9);
        assert!(matches!(entry_bytes(decoded, &past), Err(ExtractError::OutOfRange { .. })));
    }

    #[test]
    fn unsafe_names_are_rejected() {
        let root = Path::new("/tmp/out");
        assert_eq!(output_path(root, "/pages/a.html").unwrap(), root.join("pages/a.html"));
        assert!(matches!(output_path(root, "/../etc/passwd"), Err(ExtractError::UnsafePath(_))));
        assert!(matches!(output_path(root, "/"), Err(ExtractError::UnsafePath(_))));
    }

    #[test]
    fn exports_nested_and_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        let decoded = b"\x66hello world";
        let entries = vec![
            FileEntry::new("/a/b/hello.txt", 0, 5),
            FileEntry::new("/broken.bin", 100, 4),
            FileEntry::new("/world.txt", 6, 5),
        ];
        let report = export_entries(decoded, &entries, dir.path());

        assert_eq!(report.written.len(), 2);
        assert_eq!(fs::read(dir.path().join("a/b/hello.txt")).unwrap(), b"hello");
        assert_eq!(fs::read(dir.path().join("world.txt")).unwrap(), b"world");
        assert_eq!(report.written[0].blake3, blake3::hash(b"hello").to_hex().to_string());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].name, "/broken.bin");
        assert!(!report.is_complete());
    }
}
