//! Exact-content matching against known files.
//!
//! A reference is a file the caller already has (e.g. an asset shipped with
//! the app's public sources).  If its bytes appear verbatim in the residual
//! window, that span is claimed under the reference's own relative path.

use std::path::{Path, PathBuf};

use memchr::memmem;
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use super::{Detector, DetectorKind, HeuristicMatch, Span, Window};

/// Placeholder files used to keep empty directories under version control.
const IGNORED_SUFFIX: &str = ".gitkeep";

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("Cannot walk reference directory {path}: {source}")]
    Walk { path: PathBuf, source: walkdir::Error },
    #[error("Cannot read reference {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// `/`-rooted path relative to the reference directory.
    pub name:    String,
    pub content: Vec<u8>,
}

impl Reference {
    pub fn new(name: impl Into<String>, content: Vec<u8>) -> Self {
        Self { name: name.into(), content }
    }
}

/// Load every file under `root` as a reference, named by its relative path.
pub fn load_references(root: &Path) -> Result<Vec<Reference>, ReferenceError> {
    let mut refs = Vec::new();
    for item in WalkDir::new(root).sort_by_file_name() {
        let item = item.map_err(|source| ReferenceError::Walk { path: root.to_owned(), source })?;
        if !item.file_type().is_file() || item.path().to_string_lossy().ends_with(IGNORED_SUFFIX) {
            continue;
        }
        let rel = item.path().strip_prefix(root).unwrap_or(item.path());
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .fold(String::new(), |mut acc, part| {
                acc.push('/');
                acc.push_str(&part);
                acc
            });
        let content = std::fs::read(item.path())
            .map_err(|source| ReferenceError::Read { path: item.path().to_owned(), source })?;
        refs.push(Reference { name, content });
    }
    debug!(count = refs.len(), root = %root.display(), "references loaded");
    Ok(refs)
}

// ── Detector ─────────────────────────────────────────────────────────────────

/// Claims the first occurrence of each reference in the window.  Matches are
/// independent of each other and returned in ascending offset order.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceDetector<'r> {
    refs: &'r [Reference],
}

impl<'r> ReferenceDetector<'r> {
    pub fn new(refs: &'r [Reference]) -> Self {
        Self { refs }
    }
}

impl Detector for ReferenceDetector<'_> {
    fn kind(&self) -> &'static str { "reference" }

    fn detect(&self, window: &Window<'_>, _claimed: &[Span]) -> Vec<HeuristicMatch> {
        let hay = window.bytes();
        let mut found: Vec<HeuristicMatch> = self
            .refs
            .iter()
            // An empty needle matches everywhere.
            .filter(|r| !r.content.is_empty())
            .filter_map(|r| {
                memmem::find(hay, &r.content).map(|at| {
                    HeuristicMatch::new(r.name.clone(), window.start() + at, r.content.len(), DetectorKind::Reference)
                })
            })
            .collect();
        found.sort_by_key(|m| m.start);
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn exact_match_and_miss() {
        let buf = b"\x03....LOGO-BYTES....".to_vec();
        let refs = vec![
            Reference::new("/img/logo.bin", b"LOGO-BYTES".to_vec()),
            Reference::new("/img/absent.bin", b"NOT-THERE".to_vec()),
        ];
        let window = Window::new(&buf, 1, buf.len());
        let found = ReferenceDetector::new(&refs).detect(&window, &[]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "/img/logo.bin");
        assert_eq!(&buf[found[0].start..found[0].span().end], b"LOGO-BYTES");
    }

    #[test]
    fn empty_reference_is_ignored() {
        let buf = b"\x03abc".to_vec();
        let refs = vec![Reference::new("/empty", Vec::new())];
        let found = ReferenceDetector::new(&refs).detect(&Window::new(&buf, 0, buf.len()), &[]);
        assert!(found.is_empty());
    }

    #[test]
    fn matches_sorted_by_offset() {
        let buf = b"\x00AAAA-BBBB-CCCC".to_vec();
        let refs = vec![
            Reference::new("/c", b"CCCC".to_vec()),
            Reference::new("/a", b"AAAA".to_vec()),
            Reference::new("/b", b"BBBB".to_vec()),
        ];
        let found = ReferenceDetector::new(&refs).detect(&Window::new(&buf, 0, buf.len()), &[]);
        let names: Vec<&str> = found.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["/a", "/b", "/c"]);
    }

    #[test]
    fn loads_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("images/icons")).unwrap();
        fs::write(dir.path().join("images/icons/home.png"), b"PNGDATA").unwrap();
        fs::write(dir.path().join("readme.txt"), b"hi").unwrap();
        fs::write(dir.path().join("images/.gitkeep"), b"").unwrap();

        let refs = load_references(dir.path()).unwrap();
        let names: Vec<&str> = refs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["/images/icons/home.png", "/readme.txt"]);
        assert_eq!(refs[0].content, b"PNGDATA");
    }
}
