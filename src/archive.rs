//! High-level [`Package`] API: the whole recovery pipeline for one input.
//!
//! ```no_run
//! use wxrescue::archive::{OpenOptions, Package, SourceKind};
//! use wxrescue::recovery::RecoveryOptions;
//!
//! let opts = OpenOptions { source: SourceKind::Encrypted, app_id: Some("wx0123456789abcdef".into()), ..Default::default() };
//! let pkg = Package::open("app.wxapkg", &opts)?;
//! let recovery = pkg.recover(&[], &RecoveryOptions::default());
//! let rebuilt = pkg.reconstruct(&recovery.entries)?;
//! println!("verified: {}", rebuilt.is_verified());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Stages run strictly in order, each over the complete output of the one
//! before: decode → parse → recover → reconstruct → export.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, info_span, warn};

use crate::codec::{XorMask, BASE_OFFSET, DEFAULT_XOR_KEY};
use crate::crypto::{self, CryptoError};
use crate::extract::{export_entries, ExportReport};
use crate::index::{parse_index, FileEntry, ParsedIndex};
use crate::recovery::reference::{Reference, ReferenceError};
use crate::recovery::{recover, Recovery, RecoveryOptions};
use crate::reencode::{reconstruct, Reconstruction, ReencodeError};
use crate::report::RunReport;

/// Subdirectory of the output directory receiving the extracted files.
pub const RESTORED_DIR: &str = "restored";
pub const CONTAINER_NAME: &str = "reconstructed.wxapkg";
pub const PARTIAL_CONTAINER_NAME: &str = "reconstructed.partial.wxapkg";

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("Cannot read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("An app id is required to decrypt this package")]
    MissingAppId,
    #[error("Decryption error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Reference error: {0}")]
    Reference(#[from] ReferenceError),
    #[error("Re-encode error: {0}")]
    Reencode(#[from] ReencodeError),
}

// ── OpenOptions ──────────────────────────────────────────────────────────────

/// What the input file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// On-disk package; the head is decrypted with key material from the app id.
    Encrypted,
    /// On-disk package whose head cannot be decrypted; only the body is decoded.
    #[default]
    Raw,
    /// Already decrypted container.
    Plain,
}

/// Configuration for [`Package::open`].
#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub source:      SourceKind,
    pub app_id:      Option<String>,
    /// Overrides the mask byte otherwise taken from the app id.
    pub xor_key:     Option<u8>,
    pub base_offset: usize,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            source:      SourceKind::default(),
            app_id:      None,
            xor_key:     None,
            base_offset: BASE_OFFSET,
        }
    }
}

impl OpenOptions {
    /// Mask byte for sources that do not carry their own.
    pub fn xor_key(&self) -> u8 {
        self.xor_key
            .or_else(|| self.app_id.as_deref().map(crypto::xor_key_for))
            .unwrap_or(DEFAULT_XOR_KEY)
    }
}

// ── Package ──────────────────────────────────────────────────────────────────

/// A decoded container plus its parsed index.  Immutable once built.
#[derive(Debug, Clone)]
pub struct Package {
    mask:    XorMask,
    decoded: Vec<u8>,
    index:   ParsedIndex,
}

impl Package {
    /// Decode an obfuscated stream (key byte at position 0) and parse its index.
    pub fn from_obfuscated(obfuscated: &[u8], base_offset: usize) -> Self {
        let key = obfuscated.first().copied().unwrap_or(DEFAULT_XOR_KEY);
        let mask = XorMask::new(key, base_offset);
        let decoded = mask.decode(obfuscated);
        let index = parse_index(&decoded, base_offset);
        info!(
            len = decoded.len(),
            xor_key = key,
            entries = index.entries.len(),
            data_start = index.data_start,
            "package decoded"
        );
        Self { mask, decoded, index }
    }

    /// Build from the raw bytes of an input file.
    pub fn from_bytes(raw: &[u8], opts: &OpenOptions) -> Result<Self, PackageError> {
        let obfuscated = match opts.source {
            SourceKind::Encrypted => {
                let app_id = opts.app_id.as_deref().ok_or(PackageError::MissingAppId)?;
                crypto::decrypt_package(raw, app_id)?.obfuscated(opts.base_offset)
            }
            SourceKind::Raw => crypto::opaque_stream(raw, opts.xor_key())?,
            SourceKind::Plain => {
                if let Err(e) = crypto::validate(raw) {
                    warn!(error = %e, "plain container head is damaged, falling back to index scan");
                }
                crypto::obfuscate_plain(raw, opts.xor_key(), opts.base_offset)
            }
        };
        Ok(Self::from_obfuscated(&obfuscated, opts.base_offset))
    }

    pub fn open<P: AsRef<Path>>(path: P, opts: &OpenOptions) -> Result<Self, PackageError> {
        let path = path.as_ref();
        let raw = fs::read(path).map_err(|source| PackageError::Read { path: path.to_owned(), source })?;
        Self::from_bytes(&raw, opts)
    }

    // ── Stages ───────────────────────────────────────────────────────────────

    pub fn recover(&self, references: &[Reference], opts: &RecoveryOptions) -> Recovery {
        recover(&self.decoded, &self.index.entries, self.index.data_start, references, opts)
    }

    pub fn reconstruct(&self, entries: &[FileEntry]) -> Result<Reconstruction, ReencodeError> {
        reconstruct(&self.decoded, entries, self.index.data_start, self.mask.base_offset)
    }

    pub fn export(&self, entries: &[FileEntry], root: &Path) -> ExportReport {
        export_entries(&self.decoded, entries, root)
    }

    /// The plain container (key byte dropped).
    pub fn plain(&self) -> &[u8] {
        self.decoded.get(1..).unwrap_or_default()
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    pub fn decoded(&self) -> &[u8] { &self.decoded }
    pub fn index(&self) -> &ParsedIndex { &self.index }
    pub fn mask(&self) -> XorMask { self.mask }
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

/// Everything one `recover` run needs besides the input path.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub open:     OpenOptions,
    pub recovery: RecoveryOptions,
    /// Where to write extracted files and the rebuilt container; `None`
    /// runs the analysis only.
    pub output:   Option<PathBuf>,
}

/// Run the full pipeline over one input file.
pub fn run(input: &Path, references: &[Reference], opts: &RunOptions) -> Result<RunReport, PackageError> {
    let span = info_span!("run", input = %input.display());
    let _guard = span.enter();

    let pkg = Package::open(input, &opts.open)?;
    let recovery = pkg.recover(references, &opts.recovery);
    let rebuilt = pkg.reconstruct(&recovery.entries)?;

    let (container, container_error, export) = match &opts.output {
        Some(dir) => {
            let export = pkg.export(&recovery.entries, &dir.join(RESTORED_DIR));
            let name = if rebuilt.is_verified() { CONTAINER_NAME } else { PARTIAL_CONTAINER_NAME };
            let (container, container_error) = match write_container(dir, name, &rebuilt.container) {
                Ok(path) => (Some(path), None),
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "container write failed");
                    (None, Some(e.to_string()))
                }
            };
            info!(
                written = export.written.len(),
                failed = export.failures.len(),
                container = container.is_some(),
                "output written"
            );
            (container, container_error, Some(export))
        }
        None => (None, None, None),
    };

    Ok(RunReport {
        input:        input.to_owned(),
        generated_at: Utc::now(),
        source:       opts.open.source,
        xor_key:      pkg.mask().key,
        decoded_len:  pkg.decoded().len(),
        anchor:       pkg.index().anchor,
        diagnostics:  pkg.index().diagnostics.clone(),
        indexed:      pkg.index().entries.len(),
        recovery,
        verification: rebuilt.status,
        container,
        container_error,
        export,
    })
}

fn write_container(dir: &Path, name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(name);
    fs::write(&path, bytes)?;
    Ok(path)
}
