//! Header + index re-encoder and round-trip verification.
//!
//! The encoder writes the exact on-disk layout (see [`crate::header`]) from a
//! final entry list.  Verification then compares the encoded bytes with the
//! original stream.  It is the only global check that the recovered list is
//! consistent with the source, so a mismatch is always surfaced, never
//! swallowed.

use byteorder::{BigEndian, WriteBytesExt};
use serde::Serialize;
use std::io::{self, Write};
use thiserror::Error;
use tracing::{info, warn};

use crate::header::{head_intact, PackageHeader, FIXED_HEADER_SIZE, INDEX_OFFSET};
use crate::index::FileEntry;

/// Bytes shown on each side of a mismatch report.
const MISMATCH_CONTEXT: usize = 8;

#[derive(Error, Debug)]
pub enum ReencodeError {
    #[error("{field} out of range for the header: {value}")]
    OutOfRange { field: &'static str, value: i128 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

fn field_u32(field: &'static str, value: i128) -> Result<u32, ReencodeError> {
    u32::try_from(value).map_err(|_| ReencodeError::OutOfRange { field, value })
}

/// Serialize header and index for `entries`, in list order.
pub fn reencode(entries: &[FileEntry], data_start: usize, total_len: usize) -> Result<Vec<u8>, ReencodeError> {
    let index_len = field_u32("index length", data_start as i128 - INDEX_OFFSET as i128)?;
    let body_len = field_u32("body length", total_len as i128 - data_start as i128)?;
    let count = field_u32("entry count", entries.len() as i128)?;

    let encoded: usize = entries.iter().map(FileEntry::encoded_len).sum();
    let mut out = Vec::with_capacity(FIXED_HEADER_SIZE + 4 + encoded);
    PackageHeader::new(index_len, body_len).write(&mut out)?;
    out.write_u32::<BigEndian>(count)?;
    for e in entries {
        out.write_u32::<BigEndian>(field_u32("name length", e.name.len() as i128)?)?;
        out.write_all(e.name.as_bytes())?;
        out.write_u32::<BigEndian>(e.offset)?;
        out.write_u32::<BigEndian>(e.size)?;
    }
    Ok(out)
}

// ── Verification ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verification {
    /// Package bytes `from..to` match the original exactly.
    Verified { from: usize, to: usize },
    /// First differing package offset, with the bytes on each side.
    Mismatch { at: usize, original: String, encoded: String },
    /// Nothing of the encoded region could be compared.
    Unverifiable { reason: String },
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        matches!(self, Verification::Verified { .. })
    }
}

/// First package offset whose original bytes can be trusted: the whole
/// header when the head is intact, otherwise the first byte recovered from
/// the masked body.
pub fn verify_from(decoded: &[u8], base_offset: usize) -> usize {
    if head_intact(decoded) { FIXED_HEADER_SIZE } else { base_offset.saturating_sub(1) }
}

/// Compare `encoded[from..]` with the same package range of `decoded`.
pub fn verify(encoded: &[u8], decoded: &[u8], from: usize) -> Verification {
    if encoded.len() <= from {
        return Verification::Unverifiable {
            reason: format!("encoded index ends at {:#x}, before the trusted region at {from:#x}", encoded.len()),
        };
    }
    let Some(original) = decoded.get(from + 1..encoded.len() + 1) else {
        return Verification::Unverifiable {
            reason: format!("stream holds {} bytes, encoded index needs {}", decoded.len().saturating_sub(1), encoded.len()),
        };
    };
    let ours = &encoded[from..];

    match original.iter().zip(ours).position(|(a, b)| a != b) {
        None => Verification::Verified { from, to: encoded.len() },
        Some(i) => {
            let end = (i + MISMATCH_CONTEXT).min(ours.len());
            Verification::Mismatch {
                at:       from + i,
                original: hex::encode(&original[i..end]),
                encoded:  hex::encode(&ours[i..end]),
            }
        }
    }
}

// ── Reconstruction ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub status:    Verification,
    /// Encoded header + index.
    pub header:    Vec<u8>,
    /// Plain package with `header` spliced over its head.
    pub container: Vec<u8>,
}

impl Reconstruction {
    pub fn is_verified(&self) -> bool {
        self.status.is_verified()
    }
}

/// Re-encode `entries`, verify against `decoded`, and splice the result into
/// a plain package.  A failed verification still yields the best-effort
/// package; callers must check [`Reconstruction::status`].
pub fn reconstruct(
    decoded:     &[u8],
    entries:     &[FileEntry],
    data_start:  usize,
    base_offset: usize,
) -> Result<Reconstruction, ReencodeError> {
    let header = reencode(entries, data_start, decoded.len())?;
    let status = verify(&header, decoded, verify_from(decoded, base_offset));

    match &status {
        Verification::Verified { from, to } => info!(from, to, "index reconstruction verified"),
        Verification::Mismatch { at, original, encoded } => {
            warn!(at, %original, %encoded, "re-encoded index differs from source, exporting partial result")
        }
        Verification::Unverifiable { reason } => warn!(%reason, "re-encoded index cannot be verified"),
    }

    let mut container = decoded.get(1..).unwrap_or_default().to_vec();
    let n = header.len().min(container.len());
    container[..n].copy_from_slice(&header[..n]);
    Ok(Reconstruction { status, header, container })
}
