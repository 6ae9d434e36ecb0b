//! Heuristic recovery of files the index does not declare.
//!
//! # Frontier
//!
//! Unindexed files sit between the start of the data region and the earliest
//! entry already known.  That gap is the *residual window*.  Detectors run in
//! a fixed order as a fold over the chain: each one sees the window left
//! by its predecessors and, when it claims spans, pulls the frontier back to
//! the earliest claimed byte.  Order is part of the contract.
//!
//! | Order | Detector | Claims |
//! |-------|----------|--------|
//! | 1 | [`markers::MarkupDetector`]   | `<path>.html`, repeatedly, backward |
//! | 2 | [`markers::BundleDetector`]   | `/app-service.js`, once |
//! | 3 | [`markers::ManifestDetector`] | `/app-config.json`, once |
//! | 4 | [`reference::ReferenceDetector`] | one entry per matching reference |
//! | 5 | [`carve::ImageCarver`]        | `/1.png`, `/1.jpg`, ... per family |
//!
//! A detector that finds nothing contributes nothing; no detector fails.
//!
//! # Overlaps
//!
//! Only the image carver checks for conflicts (across all image families).
//! Spans from different detector families are not reconciled unless
//! [`RecoveryOptions::reject_overlaps`] is set.

pub mod audit;
pub mod carve;
pub mod markers;
pub mod reference;

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::index::FileEntry;
use carve::{ImageCarver, Signature};
use markers::{BundleDetector, ManifestDetector, MarkupDetector};
use reference::{Reference, ReferenceDetector};

pub use audit::{audit_index, IndexAudit};

// ── Spans and windows ────────────────────────────────────────────────────────

/// Half-open range of decoded-stream positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub start: usize,
    pub end:   usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn of_entry(entry: &FileEntry) -> Self {
        let r = entry.decoded_range();
        Self { start: r.start, end: r.end }
    }

    #[inline]
    pub fn contains(&self, pos: usize) -> bool {
        self.start <= pos && pos < self.end
    }
}

/// The residual byte window a detector may search.
#[derive(Debug, Clone, Copy)]
pub struct Window<'a> {
    decoded: &'a [u8],
    start:   usize,
    end:     usize,
}

impl<'a> Window<'a> {
    pub fn new(decoded: &'a [u8], start: usize, end: usize) -> Self {
        let end = end.min(decoded.len());
        Self { decoded, start: start.min(end), end }
    }

    pub fn start(&self) -> usize { self.start }
    pub fn end(&self) -> usize { self.end }
    pub fn is_empty(&self) -> bool { self.start == self.end }

    pub fn bytes(&self) -> &'a [u8] {
        &self.decoded[self.start..self.end]
    }

    /// The same window cut off at `end`.
    pub fn truncate(&self, end: usize) -> Self {
        Self::new(self.decoded, self.start, end.min(self.end))
    }

    /// The last `n` bytes of the window, with the absolute position of the
    /// first returned byte.
    pub fn lookback(&self, n: usize) -> (usize, &'a [u8]) {
        let from = self.end.saturating_sub(n).max(self.start);
        (from, &self.decoded[from..self.end])
    }
}

// ── Matches ──────────────────────────────────────────────────────────────────

/// Which detector produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Markup,
    Bundle,
    Manifest,
    Reference,
    Image(&'static str),
}

/// A span claimed by one detector, before it becomes a [`FileEntry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeuristicMatch {
    pub name:   String,
    /// Decoded-stream position of the first byte.
    pub start:  usize,
    pub len:    usize,
    pub source: DetectorKind,
}

impl HeuristicMatch {
    pub fn new(name: impl Into<String>, start: usize, len: usize, source: DetectorKind) -> Self {
        Self { name: name.into(), start, len, source }
    }

    pub fn span(&self) -> Span {
        Span::new(self.start, self.start + self.len)
    }

    /// Package-coordinate offset (the key byte is not addressed).
    pub fn offset(&self) -> u32 {
        self.start.saturating_sub(1) as u32
    }

    pub fn to_entry(&self) -> FileEntry {
        FileEntry::new(self.name.clone(), self.offset(), self.len as u32)
    }
}

/// A signature-based boundary detector.
///
/// Returned matches are in the order they should appear in the entry list.
pub trait Detector {
    fn kind(&self) -> &'static str;
    fn detect(&self, window: &Window<'_>, claimed: &[Span]) -> Vec<HeuristicMatch>;
}

// ── Options ──────────────────────────────────────────────────────────────────

/// Which detectors run, and how their results are reconciled.
#[derive(Debug, Clone)]
pub struct RecoveryOptions {
    pub markup:          bool,
    pub bundle:          bool,
    pub manifest:        bool,
    pub images:          bool,
    pub signatures:      Vec<Signature>,
    /// Drop heuristic spans starting inside a range claimed earlier.
    pub reject_overlaps: bool,
    /// Run the missing-index audit (may add an empty-file placeholder).
    pub audit:           bool,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            markup:          true,
            bundle:          true,
            manifest:        true,
            images:          true,
            signatures:      carve::default_signatures(),
            reject_overlaps: false,
            audit:           true,
        }
    }
}

impl RecoveryOptions {
    fn detectors<'r>(&self, references: &'r [Reference]) -> Vec<Box<dyn Detector + 'r>> {
        let mut chain: Vec<Box<dyn Detector + 'r>> = Vec::new();
        if self.markup   { chain.push(Box::new(MarkupDetector)); }
        if self.bundle   { chain.push(Box::new(BundleDetector)); }
        if self.manifest { chain.push(Box::new(ManifestDetector)); }
        if !references.is_empty() {
            chain.push(Box::new(ReferenceDetector::new(references)));
        }
        if self.images && !self.signatures.is_empty() {
            chain.push(Box::new(ImageCarver::new(self.signatures.clone())));
        }
        chain
    }
}

// ── Result ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Recovery {
    /// Final entry list: recovered spans first, then the declared index.
    pub entries:     Vec<FileEntry>,
    pub data_start:  usize,
    /// Accepted heuristic matches in discovery order.
    pub matches:     Vec<HeuristicMatch>,
    /// Matches dropped by the overlap pass.
    pub rejected:    Vec<HeuristicMatch>,
    /// Carved image count per extension.
    pub image_counts: BTreeMap<&'static str, usize>,
    pub audit:       Option<IndexAudit>,
}

impl Recovery {
    pub fn recovered_count(&self) -> usize {
        self.matches.len()
    }
}

// ── Orchestrator ─────────────────────────────────────────────────────────────

struct FoldState {
    /// Exclusive decoded-stream end of the residual window.
    frontier: usize,
    /// One group per detector that claimed something, in run order.
    groups:   Vec<Vec<HeuristicMatch>>,
}

impl FoldState {
    fn step(mut self, decoded: &[u8], data_start: usize, detector: &dyn Detector) -> Self {
        let window = Window::new(decoded, data_start, self.frontier);
        let claimed: Vec<Span> = self.groups.iter().flatten().map(HeuristicMatch::span).collect();
        let found = detector.detect(&window, &claimed);

        let Some(earliest) = found.iter().map(|m| m.start).min() else {
            debug!(detector = detector.kind(), window_len = window.bytes().len(), "no match");
            return self;
        };
        for m in &found {
            debug!(detector = detector.kind(), name = %m.name, start = m.start, len = m.len, "claimed span");
        }
        self.frontier = self.frontier.min(earliest);
        self.groups.push(found);
        self
    }
}

/// Decoded-stream start of the earliest known entry, or the stream end.
fn index_frontier(entries: &[FileEntry], decoded_len: usize) -> usize {
    entries
        .iter()
        .map(|e| e.offset as usize + 1)
        .min()
        .unwrap_or(decoded_len)
        .min(decoded_len)
}

/// Recover unindexed files from `decoded` and merge them ahead of `indexed`.
pub fn recover(
    decoded:    &[u8],
    indexed:    &[FileEntry],
    data_start: usize,
    references: &[Reference],
    opts:       &RecoveryOptions,
) -> Recovery {
    let initial = FoldState { frontier: index_frontier(indexed, decoded.len()), groups: Vec::new() };
    let state = opts
        .detectors(references)
        .iter()
        .fold(initial, |state, d| state.step(decoded, data_start, d.as_ref()));

    let mut groups = state.groups;
    let rejected = if opts.reject_overlaps {
        reject_overlaps(indexed, &mut groups)
    } else {
        Vec::new()
    };

    // Each group was prepended in turn, so the latest group leads.
    let mut entries: Vec<FileEntry> = groups.iter().rev().flatten().map(HeuristicMatch::to_entry).collect();
    entries.extend_from_slice(indexed);

    let matches: Vec<HeuristicMatch> = groups.into_iter().flatten().collect();
    let mut image_counts = BTreeMap::new();
    for m in &matches {
        if let DetectorKind::Image(ext) = m.source {
            *image_counts.entry(ext).or_insert(0) += 1;
        }
    }

    let audit = opts.audit.then(|| audit_index(&entries, data_start));
    if let Some(placeholder) = audit.as_ref().and_then(|a| a.placeholder.clone()) {
        info!(name_len = placeholder.name.len(), "synthesised empty-file index entry");
        entries.insert(0, placeholder);
    }

    info!(
        indexed = indexed.len(),
        recovered = matches.len(),
        rejected = rejected.len(),
        total = entries.len(),
        "recovery finished"
    );
    Recovery { entries, data_start, matches, rejected, image_counts, audit }
}

/// Drop every heuristic match whose start falls inside a range claimed by
/// the index or by an earlier accepted match.
fn reject_overlaps(indexed: &[FileEntry], groups: &mut [Vec<HeuristicMatch>]) -> Vec<HeuristicMatch> {
    let mut claimed: Vec<Span> = indexed.iter().map(Span::of_entry).collect();
    let mut rejected = Vec::new();
    for group in groups.iter_mut() {
        group.retain(|m| {
            if claimed.iter().any(|s| s.contains(m.start)) {
                warn!(name = %m.name, start = m.start, "overlapping span rejected");
                rejected.push(m.clone());
                false
            } else {
                claimed.push(m.span());
                true
            }
        });
    }
    rejected
}
