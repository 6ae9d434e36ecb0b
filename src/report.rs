//! Run report: entry listing plus anomalies, as text or JSON.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::archive::SourceKind;
use crate::extract::ExportReport;
use crate::index::{IndexAnchor, IndexDiagnostic, ParsedIndex};
use crate::recovery::audit::IndexAudit;
use crate::recovery::Recovery;
use crate::reencode::Verification;

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub input:           PathBuf,
    pub generated_at:    DateTime<Utc>,
    pub source:          SourceKind,
    pub xor_key:         u8,
    pub decoded_len:     usize,
    pub anchor:          IndexAnchor,
    pub diagnostics:     Vec<IndexDiagnostic>,
    /// Entries declared by the parsed index.
    pub indexed:         usize,
    pub recovery:        Recovery,
    pub verification:    Verification,
    /// Written container, when an output directory was given.
    pub container:       Option<PathBuf>,
    /// Why the container could not be written; extraction still ran.
    pub container_error: Option<String>,
    pub export:          Option<ExportReport>,
}

impl RunReport {
    /// Verified rebuild, fully accounted index and every output written.
    pub fn is_clean(&self) -> bool {
        self.verification.is_verified()
            && self.recovery.audit.as_ref().map_or(true, IndexAudit::is_complete)
            && self.export.as_ref().map_or(true, ExportReport::is_complete)
            && self.container_error.is_none()
    }

    /// Every condition a human should look at, one line each.
    pub fn anomalies(&self) -> Vec<String> {
        let mut out: Vec<String> = self.diagnostics.iter().map(describe_diagnostic).collect();

        if let Some(audit) = &self.recovery.audit {
            if let Some(p) = &audit.placeholder {
                out.push(format!("{} unaccounted index bytes filled with empty entry {}", audit.unknown_index_len, p.name));
            } else if !audit.is_complete() {
                out.push(format!(
                    "{} index bytes unaccounted for (about {} missing file(s))",
                    audit.unknown_index_len, audit.estimated_missing
                ));
                for g in &audit.gaps {
                    out.push(format!("no entry covers 0x{:08x}..0x{:08x}", g.start, g.end));
                }
            } else if audit.unknown_index_len < 0 {
                out.push(format!("entry list exceeds the index block by {} bytes", -audit.unknown_index_len));
            }
        }
        for (ext, n) in &self.recovery.image_counts {
            out.push(format!("{n} unindexed {ext} image(s) recovered"));
        }
        for m in &self.recovery.rejected {
            out.push(format!("overlapping span {} at 0x{:08x} rejected", m.name, m.offset()));
        }
        match &self.verification {
            Verification::Verified { .. } => {}
            Verification::Mismatch { at, original, encoded } => out.push(format!(
                "reconstructed index differs at 0x{at:08x}: original {original}, encoded {encoded}"
            )),
            Verification::Unverifiable { reason } => out.push(format!("reconstruction unverified: {reason}")),
        }
        if let Some(e) = &self.container_error {
            out.push(format!("container not written: {e}"));
        }
        if let Some(export) = self.export.as_ref().filter(|e| !e.is_complete()) {
            for f in &export.failures {
                out.push(format!("export of {} failed: {}", f.name, f.error));
            }
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn describe_diagnostic(d: &IndexDiagnostic) -> String {
    match d {
        IndexDiagnostic::Truncated { at } => format!("index entry at {at:#x} runs past the stream"),
        IndexDiagnostic::BadName { at } => format!("index entry at {at:#x} has a non UTF-8 name"),
        IndexDiagnostic::EntryCountMismatch { declared, parsed } => {
            format!("header declares {declared} entries, parsed {parsed}")
        }
        IndexDiagnostic::IndexLengthMismatch { declared, parsed } => {
            format!("header declares {declared} index bytes, parsed {parsed}")
        }
        IndexDiagnostic::StreamLengthMismatch { declared, actual } => {
            format!("header declares {declared} index+body bytes, stream holds {actual}")
        }
    }
}

fn status_label(v: &Verification) -> &'static str {
    match v {
        Verification::Verified { .. }     => "verified",
        Verification::Mismatch { .. }     => "MISMATCH",
        Verification::Unverifiable { .. } => "unverified",
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "── {} ──", self.input.display())?;
        writeln!(f, "  Source         {:?}", self.source)?;
        writeln!(f, "  XOR key        0x{:02x}", self.xor_key)?;
        writeln!(f, "  Stream length  {} B", self.decoded_len)?;
        writeln!(f, "  Data start     0x{:08x}", self.recovery.data_start.saturating_sub(1))?;
        writeln!(f, "  Index anchor   {:?}", self.anchor)?;
        writeln!(f, "  Entries        {} indexed, {} recovered", self.indexed, self.recovery.recovered_count())?;
        writeln!(f, "  Reconstruction {}", status_label(&self.verification))?;
        if let Some(path) = &self.container {
            writeln!(f, "  Container      {}", path.display())?;
        }
        if let Some(export) = &self.export {
            writeln!(f, "  Exported       {} file(s), {} failed", export.written.len(), export.failures.len())?;
        }

        writeln!(f, "{:<10} {:>10}  Name", "Offset", "Size")?;
        for e in &self.recovery.entries {
            writeln!(f, "0x{:08x} {:>10}  {}", e.offset, e.size, e.name)?;
        }

        let anomalies = self.anomalies();
        if !anomalies.is_empty() {
            writeln!(f, "Anomalies:")?;
            for a in anomalies {
                writeln!(f, "  - {a}")?;
            }
        }
        Ok(())
    }
}

/// Listing for a parsed index alone (no recovery).
pub fn render_index(index: &ParsedIndex) -> String {
    let mut out = format!(
        "anchor {:?}, {} entries, data start 0x{:08x}\n",
        index.anchor,
        index.entries.len(),
        index.data_start.saturating_sub(1)
    );
    for e in &index.entries {
        out.push_str(&format!("0x{:08x} {:>10}  {}\n", e.offset, e.size, e.name));
    }
    for d in &index.diagnostics {
        out.push_str(&format!("! {}\n", describe_diagnostic(d)));
    }
    out
}
