//! Textual detectors for the packer's generated files.
//!
//! All three anchor on the frontier and look backward:
//!
//! - compiled pages end with `</script>` and start with `\t<style>`, and
//!   carry their source path in a `$gwx('./path/page.wxml')` call;
//! - the script bundle starts with `\tvar __wxAppData`;
//! - the app manifest is a JSON object ending right at the frontier.

use memchr::memmem;
use once_cell::sync::Lazy;
use regex::bytes::Regex;

use super::{Detector, DetectorKind, HeuristicMatch, Span, Window};

pub const MARKUP_END:      &[u8] = b"</script>";
pub const MARKUP_START:    &[u8] = b"\t<style>";
pub const BUNDLE_START:    &[u8] = b"\tvar __wxAppData";
pub const MANIFEST_START:  &[u8] = b"{\"";
pub const MANIFEST_END:    u8    = b'}';

/// Bytes before the frontier searched for [`MARKUP_END`].
pub const MARKUP_TAIL:       usize = 20;
/// Compiled pages are almost always under 1 KiB.
pub const MARKUP_LOOKBACK:   usize = 1024;
pub const BUNDLE_LOOKBACK:   usize = 4 * 1024 * 1024;
pub const MANIFEST_LOOKBACK: usize = 1024 * 1024;

pub const BUNDLE_NAME:   &str = "/app-service.js";
pub const MANIFEST_NAME: &str = "/app-config.json";

static RE_GWX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\$gwx\(\s*['"]\.([^'"]+)\.[^.\s]+['"]\s*\)"#).expect("valid gwx regex")
});

/// Derive `<path>.html` from the first `$gwx(...)` reference in `body`.
pub fn markup_name(body: &[u8]) -> Option<String> {
    let caps = RE_GWX.captures(body)?;
    let path = String::from_utf8_lossy(caps.get(1)?.as_bytes());
    let rooted = if path.starts_with('/') { path.into_owned() } else { format!("/{path}") };
    Some(format!("{rooted}.html"))
}

// ── Markup pages ─────────────────────────────────────────────────────────────

/// Walks backward from the frontier claiming compiled pages until one of
/// the markers or the name reference is missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkupDetector;

impl Detector for MarkupDetector {
    fn kind(&self) -> &'static str { "markup" }

    fn detect(&self, window: &Window<'_>, _claimed: &[Span]) -> Vec<HeuristicMatch> {
        let mut found = Vec::new();
        let mut rest = *window;

        while !rest.is_empty() {
            let (_, tail) = rest.lookback(MARKUP_TAIL);
            if memmem::find(tail, MARKUP_END).is_none() {
                break;
            }
            let (from, recent) = rest.lookback(MARKUP_LOOKBACK);
            let Some(at) = memmem::rfind(recent, MARKUP_START) else { break };
            let Some(name) = markup_name(&recent[at..]) else { break };

            let start = from + at;
            found.push(HeuristicMatch::new(name, start, rest.end() - start, DetectorKind::Markup));
            rest = rest.truncate(start);
        }

        // Discovered nearest-first; the entry list wants ascending order.
        found.reverse();
        found
    }
}

// ── Script bundle ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct BundleDetector;

impl Detector for BundleDetector {
    fn kind(&self) -> &'static str { "bundle" }

    fn detect(&self, window: &Window<'_>, _claimed: &[Span]) -> Vec<HeuristicMatch> {
        let (from, recent) = window.lookback(BUNDLE_LOOKBACK);
        memmem::rfind(recent, BUNDLE_START)
            .map(|at| {
                let start = from + at;
                HeuristicMatch::new(BUNDLE_NAME, start, window.end() - start, DetectorKind::Bundle)
            })
            .into_iter()
            .collect()
    }
}

// ── App manifest ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestDetector;

impl Detector for ManifestDetector {
    fn kind(&self) -> &'static str { "manifest" }

    fn detect(&self, window: &Window<'_>, _claimed: &[Span]) -> Vec<HeuristicMatch> {
        if window.bytes().last() != Some(&MANIFEST_END) {
            return Vec::new();
        }
        let (from, recent) = window.lookback(MANIFEST_LOOKBACK);
        memmem::find(recent, MANIFEST_START)
            .map(|at| {
                let start = from + at;
                HeuristicMatch::new(MANIFEST_NAME, start, window.end() - start, DetectorKind::Manifest)
            })
            .into_iter()
            .collect()
    }
}
