//! Magic-number carving for image assets.
//!
//! Each [`Signature`] pairs a header magic with an end marker.  The carver
//! scans the whole residual window forward, claiming `header .. end marker`
//! spans and naming them `/1.png`, `/2.png`, ... per family.  All families
//! share one claimed list, so a JPEG marker inside an already carved PNG is
//! skipped as a conflict.

use memchr::memmem;

use super::{Detector, DetectorKind, HeuristicMatch, Span, Window};

/// A carvable format: header magic, end marker and the extension used for
/// synthesised names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub extension: &'static str,
    pub header:    &'static [u8],
    pub footer:    &'static [u8],
}

pub const PNG: Signature = Signature {
    extension: "png",
    header:    b"\x89PNG\r\n\x1a\n",
    footer:    b"IEND\xaeB`\x82",
};

pub const JPEG: Signature = Signature {
    extension: "jpg",
    header:    b"\xff\xd8",
    footer:    b"\xff\xd9",
};

pub const GIF: Signature = Signature {
    extension: "gif",
    header:    b"GIF8",
    footer:    b"\x00\x3b",
};

/// Families carved by default, in run order.
pub fn default_signatures() -> Vec<Signature> {
    vec![PNG, JPEG, GIF]
}

fn find_from(hay: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    memmem::find(hay.get(from..)?, needle).map(|p| p + from)
}

/// Carve every span for one family, recording claims into `claimed`.
/// Positions are window-relative.
fn carve_family(hay: &[u8], sig: &Signature, claimed: &mut Vec<Span>) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut cursor = find_from(hay, sig.header, 0);

    while let Some(start) = cursor {
        if claimed.iter().any(|s| s.contains(start)) {
            cursor = find_from(hay, sig.header, start + sig.header.len());
            continue;
        }
        let Some(end_at) = find_from(hay, sig.footer, start + sig.header.len()) else { break };
        let end = end_at + sig.footer.len();
        claimed.push(Span::new(start, end));
        spans.push((start, end - start));
        cursor = find_from(hay, sig.header, end);
    }
    spans
}

// ── Detector ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ImageCarver {
    signatures: Vec<Signature>,
}

impl ImageCarver {
    pub fn new(signatures: Vec<Signature>) -> Self {
        Self { signatures }
    }
}

impl Default for ImageCarver {
    fn default() -> Self {
        Self::new(default_signatures())
    }
}

impl Detector for ImageCarver {
    fn kind(&self) -> &'static str { "image" }

    fn detect(&self, window: &Window<'_>, claimed: &[Span]) -> Vec<HeuristicMatch> {
        let hay = window.bytes();
        let base = window.start();
        let mut local: Vec<Span> = claimed
            .iter()
            .filter(|s| s.end > base)
            .map(|s| Span::new(s.start.saturating_sub(base), s.end - base))
            .collect();

        let mut found = Vec::new();
        for sig in &self.signatures {
            for (n, (start, len)) in carve_family(hay, sig, &mut local).into_iter().enumerate() {
                let name = format!("/{}.{}", n + 1, sig.extension);
                found.push(HeuristicMatch::new(name, base + start, len, DetectorKind::Image(sig.extension)));
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(body: &[u8]) -> Vec<u8> {
        let mut v = PNG.header.to_vec();
        v.extend_from_slice(body);
        v.extend_from_slice(PNG.footer);
        v
    }

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut v = JPEG.header.to_vec();
        v.extend_from_slice(body);
        v.extend_from_slice(JPEG.footer);
        v
    }

    #[test]
    fn carves_sequential_names_per_family() {
        let mut buf = b"\x01pad".to_vec();
        let a = buf.len();
        buf.extend(png(b"first"));
        buf.extend_from_slice(b"gap");
        let j = buf.len();
        buf.extend(jpeg(b"photo"));
        let b = buf.len();
        buf.extend(png(b"second"));

        let found = ImageCarver::default().detect(&Window::new(&buf, 1, buf.len()), &[]);
        let names: Vec<&str> = found.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["/1.png", "/2.png", "/1.jpg"]);
        assert_eq!(found[0].start, a);
        assert_eq!(found[1].start, b);
        assert_eq!(found[2].start, j);
        assert_eq!(&buf[found[2].start..found[2].span().end], &jpeg(b"photo")[..]);
    }

    #[test]
    fn nested_header_claims_one_span() {
        // Second header starts inside the first span; only one PNG results.
        let mut inner = PNG.header.to_vec();
        inner.extend_from_slice(b"nested");
        let mut buf = b"\x01".to_vec();
        buf.extend(png(&inner));
        buf.extend_from_slice(b"trailing");

        let found = ImageCarver::new(vec![PNG]).detect(&Window::new(&buf, 0, buf.len()), &[]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].start, 1);
        assert_eq!(found[0].len, buf.len() - 1 - b"trailing".len());
    }

    #[test]
    fn jpeg_marker_inside_png_is_a_conflict() {
        let mut buf = b"\x01".to_vec();
        buf.extend(png(&jpeg(b"thumb")));

        let found = ImageCarver::default().detect(&Window::new(&buf, 0, buf.len()), &[]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source, DetectorKind::Image("png"));
    }

    #[test]
    fn earlier_claims_block_carving() {
        let mut buf = b"\x01".to_vec();
        buf.extend(jpeg(b"x"));
        let claimed = [Span::new(1, buf.len())];
        let found = ImageCarver::new(vec![JPEG]).detect(&Window::new(&buf, 0, buf.len()), &claimed);
        assert!(found.is_empty());
    }

    #[test]
    fn header_without_footer_claims_nothing() {
        let mut buf = b"\x01".to_vec();
        buf.extend_from_slice(PNG.header);
        buf.extend_from_slice(b"truncated");
        let found = ImageCarver::new(vec![PNG]).detect(&Window::new(&buf, 0, buf.len()), &[]);
        assert!(found.is_empty());
    }
}
