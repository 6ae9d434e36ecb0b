//! Obfuscation codec: the single-byte XOR mask over the container body.
//!
//! # Layout
//! Every byte at position `>= base_offset` is XORed with one repeating key
//! byte.  Bytes below `base_offset` pass through untouched (in an on-disk
//! package they are covered by the AES head instead, see [`crate::crypto`]).
//!
//! XOR is self-inverse, so [`XorMask::decode`] and [`XorMask::encode`] are the
//! same transform.  Both are total over any byte length and never fail.

/// Position in the obfuscated stream where the XOR mask begins.
pub const BASE_OFFSET: usize = 0x400;

/// Mask byte used when no application id is available to derive one.
pub const DEFAULT_XOR_KEY: u8 = 0x66;

// ── XorMask ──────────────────────────────────────────────────────────────────

/// A configured mask: key byte plus the offset the mask starts at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XorMask {
    pub key:         u8,
    pub base_offset: usize,
}

impl Default for XorMask {
    fn default() -> Self {
        Self { key: DEFAULT_XOR_KEY, base_offset: BASE_OFFSET }
    }
}

impl XorMask {
    pub fn new(key: u8, base_offset: usize) -> Self {
        Self { key, base_offset }
    }

    /// Undo the mask, returning a new buffer.
    pub fn decode(&self, raw: &[u8]) -> Vec<u8> {
        let mut out = raw.to_vec();
        self.apply_in_place(&mut out);
        out
    }

    /// Apply the mask, returning a new buffer.
    pub fn encode(&self, plain: &[u8]) -> Vec<u8> {
        self.decode(plain)
    }

    /// Toggle the mask over `buf` in place.
    #[inline]
    pub fn apply_in_place(&self, buf: &mut [u8]) {
        if let Some(tail) = buf.get_mut(self.base_offset..) {
            for b in tail {
                *b ^= self.key;
            }
        }
    }
}

/// Decode `raw` with the mask described by `base_offset` and `key`.
pub fn decode(raw: &[u8], base_offset: usize, key: u8) -> Vec<u8> {
    XorMask::new(key, base_offset).decode(raw)
}
