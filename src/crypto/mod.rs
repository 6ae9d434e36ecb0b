//! Head decryption for on-disk packages.
//!
//! Key derivation: PBKDF2-HMAC-SHA1(app_id, salt="saltiest", 1000 rounds) → 32-byte key
//! Head cipher:    AES-256-CBC, fixed IV, no padding, over 1024 bytes
//! Body:           single-byte XOR, key taken from the app id
//!
//! On-disk layout: [ "V1MMWX" (6 B) | encrypted head (1024 B) | masked body ]

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, KeyIvInit};
use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;
use thiserror::Error;

use crate::codec::{XorMask, BASE_OFFSET, DEFAULT_XOR_KEY};
use crate::header::{FIRST_MARK, FIXED_HEADER_SIZE, LAST_MARK};

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const PACKAGE_MAGIC: &[u8; 6] = b"V1MMWX";
pub const SALT:          &[u8]    = b"saltiest";
pub const IV:            &[u8; 16] = b"the iv: 16 bytes";
pub const PBKDF2_ROUNDS: u32      = 1000;

/// Encrypted head length following the magic.
pub const HEAD_LEN: usize = 0x400;

/// Bytes of the decrypted head that belong to the plain package.
pub const HEAD_KEEP: usize = BASE_OFFSET - 1;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Not an encrypted package (missing V1MMWX magic)")]
    BadMagic,
    #[error("Encrypted package too short: {0} bytes")]
    TooShort(usize),
    #[error("Head decryption failed: {0}")]
    Cipher(String),
    #[error("Package validation failed (markers {first:#04x}/{last:#04x}), check the app id")]
    Validation { first: u8, last: u8 },
}

/// Derive the AES-256 key for `app_id`.
pub fn derive_key(app_id: &str) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha1>(app_id.as_bytes(), SALT, PBKDF2_ROUNDS, &mut key);
    key
}

/// Body mask byte: second-to-last character of the app id.
pub fn xor_key_for(app_id: &str) -> u8 {
    let bytes = app_id.as_bytes();
    if bytes.len() >= 2 { bytes[bytes.len() - 2] } else { DEFAULT_XOR_KEY }
}

/// A decrypted package plus the mask byte that covered its body.
#[derive(Debug, Clone)]
pub struct DecryptedPackage {
    pub plain:   Vec<u8>,
    pub xor_key: u8,
}

impl DecryptedPackage {
    /// Re-express as the obfuscated stream the codec consumes: key byte,
    /// plain head, body masked from `base_offset` on.
    pub fn obfuscated(&self, base_offset: usize) -> Vec<u8> {
        obfuscate_plain(&self.plain, self.xor_key, base_offset)
    }
}

/// Build the obfuscated stream for an already decrypted package. The mask
/// must start where the decoder will lift it again.
pub fn obfuscate_plain(plain: &[u8], xor_key: u8, base_offset: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(plain.len() + 1);
    out.push(xor_key);
    out.extend_from_slice(plain);
    XorMask::new(xor_key, base_offset).apply_in_place(&mut out);
    out
}

/// Decrypt an on-disk package with the key material derived from `app_id`.
pub fn decrypt_package(raw: &[u8], app_id: &str) -> Result<DecryptedPackage, CryptoError> {
    if raw.len() < PACKAGE_MAGIC.len() + HEAD_LEN {
        return Err(CryptoError::TooShort(raw.len()));
    }
    if &raw[..PACKAGE_MAGIC.len()] != PACKAGE_MAGIC {
        return Err(CryptoError::BadMagic);
    }

    let key = derive_key(app_id);
    let xor_key = xor_key_for(app_id);
    let body_start = PACKAGE_MAGIC.len() + HEAD_LEN;

    let mut head = raw[PACKAGE_MAGIC.len()..body_start].to_vec();
    Aes256CbcDec::new_from_slices(&key, IV)
        .map_err(|e| CryptoError::Cipher(format!("{e:?}")))?
        .decrypt_padded_mut::<NoPadding>(&mut head)
        .map_err(|e| CryptoError::Cipher(format!("{e:?}")))?;

    let mut plain = Vec::with_capacity(HEAD_KEEP + raw.len() - body_start);
    plain.extend_from_slice(&head[..HEAD_KEEP]);
    plain.extend(raw[body_start..].iter().map(|b| b ^ xor_key));

    validate(&plain)?;
    Ok(DecryptedPackage { plain, xor_key })
}

/// Obfuscated stream for a package whose head cannot be decrypted: the
/// encrypted head bytes stand in for the plain head, the body is passed
/// through still masked.
pub fn opaque_stream(raw: &[u8], xor_key: u8) -> Result<Vec<u8>, CryptoError> {
    if raw.len() < PACKAGE_MAGIC.len() + HEAD_LEN {
        return Err(CryptoError::TooShort(raw.len()));
    }
    if &raw[..PACKAGE_MAGIC.len()] != PACKAGE_MAGIC {
        return Err(CryptoError::BadMagic);
    }
    let head = &raw[PACKAGE_MAGIC.len()..PACKAGE_MAGIC.len() + HEAD_KEEP];
    let body = &raw[PACKAGE_MAGIC.len() + HEAD_LEN..];

    let mut out = Vec::with_capacity(1 + head.len() + body.len());
    out.push(xor_key);
    out.extend_from_slice(head);
    out.extend_from_slice(body);
    Ok(out)
}

/// Check the two plaintext markers of a decrypted package.
pub fn validate(plain: &[u8]) -> Result<(), CryptoError> {
    let first = plain.first().copied().unwrap_or(0);
    let last = plain.get(FIXED_HEADER_SIZE - 1).copied().unwrap_or(0);
    if first != FIRST_MARK || last != LAST_MARK {
        return Err(CryptoError::Validation { first, last });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::cipher::BlockEncryptMut;

    type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

    fn encrypt_package(plain: &[u8], app_id: &str) -> Vec<u8> {
        let key = derive_key(app_id);
        let xor_key = xor_key_for(app_id);
        let mut head = vec![0u8; HEAD_LEN];
        head[..HEAD_KEEP].copy_from_slice(&plain[..HEAD_KEEP]);
        let len = head.len();
        Aes256CbcEnc::new_from_slices(&key, IV)
            .unwrap()
            .encrypt_padded_mut::<NoPadding>(&mut head, len)
            .unwrap();

        let mut raw = PACKAGE_MAGIC.to_vec();
        raw.extend_from_slice(&head);
        raw.extend(plain[HEAD_KEEP..].iter().map(|b| b ^ xor_key));
        raw
    }

    fn sample_plain() -> Vec<u8> {
        let mut plain = vec![0u8; 0x600];
        plain[0] = FIRST_MARK;
        plain[13] = LAST_MARK;
        for (i, b) in plain.iter_mut().enumerate().skip(0x3ff) {
            *b = (i % 251) as u8;
        }
        plain
    }

    #[test]
    fn xor_key_from_app_id() {
        assert_eq!(xor_key_for("wx1234567890abcdef"), b'e');
        assert_eq!(xor_key_for("x"), DEFAULT_XOR_KEY);
        assert_eq!(xor_key_for(""), DEFAULT_XOR_KEY);
    }

    #[test]
    fn decrypt_roundtrip() {
        let plain = sample_plain();
        let raw = encrypt_package(&plain, "wxabcdef0123456789");
        let dec = decrypt_package(&raw, "wxabcdef0123456789").unwrap();
        assert_eq!(dec.plain, plain);
        assert_eq!(dec.xor_key, b'8');
    }

    #[test]
    fn wrong_app_id_fails_validation() {
        let raw = encrypt_package(&sample_plain(), "wxabcdef0123456789");
        assert!(matches!(
            decrypt_package(&raw, "wxnotthesameappid0"),
            Err(CryptoError::Validation { .. })
        ));
    }

    #[test]
    fn rejects_missing_magic_and_short_input() {
        assert!(matches!(decrypt_package(&[0u8; 10], "id"), Err(CryptoError::TooShort(10))));
        let mut raw = encrypt_package(&sample_plain(), "id");
        raw[0] = b'X';
        assert!(matches!(decrypt_package(&raw, "id"), Err(CryptoError::BadMagic)));
    }

    #[test]
    fn opaque_stream_recovers_body_only() {
        let plain = sample_plain();
        let raw = encrypt_package(&plain, "wxabcdef0123456789");
        let obf = opaque_stream(&raw, b'8').unwrap();
        let decoded = XorMask::new(b'8', BASE_OFFSET).decode(&obf);
        assert_eq!(decoded.len(), plain.len() + 1);
        assert_eq!(&decoded[BASE_OFFSET..], &plain[HEAD_KEEP..]);
    }

    #[test]
    fn obfuscated_view_decodes_to_shifted_plain() {
        let plain = sample_plain();
        for base in [BASE_OFFSET, 0x200, 1] {
            let obf = obfuscate_plain(&plain, 0x31, base);
            let decoded = XorMask::new(0x31, base).decode(&obf);
            assert_eq!(decoded[0], 0x31);
            assert_eq!(&decoded[1..], &plain[..], "base {base:#x}");
        }
    }
}
