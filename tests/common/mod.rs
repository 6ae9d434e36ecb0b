#![allow(dead_code)]

use aes::cipher::{block_padding::NoPadding, BlockEncryptMut, KeyIvInit};
use wxrescue::crypto::{derive_key, xor_key_for, HEAD_KEEP, HEAD_LEN, IV, PACKAGE_MAGIC};
use wxrescue::header::PackageHeader;
use wxrescue::FileEntry;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

pub const APP_ID: &str = "wx1234567890abcdef";

pub const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n";
pub const PNG_FOOTER: &[u8] = b"IEND\xaeB`\x82";

/// Package offset of the first data byte for an index holding `names`.
pub fn data_offset<S: AsRef<str>>(names: &[S]) -> usize {
    18 + names.iter().map(|n| 12 + n.as_ref().len()).sum::<usize>()
}

/// Plain container: header, index for `entries`, then `body`.
pub fn container(entries: &[FileEntry], body: &[u8]) -> Vec<u8> {
    let index_len: usize = entries.iter().map(FileEntry::encoded_len).sum();
    let mut out = Vec::new();
    PackageHeader::new(index_len as u32, body.len() as u32).write(&mut out).unwrap();
    out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for e in entries {
        out.extend_from_slice(&(e.name.len() as u32).to_be_bytes());
        out.extend_from_slice(e.name.as_bytes());
        out.extend_from_slice(&e.offset.to_be_bytes());
        out.extend_from_slice(&e.size.to_be_bytes());
    }
    out.extend_from_slice(body);
    out
}

/// Lay `files` out back to back after `gap`, index them all, and build the
/// container.
pub fn layout(files: &[(&str, &[u8])], gap: &[u8]) -> (Vec<u8>, Vec<FileEntry>) {
    let names: Vec<&str> = files.iter().map(|(n, _)| *n).collect();
    let mut offset = data_offset(&names) + gap.len();
    let mut body = gap.to_vec();
    let mut entries = Vec::new();
    for (name, data) in files {
        entries.push(FileEntry::new(*name, offset as u32, data.len() as u32));
        offset += data.len();
        body.extend_from_slice(data);
    }
    (container(&entries, &body), entries)
}

/// On-disk encrypted form of `plain`.
pub fn encrypt(plain: &[u8], app_id: &str) -> Vec<u8> {
    assert!(plain.len() >= HEAD_KEEP);
    let key = derive_key(app_id);
    let xor_key = xor_key_for(app_id);
    let mut head = vec![0u8; HEAD_LEN];
    head[..HEAD_KEEP].copy_from_slice(&plain[..HEAD_KEEP]);
    Aes256CbcEnc::new_from_slices(&key, IV)
        .unwrap()
        .encrypt_padded_mut::<NoPadding>(&mut head, HEAD_LEN)
        .unwrap();

    let mut raw = PACKAGE_MAGIC.to_vec();
    raw.extend_from_slice(&head);
    raw.extend(plain[HEAD_KEEP..].iter().map(|b| b ^ xor_key));
    raw
}

pub fn png(body: &[u8]) -> Vec<u8> {
    [PNG_HEADER, body, PNG_FOOTER].concat()
}
