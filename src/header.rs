//! Fixed 14-byte package header.
//!
//! ```text
//! 0      u8     FIRST_MARK (0xBE)
//! 1..5   u32 BE edition (always 0)
//! 5..9   u32 BE index block length
//! 9..13  u32 BE body length
//! 13     u8     LAST_MARK (0xED)
//! 14..18 u32 BE entry count       (first field of the index block)
//! ```
//!
//! Offsets above are package coordinates.  In the decoded stream everything
//! sits one byte later because position 0 carries the XOR key.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use thiserror::Error;

pub const FIRST_MARK: u8 = 0xBE;
pub const LAST_MARK:  u8 = 0xED;

/// Bytes from `FIRST_MARK` through `LAST_MARK` inclusive.
pub const FIXED_HEADER_SIZE: usize = 14;

/// Decoded-stream position of the first index entry: key byte + fixed
/// header + entry count.
pub const INDEX_OFFSET: usize = 1 + FIXED_HEADER_SIZE + 4;

/// Serialized size of an index entry excluding its name bytes.
pub const ENTRY_OVERHEAD: usize = 12;

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Bad header marker at {offset}: expected {expected:#04x}, found {found:#04x}")]
    BadMarker { offset: usize, expected: u8, found: u8 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageHeader {
    pub edition:   u32,
    pub index_len: u32,
    pub body_len:  u32,
}

impl PackageHeader {
    pub fn new(index_len: u32, body_len: u32) -> Self {
        Self { edition: 0, index_len, body_len }
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u8(FIRST_MARK)?;
        writer.write_u32::<BigEndian>(self.edition)?;
        writer.write_u32::<BigEndian>(self.index_len)?;
        writer.write_u32::<BigEndian>(self.body_len)?;
        writer.write_u8(LAST_MARK)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self, HeaderError> {
        let first = reader.read_u8()?;
        if first != FIRST_MARK {
            return Err(HeaderError::BadMarker { offset: 0, expected: FIRST_MARK, found: first });
        }
        let edition   = reader.read_u32::<BigEndian>()?;
        let index_len = reader.read_u32::<BigEndian>()?;
        let body_len  = reader.read_u32::<BigEndian>()?;
        let last = reader.read_u8()?;
        if last != LAST_MARK {
            return Err(HeaderError::BadMarker {
                offset:   FIXED_HEADER_SIZE - 1,
                expected: LAST_MARK,
                found:    last,
            });
        }
        Ok(Self { edition, index_len, body_len })
    }

    /// Parse the header out of a decoded stream, if its head is intact.
    pub fn from_decoded(decoded: &[u8]) -> Option<Self> {
        let head = decoded.get(1..1 + FIXED_HEADER_SIZE)?;
        Self::read(head).ok()
    }

    /// Declared index + body must cover the stream past `INDEX_OFFSET`.
    pub fn lengths_consistent(&self, decoded_len: usize) -> bool {
        let declared = self.index_len as u64 + self.body_len as u64;
        decoded_len
            .checked_sub(INDEX_OFFSET)
            .is_some_and(|rest| rest as u64 == declared)
    }
}

/// True when the decoded stream still carries both plaintext markers, i.e.
/// the head was decrypted rather than left opaque.
pub fn head_intact(decoded: &[u8]) -> bool {
    decoded.get(1) == Some(&FIRST_MARK) && decoded.get(FIXED_HEADER_SIZE) == Some(&LAST_MARK)
}
