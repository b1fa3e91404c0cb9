//! Code specific to the layout of a `.tmod` file.
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`read`] module.
//!
//! A container is laid out as:
//!
//! ```text
//! "TMOD"                      4 bytes
//! tModLoader version          string
//! SHA-1 of everything after
//! the payload length field    20 bytes
//! signature                   256 bytes
//! payload length              i32
//! ----- hashed payload -----
//! mod name                    string
//! mod version                 string
//! entry count                 i32
//! entry count times:
//!     name                    string
//!     length                  i32
//!     stored length           i32
//! entry data, back to back
//! ```
//!
//! Integers are little-endian. Strings are UTF-8 prefixed by their byte count
//! as a 7-bit variable-length quantity (low bits first, high bit set on every
//! byte but the last), the same way .NET's `BinaryWriter` writes them.
//!
//! [`read`]: ../read/index.html

use std::io::{self, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::result::*;
use crate::version::Version;

/// Magic bytes at the start of every container
pub const MAGIC: &[u8; 4] = b"TMOD";

/// Size of the payload digest, which is a SHA-1
pub const HASH_LEN: usize = 20;

/// Size of the (unverified) signature block
pub const SIGNATURE_LEN: usize = 256;

/// The fixed part of the header, preceding the hashed payload.
#[derive(Debug, Clone)]
pub struct Header {
    pub tmodloader_version: Version,
    pub hash: [u8; HASH_LEN],
    pub signature: [u8; SIGNATURE_LEN],
    /// Length of the payload as written by the producer.
    /// Advisory; nothing checks it against the real file size.
    pub declared_payload_length: i32,
}

/// One row of the file table.
/// Offsets aren't stored; they follow from the order of rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub name: String,
    pub length: u32,
    pub stored_length: u32,
}

/// Reads the four magic bytes, failing if they aren't `TMOD`.
pub fn read_magic<R: Read>(reader: &mut R) -> TmodResult<()> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(TmodError::InvalidMagic);
    }
    Ok(())
}

/// Reads a 7-bit encoded length: at most five bytes for a 32-bit value.
pub fn read_7bit_length<R: Read>(reader: &mut R) -> TmodResult<u32> {
    let mut value: u32 = 0;
    for shift in (0..35).step_by(7) {
        let byte = reader.read_u8()?;
        if shift == 28 && byte > 0x0F {
            return Err(TmodError::InvalidArchive("Bad 7-bit encoded string length"));
        }
        value |= u32::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    unreachable!("the fifth byte never has its continuation bit set")
}

/// Reads a length-prefixed UTF-8 string.
pub fn read_string<R: Read>(reader: &mut R) -> TmodResult<String> {
    let len = read_7bit_length(reader)?;
    if len > i32::MAX as u32 {
        return Err(TmodError::InvalidArchive("Negative string length"));
    }
    let mut bytes = Vec::new();
    reader.by_ref().take(u64::from(len)).read_to_end(&mut bytes)?;
    if bytes.len() as u64 != u64::from(len) {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }
    Ok(String::from_utf8(bytes)?)
}

/// Reads a length-prefixed string and parses it as a dotted version.
pub fn read_version<R: Read>(reader: &mut R) -> TmodResult<Version> {
    read_string(reader)?.parse()
}

/// Reads a non-negative little-endian i32 count or length.
fn read_length<R: Read>(reader: &mut R, what: &'static str) -> TmodResult<u32> {
    let value = reader.read_i32::<LittleEndian>()?;
    u32::try_from(value).map_err(|_| TmodError::InvalidArchive(what))
}

pub fn read_hash<R: Read>(reader: &mut R) -> TmodResult<[u8; HASH_LEN]> {
    let mut hash = [0u8; HASH_LEN];
    reader.read_exact(&mut hash)?;
    Ok(hash)
}

impl Header {
    /// Reads everything up to (and including) the payload length field.
    pub fn read<R: Read>(reader: &mut R) -> TmodResult<Self> {
        read_magic(reader)?;
        let tmodloader_version = read_version(reader)?;
        let hash = read_hash(reader)?;
        let mut signature = [0u8; SIGNATURE_LEN];
        reader.read_exact(&mut signature)?;
        let declared_payload_length = reader.read_i32::<LittleEndian>()?;

        Ok(Self {
            tmodloader_version,
            hash,
            signature,
            declared_payload_length,
        })
    }
}

/// Reads the mod's name and version from the start of the payload.
pub fn read_identity<R: Read>(reader: &mut R) -> TmodResult<(String, Version)> {
    let name = read_string(reader)?;
    let version = read_version(reader)?;
    Ok((name, version))
}

/// Reads the entry count and every row of the file table.
pub fn read_file_table<R: Read>(reader: &mut R) -> TmodResult<Vec<TableRow>> {
    let count = read_length(reader, "Negative entry count")?;
    // Don't trust the count with a huge allocation up front.
    let mut rows = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let name = read_string(reader)?;
        let length = read_length(reader, "Negative entry length")?;
        let stored_length = read_length(reader, "Negative stored entry length")?;
        rows.push(TableRow {
            name,
            length,
            stored_length,
        });
    }
    Ok(rows)
}
