//! SHA-1 verification of a container's payload
//!
//! Everything after the header's payload length field is hashed,
//! and must match the digest stored in the header before we trust
//! a single byte of the file table.

use std::io::{self, Read};

use sha1::{Digest, Sha1};

use crate::format::HASH_LEN;

/// Hashes everything left in `reader`, consuming it.
pub fn payload_digest<R: Read>(mut reader: R) -> io::Result<[u8; HASH_LEN]> {
    let mut hasher = Sha1::new();
    io::copy(&mut reader, &mut hasher)?;
    let mut digest = [0u8; HASH_LEN];
    digest.copy_from_slice(&hasher.finalize());
    Ok(digest)
}

/// Returns true if the rest of `reader` hashes to `expected`.
pub fn verify_payload<R: Read>(reader: R, expected: &[u8; HASH_LEN]) -> io::Result<bool> {
    Ok(payload_digest(reader)? == *expected)
}
