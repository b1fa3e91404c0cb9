//! Builds `.tmod` files for tests to read.

#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::Path;

use camino::Utf8PathBuf;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};

pub const INFO: &[u8] = b"hello";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Compressible data bigger than a single read buffer
pub fn big_data() -> Vec<u8> {
    (0..20_000u32).flat_map(|i| (i % 251).to_le_bytes()).collect()
}

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    let mut len = s.len() as u32;
    while len >= 0x80 {
        out.push(len as u8 | 0x80);
        len >>= 7;
    }
    out.push(len as u8);
    out.extend_from_slice(s.as_bytes());
}

/// An entry to write: name, decompressed contents, and whether to deflate it.
pub struct FixtureEntry<'a> {
    pub name: &'a str,
    pub data: &'a [u8],
    pub compress: bool,
    /// Decompressed length to put in the table, if not the real one.
    pub length: Option<u32>,
}

impl FixtureEntry<'_> {
    pub fn with_length(self, length: u32) -> Self {
        Self {
            length: Some(length),
            ..self
        }
    }
}

pub fn stored<'a>(name: &'a str, data: &'a [u8]) -> FixtureEntry<'a> {
    FixtureEntry {
        name,
        data,
        compress: false,
        length: None,
    }
}

pub fn deflated<'a>(name: &'a str, data: &'a [u8]) -> FixtureEntry<'a> {
    FixtureEntry {
        name,
        data,
        compress: true,
        length: None,
    }
}

pub struct Fixture<'a> {
    pub tmodloader_version: &'a str,
    pub name: &'a str,
    pub version: &'a str,
    /// `None` writes the real payload length.
    pub declared_payload_length: Option<i32>,
    pub entries: Vec<FixtureEntry<'a>>,
}

impl<'a> Fixture<'a> {
    pub fn new(entries: Vec<FixtureEntry<'a>>) -> Self {
        Self {
            tmodloader_version: "2022.9.47.16",
            name: "ExampleMod",
            version: "1.0",
            declared_payload_length: None,
            entries,
        }
    }

    /// Length of everything before the hashed payload
    pub fn header_len(&self) -> usize {
        let mut version = Vec::new();
        write_string(&mut version, self.tmodloader_version);
        4 + version.len() + 20 + 256 + 4
    }

    pub fn build(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        write_string(&mut payload, self.name);
        write_string(&mut payload, self.version);
        payload.extend_from_slice(&(self.entries.len() as i32).to_le_bytes());

        let stored: Vec<Vec<u8>> = self
            .entries
            .iter()
            .map(|e| {
                if e.compress {
                    deflate(e.data)
                } else {
                    e.data.to_vec()
                }
            })
            .collect();
        for (entry, bytes) in self.entries.iter().zip(&stored) {
            write_string(&mut payload, entry.name);
            let length = entry.length.unwrap_or(entry.data.len() as u32);
            payload.extend_from_slice(&(length as i32).to_le_bytes());
            payload.extend_from_slice(&(bytes.len() as i32).to_le_bytes());
        }
        for bytes in &stored {
            payload.extend_from_slice(bytes);
        }

        let mut file = Vec::new();
        file.extend_from_slice(b"TMOD");
        write_string(&mut file, self.tmodloader_version);
        file.extend_from_slice(&Sha1::digest(&payload));
        file.extend_from_slice(&[0x5A; 256]);
        let declared = self
            .declared_payload_length
            .unwrap_or(payload.len() as i32);
        file.extend_from_slice(&declared.to_le_bytes());
        file.extend_from_slice(&payload);
        file
    }

    pub fn write_to(&self, dir: &Path, file_name: &str) -> Utf8PathBuf {
        let path = Utf8PathBuf::from_path_buf(dir.join(file_name)).unwrap();
        fs::write(&path, self.build()).unwrap();
        path
    }
}

/// `Info`, five stored bytes, then `data.bin`, deflated.
pub fn example(big: &[u8]) -> Fixture<'_> {
    Fixture::new(vec![stored("Info", INFO), deflated("data.bin", big)])
}
