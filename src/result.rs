//! Error types and the related `Result<T>`

use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

pub type TmodResult<T> = Result<T, TmodError>;

#[derive(Debug, Error)]
pub enum TmodError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] io::Error),

    /// The file doesn't start with `TMOD`.
    #[error("Magic header != \"TMOD\"")]
    InvalidMagic,

    /// The container held data that doesn't fit its layout
    /// (negative lengths, oversized length prefixes, etc.)
    #[error("Invalid tmod file: {0}")]
    InvalidArchive(&'static str),

    /// Decoding a UTF-8 string failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::string::FromUtf8Error),

    /// A dotted version string couldn't be parsed.
    #[error("Invalid version string {0:?}")]
    InvalidVersion(String),

    /// A `name@version` reference couldn't be parsed.
    #[error("Invalid mod reference: {0}")]
    InvalidModReference(String),

    /// The SHA-1 of the payload didn't match the one in the header.
    /// The file is corrupt (or was tampered with).
    #[error("Hash mismatch, {path} is corrupted")]
    HashMismatch { path: Utf8PathBuf },

    /// On reopen, the header hash no longer matches the one read previously.
    #[error("File has been modified, hash changed: {path}")]
    FileModified { path: Utf8PathBuf },

    /// No entry was found with the given name
    #[error("No entry in the container named {0}")]
    NoSuchEntry(Utf8PathBuf),

    /// An on-disk entry was requested while the container was closed.
    #[error("File not open: {0}")]
    NotOpen(Utf8PathBuf),

    /// A shared entry stream was requested while another is still alive.
    /// Carries the name of the entry being read by the blocking stream.
    #[error("Previous entry read stream not closed: {0}")]
    StreamConflict(String),

    /// The container's final close found entry streams still open.
    #[error("Entry read streams not closed: {}", .0.join(", "))]
    StreamsStillOpen(Vec<String>),

    /// A stream reported closing to a container that never produced it.
    #[error("Closed entry stream not associated with this file: {0}")]
    UnknownStream(String),

    /// A seek or position landed outside an entry's byte range.
    #[error("Position {position} outside range (0-{length})")]
    SeekOutOfRange { position: i64, length: u64 },
}

impl TmodError {
    /// Wraps the error in an `io::Error`, for reporting through `Read`/`Seek`.
    pub(crate) fn into_io(self) -> io::Error {
        match self {
            TmodError::Io(e) => e,
            TmodError::SeekOutOfRange { .. } => io::Error::new(io::ErrorKind::InvalidInput, self),
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}
