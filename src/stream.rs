//! Streams over individual entries of a container
//!
//! An [`EntryStream`] is a bounded window over the stored bytes of one entry.
//! An [`EntryReader`] is what [`TmodFile::get_stream()`] hands out:
//! it reads from either an [`EntryStream`] or bytes cached in memory,
//! inflating them on the fly if the entry is compressed.
//!
//! [`TmodFile::get_stream()`]: ../read/struct.TmodFile.html#method.get_stream

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::sync::Arc;

use flate2::read::DeflateDecoder;
use log::*;

use crate::read::{Inner, TmodFileEntry};
use crate::result::*;

/// The file handle an [`EntryStream`] reads through.
#[derive(Debug)]
pub(crate) enum Handle {
    /// The container's own handle. Closing the stream leaves it open.
    Shared(Arc<File>),
    /// A handle opened just for this stream, closed along with it.
    Independent(File),
}

impl Handle {
    fn file(&self) -> &File {
        match self {
            Handle::Shared(file) => file,
            Handle::Independent(file) => file,
        }
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "Entry stream is closed")
}

/// A read-only, seekable view of the stored bytes of one entry,
/// mapping positions `[0, len)` to `[offset, offset + len)` of the container.
///
/// The stream reports back to the [`TmodFile`] that created it when closed,
/// either explicitly with [`close()`](EntryStream::close) or when dropped.
///
/// There's no `Write` impl; entries can't be modified.
///
/// [`TmodFile`]: ../read/struct.TmodFile.html
#[derive(Debug)]
pub struct EntryStream {
    owner: Arc<Inner>,
    id: u64,
    name: String,
    offset: u64,
    length: u64,
    /// Always `underlying position - offset` while the stream is open.
    position: u64,
    handle: Option<Handle>,
}

impl EntryStream {
    /// Seeks `handle` to the start of the entry and wraps it.
    pub(crate) fn new(
        owner: Arc<Inner>,
        id: u64,
        entry: &TmodFileEntry,
        offset: u64,
        handle: Handle,
    ) -> io::Result<Self> {
        let mut file = handle.file();
        if file.stream_position()? != offset {
            file.seek(SeekFrom::Start(offset))?;
        }
        Ok(Self {
            owner,
            id,
            name: entry.name().to_owned(),
            offset,
            length: u64::from(entry.stored_length()),
            position: 0,
            handle: Some(handle),
        })
    }

    /// The name of the entry being read
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The number of stored bytes in the entry
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The current position, relative to the start of the entry
    pub fn position(&self) -> u64 {
        self.position
    }

    /// True if the stream reads through its own file handle
    pub fn is_independent(&self) -> bool {
        matches!(self.handle, Some(Handle::Independent(_)))
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    /// Closes the stream, releasing its handle if it has its own,
    /// and tells the owning container it's gone.
    ///
    /// Closing an already-closed stream does nothing.
    pub fn close(&mut self) -> TmodResult<()> {
        let handle = match self.handle.take() {
            Some(h) => h,
            None => return Ok(()),
        };
        drop(handle);
        trace!("Closed entry stream {} ({})", self.id, self.name);
        self.owner.on_stream_closed(self.id, &self.name)
    }
}

impl Read for EntryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.length - self.position;
        let count = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
        if count == 0 {
            return Ok(0);
        }

        let mut file = self.handle.as_ref().ok_or_else(closed_error)?.file();
        let read = file.read(&mut buf[..count])?;
        self.position += read as u64;
        Ok(read)
    }
}

impl Seek for EntryStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        // i128 so that no i64/u64 combination can overflow.
        let target = match pos {
            SeekFrom::Start(n) => i128::from(n),
            SeekFrom::Current(delta) => i128::from(self.position) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.length) + i128::from(delta),
        };
        if target < 0 || target > i128::from(self.length) {
            return Err(TmodError::SeekOutOfRange {
                position: i64::try_from(target).unwrap_or(if target < 0 {
                    i64::MIN
                } else {
                    i64::MAX
                }),
                length: self.length,
            }
            .into_io());
        }
        let target = target as u64;

        let mut file = self.handle.as_ref().ok_or_else(closed_error)?.file();
        file.seek(SeekFrom::Start(self.offset + target))?;
        self.position = target;
        Ok(target)
    }
}

impl Drop for EntryStream {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Couldn't close entry stream for {}: {}", self.name, e);
        }
    }
}

/// Where an [`EntryReader`] gets its stored bytes from
#[derive(Debug)]
pub enum EntrySource {
    /// Bytes cached in memory
    Cached(Cursor<Arc<[u8]>>),
    /// A window into the container file
    Stream(EntryStream),
}

impl EntrySource {
    fn close(&mut self) -> TmodResult<()> {
        match self {
            EntrySource::Cached(_) => Ok(()),
            EntrySource::Stream(s) => s.close(),
        }
    }
}

impl Read for EntrySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            EntrySource::Cached(c) => c.read(buf),
            EntrySource::Stream(s) => s.read(buf),
        }
    }
}

impl Seek for EntrySource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            EntrySource::Cached(c) => c.seek(pos),
            EntrySource::Stream(s) => s.seek(pos),
        }
    }
}

#[derive(Debug)]
enum Decoding {
    Stored(EntrySource),
    Deflated(DeflateDecoder<EntrySource>),
}

/// Reads the decompressed contents of an entry.
///
/// Dropping the reader closes it; call [`close()`](EntryReader::close)
/// to see any error from doing so.
#[derive(Debug)]
pub struct EntryReader {
    entry: Arc<TmodFileEntry>,
    decoding: Decoding,
}

impl EntryReader {
    pub(crate) fn new(entry: Arc<TmodFileEntry>, source: EntrySource) -> Self {
        let decoding = if entry.is_compressed() {
            Decoding::Deflated(DeflateDecoder::new(source))
        } else {
            Decoding::Stored(source)
        };
        Self { entry, decoding }
    }

    /// The entry being read
    pub fn entry(&self) -> &Arc<TmodFileEntry> {
        &self.entry
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.decoding, Decoding::Deflated(_))
    }

    /// The source of the stored (possibly compressed) bytes
    pub fn source(&self) -> &EntrySource {
        match &self.decoding {
            Decoding::Stored(s) => s,
            Decoding::Deflated(d) => d.get_ref(),
        }
    }

    pub fn close(&mut self) -> TmodResult<()> {
        match &mut self.decoding {
            Decoding::Stored(s) => s.close(),
            Decoding::Deflated(d) => d.get_mut().close(),
        }
    }
}

impl Read for EntryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.decoding {
            Decoding::Stored(s) => s.read(buf),
            Decoding::Deflated(d) => d.read(buf),
        }
    }
}

/// Only stored entries can seek; compressed ones are a forward-only stream.
impl Seek for EntryReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match &mut self.decoding {
            Decoding::Stored(s) => s.seek(pos),
            Decoding::Deflated(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("Can't seek in compressed entry {}", self.entry.name()),
            )),
        }
    }
}
