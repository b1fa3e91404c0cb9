//! Tools for reading a `.tmod` container.
//!
//! To start reading, create a [`TmodFile`] from a path and [`open()`] it.
//! The first open parses the header, checks the payload's SHA-1,
//! and reads the file table. Entries can then be streamed one at a time
//! through the container's own file handle, or concurrently through
//! independent handles.
//!
//! ```no_run
//! # use std::io;
//! # use tmod::*;
//! let tmod = TmodFile::new("CalamityMod.tmod");
//! let mut guard = tmod.open()?;
//! for entry in tmod.entries() {
//!     let mut reader = tmod.open_entry(&entry, false)?;
//!     io::copy(&mut reader, &mut io::sink())?;
//!     reader.close()?;
//! }
//! guard.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! [`TmodFile`]: struct.TmodFile.html
//! [`open()`]: struct.TmodFile.html#method.open

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{prelude::*, BufReader, Cursor, SeekFrom};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use log::*;

use crate::format::{self, Header, HASH_LEN, SIGNATURE_LEN};
use crate::integrity;
use crate::result::*;
use crate::stream::{EntryReader, EntrySource, EntryStream, Handle};
use crate::version::Version;

/// Entries at most this large (stored) get cached by [`TmodFile::cache_files()`]
pub const MAX_CACHE_SIZE: u32 = 1 << 17;

/// Files added with [`TmodFile::add_file()`] must be larger than this to be compressed.
pub const MIN_COMPRESS_SIZE: u32 = 1 << 10;

/// Compressed data is only kept if it's smaller than this fraction of the original.
pub const COMPRESSION_TRADEOFF: f32 = 0.9;

/// Containers written by tModLoader versions older than this
/// have a legacy layout we don't read the file table of.
pub const MINIMUM_FORMAT_VERSION: Version = Version::new(0, 11);

/// Extensions of formats that are already compressed
const NO_COMPRESS_EXTENSIONS: [&str; 3] = [".png", ".mp3", ".ogg"];

/// Tunables for a [`TmodFile`]
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderConfig {
    pub max_cache_size: u32,
    pub min_compress_size: u32,
    pub compression_tradeoff: f32,
    pub minimum_format_version: Version,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            max_cache_size: MAX_CACHE_SIZE,
            min_compress_size: MIN_COMPRESS_SIZE,
            compression_tradeoff: COMPRESSION_TRADEOFF,
            minimum_format_version: MINIMUM_FORMAT_VERSION,
        }
    }
}

/// Entry names always use forward slashes.
pub fn sanitize(name: &str) -> String {
    name.replace('\\', "/")
}

/// One named file packaged in a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmodFileEntry {
    name: String,
    /// From the start of the container file; `None` for entries that were
    /// never on disk.
    offset: Option<u64>,
    length: u32,
    stored_length: u32,
    /// When present, these (stored) bytes are read instead of the file.
    cached: Option<Arc<[u8]>>,
}

impl TmodFileEntry {
    /// The entry's path, with forward slashes
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Offset of the stored bytes from the start of the container,
    /// if the entry came from one.
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// Decompressed size in bytes
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Size in bytes as stored (compressed, if the entry is)
    pub fn stored_length(&self) -> u32 {
        self.stored_length
    }

    pub fn is_compressed(&self) -> bool {
        self.length != self.stored_length
    }

    pub fn is_cached(&self) -> bool {
        self.cached.is_some()
    }

    /// The cached stored bytes, if any
    pub fn cached_bytes(&self) -> Option<&Arc<[u8]>> {
        self.cached.as_ref()
    }

    fn with_cache(&self, cached: Option<Arc<[u8]>>) -> Self {
        Self {
            cached,
            ..self.clone()
        }
    }
}

/// A container's name, version, and the hash it had when last read.
/// Enough to revalidate the container without rereading its file table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub version: Version,
    pub hash: [u8; HASH_LEN],
}

#[derive(Debug, Default)]
struct State {
    open_count: usize,
    /// Present exactly when `open_count > 0`
    file: Option<Arc<File>>,
    header: Option<Header>,
    /// Known once a fresh read succeeds (or handed to us up front).
    /// Its presence means later opens only revalidate the hash.
    identity: Option<Identity>,
    /// Entries in file table order
    table: Vec<Arc<TmodFileEntry>>,
    /// Name to position in `table`. Later duplicates win.
    index: HashMap<String, usize>,

    next_stream_id: u64,
    /// ID and entry name of the stream using `file`, if any
    shared_stream: Option<(u64, String)>,
    independent_streams: HashMap<u64, String>,
}

impl State {
    /// Adds an entry, replacing (in place) any with the same name.
    fn insert(&mut self, entry: TmodFileEntry) -> Arc<TmodFileEntry> {
        let entry = Arc::new(entry);
        match self.index.get(&entry.name) {
            Some(&i) => self.table[i] = entry.clone(),
            None => {
                self.index.insert(entry.name.clone(), self.table.len());
                self.table.push(entry.clone());
            }
        }
        entry
    }

    fn open_streams(&self) -> Vec<String> {
        self.shared_stream
            .iter()
            .map(|(_, name)| name.clone())
            .chain(self.independent_streams.values().cloned())
            .collect()
    }
}

/// The parts of a [`TmodFile`] its streams hold on to.
#[derive(Debug)]
pub(crate) struct Inner {
    path: Utf8PathBuf,
    config: ReaderConfig,
    state: Mutex<State>,
}

/// Everything learned from a fresh read, applied only if the read succeeds.
struct Parsed {
    file: File,
    header: Header,
    identity: Option<Identity>,
    entries: Vec<TmodFileEntry>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        // Nothing panics while holding the lock, but if something did,
        // the bookkeeping is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parses the header, checks the hash, and reads the file table.
    fn read(&self) -> TmodResult<Parsed> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(&file);

        let header = Header::read(&mut reader)?;
        trace!(
            "{}: tModLoader {}, declared payload length {}",
            self.path,
            header.tmodloader_version,
            header.declared_payload_length
        );

        let payload_start = reader.stream_position()?;
        if !integrity::verify_payload(&mut reader, &header.hash)? {
            return Err(TmodError::HashMismatch {
                path: self.path.clone(),
            });
        }
        reader.seek(SeekFrom::Start(payload_start))?;

        if header.tmodloader_version < self.config.minimum_format_version {
            warn!(
                "{} was built by tModLoader {} (older than {}); not reading its file table",
                self.path, header.tmodloader_version, self.config.minimum_format_version
            );
            drop(reader);
            return Ok(Parsed {
                file,
                header,
                identity: None,
                entries: Vec::new(),
            });
        }

        let (name, version) = format::read_identity(&mut reader)?;
        debug!("{}: {} v{}", self.path, name, version);

        let rows = format::read_file_table(&mut reader)?;
        let mut offset = reader.stream_position()?;
        drop(reader);

        let entries = rows
            .into_iter()
            .map(|row| {
                trace!("{:?} at {}", row, offset);
                let entry = TmodFileEntry {
                    name: sanitize(&row.name),
                    offset: Some(offset),
                    length: row.length,
                    stored_length: row.stored_length,
                    cached: None,
                };
                offset += u64::from(row.stored_length);
                entry
            })
            .collect();

        let identity = Some(Identity {
            name,
            version,
            hash: header.hash,
        });
        Ok(Parsed {
            file,
            header,
            identity,
            entries,
        })
    }

    /// Checks that the file still has the hash we knew it by.
    fn reopen(&self, known_hash: &[u8; HASH_LEN]) -> TmodResult<File> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(&file);

        format::read_magic(&mut reader)?;
        let _tmodloader_version = format::read_string(&mut reader)?;
        if format::read_hash(&mut reader)? != *known_hash {
            return Err(TmodError::FileModified {
                path: self.path.clone(),
            });
        }
        // Name and version could be checked too, but the hash covers them.
        drop(reader);
        Ok(file)
    }

    fn open(&self) -> TmodResult<()> {
        let mut state = self.state();
        state.open_count += 1;
        if state.open_count > 1 {
            trace!("{} opened again ({} deep)", self.path, state.open_count);
            return Ok(());
        }
        debug_assert!(state.file.is_none());

        let known_hash = state.identity.as_ref().map(|i| i.hash);
        let result = match known_hash {
            Some(hash) => self.reopen(&hash).map(|file| {
                debug!("Reopened {}", self.path);
                state.file = Some(Arc::new(file));
            }),
            None => self.read().map(|parsed| {
                debug!("Read {} ({} entries)", self.path, parsed.entries.len());
                state.file = Some(Arc::new(parsed.file));
                state.header = Some(parsed.header);
                state.identity = parsed.identity;
                for entry in parsed.entries {
                    // Every row is listed, but only the last of a name is indexed.
                    let i = state.table.len();
                    if state.index.insert(entry.name.clone(), i).is_some() {
                        warn!("Duplicate entry {} in {}", entry.name, self.path);
                    }
                    state.table.push(Arc::new(entry));
                }
            }),
        };

        if let Err(e) = result {
            // Undo the open. Nothing else was touched.
            state.open_count -= 1;
            state.file = None;
            return Err(e);
        }
        Ok(())
    }

    fn close(&self) -> TmodResult<()> {
        let mut state = self.state();
        match state.open_count {
            0 => return Ok(()),
            1 => {
                let still_open = state.open_streams();
                if !still_open.is_empty() {
                    return Err(TmodError::StreamsStillOpen(still_open));
                }
                state.file = None;
                debug!("Closed {}", self.path);
            }
            _ => {}
        }
        state.open_count -= 1;
        Ok(())
    }

    pub(crate) fn on_stream_closed(&self, id: u64, name: &str) -> TmodResult<()> {
        let mut state = self.state();
        if matches!(state.shared_stream, Some((shared, _)) if shared == id) {
            state.shared_stream = None;
            return Ok(());
        }
        if state.independent_streams.remove(&id).is_none() {
            return Err(TmodError::UnknownStream(format!("{} @ {}", name, self.path)));
        }
        Ok(())
    }
}

/// A `.tmod` container, read lazily from disk
///
/// Cloning is cheap and clones share all state, open count included.
/// The container is `Send + Sync`, so several threads can read from it
/// (using independent streams) at once.
#[derive(Debug, Clone)]
pub struct TmodFile {
    inner: Arc<Inner>,
}

impl TmodFile {
    /// Creates a container for the file at `path`.
    /// Nothing is read until [`open()`](TmodFile::open).
    pub fn new<P: Into<Utf8PathBuf>>(path: P) -> Self {
        Self::with_config(path, ReaderConfig::default())
    }

    pub fn with_config<P: Into<Utf8PathBuf>>(path: P, config: ReaderConfig) -> Self {
        Self::build(path.into(), config, None)
    }

    /// Creates a container that was already read once (say, by a previous run).
    /// Opening it only checks that the file's hash hasn't changed;
    /// it starts out with no entries.
    pub fn with_identity<P: Into<Utf8PathBuf>>(path: P, identity: Identity) -> Self {
        Self::build(path.into(), ReaderConfig::default(), Some(identity))
    }

    fn build(path: Utf8PathBuf, config: ReaderConfig, identity: Option<Identity>) -> Self {
        Self {
            inner: Arc::new(Inner {
                path,
                config,
                state: Mutex::new(State {
                    identity,
                    ..State::default()
                }),
            }),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.inner.path
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.inner.config
    }

    /// Opens the container, returning a guard that closes it again.
    ///
    /// Opens nest: only the first reads from disk,
    /// and only the close of the last releases the file handle.
    /// If the first open fails, the container is left closed.
    pub fn open(&self) -> TmodResult<OpenGuard> {
        self.inner.open()?;
        Ok(OpenGuard {
            tmod: self.clone(),
            closed: false,
        })
    }

    /// True while at least one [`OpenGuard`] is alive
    pub fn is_open(&self) -> bool {
        self.inner.state().file.is_some()
    }

    pub fn open_count(&self) -> usize {
        self.inner.state().open_count
    }

    /// The mod's name, once the container has been read
    pub fn name(&self) -> Option<String> {
        self.inner.state().identity.as_ref().map(|i| i.name.clone())
    }

    /// The mod's version, once the container has been read
    pub fn version(&self) -> Option<Version> {
        self.inner.state().identity.as_ref().map(|i| i.version)
    }

    /// The SHA-1 of the payload, once the container has been read
    pub fn hash(&self) -> Option<[u8; HASH_LEN]> {
        let state = self.inner.state();
        state
            .header
            .as_ref()
            .map(|h| h.hash)
            .or_else(|| state.identity.as_ref().map(|i| i.hash))
    }

    /// Name, version, and hash, once the container has been read
    pub fn identity(&self) -> Option<Identity> {
        self.inner.state().identity.clone()
    }

    /// The version of tModLoader that built the container
    pub fn tmodloader_version(&self) -> Option<Version> {
        self.inner
            .state()
            .header
            .as_ref()
            .map(|h| h.tmodloader_version)
    }

    /// The signature block. It's kept but never verified.
    pub fn signature(&self) -> Option<[u8; SIGNATURE_LEN]> {
        self.inner.state().header.as_ref().map(|h| h.signature)
    }

    /// The payload length from the header, as written.
    /// It isn't checked against the file.
    pub fn declared_payload_length(&self) -> Option<i32> {
        self.inner
            .state()
            .header
            .as_ref()
            .map(|h| h.declared_payload_length)
    }

    /// The entries, in the order of the file table
    pub fn entries(&self) -> Vec<Arc<TmodFileEntry>> {
        self.inner.state().table.clone()
    }

    pub fn entry_count(&self) -> usize {
        self.inner.state().table.len()
    }

    pub fn has_file(&self, name: &str) -> bool {
        self.inner.state().index.contains_key(&sanitize(name))
    }

    /// Looks up an entry by name.
    pub fn entry(&self, name: &str) -> TmodResult<Arc<TmodFileEntry>> {
        let name = sanitize(name);
        let state = self.inner.state();
        state
            .index
            .get(&name)
            .map(|&i| state.table[i].clone())
            .ok_or_else(|| TmodError::NoSuchEntry(name.into()))
    }

    /// Opens a reader for the named entry. See [`open_entry()`](TmodFile::open_entry).
    pub fn get_stream(&self, name: &str, independent: bool) -> TmodResult<EntryReader> {
        let entry = self.entry(name)?;
        self.open_entry(&entry, independent)
    }

    /// Opens a reader over the decompressed contents of `entry`.
    ///
    /// Cached entries are read from memory, whether or not the container is open.
    /// Otherwise the container must be open, and:
    ///
    /// - If `independent` is false, the reader uses the container's file handle.
    ///   Only one such reader can be alive at once.
    ///
    /// - If `independent` is true, the reader opens its own handle to the file,
    ///   and any number of them can be alive at once.
    pub fn open_entry(
        &self,
        entry: &Arc<TmodFileEntry>,
        independent: bool,
    ) -> TmodResult<EntryReader> {
        let source = if let Some(bytes) = &entry.cached {
            EntrySource::Cached(Cursor::new(bytes.clone()))
        } else {
            let offset = entry
                .offset
                .ok_or(TmodError::InvalidArchive("Entry has no data"))?;
            EntrySource::Stream(self.entry_stream(entry, offset, independent)?)
        };
        Ok(EntryReader::new(entry.clone(), source))
    }

    fn entry_stream(
        &self,
        entry: &TmodFileEntry,
        offset: u64,
        independent: bool,
    ) -> TmodResult<EntryStream> {
        let mut state = self.inner.state();
        let shared_file = state
            .file
            .clone()
            .ok_or_else(|| TmodError::NotOpen(self.inner.path.clone()))?;

        // Streams are registered only once built,
        // since dropping one reports back here (and locks `state`).
        let id = state.next_stream_id;
        if independent {
            let handle = Handle::Independent(File::open(&self.inner.path)?);
            let stream = EntryStream::new(self.inner.clone(), id, entry, offset, handle)?;
            state.independent_streams.insert(id, entry.name.clone());
            state.next_stream_id += 1;
            debug!("Opened independent stream {} for {}", id, entry.name);
            Ok(stream)
        } else {
            if let Some((_, blocking)) = &state.shared_stream {
                return Err(TmodError::StreamConflict(blocking.clone()));
            }
            let handle = Handle::Shared(shared_file);
            let stream = EntryStream::new(self.inner.clone(), id, entry, offset, handle)?;
            state.shared_stream = Some((id, entry.name.clone()));
            state.next_stream_id += 1;
            debug!("Opened shared stream {} for {}", id, entry.name);
            Ok(stream)
        }
    }

    /// Reads out the whole (decompressed) entry.
    ///
    /// Cached, uncompressed entries are returned without copying.
    /// Everything else is read through the container's file handle,
    /// so the container must be open with no other shared stream alive.
    pub fn get_bytes(&self, entry: &Arc<TmodFileEntry>) -> TmodResult<Arc<[u8]>> {
        if let Some(bytes) = &entry.cached {
            if !entry.is_compressed() {
                return Ok(bytes.clone());
            }
        }

        let mut reader = self.open_entry(entry, false)?;
        let mut bytes = Vec::with_capacity(entry.length as usize);
        reader.read_to_end(&mut bytes)?;
        reader.close()?;

        if bytes.len() != entry.length as usize {
            return Err(TmodError::InvalidArchive(
                "Entry didn't decompress to its declared length",
            ));
        }
        Ok(bytes.into())
    }

    /// Looks up an entry by name and reads it out. See [`get_bytes()`](TmodFile::get_bytes).
    pub fn get_bytes_by_name(&self, name: &str) -> TmodResult<Arc<[u8]>> {
        self.get_bytes(&self.entry(name)?)
    }

    /// Adds an entry that lives only in memory.
    ///
    /// Data larger than [`ReaderConfig::min_compress_size`] is deflated
    /// unless it's a format that's already compressed, or deflating doesn't
    /// save enough to be worth it. An existing entry with the same name is
    /// replaced, keeping its place in the table.
    pub fn add_file(&self, name: &str, data: Vec<u8>) -> TmodResult<Arc<TmodFileEntry>> {
        let name = sanitize(name);
        let config = &self.inner.config;
        let length = u32::try_from(data.len())
            .ok()
            .filter(|&l| l <= i32::MAX as u32)
            .ok_or(TmodError::InvalidArchive("Entry too large"))?;

        let mut stored = data;
        if length > config.min_compress_size && should_compress(&name) {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
            encoder.write_all(&stored)?;
            let compressed = encoder.finish()?;
            if (compressed.len() as f64) < f64::from(length) * f64::from(config.compression_tradeoff)
            {
                trace!("Compressed {} from {} to {}", name, length, compressed.len());
                stored = compressed;
            }
        }

        let entry = TmodFileEntry {
            name,
            offset: None,
            length,
            stored_length: stored.len() as u32,
            cached: Some(stored.into()),
        };
        Ok(self.inner.state().insert(entry))
    }

    /// Reads every entry up to [`ReaderConfig::max_cache_size`] stored bytes
    /// into memory, except those named in `skip`.
    /// Cached entries can be read without the container being open.
    pub fn cache_files(&self, skip: &HashSet<String>) -> TmodResult<()> {
        let mut guard = self.open()?;
        let max = self.inner.config.max_cache_size;

        let to_cache: Vec<(usize, Arc<TmodFileEntry>)> = self
            .inner
            .state()
            .table
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                e.cached.is_none() && e.stored_length <= max && !skip.contains(&e.name)
            })
            .map(|(i, e)| (i, e.clone()))
            .collect();

        // Use our own handle so a shared stream's position isn't disturbed.
        let mut file = BufReader::new(File::open(&self.inner.path)?);
        let mut cached = Vec::with_capacity(to_cache.len());
        for (i, entry) in to_cache {
            let offset = match entry.offset {
                Some(o) => o,
                None => continue,
            };
            file.seek(SeekFrom::Start(offset))?;
            let mut bytes = vec![0u8; entry.stored_length as usize];
            file.read_exact(&mut bytes)?;
            cached.push((i, entry, bytes));
        }

        {
            let mut state = self.inner.state();
            for (i, entry, bytes) in cached {
                // Skip anything swapped out from under us.
                if Arc::ptr_eq(&state.table[i], &entry) {
                    state.table[i] = Arc::new(entry.with_cache(Some(bytes.into())));
                }
            }
        }
        debug!("Cached entries of {}", self.inner.path);

        guard.close()
    }

    /// Drops the cached bytes of the named entry, so it's read from disk again.
    /// Entries added with [`add_file()`](TmodFile::add_file) stay cached,
    /// since they have nowhere else to be read from.
    pub fn remove_from_cache(&self, name: &str) -> TmodResult<()> {
        let name = sanitize(name);
        let mut state = self.inner.state();
        let i = *state
            .index
            .get(&name)
            .ok_or_else(|| TmodError::NoSuchEntry(name.clone().into()))?;
        let entry = &state.table[i];
        if entry.offset.is_some() && entry.cached.is_some() {
            let uncached = Arc::new(entry.with_cache(None));
            state.table[i] = uncached;
        }
        Ok(())
    }

    /// Drops all cached bytes of entries that can be read from disk.
    pub fn reset_cache(&self) {
        let mut state = self.inner.state();
        for entry in state.table.iter_mut() {
            if entry.offset.is_some() && entry.cached.is_some() {
                *entry = Arc::new(entry.with_cache(None));
            }
        }
    }
}

fn should_compress(name: &str) -> bool {
    !NO_COMPRESS_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Keeps a [`TmodFile`] open. Returned by [`TmodFile::open()`].
///
/// Dropping the guard closes the container, but any error doing so
/// (like streams still being open) can only be logged.
/// Call [`close()`](OpenGuard::close) to handle it instead.
#[must_use = "dropping the guard closes the container"]
#[derive(Debug)]
pub struct OpenGuard {
    tmod: TmodFile,
    closed: bool,
}

impl OpenGuard {
    pub fn file(&self) -> &TmodFile {
        &self.tmod
    }

    /// Releases this open.
    ///
    /// If it's the last one, every entry stream must already be closed;
    /// if not, this fails, the container stays open, and `close()` can be
    /// tried again once the streams are gone.
    pub fn close(&mut self) -> TmodResult<()> {
        if self.closed {
            return Ok(());
        }
        self.tmod.inner.close()?;
        self.closed = true;
        Ok(())
    }
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Couldn't close {}: {}", self.tmod.path(), e);
        }
    }
}
