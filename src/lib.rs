//! tmod reads `.tmod` containers, the single-file archives tModLoader
//! packages mods in:
//!
//! ```no_run
//! # use std::fs::{self, File};
//! # use std::io;
//! # use tmod::*;
//! let tmod = TmodFile::new("ExampleMod.tmod");
//!
//! // The first open parses the header, checks the payload's SHA-1,
//! // and reads the file table. Opens nest; the guard closes on drop.
//! let mut guard = tmod.open()?;
//! println!("{} v{}", tmod.name().unwrap(), tmod.version().unwrap());
//!
//! // Entries come back in file table order.
//! for entry in tmod.entries() {
//!     let mut reader = tmod.open_entry(&entry, false)?;
//!     if let Some(parent) = std::path::Path::new(entry.name()).parent() {
//!         fs::create_dir_all(parent)?;
//!     }
//!     io::copy(&mut reader, &mut File::create(entry.name())?)?;
//!     // Only one reader can use the container's own file handle at a time,
//!     // so close each before opening the next.
//!     reader.close()?;
//! }
//! guard.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Each entry is stored whole, and deflated on its own if that made it smaller,
//! so any entry can be read without touching the others. To read several at
//! once, ask for _independent_ readers, which open their own file handles:
//!
//! ```no_run
//! # use std::io;
//! # use rayon::prelude::*;
//! # use tmod::*;
//! let tmod = TmodFile::new("ExampleMod.tmod");
//! let mut guard = tmod.open()?;
//! tmod.entries().par_iter().try_for_each(|entry| {
//!     let mut reader = tmod.open_entry(entry, true)?;
//!     io::copy(&mut reader, &mut io::sink())?;
//!     reader.close()
//! })?;
//! guard.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod format;
pub mod integrity;
pub mod local_mod;
pub mod properties;
pub mod read;
pub mod result;
pub mod stream;
pub mod version;

pub use local_mod::LocalMod;
pub use properties::BuildProperties;
pub use read::{OpenGuard, ReaderConfig, TmodFile, TmodFileEntry};
pub use result::{TmodError, TmodResult};
pub use stream::{EntryReader, EntryStream};
pub use version::{ModReference, Version};
