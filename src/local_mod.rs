//! A mod on disk: its container plus what we know about it.

use std::fmt;
use std::fs;

use camino::Utf8PathBuf;
use chrono::{DateTime, Local};

use crate::properties::BuildProperties;
use crate::read::TmodFile;
use crate::result::*;

#[derive(Debug, Clone)]
pub struct LocalMod {
    pub file: TmodFile,
    pub properties: BuildProperties,
    pub last_modified: DateTime<Local>,
}

impl LocalMod {
    /// Reads the container at `path` and its build properties.
    /// The container is closed again before returning.
    pub fn load<P: Into<Utf8PathBuf>>(path: P) -> TmodResult<Self> {
        let file = TmodFile::new(path);
        let last_modified = fs::metadata(file.path())?.modified()?.into();

        let mut guard = file.open()?;
        let properties = BuildProperties::read_from(&file)?;
        guard.close()?;

        Ok(Self {
            file,
            properties,
            last_modified,
        })
    }

    /// The mod's internal name, from the container header
    pub fn name(&self) -> String {
        self.file.name().unwrap_or_default()
    }
}

impl fmt::Display for LocalMod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
