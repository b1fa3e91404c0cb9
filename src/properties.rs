//! The build properties a mod stores in its `Info` entry
//!
//! `Info` is a sequence of tagged records: a tag string, then whatever value
//! that tag carries (nothing, a string, a byte, or a list of strings ending
//! in an empty one). An empty tag ends the sequence.

use std::io::Read;

use byteorder::ReadBytesExt;
use log::*;

use crate::format::read_string;
use crate::read::TmodFile;
use crate::result::*;
use crate::version::{ModReference, Version};

/// Name of the entry holding a mod's build properties
pub const INFO_ENTRY: &str = "Info";

/// Which side(s) of a multiplayer game a mod must be loaded on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModSide {
    #[default]
    Both,
    Client,
    Server,
    NoSync,
}

impl ModSide {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(ModSide::Both),
            1 => Some(ModSide::Client),
            2 => Some(ModSide::Server),
            3 => Some(ModSide::NoSync),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildProperties {
    pub dll_references: Vec<String>,
    pub mod_references: Vec<ModReference>,
    pub weak_references: Vec<ModReference>,
    pub sort_after: Vec<String>,
    pub sort_before: Vec<String>,
    pub author: String,
    pub version: Version,
    pub display_name: String,
    pub no_compile: bool,
    pub hide_code: bool,
    pub hide_resources: bool,
    pub include_source: bool,
    pub eac_path: String,
    pub homepage: String,
    pub description: String,
    pub side: ModSide,
    pub playable_on_preview: bool,
    /// The tModLoader version the mod was built against, if recorded
    pub build_version: Option<Version>,
}

impl Default for BuildProperties {
    fn default() -> Self {
        Self {
            dll_references: Vec::new(),
            mod_references: Vec::new(),
            weak_references: Vec::new(),
            sort_after: Vec::new(),
            sort_before: Vec::new(),
            author: String::new(),
            version: Version::new(1, 0),
            display_name: String::new(),
            no_compile: false,
            hide_code: true,
            hide_resources: true,
            include_source: false,
            eac_path: String::new(),
            homepage: String::new(),
            description: String::new(),
            side: ModSide::Both,
            playable_on_preview: true,
            build_version: None,
        }
    }
}

/// Reads strings until an empty one.
fn read_list<R: Read>(reader: &mut R) -> TmodResult<Vec<String>> {
    let mut list = Vec::new();
    loop {
        let item = read_string(reader)?;
        if item.is_empty() {
            return Ok(list);
        }
        list.push(item);
    }
}

fn read_references<R: Read>(reader: &mut R) -> TmodResult<Vec<ModReference>> {
    read_list(reader)?.iter().map(|r| r.parse()).collect()
}

impl BuildProperties {
    /// Reads properties from the decompressed contents of an `Info` entry.
    pub fn read<R: Read>(mut reader: R) -> TmodResult<Self> {
        let reader = &mut reader;
        let mut properties = Self::default();
        loop {
            let tag = read_string(reader)?;
            match tag.as_str() {
                "" => break,
                "dllReferences" => properties.dll_references = read_list(reader)?,
                "modReferences" => properties.mod_references = read_references(reader)?,
                "weakReferences" => properties.weak_references = read_references(reader)?,
                "sortAfter" => properties.sort_after = read_list(reader)?,
                "sortBefore" => properties.sort_before = read_list(reader)?,
                "author" => properties.author = read_string(reader)?,
                "version" => properties.version = read_string(reader)?.parse()?,
                "displayName" => properties.display_name = read_string(reader)?,
                "homepage" => properties.homepage = read_string(reader)?,
                "description" => properties.description = read_string(reader)?,
                "eacPath" => properties.eac_path = read_string(reader)?,
                "noCompile" => properties.no_compile = true,
                "includeSource" => properties.include_source = true,
                "!playableOnPreview" => properties.playable_on_preview = false,
                "!hideCode" => properties.hide_code = false,
                "!hideResources" => properties.hide_resources = false,
                "side" => {
                    let b = reader.read_u8()?;
                    properties.side =
                        ModSide::from_u8(b).ok_or(TmodError::InvalidArchive("Unknown mod side"))?;
                }
                "buildVersion" => properties.build_version = Some(read_string(reader)?.parse()?),
                unknown => warn!("Ignoring unknown build property {:?}", unknown),
            }
        }
        trace!("{:?}", properties);
        Ok(properties)
    }

    /// Reads the properties from the `Info` entry of an open container.
    pub fn read_from(tmod: &TmodFile) -> TmodResult<Self> {
        let mut info = tmod.get_stream(INFO_ENTRY, false)?;
        let properties = Self::read(&mut info)?;
        info.close()?;
        Ok(properties)
    }
}
