//! Dotted version numbers and `name@version` mod references.

use std::fmt;
use std::str::FromStr;

use crate::result::*;

/// A `major.minor[.build[.revision]]` version number.
///
/// Ordering compares component by component, and a missing build or revision
/// sorts below any present one, so `1.0 < 1.0.0 < 1.0.0.0`.
///
/// Parsing is stricter than .NET's `System.Version`: components are plain
/// ASCII digits, with no sign and no surrounding whitespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub build: Option<u32>,
    pub revision: Option<u32>,
}

impl Version {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            build: None,
            revision: None,
        }
    }

    pub const fn with_build(major: u32, minor: u32, build: u32) -> Self {
        Self {
            major,
            minor,
            build: Some(build),
            revision: None,
        }
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::new(1, 0)
    }
}

impl FromStr for Version {
    type Err = TmodError;

    fn from_str(s: &str) -> TmodResult<Self> {
        let bad = || TmodError::InvalidVersion(s.to_owned());

        let components = s
            .split('.')
            .map(|c| {
                // u32::from_str takes a leading '+', which we don't want.
                if c.is_empty() || !c.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(bad());
                }
                c.parse::<u32>().map_err(|_| bad())
            })
            .collect::<TmodResult<Vec<u32>>>()?;

        match components.as_slice() {
            [major, minor] => Ok(Self::new(*major, *minor)),
            [major, minor, build] => Ok(Self::with_build(*major, *minor, *build)),
            [major, minor, build, revision] => Ok(Self {
                major: *major,
                minor: *minor,
                build: Some(*build),
                revision: Some(*revision),
            }),
            _ => Err(bad()),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if let Some(build) = self.build {
            write!(f, ".{}", build)?;
            if let Some(revision) = self.revision {
                write!(f, ".{}", revision)?;
            }
        }
        Ok(())
    }
}

/// A dependency on another mod, optionally pinned to a minimum version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModReference {
    pub name: String,
    pub target: Option<Version>,
}

impl FromStr for ModReference {
    type Err = TmodError;

    fn from_str(s: &str) -> TmodResult<Self> {
        let mut split = s.split('@');
        let name = split.next().unwrap_or_default().to_owned();
        let target = match (split.next(), split.next()) {
            (None, _) => None,
            (Some(version), None) => Some(
                version
                    .parse()
                    .map_err(|_| TmodError::InvalidModReference(s.to_owned()))?,
            ),
            (Some(_), Some(_)) => return Err(TmodError::InvalidModReference(s.to_owned())),
        };
        Ok(Self { name, target })
    }
}

impl fmt::Display for ModReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{}@{}", self.name, target),
            None => f.write_str(&self.name),
        }
    }
}
