// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Normalised, bounded filesystem paths used as cache keys.
// Author: Lukas Bower

//! Path model for the filesystem cache.
//!
//! A [`FsPath`] is always absolute and canonical: empty components and `.` are
//! dropped, `..` climbs towards the root but never above it. The canonical
//! text doubles as the cache index key, so two spellings of the same file
//! resolve to one entry.

use core::fmt;
use core::str::FromStr;

use fs_wire::MAX_PATH_LEN;
use heapless::String;
use thiserror::Error;

/// Errors raised while parsing a path.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum PathError {
    /// Canonical form does not fit in [`MAX_PATH_LEN`] bytes.
    #[error("path exceeds {} bytes", MAX_PATH_LEN)]
    TooLong,
    /// Input contains an interior NUL byte.
    #[error("path contains NUL")]
    Nul,
}

/// Canonical absolute path bounded by [`MAX_PATH_LEN`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FsPath {
    full: String<MAX_PATH_LEN>,
}

impl FsPath {
    /// Path of the filesystem root.
    #[must_use]
    pub fn root() -> Self {
        let mut full = String::new();
        // A single byte always fits.
        let _ = full.push('/');
        Self { full }
    }

    /// Parse and normalise `text`. Relative input is treated as rooted.
    pub fn parse(text: &str) -> Result<Self, PathError> {
        if text.contains('\0') {
            return Err(PathError::Nul);
        }
        let mut stack: heapless::Vec<&str, MAX_PATH_LEN> = heapless::Vec::new();
        for component in text.split('/') {
            match component {
                "" | "." => {}
                ".." => {
                    stack.pop();
                }
                name => stack.push(name).map_err(|_| PathError::TooLong)?,
            }
        }
        if stack.is_empty() {
            return Ok(Self::root());
        }
        let mut full = String::new();
        for name in &stack {
            full.push('/').map_err(|_| PathError::TooLong)?;
            full.push_str(name).map_err(|_| PathError::TooLong)?;
        }
        Ok(Self { full })
    }

    /// Canonical text of the path.
    #[must_use]
    pub fn full(&self) -> &str {
        self.full.as_str()
    }

    /// Canonical text of the containing directory; `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        match self.full.rfind('/') {
            Some(0) | None => Some("/"),
            Some(idx) => Some(&self.full.as_str()[..idx]),
        }
    }

    /// Final component; empty for the root.
    #[must_use]
    pub fn name(&self) -> &str {
        self.full.rsplit('/').next().unwrap_or_default()
    }

    /// Iterate over the components from the root downwards.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.full.split('/').filter(|c| !c.is_empty())
    }

    /// Number of components below the root.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.components().count()
    }

    /// Check whether this is the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.full.as_str() == "/"
    }
}

impl fmt::Debug for FsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FsPath").field(&self.full()).finish()
    }
}

impl fmt::Display for FsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.full())
    }
}

impl FromStr for FsPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for FsPath {
    type Error = PathError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl AsRef<str> for FsPath {
    fn as_ref(&self) -> &str {
        self.full()
    }
}
