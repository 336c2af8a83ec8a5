//! Path segments with an explicit separator
//!
//! Frame files get their ordinal prefixed to the last path segment so that a
//! plain directory listing shows them in capture order. Doing that on a list of
//! components keeps the rule identical for Windows and POSIX paths, and lets it
//! be tested on any host.

use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    Posix,
    Windows,
}

impl Separator {
    pub fn as_char(&self) -> char {
        match self {
            Separator::Posix => '/',
            Separator::Windows => '\\',
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Separator::Posix => "/",
            Separator::Windows => "\\",
        }
    }

    /// Separator used by native paths on this host.
    pub fn host() -> Self {
        if cfg!(windows) {
            Separator::Windows
        } else {
            Separator::Posix
        }
    }
}

/// An ordered list of path components joined by one separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentedPath {
    components: Vec<String>,
    separator: Separator,
}

impl SegmentedPath {
    pub fn new(components: Vec<String>, separator: Separator) -> Self {
        Self { components, separator }
    }

    /// Split a raw path string, guessing its style.
    ///
    /// A drive prefix (`C:`) or any backslash means Windows style.
    pub fn parse(raw: &str) -> Self {
        let separator = if has_drive_prefix(raw) || raw.contains('\\') {
            Separator::Windows
        } else {
            Separator::Posix
        };
        Self::split(raw, separator)
    }

    /// Split a native path with the host separator.
    pub fn from_path(path: &Path) -> Self {
        Self::split(&path.to_string_lossy(), Separator::host())
    }

    fn split(raw: &str, separator: Separator) -> Self {
        let components = raw
            .split(separator.as_char())
            .map(str::to_string)
            .collect();
        Self { components, separator }
    }

    pub fn separator(&self) -> Separator {
        self.separator
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Prefix `<ordinal>_` to the file name in the final component.
    ///
    /// If the final component still holds a `/` (a forward slash inside a
    /// Windows path), the prefix goes right after the last one.
    pub fn with_ordinal(&self, ordinal: usize) -> Self {
        let mut components = self.components.clone();
        if let Some(last) = components.last_mut() {
            let at = last.rfind('/').map(|i| i + 1).unwrap_or(0);
            last.insert_str(at, &format!("{}_", ordinal));
        }
        Self {
            components,
            separator: self.separator,
        }
    }

    pub fn join(&self) -> String {
        self.components.join(self.separator.as_str())
    }

    pub fn to_path_buf(&self) -> PathBuf {
        PathBuf::from(self.join())
    }
}

impl fmt::Display for SegmentedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.join())
    }
}

fn has_drive_prefix(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
