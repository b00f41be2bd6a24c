//! Case-insensitive path keys.
//!
//! The mirror and every [`ChangeEntry`](crate::ChangeEntry) identify entries
//! by [`PathKey`]. Two keys are equal when they match after Unicode lowercase
//! folding, so `Readme.TXT` and `readme.txt` name the same slot. The original
//! spelling is kept for display.

use std::cmp::Ordering;
use std::ffi::OsStr;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{MAIN_SEPARATOR, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Normalized, case-insensitive path value.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PathKey {
    raw: String,
}

impl PathKey {
    /// Create a key from a path string, normalizing separators.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();

        #[cfg(windows)]
        let raw = raw.replace('/', "\\");

        Self { raw }
    }

    /// Create a key from a path, replacing invalid UTF-8 lossily.
    pub fn from_path(path: &Path) -> Self {
        Self::new(path.to_string_lossy().into_owned())
    }

    /// The path as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The path as a [`Path`].
    pub fn as_path(&self) -> &Path {
        Path::new(&self.raw)
    }

    /// Whether the key is empty.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Join `other` onto this key with exactly one separator between them.
    ///
    /// An empty left side yields `other` unchanged.
    pub fn join(&self, other: &PathKey) -> PathKey {
        if self.raw.is_empty() {
            return other.clone();
        }

        let mut raw = String::with_capacity(self.raw.len() + other.raw.len() + 1);
        raw.push_str(&self.raw);
        if !raw.ends_with(MAIN_SEPARATOR) {
            raw.push(MAIN_SEPARATOR);
        }
        raw.push_str(other.raw.strip_prefix(MAIN_SEPARATOR).unwrap_or(&other.raw));

        PathKey { raw }
    }

    /// Everything after the last separator.
    ///
    /// A key ending in a separator names the directory itself and yields `.`.
    pub fn file_name(&self) -> PathKey {
        match self.raw.rfind(MAIN_SEPARATOR) {
            Some(pos) if pos + MAIN_SEPARATOR.len_utf8() == self.raw.len() => PathKey::new("."),
            Some(pos) => PathKey {
                raw: self.raw[pos + MAIN_SEPARATOR.len_utf8()..].to_string(),
            },
            None => self.clone(),
        }
    }

    fn folded(&self) -> impl Iterator<Item = char> + '_ {
        self.raw.chars().flat_map(char::to_lowercase)
    }
}

impl PartialEq for PathKey {
    fn eq(&self, other: &Self) -> bool {
        self.folded().eq(other.folded())
    }
}

impl Eq for PathKey {}

impl PartialOrd for PathKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PathKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded().cmp(other.folded())
    }
}

impl Hash for PathKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for c in self.folded() {
            c.hash(state);
        }
        // Same terminator `str` uses, keeps the encoding prefix-free.
        state.write_u8(0xff);
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl fmt::Debug for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.raw, f)
    }
}

impl From<String> for PathKey {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for PathKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<&Path> for PathKey {
    fn from(path: &Path) -> Self {
        Self::from_path(path)
    }
}

impl From<&OsStr> for PathKey {
    fn from(name: &OsStr) -> Self {
        Self::new(name.to_string_lossy().into_owned())
    }
}

impl From<PathKey> for String {
    fn from(key: PathKey) -> Self {
        key.raw
    }
}

impl From<PathKey> for PathBuf {
    fn from(key: PathKey) -> Self {
        PathBuf::from(key.raw)
    }
}
