//! # Identifier cache
//!
//! Module dedicated to the persistent memoization of local message
//! identifiers. The [`IdentifierCache`] maps local file paths to the
//! identifier previously extracted from them, together with a
//! [`FileFingerprint`]. An entry is only reused when the file
//! fingerprint did not change since it was recorded.
//!
//! The cache is read in parallel during a scan and written once,
//! single-threaded, after all readers finished.

mod error;

use std::{
    collections::BTreeMap,
    ffi::OsString,
    fs::{self, Metadata},
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[doc(inline)]
pub use self::error::{Error, Result};
use crate::message::MessageIdentifier;

/// The current version of the cache schema.
pub const CACHE_VERSION: u32 = 1;

/// The default cache file name, relative to the working directory.
pub const DEFAULT_CACHE_FILE: &str = "cached-local-message-ids.json";

/// The fingerprint of a local file.
///
/// Built from file system metadata only, so that checking a cache
/// entry never requires to read the file content.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct FileFingerprint {
    /// The file length, in bytes.
    pub len: u64,

    /// The modification time, in seconds since UNIX epoch.
    pub mtime_secs: Option<u64>,

    /// The sub-second part of the modification time.
    pub mtime_nanos: Option<u32>,
}

impl FileFingerprint {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok());

        Self {
            len: metadata.len(),
            mtime_secs: mtime.map(|mtime| mtime.as_secs()),
            mtime_nanos: mtime.map(|mtime| mtime.subsec_nanos()),
        }
    }
}

/// The identifier cache entry.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub identifier: MessageIdentifier,
    pub fingerprint: FileFingerprint,
}

/// The identifier cache.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct IdentifierCache {
    version: u32,
    entries: BTreeMap<PathBuf, CacheEntry>,
}

impl Default for IdentifierCache {
    fn default() -> Self {
        Self {
            version: CACHE_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

impl IdentifierCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the cache from the given path.
    ///
    /// Never fails: a missing, unreadable, corrupted or outdated
    /// cache file is treated as an empty cache.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();

        match Self::try_load(path) {
            Ok(cache) => {
                debug!(path = %path.display(), entries = cache.len(), "loaded identifier cache");
                cache
            }
            Err(Error::ReadCacheError(err, _)) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no identifier cache found, starting empty");
                Self::default()
            }
            Err(err) => {
                warn!(path = %path.display(), "{err}, starting with an empty cache");
                debug!("{err:?}");
                Self::default()
            }
        }
    }

    /// Load the cache from the given path, failing on any error.
    pub fn try_load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = fs::read(path).map_err(|err| Error::ReadCacheError(err, path.to_owned()))?;
        let cache: Self = serde_json::from_slice(&content)
            .map_err(|err| Error::ParseCacheError(err, path.to_owned()))?;

        if cache.version != CACHE_VERSION {
            return Err(Error::UnsupportedVersionError(cache.version, path.to_owned()));
        }

        Ok(cache)
    }

    /// Save the whole cache to the given path.
    ///
    /// The cache is first written to a temporary sibling file, then
    /// moved over the destination.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tmp_path = tmp_path(path);

        let content = serde_json::to_vec(self).map_err(Error::SerializeCacheError)?;

        fs::write(&tmp_path, content)
            .map_err(|err| Error::WriteCacheError(err, tmp_path.clone()))?;
        fs::rename(&tmp_path, path)
            .map_err(|err| Error::RenameCacheError(err, tmp_path, path.to_owned()))?;

        debug!(path = %path.display(), entries = self.len(), "saved identifier cache");
        Ok(())
    }

    /// Get the identifier of the given path, only if the fingerprint
    /// matches the recorded one.
    pub fn get(&self, path: &Path, fingerprint: &FileFingerprint) -> Option<&MessageIdentifier> {
        self.entries
            .get(path)
            .filter(|entry| entry.fingerprint == *fingerprint)
            .map(|entry| &entry.identifier)
    }

    /// Get the entry of the given path, whatever its fingerprint.
    pub fn get_entry(&self, path: &Path) -> Option<&CacheEntry> {
        self.entries.get(path)
    }

    /// Insert the identifier of the given path.
    ///
    /// Paths that are not valid UTF-8 cannot be stored in the cache
    /// file, they are skipped and simply read again on the next scan.
    pub fn insert(
        &mut self,
        path: impl Into<PathBuf>,
        identifier: MessageIdentifier,
        fingerprint: FileFingerprint,
    ) {
        let entry = CacheEntry {
            identifier,
            fingerprint,
        };
        self.insert_entry(path.into(), entry);
    }

    fn insert_entry(&mut self, path: PathBuf, entry: CacheEntry) {
        if path.to_str().is_none() {
            debug!(path = %path.display(), "skipping non UTF-8 path from identifier cache");
            return;
        }

        self.entries.insert(path, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &CacheEntry)> {
        self.entries.iter()
    }
}

impl Extend<(PathBuf, CacheEntry)> for IdentifierCache {
    fn extend<T: IntoIterator<Item = (PathBuf, CacheEntry)>>(&mut self, iter: T) {
        for (path, entry) in iter {
            self.insert_entry(path, entry);
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".tmp");
    path.with_file_name(name)
}
