use std::{io, path::PathBuf, result};

use thiserror::Error;

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read identifier cache at {1}")]
    ReadCacheError(#[source] io::Error, PathBuf),
    #[error("cannot parse identifier cache at {1}")]
    ParseCacheError(#[source] serde_json::Error, PathBuf),
    #[error("cannot use identifier cache at {1}: unsupported version {0}")]
    UnsupportedVersionError(u32, PathBuf),
    #[error("cannot serialize identifier cache")]
    SerializeCacheError(#[source] serde_json::Error),
    #[error("cannot write identifier cache at {1}")]
    WriteCacheError(#[source] io::Error, PathBuf),
    #[error("cannot move identifier cache from {1} to {2}")]
    RenameCacheError(#[source] io::Error, PathBuf, PathBuf),
}
