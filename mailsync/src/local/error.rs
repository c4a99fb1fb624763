use std::{io, path::PathBuf, result};

use thiserror::Error;
use tokio::task::JoinError;

use crate::message;

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot resolve local directory {1}")]
    CanonicalizeDirError(#[source] io::Error, PathBuf),
    #[error("cannot list local directory {1}")]
    ListDirError(#[source] io::Error, PathBuf),
    #[error("cannot build local scan thread pool")]
    BuildPoolError(#[source] rayon::ThreadPoolBuildError),
    #[error("cannot read local message {1}")]
    ReadFileError(#[source] io::Error, PathBuf),
    #[error("cannot parse local message {0}: file is corrupted")]
    CorruptedFileError(PathBuf),
    #[error("cannot parse identifier of local message {1}")]
    ParseIdentifierError(#[source] message::Error, PathBuf),
    #[error("cannot scan local directories: interrupted")]
    InterruptedError,
    #[error("cannot scan local directories")]
    JoinError(#[from] JoinError),
}
