use std::{io, path::PathBuf, result};

use thiserror::Error;

use crate::{dedup::DuplicatePolicy, local, remote, transfer};

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot sync messages: no local directory given")]
    MissingLocalDirError,
    #[error("cannot sync messages: local duplicate policy {0:?} does not match remote duplicate policy {1:?}")]
    IncompatibleDuplicatePoliciesError(DuplicatePolicy, DuplicatePolicy),
    #[error("cannot create download directory {1}")]
    CreateDownloadDirError(#[source] io::Error, PathBuf),

    #[error(transparent)]
    LocalError(#[from] local::Error),
    #[error(transparent)]
    RemoteError(#[from] remote::Error),
    #[error(transparent)]
    TransferError(#[from] transfer::Error),
}

impl Error {
    /// Return `true` if the sync stopped because it got cancelled.
    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            Self::LocalError(local::Error::InterruptedError)
                | Self::RemoteError(remote::Error::InterruptedError)
                | Self::TransferError(transfer::Error::InterruptedError)
        )
    }
}
