use std::{io, path::PathBuf, result, time::Duration};

use thiserror::Error;

use crate::{
    filename, mailbox::RemoteReference, message::MessageIdentifier, thread_pool, AnyBoxedError,
};

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot use remote session")]
    SessionError(#[source] AnyBoxedError),
    #[error("cannot transfer message: timed out after {0:?}")]
    TimeoutError(Duration),
    #[error("cannot find remote message {0} ({1}): message vanished")]
    MessageVanishedError(MessageIdentifier, RemoteReference),
    #[error("cannot read local message {1}")]
    ReadFileError(#[source] io::Error, PathBuf),
    #[error("cannot write local message {1}")]
    WriteFileError(#[source] io::Error, PathBuf),
    #[error("cannot move local message {1} to {2}")]
    RenameFileError(#[source] io::Error, PathBuf, PathBuf),
    #[error("cannot save local message to {0}: file already exists")]
    ConflictError(PathBuf),
    #[error("cannot generate local message file name")]
    FilenameError(#[from] filename::Error),

    #[error("cannot build transfer thread pool")]
    BuildPoolError(#[source] thread_pool::Error),
    #[error("cannot execute transfer task")]
    ExecTaskError(#[source] thread_pool::Error),
    #[error("cannot transfer messages: too many failures ({0})")]
    TooManyFailuresError(usize),
    #[error("cannot transfer messages: interrupted")]
    InterruptedError,
}

impl Error {
    /// Return `true` if the error comes from the remote session, in
    /// which case the session needs to be reestablished.
    pub fn is_session_error(&self) -> bool {
        matches!(self, Self::SessionError(_) | Self::TimeoutError(_))
    }

    /// Return `true` if another attempt can fix the error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SessionError(_)
                | Self::TimeoutError(_)
                | Self::ConflictError(_)
                | Self::WriteFileError(..)
                | Self::RenameFileError(..)
        )
    }
}
