use std::result;

use thiserror::Error;

use crate::{mailbox::Uid, thread_pool, AnyBoxedError};

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot open session on remote folder {1}")]
    OpenSessionError(#[source] AnyBoxedError, String),
    #[error("cannot list messages of remote folder {1}")]
    SearchAllError(#[source] AnyBoxedError, String),
    #[error("cannot build remote fetch thread pool")]
    BuildPoolError(#[source] thread_pool::Error),
    #[error("cannot execute remote fetch task")]
    ExecTaskError(#[source] thread_pool::Error),
    #[error("cannot fetch identifiers of remote messages {1} to {2} after {3} attempts")]
    FetchChunkError(#[source] AnyBoxedError, Uid, Uid, usize),
    #[error("cannot fetch remote identifiers: interrupted")]
    InterruptedError,
}
