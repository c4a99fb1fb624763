use std::result;

use thiserror::Error;

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
///
/// All these errors exclude a message from reconciliation: they are
/// logged by the caller and never stop a run.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Error {
    #[error("cannot find message identifier header")]
    MissingIdentifierError,
    #[error("cannot use empty message identifier")]
    EmptyIdentifierError,
    #[error("cannot parse message identifier {0:?}: expected exactly one token")]
    MultiTokenIdentifierError(String),
    #[error("cannot parse message identifier header line {0:?}")]
    InvalidIdentifierHeaderError(String),
}
