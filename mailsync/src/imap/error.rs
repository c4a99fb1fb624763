use std::{any::Any, result};

use thiserror::Error;
use tokio::task::JoinError;

use crate::{AnyBoxedError, AnyError};

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot build TLS connector")]
    BuildTlsConnectorError(#[source] native_tls::Error),
    #[error("cannot connect to IMAP server {1}:{2} using SSL/TLS")]
    ConnectError(#[source] imap::Error, String, u16),
    #[error("cannot login to IMAP server as {1}")]
    LoginError(#[source] imap::Error, String),
    #[error("cannot select IMAP folder {1}")]
    SelectFolderError(#[source] imap::Error, String),
    #[error("cannot examine IMAP folder {1}")]
    ExamineFolderError(#[source] imap::Error, String),
    #[error("cannot search IMAP messages using query {1}")]
    SearchError(#[source] imap::Error, String),
    #[error("cannot fetch IMAP message identifier headers")]
    FetchHeadersError(#[source] imap::Error),
    #[error("cannot fetch IMAP message {1}")]
    FetchMessageError(#[source] imap::Error, u32),
    #[error("cannot append IMAP message to folder {1}")]
    AppendError(#[source] imap::Error, String),
    #[error("cannot logout from IMAP server")]
    LogoutError(#[source] imap::Error),
    #[error("cannot use IMAP session: session closed after a previous failure")]
    SessionClosedError,
    #[error("cannot execute IMAP command")]
    JoinError(#[from] JoinError),
}

impl AnyError for Error {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl From<Error> for AnyBoxedError {
    fn from(err: Error) -> Self {
        Box::new(err)
    }
}
