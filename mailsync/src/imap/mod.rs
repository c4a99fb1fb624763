//! # IMAP
//!
//! Module dedicated to the IMAP implementation of the
//! [`MailboxSession`]. The underlying [`imap`] client is blocking, so
//! every command runs inside [`tokio::task::spawn_blocking`], the
//! session being moved in and out of the blocking task.

pub mod config;
mod error;

use std::{net::TcpStream, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use imap::types::Flag;
use native_tls::{TlsConnector, TlsStream};
use tokio::task::spawn_blocking;
use tracing::debug;

#[doc(inline)]
pub use self::{
    config::ImapConfig,
    error::{Error, Result},
};
use crate::{
    mailbox::{Generation, MailboxSession, MailboxSessionBuilder, Uid},
    message::{MessageIdentifier, IDENTIFIER_HEADER},
    AnyResult,
};

type ImapClientSession = imap::Session<TlsStream<TcpStream>>;

/// The IMAP session builder.
#[derive(Clone, Debug)]
pub struct ImapSessionBuilder {
    config: Arc<ImapConfig>,
}

impl ImapSessionBuilder {
    pub fn new(config: impl Into<Arc<ImapConfig>>) -> Self {
        Self {
            config: config.into(),
        }
    }
}

#[async_trait]
impl MailboxSessionBuilder for ImapSessionBuilder {
    type Session = ImapSession;

    async fn connect(&self) -> AnyResult<Self::Session> {
        let config = self.config.clone();

        let session = spawn_blocking(move || {
            let host = config.host.as_str();
            let port = config.port;
            debug!(host, port, login = %config.login, "connecting to IMAP server");

            let tls = TlsConnector::new().map_err(Error::BuildTlsConnectorError)?;
            let client = imap::connect((host, port), host, &tls)
                .map_err(|err| Error::ConnectError(err, host.to_owned(), port))?;

            client
                .login(&config.login, &config.password)
                .map_err(|(err, _)| Error::LoginError(err, config.login.clone()))
        })
        .await
        .map_err(Error::JoinError)??;

        Ok(ImapSession {
            session: Some(session),
        })
    }
}

/// The IMAP session.
pub struct ImapSession {
    session: Option<ImapClientSession>,
}

impl ImapSession {
    /// Execute the given action on the current IMAP session.
    ///
    /// If the blocking task panics, the session is lost and every
    /// further action fails.
    async fn exec<T: Send + 'static>(
        &mut self,
        action: impl FnOnce(&mut ImapClientSession) -> imap::Result<T> + Send + 'static,
        map_err: impl FnOnce(imap::Error) -> Error,
    ) -> Result<T> {
        let mut session = self.session.take().ok_or(Error::SessionClosedError)?;

        let (session, res) = spawn_blocking(move || {
            let res = action(&mut session);
            (session, res)
        })
        .await?;

        self.session = Some(session);
        res.map_err(map_err)
    }
}

#[async_trait]
impl MailboxSession for ImapSession {
    async fn select(&mut self, folder: &str, read_only: bool) -> AnyResult<Generation> {
        let name = folder.to_owned();

        let mailbox = if read_only {
            self.exec(
                move |session| session.examine(name),
                |err| Error::ExamineFolderError(err, folder.to_owned()),
            )
            .await?
        } else {
            self.exec(
                move |session| session.select(name),
                |err| Error::SelectFolderError(err, folder.to_owned()),
            )
            .await?
        };

        debug!(folder, exists = mailbox.exists, "selected IMAP folder");
        Ok(mailbox.uid_validity.unwrap_or_default())
    }

    async fn search_all(&mut self) -> AnyResult<Vec<Uid>> {
        let uids = self
            .exec(
                |session| session.uid_search("ALL"),
                |err| Error::SearchError(err, "ALL".into()),
            )
            .await?;

        Ok(uids.into_iter().collect())
    }

    async fn fetch_identifier_headers(&mut self, uids: &[Uid]) -> AnyResult<Vec<(Uid, Vec<u8>)>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let set = to_uid_set(uids);
        let query = format!("BODY.PEEK[HEADER.FIELDS ({})]", IDENTIFIER_HEADER.to_uppercase());

        let headers = self
            .exec(
                move |session| {
                    let fetches = session.uid_fetch(set, query)?;
                    let headers = fetches
                        .iter()
                        .filter_map(|fetch| Some((fetch.uid?, fetch.header()?.to_vec())))
                        .collect::<Vec<_>>();
                    Ok(headers)
                },
                Error::FetchHeadersError,
            )
            .await?;

        Ok(headers)
    }

    async fn fetch_message(&mut self, uid: Uid) -> AnyResult<Option<Vec<u8>>> {
        let raw = self
            .exec(
                move |session| {
                    let fetches = session.uid_fetch(uid.to_string(), "RFC822")?;
                    let raw = fetches
                        .iter()
                        .find(|fetch| fetch.uid == Some(uid))
                        .and_then(|fetch| fetch.body())
                        .map(ToOwned::to_owned);
                    Ok(raw)
                },
                |err| Error::FetchMessageError(err, uid),
            )
            .await?;

        Ok(raw)
    }

    async fn search_identifier(&mut self, id: &MessageIdentifier) -> AnyResult<Vec<Uid>> {
        let query = format!("HEADER {IDENTIFIER_HEADER} {}", quote(id));
        let err_query = query.clone();

        let uids = self
            .exec(
                move |session| session.uid_search(query),
                |err| Error::SearchError(err, err_query),
            )
            .await?;

        let mut uids: Vec<Uid> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn append(
        &mut self,
        folder: &str,
        raw: &[u8],
        date: Option<DateTime<FixedOffset>>,
    ) -> AnyResult<()> {
        let name = folder.to_owned();
        let raw = raw.to_vec();

        self.exec(
            move |session| session.append_with_flags_and_date(name, raw, &[Flag::Seen], date),
            |err| Error::AppendError(err, folder.to_owned()),
        )
        .await?;

        Ok(())
    }

    async fn close(&mut self) -> AnyResult<()> {
        if self.session.is_none() {
            return Ok(());
        }

        self.exec(|session| session.logout(), Error::LogoutError)
            .await?;
        self.session = None;

        debug!("logged out from IMAP server");
        Ok(())
    }
}

/// Build a comma-separated UID set, merging consecutive UIDs into
/// ranges.
fn to_uid_set(uids: &[Uid]) -> String {
    let mut uids = uids.to_vec();
    uids.sort_unstable();
    uids.dedup();

    let mut set = Vec::new();
    let mut iter = uids.into_iter();

    if let Some(first) = iter.next() {
        let (mut start, mut end) = (first, first);

        for uid in iter {
            if uid == end + 1 {
                end = uid;
                continue;
            }
            set.push(to_range(start, end));
            (start, end) = (uid, uid);
        }

        set.push(to_range(start, end));
    }

    set.join(",")
}

fn to_range(start: Uid, end: Uid) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}:{end}")
    }
}

/// Quote the given string as an IMAP quoted string.
fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_set_merges_ranges() {
        assert_eq!(to_uid_set(&[]), "");
        assert_eq!(to_uid_set(&[4]), "4");
        assert_eq!(to_uid_set(&[5, 1, 2, 3, 7, 9, 8, 3]), "1:3,5,7:9");
    }

    #[test]
    fn quote_escapes_specials() {
        assert_eq!(quote("<a@b>"), "\"<a@b>\"");
        assert_eq!(quote("<a\"b\\c>"), "\"<a\\\"b\\\\c>\"");
    }
}
