//! # Mailbox
//!
//! Module dedicated to the remote side of a sync. The
//! [`MailboxSession`] trait abstracts the few operations the engine
//! needs from a remote folder, and the [`MailboxSessionBuilder`]
//! knows how to open new sessions.
//!
//! Sessions are not shareable: each thread of a pool owns its own
//! [`MailboxWorker`] through a [`MailboxWorkerContext`].

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use futures::lock::{Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::{
    message::MessageIdentifier,
    thread_pool::{ThreadPoolContext, ThreadPoolContextBuilder},
    AnyResult,
};

/// The unique identifier of a message inside a folder selection.
pub type Uid = u32;

/// The generation of a folder selection.
///
/// A [`Uid`] is only meaningful inside the generation it was issued
/// for. For IMAP, this is the `UIDVALIDITY` of the folder.
pub type Generation = u32;

/// The remote message reference.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RemoteReference {
    pub uid: Uid,
    pub generation: Generation,
}

impl RemoteReference {
    pub fn new(uid: Uid, generation: Generation) -> Self {
        Self { uid, generation }
    }
}

impl fmt::Display for RemoteReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.generation, self.uid)
    }
}

/// The mailbox session.
///
/// A session is connected and authenticated. Operations other than
/// [`MailboxSession::select`] and [`MailboxSession::close`] apply to
/// the last selected folder.
#[async_trait]
pub trait MailboxSession: Send {
    /// Select the given folder and return its generation.
    async fn select(&mut self, folder: &str, read_only: bool) -> AnyResult<Generation>;

    /// Search the identifiers of all messages of the folder.
    async fn search_all(&mut self) -> AnyResult<Vec<Uid>>;

    /// Fetch the raw identifier header line of the given messages,
    /// without marking them as seen.
    ///
    /// Messages unknown by the server are omitted from the output.
    async fn fetch_identifier_headers(&mut self, uids: &[Uid]) -> AnyResult<Vec<(Uid, Vec<u8>)>>;

    /// Fetch the full raw content of the given message.
    async fn fetch_message(&mut self, uid: Uid) -> AnyResult<Option<Vec<u8>>>;

    /// Search messages whose identifier header matches the given
    /// identifier.
    async fn search_identifier(&mut self, id: &MessageIdentifier) -> AnyResult<Vec<Uid>>;

    /// Append the given raw message to the given folder, flagged as
    /// seen. Without date, the server assigns the internal date.
    async fn append(
        &mut self,
        folder: &str,
        raw: &[u8],
        date: Option<DateTime<FixedOffset>>,
    ) -> AnyResult<()>;

    /// Log out and release the connection.
    async fn close(&mut self) -> AnyResult<()>;
}

/// The mailbox session builder.
#[async_trait]
pub trait MailboxSessionBuilder: Clone + Send + Sync {
    type Session: MailboxSession + 'static;

    /// Open a new connected and authenticated session.
    async fn connect(&self) -> AnyResult<Self::Session>;
}

/// The mailbox worker.
///
/// Owns one session, selected on one folder. The session can be
/// reset after a failure, in which case it is reestablished on next
/// use.
pub struct MailboxWorker<B: MailboxSessionBuilder> {
    builder: B,
    folder: String,
    read_only: bool,
    session: Option<B::Session>,
    generation: Generation,
}

impl<B: MailboxSessionBuilder> MailboxWorker<B> {
    /// Open a new session and select the given folder.
    pub async fn open(builder: B, folder: impl ToString, read_only: bool) -> AnyResult<Self> {
        let mut worker = Self {
            builder,
            folder: folder.to_string(),
            read_only,
            session: None,
            generation: 0,
        };

        worker.session().await?;
        Ok(worker)
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// The generation of the current selection.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Get the session, reestablishing it if it was reset.
    pub async fn session(&mut self) -> AnyResult<&mut B::Session> {
        let session = match self.session.take() {
            Some(session) => session,
            None => {
                debug!(folder = %self.folder, read_only = self.read_only, "opening session");
                let mut session = self.builder.connect().await?;

                match session.select(&self.folder, self.read_only).await {
                    Ok(generation) => {
                        trace!(folder = %self.folder, generation, "selected folder");
                        self.generation = generation;
                        session
                    }
                    Err(err) => {
                        if let Err(err) = session.close().await {
                            debug!("cannot close session: {err}");
                        }
                        return Err(err);
                    }
                }
            }
        };

        Ok(self.session.insert(session))
    }

    /// Close the current session so that the next call to
    /// [`MailboxWorker::session`] opens a new one.
    pub async fn reset(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!(folder = %self.folder, "resetting session");

            if let Err(err) = session.close().await {
                debug!("cannot close session: {err}");
                trace!("{err:?}");
            }
        }
    }

    /// Close the session for good.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(err) = session.close().await {
                warn!(folder = %self.folder, "cannot close session: {err}");
                trace!("{err:?}");
            }
        }
    }
}

/// The mailbox worker context.
///
/// Thread pool context owning one [`MailboxWorker`]. Since a pool
/// thread executes one task at a time, the inner lock is never
/// contended.
pub struct MailboxWorkerContext<B: MailboxSessionBuilder> {
    worker: Mutex<MailboxWorker<B>>,
}

impl<B: MailboxSessionBuilder> MailboxWorkerContext<B> {
    pub async fn lock(&self) -> MutexGuard<'_, MailboxWorker<B>> {
        self.worker.lock().await
    }
}

#[async_trait]
impl<B: MailboxSessionBuilder> ThreadPoolContext for MailboxWorkerContext<B> {
    async fn close(&self) {
        self.worker.lock().await.close().await
    }
}

/// The mailbox worker context builder.
#[derive(Clone)]
pub struct MailboxWorkerContextBuilder<B: MailboxSessionBuilder> {
    builder: B,
    folder: String,
    read_only: bool,
}

impl<B: MailboxSessionBuilder> MailboxWorkerContextBuilder<B> {
    pub fn new(builder: B, folder: impl ToString, read_only: bool) -> Self {
        Self {
            builder,
            folder: folder.to_string(),
            read_only,
        }
    }
}

#[async_trait]
impl<B: MailboxSessionBuilder> ThreadPoolContextBuilder for MailboxWorkerContextBuilder<B> {
    type Context = MailboxWorkerContext<B>;

    async fn build(self) -> AnyResult<Self::Context> {
        let worker = MailboxWorker::open(self.builder, self.folder, self.read_only).await?;

        Ok(MailboxWorkerContext {
            worker: Mutex::new(worker),
        })
    }
}
