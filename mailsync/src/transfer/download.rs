//! # Download
//!
//! Module dedicated to the download of remote messages into a local
//! directory. A message is first written to a temporary file, then
//! renamed to its final name, so that a partial file is never taken
//! for a message by a later scan.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use filetime::FileTime;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{Error, Result, SavedMessage, Transfer, TransferKind, Transferred};
use crate::{
    cache::FileFingerprint,
    filename::FilenameGenerator,
    mailbox::{MailboxSession, MailboxSessionBuilder, MailboxWorker, RemoteReference, Uid},
    message::{self, MailParserCodec, MessageCodec, MessageIdentifier},
};

/// The download of remote messages.
#[derive(Clone)]
pub struct Download {
    dir: PathBuf,
    dry: bool,
    codec: Arc<dyn MessageCodec>,
    filenames: FilenameGenerator,
}

impl Download {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            dry: false,
            codec: Arc::new(MailParserCodec),
            filenames: FilenameGenerator::default(),
        }
    }

    pub fn with_dry_run(mut self, dry: bool) -> Self {
        self.dry = dry;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_filename_generator(mut self, filenames: FilenameGenerator) -> Self {
        self.filenames = filenames;
        self
    }

    /// Save the given raw message into the download directory.
    async fn save(
        &self,
        id: &MessageIdentifier,
        raw: &[u8],
        headers: &message::MessageHeaders,
        label: &str,
        cancel: &CancellationToken,
    ) -> Result<(PathBuf, FileFingerprint)> {
        let date = headers.date.as_ref();

        let tmp_name = self.filenames.generate(&self.dir, date, label, true)?;
        let tmp_path = self.dir.join(tmp_name);

        if cancel.is_cancelled() {
            return Err(Error::InterruptedError);
        }

        fs::write(&tmp_path, raw)
            .await
            .map_err(|err| Error::WriteFileError(err, tmp_path.clone()))?;

        let name = self.filenames.generate(&self.dir, date, label, false)?;
        let path = self.dir.join(name);

        if cancel.is_cancelled() {
            remove(&tmp_path).await;
            return Err(Error::InterruptedError);
        }

        if exists(&path).await {
            remove(&tmp_path).await;
            return Err(Error::ConflictError(path));
        }

        if let Err(err) = fs::rename(&tmp_path, &path).await {
            remove(&tmp_path).await;
            return Err(Error::RenameFileError(err, tmp_path, path));
        }

        if let Some(date) = date {
            let mtime = FileTime::from_unix_time(date.timestamp(), 0);
            if let Err(err) = filetime::set_file_mtime(&path, mtime) {
                warn!(path = %path.display(), "cannot set modification time: {err}");
            }
        }

        let fingerprint = fs::metadata(&path)
            .await
            .map(|metadata| FileFingerprint::from_metadata(&metadata))
            .map_err(|err| Error::WriteFileError(err, path.clone()))?;

        trace!(id = id.as_str(), path = %path.display(), "saved message");
        Ok((path, fingerprint))
    }
}

#[async_trait]
impl<B: MailboxSessionBuilder> Transfer<B> for Download {
    type Item = RemoteReference;

    fn kind(&self) -> TransferKind {
        TransferKind::Download
    }

    async fn transfer(
        &self,
        worker: &mut MailboxWorker<B>,
        id: &MessageIdentifier,
        reference: &RemoteReference,
        cancel: &CancellationToken,
    ) -> Result<Transferred> {
        if cancel.is_cancelled() {
            return Err(Error::InterruptedError);
        }

        let raw = fetch(worker, id, reference).await?;

        let headers = self.codec.parse_headers(message::header_block(&raw));
        let label = headers.subject.clone().unwrap_or_else(|| id.to_string());

        if self.dry {
            info!(subject = %label, bytes = raw.len(), "would download message");
            return Ok(Transferred::new(id.clone()));
        }

        info!(subject = %label, bytes = raw.len(), "downloading message");
        let (path, fingerprint) = self.save(id, &raw, &headers, &label, cancel).await?;

        Ok(Transferred {
            id: id.clone(),
            saved: Some(SavedMessage {
                path,
                identifier: headers.identifier().ok(),
                fingerprint,
            }),
        })
    }
}

/// Fetch the full content of the given remote message.
///
/// A reference issued for another generation, or that does not point
/// to a message anymore, is resolved again using the identifier.
async fn fetch<B: MailboxSessionBuilder>(
    worker: &mut MailboxWorker<B>,
    id: &MessageIdentifier,
    reference: &RemoteReference,
) -> Result<Vec<u8>> {
    worker.session().await.map_err(Error::SessionError)?;

    let mut resolved = false;
    let mut uid = reference.uid;

    if worker.generation() != reference.generation {
        debug!(
            id = id.as_str(),
            %reference,
            generation = worker.generation(),
            "stale remote reference, resolving it again",
        );
        uid = resolve(worker, id)
            .await?
            .ok_or_else(|| Error::MessageVanishedError(id.clone(), *reference))?;
        resolved = true;
    }

    loop {
        let raw = worker
            .session()
            .await
            .map_err(Error::SessionError)?
            .fetch_message(uid)
            .await
            .map_err(Error::SessionError)?;

        match raw {
            Some(raw) => break Ok(raw),
            None if !resolved => {
                debug!(id = id.as_str(), uid, "remote message not found, resolving it again");
                resolved = true;

                match resolve(worker, id).await? {
                    Some(new_uid) if new_uid != uid => uid = new_uid,
                    _ => break Err(Error::MessageVanishedError(id.clone(), *reference)),
                }
            }
            None => break Err(Error::MessageVanishedError(id.clone(), *reference)),
        }
    }
}

/// Search the current UID of the given message. When several
/// messages share the same identifier, the most recent one is kept.
async fn resolve<B: MailboxSessionBuilder>(
    worker: &mut MailboxWorker<B>,
    id: &MessageIdentifier,
) -> Result<Option<Uid>> {
    let uids = worker
        .session()
        .await
        .map_err(Error::SessionError)?
        .search_identifier(id)
        .await
        .map_err(Error::SessionError)?;

    Ok(uids.into_iter().max())
}

async fn exists(path: &Path) -> bool {
    match fs::symlink_metadata(path).await {
        Ok(_) => true,
        Err(err) => err.kind() != ErrorKind::NotFound,
    }
}

async fn remove(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        debug!(path = %path.display(), "cannot remove temporary file: {err}");
    }
}
