//! # Upload
//!
//! Module dedicated to the upload of local messages into the remote
//! folder. Messages are appended with the `\Seen` flag and with the
//! date taken from their `Date` header, so that they keep their
//! original place in the remote folder.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{Error, Result, Transfer, TransferKind, Transferred};
use crate::{
    local::LocalRecord,
    mailbox::{MailboxSession, MailboxSessionBuilder, MailboxWorker},
    message::{self, MailParserCodec, MessageCodec, MessageIdentifier},
};

/// The upload of local messages.
#[derive(Clone)]
pub struct Upload {
    dry: bool,
    codec: Arc<dyn MessageCodec>,
}

impl Default for Upload {
    fn default() -> Self {
        Self {
            dry: false,
            codec: Arc::new(MailParserCodec),
        }
    }
}

impl Upload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dry_run(mut self, dry: bool) -> Self {
        self.dry = dry;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = codec;
        self
    }
}

#[async_trait]
impl<B: MailboxSessionBuilder> Transfer<B> for Upload {
    type Item = LocalRecord;

    fn kind(&self) -> TransferKind {
        TransferKind::Upload
    }

    async fn transfer(
        &self,
        worker: &mut MailboxWorker<B>,
        id: &MessageIdentifier,
        record: &LocalRecord,
        cancel: &CancellationToken,
    ) -> Result<Transferred> {
        if cancel.is_cancelled() {
            return Err(Error::InterruptedError);
        }

        let path = &record.path;
        let raw = fs::read(path)
            .await
            .map_err(|err| Error::ReadFileError(err, path.clone()))?;

        let headers = self.codec.parse_headers(message::header_block(&raw));
        let subject = headers.subject.unwrap_or_else(|| id.to_string());

        if self.dry {
            info!(%subject, path = %path.display(), "would append message");
            return Ok(Transferred::new(id.clone()));
        }

        if cancel.is_cancelled() {
            return Err(Error::InterruptedError);
        }

        info!(%subject, path = %path.display(), "appending message");

        let folder = worker.folder().to_owned();
        worker
            .session()
            .await
            .map_err(Error::SessionError)?
            .append(&folder, &raw, headers.date)
            .await
            .map_err(Error::SessionError)?;

        Ok(Transferred::new(id.clone()))
    }
}
