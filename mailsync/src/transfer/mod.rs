//! # Transfer
//!
//! Module dedicated to the transfer of messages missing on one side.
//! The [`Transporter`] spreads items over a pool of mailbox workers
//! and applies the [`RetryPolicy`] to each of them. What an attempt
//! does is defined by a [`Transfer`]: [`Download`] saves remote
//! messages into a local directory, [`Upload`] appends local messages
//! to the remote folder.

pub mod download;
mod error;
pub mod upload;

use std::{fmt, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use futures::{stream::FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[doc(inline)]
pub use self::{
    download::Download,
    error::{Error, Result},
    upload::Upload,
};
use crate::{
    cache::FileFingerprint,
    mailbox::{MailboxSessionBuilder, MailboxWorker, MailboxWorkerContextBuilder},
    message::MessageIdentifier,
    retry::{FailureThreshold, RetryPolicy, RetryState},
    sync::{SyncEvent, SyncEventHandler},
    thread_pool::ThreadPoolBuilder,
};

/// The default number of sessions used to transfer messages.
pub const DEFAULT_POOL_SIZE: usize = 5;

/// The kind of transfer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TransferKind {
    /// From the remote folder to a local directory.
    Download,

    /// From local directories to the remote folder.
    Upload,
}

impl TransferKind {
    /// Return `true` if the remote folder only needs to be read.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Download)
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Download => write!(f, "download"),
            Self::Upload => write!(f, "upload"),
        }
    }
}

/// A transferred message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transferred {
    pub id: MessageIdentifier,

    /// The local file written by a download. Always `None` for
    /// uploads and dry runs.
    pub saved: Option<SavedMessage>,
}

impl Transferred {
    pub fn new(id: MessageIdentifier) -> Self {
        Self { id, saved: None }
    }
}

/// A message saved into a local directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SavedMessage {
    /// The final path of the file.
    pub path: PathBuf,

    /// The identifier parsed from the saved content, which differs
    /// from the transferred one for suffixed copies.
    pub identifier: Option<MessageIdentifier>,

    pub fingerprint: FileFingerprint,
}

/// The transfer report.
#[derive(Debug, Default)]
pub struct TransferReport {
    /// The messages transferred, or that would have been in dry mode.
    pub transferred: Vec<Transferred>,

    /// The messages that exhausted their attempts.
    pub failed: Vec<(MessageIdentifier, Error)>,

    /// The number of messages never attempted because the batch was
    /// stopped.
    pub cancelled: usize,
}

/// The transfer of one message.
///
/// Implementations perform exactly one attempt. Retries, timeouts,
/// session resets and failure accounting are handled by the
/// [`Transporter`]. The given token must be checked before each file
/// or network call: a cancelled attempt returns
/// [`Error::InterruptedError`] and leaves nothing behind.
#[async_trait]
pub trait Transfer<B: MailboxSessionBuilder>: Send + Sync + 'static {
    /// The message to transfer.
    type Item: Send + Sync + 'static;

    /// The kind of transfer.
    fn kind(&self) -> TransferKind;

    /// Attempt to transfer the given message using the given worker.
    async fn transfer(
        &self,
        worker: &mut MailboxWorker<B>,
        id: &MessageIdentifier,
        item: &Self::Item,
        cancel: &CancellationToken,
    ) -> Result<Transferred>;
}

/// The outcome of one message after all its attempts.
enum Outcome {
    Done(Transferred),
    Failed(Error),
    Cancelled,
}

/// The transporter.
#[derive(Clone)]
pub struct Transporter<B: MailboxSessionBuilder> {
    builder: B,
    folder: String,
    pool_size: usize,
    retry_policy: RetryPolicy,
    handler: Option<Arc<SyncEventHandler>>,
}

impl<B: MailboxSessionBuilder + 'static> Transporter<B> {
    pub fn new(builder: B, folder: impl ToString) -> Self {
        Self {
            builder,
            folder: folder.to_string(),
            pool_size: DEFAULT_POOL_SIZE,
            retry_policy: RetryPolicy::default(),
            handler: None,
        }
    }

    pub fn set_some_pool_size(&mut self, size: Option<usize>) {
        self.pool_size = size.unwrap_or(DEFAULT_POOL_SIZE).max(1);
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.set_some_pool_size(Some(size));
        self
    }

    pub fn set_retry_policy(&mut self, policy: RetryPolicy) {
        self.retry_policy = policy;
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.set_retry_policy(policy);
        self
    }

    pub fn set_some_handler(&mut self, handler: Option<Arc<SyncEventHandler>>) {
        self.handler = handler;
    }

    pub fn with_some_handler(mut self, handler: Option<Arc<SyncEventHandler>>) -> Self {
        self.set_some_handler(handler);
        self
    }

    /// Transfer all the given messages.
    ///
    /// Failing messages are reported unless the failure threshold of
    /// the retry policy is reached, in which case remaining messages
    /// are cancelled and the whole batch fails.
    pub async fn run<T: Transfer<B>>(
        &self,
        transfer: T,
        items: Vec<(MessageIdentifier, T::Item)>,
        cancel: &CancellationToken,
    ) -> Result<TransferReport> {
        let kind = transfer.kind();

        if items.is_empty() {
            debug!(%kind, "nothing to transfer");
            return Ok(TransferReport::default());
        }

        if cancel.is_cancelled() {
            return Err(Error::InterruptedError);
        }

        info!(%kind, items = items.len(), folder = %self.folder, "transferring messages");

        let ctx_builder =
            MailboxWorkerContextBuilder::new(self.builder.clone(), &self.folder, kind.is_read_only());
        let pool = ThreadPoolBuilder::new(ctx_builder)
            .with_size(self.pool_size)
            .build()
            .await
            .map_err(Error::BuildPoolError)?;

        let batch = cancel.child_token();
        let threshold = Arc::new(FailureThreshold::new(&self.retry_policy, batch.clone()));
        let transfer = Arc::new(transfer);

        let mut tasks = FuturesUnordered::from_iter(items.into_iter().map(|(id, item)| {
            let transfer = transfer.clone();
            let policy = self.retry_policy.clone();
            let batch = batch.clone();
            let threshold = threshold.clone();

            pool.exec(move |ctx| async move {
                let mut worker = ctx.lock().await;
                let outcome = transfer_with_retry(
                    transfer.as_ref(),
                    &mut worker,
                    &id,
                    &item,
                    &policy,
                    &batch,
                    &threshold,
                )
                .await;
                (id, outcome)
            })
        }));

        let mut report = TransferReport::default();
        let mut exec_err = None;

        while let Some(res) = tasks.next().await {
            let (id, outcome) = match res {
                Ok(output) => output,
                Err(err) => {
                    batch.cancel();
                    exec_err.get_or_insert(err);
                    continue;
                }
            };

            match outcome {
                Outcome::Done(transferred) => {
                    SyncEvent::ProcessedMessage(kind, id, None)
                        .emit(&self.handler)
                        .await;
                    report.transferred.push(transferred);
                }
                Outcome::Failed(err) => {
                    error!(%kind, id = id.as_str(), "{err}");
                    debug!("{err:?}");
                    SyncEvent::ProcessedMessage(kind, id.clone(), Some(err.to_string()))
                        .emit(&self.handler)
                        .await;
                    report.failed.push((id, err));
                }
                Outcome::Cancelled => {
                    report.cancelled += 1;
                }
            }
        }

        drop(tasks);
        pool.close().await;

        if cancel.is_cancelled() {
            return Err(Error::InterruptedError);
        }

        if threshold.is_reached() {
            return Err(Error::TooManyFailuresError(threshold.count()));
        }

        if let Some(err) = exec_err {
            return Err(Error::ExecTaskError(err));
        }

        info!(
            %kind,
            transferred = report.transferred.len(),
            failed = report.failed.len(),
            "transferred messages",
        );

        Ok(report)
    }
}

async fn transfer_with_retry<B, T>(
    transfer: &T,
    worker: &mut MailboxWorker<B>,
    id: &MessageIdentifier,
    item: &T::Item,
    policy: &RetryPolicy,
    batch: &CancellationToken,
    threshold: &FailureThreshold,
) -> Outcome
where
    B: MailboxSessionBuilder,
    T: Transfer<B>,
{
    let kind = transfer.kind();
    let mut retry = policy.start();

    loop {
        if batch.is_cancelled() {
            return Outcome::Cancelled;
        }

        let res = retry
            .timeout(transfer.transfer(worker, id, item, batch))
            .await
            .unwrap_or_else(|_| Err(Error::TimeoutError(policy.timeout())));

        if let Err(Error::InterruptedError) = res {
            return Outcome::Cancelled;
        }

        match retry.next(res, Error::is_retryable) {
            RetryState::Ok(transferred) => return Outcome::Done(transferred),
            RetryState::Retry(err) => {
                warn!(%kind, id = id.as_str(), attempts = retry.attempts, "{err}, retrying");

                if err.is_session_error() {
                    worker.reset().await;
                }

                if !retry.wait(batch).await {
                    return Outcome::Cancelled;
                }
            }
            RetryState::Exhausted(err) => {
                if err.is_session_error() {
                    worker.reset().await;
                }

                threshold.record();
                return Outcome::Failed(err);
            }
        }
    }
}
