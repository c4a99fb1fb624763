//! # Remote identifiers
//!
//! Module dedicated to the remote side of a sync. The
//! [`RemoteIdentifierFetcher`] lists all messages of a remote folder
//! then fetches their identifier header in parallel chunks, each
//! chunk being processed by a pool thread owning its own session.
//!
//! The fetch is all-or-nothing: a partial remote set would make
//! messages look local-only, so a chunk that cannot be fetched aborts
//! the whole fetch.

mod error;

use std::{collections::HashMap, sync::Arc};

use futures::{stream::FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

#[doc(inline)]
pub use self::error::{Error, Result};
use crate::{
    dedup::DuplicatePolicy,
    mailbox::{
        Generation, MailboxSession, MailboxSessionBuilder, MailboxWorker,
        MailboxWorkerContextBuilder, RemoteReference, Uid,
    },
    message::{MailParserCodec, MessageCodec, MessageIdentifier},
    retry::{RetryPolicy, RetryState},
    thread_pool::ThreadPoolBuilder,
    AnyResult,
};

/// The default number of sessions used to fetch identifiers.
pub const DEFAULT_POOL_SIZE: usize = 5;

/// The maximum number of messages per fetch command.
pub const MAX_CHUNK_SIZE: usize = 1000;

/// The remote scan report.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RemoteScanReport {
    /// The number of listed messages, after applying the limit.
    pub refs: usize,

    /// The number of messages without a valid identifier, including
    /// the ones the server did not return.
    pub invalid: usize,

    /// The number of messages whose identifier was already seen.
    pub repeated: usize,
}

/// The result of a remote scan.
#[derive(Debug)]
pub struct RemoteScan {
    /// The retained references, indexed by identifier.
    pub records: HashMap<MessageIdentifier, RemoteReference>,

    pub report: RemoteScanReport,
}

/// The remote identifier fetcher.
#[derive(Clone)]
pub struct RemoteIdentifierFetcher<B: MailboxSessionBuilder> {
    builder: B,
    folder: String,
    limit: Option<usize>,
    pool_size: usize,
    retry_policy: RetryPolicy,
    duplicate_policy: DuplicatePolicy,
    codec: Arc<dyn MessageCodec>,
}

impl<B: MailboxSessionBuilder + 'static> RemoteIdentifierFetcher<B> {
    pub fn new(builder: B, folder: impl ToString) -> Self {
        Self {
            builder,
            folder: folder.to_string(),
            limit: None,
            pool_size: DEFAULT_POOL_SIZE,
            retry_policy: RetryPolicy::default(),
            duplicate_policy: DuplicatePolicy::default(),
            codec: Arc::new(MailParserCodec),
        }
    }

    pub fn set_some_limit(&mut self, limit: Option<usize>) {
        self.limit = limit;
    }

    pub fn with_some_limit(mut self, limit: Option<usize>) -> Self {
        self.set_some_limit(limit);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.set_some_limit(Some(limit));
        self
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

    pub fn set_duplicate_policy(&mut self, policy: DuplicatePolicy) {
        self.duplicate_policy = policy;
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.set_duplicate_policy(policy);
        self
    }

    pub fn set_codec(&mut self, codec: Arc<dyn MessageCodec>) {
        self.codec = codec;
    }

    pub fn with_codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.set_codec(codec);
        self
    }

    /// Compute the number of messages per fetch command.
    pub fn chunk_size(&self, total: usize) -> usize {
        (total / self.pool_size).clamp(1, MAX_CHUNK_SIZE)
    }

    /// List the remote folder then fetch the identifier of all its
    /// messages.
    pub async fn fetch(&self, cancel: &CancellationToken) -> Result<RemoteScan> {
        let uids = self.list_uids(cancel).await?;
        let refs = uids.len();

        if uids.is_empty() {
            info!(folder = %self.folder, "remote folder is empty");
            return Ok(RemoteScan {
                records: HashMap::new(),
                report: RemoteScanReport::default(),
            });
        }

        let chunk_size = self.chunk_size(refs);
        info!(refs, chunk_size, folder = %self.folder, "fetching remote message identifiers");

        let ctx_builder = MailboxWorkerContextBuilder::new(self.builder.clone(), &self.folder, true);
        let pool = ThreadPoolBuilder::new(ctx_builder)
            .with_size(self.pool_size)
            .build()
            .await
            .map_err(Error::BuildPoolError)?;

        // stops remaining chunks as soon as one of them fails
        let abort = cancel.child_token();

        let mut tasks = FuturesUnordered::from_iter(uids.chunks(chunk_size).map(|chunk| {
            let chunk = chunk.to_vec();
            let policy = self.retry_policy.clone();
            let codec = self.codec.clone();
            let abort = abort.clone();

            pool.exec(move |ctx| async move {
                let mut worker = ctx.lock().await;
                fetch_chunk(&mut worker, chunk, &policy, codec.as_ref(), &abort).await
            })
        }));

        let mut entries = Vec::with_capacity(refs);
        let mut first_err = None;

        while let Some(res) = tasks.next().await {
            match res.map_err(Error::ExecTaskError).and_then(|res| res) {
                Ok(chunk) => entries.extend(chunk),
                Err(err) => {
                    abort.cancel();
                    if first_err.is_none() {
                        first_err = Some(err);
                    } else {
                        debug!("{err}");
                    }
                }
            }
        }

        drop(tasks);
        pool.close().await;

        if let Some(err) = first_err {
            // the interruption does not come from a failed chunk
            if matches!(err, Error::InterruptedError) || cancel.is_cancelled() {
                return Err(Error::InterruptedError);
            }
            return Err(err);
        }

        entries.sort_by_key(|(reference, _)| reference.uid);

        let mut invalid = refs.saturating_sub(entries.len());
        let ids = entries
            .into_iter()
            .filter_map(|(reference, id)| match id {
                Ok(id) => Some((id, reference)),
                Err(err) => {
                    invalid += 1;
                    error!(uid = reference.uid, "{err}");
                    None
                }
            })
            .collect::<Vec<_>>();

        let dedup = self.duplicate_policy.apply(ids);

        let report = RemoteScanReport {
            refs,
            invalid,
            repeated: dedup.repeated,
        };

        info!(
            ids = dedup.entries.len(),
            refs,
            invalid,
            repeated = report.repeated,
            "fetched remote message identifiers",
        );

        Ok(RemoteScan {
            records: dedup.entries,
            report,
        })
    }

    /// List the UIDs of the folder, sorted in ascending order and
    /// truncated to the limit.
    async fn list_uids(&self, cancel: &CancellationToken) -> Result<Vec<Uid>> {
        if cancel.is_cancelled() {
            return Err(Error::InterruptedError);
        }

        let mut worker = MailboxWorker::open(self.builder.clone(), &self.folder, true)
            .await
            .map_err(|err| Error::OpenSessionError(err, self.folder.clone()))?;

        let uids = search_all(&mut worker).await;
        worker.close().await;

        let mut uids = uids.map_err(|err| Error::SearchAllError(err, self.folder.clone()))?;
        uids.sort_unstable();
        uids.dedup();

        if let Some(limit) = self.limit {
            uids.truncate(limit);
        }

        Ok(uids)
    }
}

async fn search_all<B: MailboxSessionBuilder>(worker: &mut MailboxWorker<B>) -> AnyResult<Vec<Uid>> {
    worker.session().await?.search_all().await
}

async fn fetch_headers<B: MailboxSessionBuilder>(
    worker: &mut MailboxWorker<B>,
    uids: &[Uid],
) -> AnyResult<(Generation, Vec<(Uid, Vec<u8>)>)> {
    let headers = worker.session().await?.fetch_identifier_headers(uids).await?;
    Ok((worker.generation(), headers))
}

type ChunkEntry = (RemoteReference, crate::message::Result<MessageIdentifier>);

/// Fetch and parse the identifiers of the given chunk, retrying with
/// a fresh session on failure.
async fn fetch_chunk<B: MailboxSessionBuilder>(
    worker: &mut MailboxWorker<B>,
    uids: Vec<Uid>,
    policy: &RetryPolicy,
    codec: &dyn MessageCodec,
    cancel: &CancellationToken,
) -> Result<Vec<ChunkEntry>> {
    let first = uids.first().copied().unwrap_or_default();
    let last = uids.last().copied().unwrap_or_default();
    let mut retry = policy.start();

    let (generation, headers) = loop {
        if cancel.is_cancelled() {
            return Err(Error::InterruptedError);
        }

        let res = retry
            .timeout(fetch_headers(worker, &uids))
            .await
            .unwrap_or_else(|elapsed| Err(elapsed.into()));

        match retry.next(res, |_| true) {
            RetryState::Ok(output) => break output,
            RetryState::Retry(err) => {
                warn!(first, last, attempts = retry.attempts, "cannot fetch identifiers, retrying: {err}");
                worker.reset().await;
                if !retry.wait(cancel).await {
                    return Err(Error::InterruptedError);
                }
            }
            RetryState::Exhausted(err) => {
                worker.reset().await;
                return Err(Error::FetchChunkError(err, first, last, retry.attempts));
            }
        }
    };

    trace!(first, last, fetched = headers.len(), "fetched identifier headers");

    let entries = headers
        .into_iter()
        .map(|(uid, header)| {
            let reference = RemoteReference::new(uid, generation);
            let id = MessageIdentifier::from_header_line(&header, codec);
            (reference, id)
        })
        .collect();

    Ok(entries)
}
