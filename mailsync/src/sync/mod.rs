//! # Sync
//!
//! Module dedicated to the reconciliation of a remote folder with
//! local directories. The main structure of this module is
//! [`SyncBuilder`].

mod error;
pub mod report;

use std::{fmt, future::Future, mem, path::Path, pin::Pin, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

#[doc(inline)]
pub use self::{
    error::{Error, Result},
    report::SyncReport,
};
use crate::{
    cache::IdentifierCache,
    config::{SyncConfig, SyncDirection, SyncMode},
    local::LocalRecordFetcher,
    mailbox::MailboxSessionBuilder,
    message::{MailParserCodec, MessageCodec, MessageIdentifier},
    reconcile::reconcile,
    remote::RemoteIdentifierFetcher,
    transfer::{Download, TransferKind, Transporter, Upload},
    AnyResult,
};

/// The sync builder.
#[derive(Clone)]
pub struct SyncBuilder<B: MailboxSessionBuilder> {
    session_builder: B,
    config: SyncConfig,
    handler: Option<Arc<SyncEventHandler>>,
    cancel: CancellationToken,
    codec: Arc<dyn MessageCodec>,
}

impl<B: MailboxSessionBuilder + 'static> SyncBuilder<B> {
    /// Create a new sync builder using the given session builder and
    /// configuration.
    pub fn new(session_builder: B, config: SyncConfig) -> Self {
        Self {
            session_builder,
            config,
            handler: None,
            cancel: CancellationToken::new(),
            codec: Arc::new(MailParserCodec),
        }
    }

    pub fn set_some_handler<F: Future<Output = AnyResult<()>> + Send + 'static>(
        &mut self,
        handler: Option<impl Fn(SyncEvent) -> F + Send + Sync + 'static>,
    ) {
        self.handler = match handler {
            Some(handler) => Some(Arc::new(move |evt| Box::pin(handler(evt)))),
            None => None,
        };
    }

    pub fn set_handler<F: Future<Output = AnyResult<()>> + Send + 'static>(
        &mut self,
        handler: impl Fn(SyncEvent) -> F + Send + Sync + 'static,
    ) {
        self.set_some_handler(Some(handler));
    }

    pub fn with_some_handler<F: Future<Output = AnyResult<()>> + Send + 'static>(
        mut self,
        handler: Option<impl Fn(SyncEvent) -> F + Send + Sync + 'static>,
    ) -> Self {
        self.set_some_handler(handler);
        self
    }

    pub fn with_handler<F: Future<Output = AnyResult<()>> + Send + 'static>(
        mut self,
        handler: impl Fn(SyncEvent) -> F + Send + Sync + 'static,
    ) -> Self {
        self.set_handler(handler);
        self
    }

    pub fn set_some_mode(&mut self, mode: Option<SyncMode>) {
        if let Some(mode) = mode {
            self.config.mode = mode;
        }
    }

    pub fn set_mode(&mut self, mode: SyncMode) {
        self.set_some_mode(Some(mode));
    }

    pub fn with_some_mode(mut self, mode: Option<SyncMode>) -> Self {
        self.set_some_mode(mode);
        self
    }

    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.set_mode(mode);
        self
    }

    pub fn set_some_direction(&mut self, direction: Option<SyncDirection>) {
        if let Some(direction) = direction {
            self.config.direction = direction;
        }
    }

    pub fn set_direction(&mut self, direction: SyncDirection) {
        self.set_some_direction(Some(direction));
    }

    pub fn with_some_direction(mut self, direction: Option<SyncDirection>) -> Self {
        self.set_some_direction(direction);
        self
    }

    pub fn with_direction(mut self, direction: SyncDirection) -> Self {
        self.set_direction(direction);
        self
    }

    /// Change the token used to cancel the sync.
    pub fn set_cancellation_token(&mut self, cancel: CancellationToken) {
        self.cancel = cancel;
    }

    pub fn with_cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.set_cancellation_token(cancel);
        self
    }

    pub fn set_codec(&mut self, codec: Arc<dyn MessageCodec>) {
        self.codec = codec;
    }

    pub fn with_codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.set_codec(codec);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run the sync.
    pub async fn sync(self) -> Result<SyncReport> {
        let config = &self.config;
        let cancel = &self.cancel;

        if config.dirs.is_empty() {
            return Err(Error::MissingLocalDirError);
        }

        if !config
            .local_duplicates
            .is_compatible_with(&config.remote_duplicates)
        {
            return Err(Error::IncompatibleDuplicatePoliciesError(
                config.local_duplicates,
                config.remote_duplicates,
            ));
        }

        info!(
            mode = %config.mode,
            direction = %config.direction,
            folder = %config.folder,
            dirs = config.dirs.len(),
            download_dir = ?config.download_dir,
            "starting sync",
        );

        // a download directory that does not exist yet holds nothing
        let mut dirs = Vec::new();
        for dir in config.find_local_dirs() {
            if config.dirs.contains(dir) || tokio::fs::metadata(dir).await.is_ok() {
                dirs.push(dir);
            }
        }

        let cache = IdentifierCache::load(&config.cache_path);
        let mut local = LocalRecordFetcher::new(dirs)
            .with_pool_size(config.local_pool_size)
            .with_duplicate_policy(config.local_duplicates)
            .with_codec(self.codec.clone())
            .fetch(cache, cancel)
            .await?;
        let mut cache = mem::take(&mut local.cache);
        save_cache(&cache, &config.cache_path);

        SyncEvent::ListedLocalRecords(local.records.len())
            .emit(&self.handler)
            .await;

        let remote = RemoteIdentifierFetcher::new(self.session_builder.clone(), &config.folder)
            .with_some_limit(config.limit)
            .with_pool_size(config.remote_pool_size)
            .with_retry_policy(config.retry.clone())
            .with_duplicate_policy(config.remote_duplicates)
            .with_codec(self.codec.clone())
            .fetch(cancel)
            .await?;

        SyncEvent::ListedRemoteIdentifiers(remote.records.len())
            .emit(&self.handler)
            .await;

        let plan = reconcile(&local.records, &remote.records);
        info!("{plan}");

        SyncEvent::GeneratedPlan(plan.only_remote.len(), plan.only_local.len(), plan.common.len())
            .emit(&self.handler)
            .await;

        let mut report = SyncReport {
            local: mem::take(&mut local.report),
            remote: remote.report,
            plan,
            download: None,
            upload: None,
        };

        if config.mode == SyncMode::Dry {
            return Ok(report);
        }

        let dry = config.mode.is_dry_run();
        let transporter = Transporter::new(self.session_builder.clone(), &config.folder)
            .with_pool_size(config.remote_pool_size)
            .with_retry_policy(config.retry.clone())
            .with_some_handler(self.handler.clone());

        if config.direction.downloads() {
            let dir = config
                .find_download_dir()
                .ok_or(Error::MissingLocalDirError)?;

            if !dry {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|err| Error::CreateDownloadDirError(err, dir.clone()))?;
            }

            let items = select(&report.plan.only_remote, |id| remote.records.get(id).copied());
            let download = Download::new(dir)
                .with_dry_run(dry)
                .with_codec(self.codec.clone());
            let download_report = transporter.run(download, items, cancel).await?;

            let mut saved = 0;
            for transferred in &download_report.transferred {
                let Some(msg) = &transferred.saved else {
                    continue;
                };
                let Some(id) = &msg.identifier else {
                    continue;
                };
                // scanned paths are canonical
                let path = tokio::fs::canonicalize(&msg.path)
                    .await
                    .unwrap_or_else(|_| msg.path.clone());
                cache.insert(path, id.clone(), msg.fingerprint);
                saved += 1;
            }

            if saved > 0 {
                save_cache(&cache, &config.cache_path);
            }

            report.download = Some(download_report);
        }

        if config.direction.uploads() {
            let items = select(&report.plan.only_local, |id| local.record(id));
            let upload = Upload::new()
                .with_dry_run(dry)
                .with_codec(self.codec.clone());
            report.upload = Some(transporter.run(upload, items, cancel).await?);
        }

        info!(failures = report.failures(), "sync done");
        Ok(report)
    }
}

/// Pair the given identifiers with their item.
fn select<T>(
    ids: &[MessageIdentifier],
    get: impl Fn(&MessageIdentifier) -> Option<T>,
) -> Vec<(MessageIdentifier, T)> {
    ids.iter()
        .filter_map(|id| Some((id.clone(), get(id)?)))
        .collect()
}

/// Persist the cache, only logging failures.
///
/// A cache that cannot be saved only costs a full scan next time.
fn save_cache(cache: &IdentifierCache, path: &Path) {
    if let Err(err) = cache.save(path) {
        warn!("{err}");
        debug!("{err:?}");
    }
}

/// The sync async event handler.
pub type SyncEventHandler =
    dyn Fn(SyncEvent) -> Pin<Box<dyn Future<Output = AnyResult<()>> + Send>> + Send + Sync;

/// The sync event.
///
/// Represents all the events that can be triggered during the sync
/// process.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum SyncEvent {
    ListedLocalRecords(usize),
    ListedRemoteIdentifiers(usize),
    /// Remote-only, local-only and common counts.
    GeneratedPlan(usize, usize, usize),
    /// A message went through all its attempts, with the error of the
    /// last one if it failed.
    ProcessedMessage(TransferKind, MessageIdentifier, Option<String>),
}

impl SyncEvent {
    pub async fn emit(&self, handler: &Option<Arc<SyncEventHandler>>) {
        if let Some(handler) = handler.as_ref() {
            if let Err(err) = handler(self.clone()).await {
                debug!("error while emitting sync event: {err}");
                trace!("{err:?}");
            } else {
                trace!("emitted sync event {self:?}");
            }
        }
    }
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncEvent::ListedLocalRecords(n) => {
                write!(f, "Listed {n} local message identifiers")
            }
            SyncEvent::ListedRemoteIdentifiers(n) => {
                write!(f, "Listed {n} remote message identifiers")
            }
            SyncEvent::GeneratedPlan(remote, local, common) => {
                write!(
                    f,
                    "Found {remote} remote-only, {local} local-only, {common} common messages"
                )
            }
            SyncEvent::ProcessedMessage(kind, id, None) => {
                write!(f, "Processed {kind} of {id}")
            }
            SyncEvent::ProcessedMessage(kind, id, Some(err)) => {
                write!(f, "Failed {kind} of {id}: {err}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_events() {
        let id = MessageIdentifier::from_header_value("<a@b>").unwrap();

        assert_eq!(
            SyncEvent::GeneratedPlan(1, 2, 3).to_string(),
            "Found 1 remote-only, 2 local-only, 3 common messages"
        );
        assert_eq!(
            SyncEvent::ProcessedMessage(TransferKind::Upload, id.clone(), None).to_string(),
            "Processed upload of <a@b>"
        );
        assert_eq!(
            SyncEvent::ProcessedMessage(TransferKind::Download, id, Some("boom".into()))
                .to_string(),
            "Failed download of <a@b>: boom"
        );
    }
}
