//! # Local records
//!
//! Module dedicated to the local side of a sync: directories holding
//! one file per message. The [`LocalRecordFetcher`] lists those
//! directories and extracts the identifier of every message file,
//! reusing the [`IdentifierCache`] for files that did not change.
//!
//! Files are evaluated in parallel using [`rayon`]. Workers only
//! share a read-only snapshot of the cache, which is updated once all
//! of them finished.

mod error;

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

#[doc(inline)]
pub use self::error::{Error, Result};
use crate::{
    cache::{FileFingerprint, IdentifierCache},
    dedup::DuplicatePolicy,
    filename::TEMP_PREFIX,
    message::{self, MailParserCodec, MessageCodec, MessageIdentifier},
};

/// The default number of threads used to evaluate local files.
pub const DEFAULT_POOL_SIZE: usize = 5;

/// The local message record.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct LocalRecord {
    pub path: PathBuf,
    pub identifier: MessageIdentifier,
}

/// The local scan report.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LocalScanReport {
    /// The number of message files found.
    pub files: usize,

    /// The number of files actually read, cache misses only.
    pub files_read: usize,

    /// The number of files without a valid identifier.
    pub invalid: usize,

    /// The number of files ending with the corruption sentinel.
    pub corrupted: usize,

    /// The number of files whose identifier was already seen.
    pub repeated: usize,
}

/// The result of a local scan.
#[derive(Debug)]
pub struct LocalScan {
    /// The retained message files, indexed by identifier.
    pub records: HashMap<MessageIdentifier, PathBuf>,

    /// The identifier cache, updated with newly parsed files.
    pub cache: IdentifierCache,

    pub report: LocalScanReport,
}

impl LocalScan {
    /// Get the record of the given identifier.
    pub fn record(&self, id: &MessageIdentifier) -> Option<LocalRecord> {
        let path = self.records.get(id)?;

        Some(LocalRecord {
            path: path.clone(),
            identifier: id.clone(),
        })
    }
}

/// The evaluation of one local file.
enum Evaluation {
    Cached(MessageIdentifier),
    Parsed(MessageIdentifier),
    Invalid,
    Corrupted,
    Skipped,
}

/// The local record fetcher.
#[derive(Clone)]
pub struct LocalRecordFetcher {
    dirs: Vec<PathBuf>,
    pool_size: usize,
    duplicate_policy: DuplicatePolicy,
    codec: Arc<dyn MessageCodec>,
}

impl LocalRecordFetcher {
    pub fn new(dirs: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            dirs: dirs.into_iter().map(Into::into).collect(),
            pool_size: DEFAULT_POOL_SIZE,
            duplicate_policy: DuplicatePolicy::default(),
            codec: Arc::new(MailParserCodec),
        }
    }

    pub fn set_some_pool_size(&mut self, size: Option<usize>) {
        self.pool_size = size.unwrap_or(DEFAULT_POOL_SIZE).max(1);
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.set_some_pool_size(Some(size));
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

    /// Scan local directories, starting from the given cache.
    ///
    /// Listing errors are fatal. Files that cannot be read or do not
    /// carry a valid identifier are excluded and logged.
    pub async fn fetch(&self, cache: IdentifierCache, cancel: &CancellationToken) -> Result<LocalScan> {
        let fetcher = self.clone();
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || fetcher.fetch_blocking(cache, &cancel)).await?
    }

    fn fetch_blocking(&self, mut cache: IdentifierCache, cancel: &CancellationToken) -> Result<LocalScan> {
        let files = list_message_files(&self.dirs)?;
        info!(files = files.len(), dirs = self.dirs.len(), "evaluating local message files");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.pool_size)
            .build()
            .map_err(Error::BuildPoolError)?;

        let files_read = AtomicUsize::new(0);
        let evaluations: Vec<Evaluation> = pool.install(|| {
            files
                .par_iter()
                .map(|(path, fingerprint)| {
                    if cancel.is_cancelled() {
                        return Evaluation::Skipped;
                    }

                    if let Some(id) = cache.get(path, fingerprint) {
                        trace!(path = %path.display(), id = id.as_str(), "cache hit");
                        return Evaluation::Cached(id.clone());
                    }

                    files_read.fetch_add(1, Ordering::Relaxed);
                    evaluate(path, self.codec.as_ref())
                })
                .collect()
        });

        if cancel.is_cancelled() {
            return Err(Error::InterruptedError);
        }

        let mut report = LocalScanReport {
            files: files.len(),
            files_read: files_read.into_inner(),
            ..Default::default()
        };

        let mut ids = Vec::with_capacity(files.len());

        for ((path, fingerprint), evaluation) in files.into_iter().zip(evaluations) {
            match evaluation {
                Evaluation::Cached(id) => ids.push((id, path)),
                Evaluation::Parsed(id) => {
                    cache.insert(path.clone(), id.clone(), fingerprint);
                    ids.push((id, path));
                }
                Evaluation::Invalid => report.invalid += 1,
                Evaluation::Corrupted => report.corrupted += 1,
                Evaluation::Skipped => (),
            }
        }

        let dedup = self.duplicate_policy.apply(ids);
        report.repeated = dedup.repeated;

        info!(
            ids = dedup.entries.len(),
            files = report.files,
            read = report.files_read,
            invalid = report.invalid,
            corrupted = report.corrupted,
            repeated = report.repeated,
            "fetched local message identifiers",
        );

        Ok(LocalScan {
            records: dedup.entries,
            cache,
            report,
        })
    }
}

/// Read and parse the given file.
fn evaluate(path: &Path, codec: &dyn MessageCodec) -> Evaluation {
    match read_identifier(path, codec) {
        Ok(id) => {
            trace!(path = %path.display(), id = id.as_str(), "parsed local message identifier");
            Evaluation::Parsed(id)
        }
        Err(err @ Error::CorruptedFileError(_)) => {
            error!("{err}");
            Evaluation::Corrupted
        }
        Err(err) => {
            error!("{err}");
            debug!("{err:?}");
            Evaluation::Invalid
        }
    }
}

/// Read the identifier of the given local message file.
pub fn read_identifier(path: &Path, codec: &dyn MessageCodec) -> Result<MessageIdentifier> {
    let content = fs::read(path).map_err(|err| Error::ReadFileError(err, path.to_owned()))?;

    if message::is_corrupted(&content) {
        return Err(Error::CorruptedFileError(path.to_owned()));
    }

    codec
        .parse_headers(message::header_block(&content))
        .identifier()
        .map_err(|err| Error::ParseIdentifierError(err, path.to_owned()))
}

/// List the message files of the given directories, sorted by path.
///
/// Only regular files are kept, except the ones being written (see
/// [`TEMP_PREFIX`]).
pub fn list_message_files(dirs: &[PathBuf]) -> Result<Vec<(PathBuf, FileFingerprint)>> {
    let mut files = Vec::new();

    for dir in dirs {
        let dir = fs::canonicalize(dir).map_err(|err| Error::CanonicalizeDirError(err, dir.clone()))?;
        let entries = fs::read_dir(&dir).map_err(|err| Error::ListDirError(err, dir.clone()))?;

        for entry in entries {
            let entry = entry.map_err(|err| Error::ListDirError(err, dir.clone()))?;

            if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                continue;
            }

            let path = entry.path();

            // follows symlinks
            match fs::metadata(&path) {
                Ok(metadata) if metadata.is_file() => {
                    files.push((path, FileFingerprint::from_metadata(&metadata)));
                }
                Ok(_) => (),
                Err(err) => {
                    debug!(path = %path.display(), "skipping unreadable entry: {err}");
                }
            }
        }

        debug!(dir = %dir.display(), "listed local directory");
    }

    files.sort_by(|(a, _), (b, _)| a.cmp(b));
    files.dedup_by(|(a, _), (b, _)| a == b);

    Ok(files)
}
