//! # Configuration
//!
//! Module dedicated to the sync configuration. All types can be
//! (de)serialized using kebab-case keys, which allows the CLI to read
//! them from a TOML file.

use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{cache::DEFAULT_CACHE_FILE, dedup::DuplicatePolicy, local, remote, retry::RetryPolicy};

/// The sync mode.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// Only report what differs, without transferring anything.
    #[default]
    Dry,

    /// Fetch and parse missing messages without writing nor
    /// appending them.
    DrySync,

    /// Transfer missing messages.
    Sync,
}

impl SyncMode {
    pub fn is_dry_run(&self) -> bool {
        !matches!(self, Self::Sync)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dry => write!(f, "dry"),
            Self::DrySync => write!(f, "dry-sync"),
            Self::Sync => write!(f, "sync"),
        }
    }
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dry" => Ok(Self::Dry),
            "dry-sync" | "dry_sync" => Ok(Self::DrySync),
            "sync" => Ok(Self::Sync),
            _ => Err(format!("invalid sync mode {s}")),
        }
    }
}

/// The sync direction.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncDirection {
    /// Download remote-only messages.
    Download,

    /// Upload local-only messages.
    Upload,

    /// Download remote-only messages, then upload local-only ones.
    #[default]
    Both,
}

impl SyncDirection {
    pub fn downloads(&self) -> bool {
        matches!(self, Self::Download | Self::Both)
    }

    pub fn uploads(&self) -> bool {
        matches!(self, Self::Upload | Self::Both)
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Download => write!(f, "download"),
            Self::Upload => write!(f, "upload"),
            Self::Both => write!(f, "both"),
        }
    }
}

impl FromStr for SyncDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "download" => Ok(Self::Download),
            "upload" => Ok(Self::Upload),
            "both" => Ok(Self::Both),
            _ => Err(format!("invalid sync direction {s}")),
        }
    }
}

/// The sync configuration.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SyncConfig {
    /// The remote folder to reconcile.
    pub folder: String,

    /// The local directories to reconcile.
    pub dirs: Vec<PathBuf>,

    /// The directory receiving downloaded messages. Defaults to the
    /// first local directory.
    pub download_dir: Option<PathBuf>,

    /// The maximum number of remote messages to consider.
    pub limit: Option<usize>,

    /// The number of sessions used for remote operations.
    pub remote_pool_size: usize,

    /// The number of threads used to evaluate local files.
    pub local_pool_size: usize,

    pub mode: SyncMode,
    pub direction: SyncDirection,

    /// The path of the identifier cache file.
    pub cache_path: PathBuf,

    pub retry: RetryPolicy,
    pub local_duplicates: DuplicatePolicy,
    pub remote_duplicates: DuplicatePolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            folder: String::from("INBOX"),
            dirs: Vec::new(),
            download_dir: None,
            limit: None,
            remote_pool_size: remote::DEFAULT_POOL_SIZE,
            local_pool_size: local::DEFAULT_POOL_SIZE,
            mode: SyncMode::default(),
            direction: SyncDirection::default(),
            cache_path: PathBuf::from(DEFAULT_CACHE_FILE),
            retry: RetryPolicy::default(),
            local_duplicates: DuplicatePolicy::default(),
            remote_duplicates: DuplicatePolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Find the directory receiving downloaded messages.
    pub fn find_download_dir(&self) -> Option<&PathBuf> {
        self.download_dir.as_ref().or_else(|| self.dirs.first())
    }

    /// Find the directories holding local messages: the local
    /// directories, plus the download directory when it is not one
    /// of them.
    pub fn find_local_dirs(&self) -> Vec<&PathBuf> {
        let mut dirs: Vec<_> = self.dirs.iter().collect();

        if let Some(dir) = &self.download_dir {
            if !self.dirs.contains(dir) {
                dirs.push(dir);
            }
        }

        dirs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mode_and_direction() {
        assert_eq!("dry".parse(), Ok(SyncMode::Dry));
        assert_eq!("dry_sync".parse(), Ok(SyncMode::DrySync));
        assert_eq!("dry-sync".parse(), Ok(SyncMode::DrySync));
        assert!("wet".parse::<SyncMode>().is_err());
        assert_eq!("upload".parse(), Ok(SyncDirection::Upload));
        assert!(SyncDirection::Both.downloads() && SyncDirection::Both.uploads());
    }

    #[test]
    fn download_dir_defaults_to_first_dir() {
        let mut config = SyncConfig {
            dirs: vec!["/a".into(), "/b".into()],
            ..Default::default()
        };
        assert_eq!(config.find_download_dir(), Some(&PathBuf::from("/a")));

        config.download_dir = Some("/c".into());
        assert_eq!(config.find_download_dir(), Some(&PathBuf::from("/c")));
    }

    #[test]
    fn local_dirs_include_download_dir() {
        let mut config = SyncConfig {
            dirs: vec!["/a".into(), "/b".into()],
            ..Default::default()
        };
        assert_eq!(config.find_local_dirs(), vec![&PathBuf::from("/a"), &PathBuf::from("/b")]);

        config.download_dir = Some("/b".into());
        assert_eq!(config.find_local_dirs().len(), 2);

        config.download_dir = Some("/c".into());
        assert_eq!(config.find_local_dirs()[2], &PathBuf::from("/c"));
    }

    #[test]
    fn deserialize_partial_config() {
        let config: SyncConfig = serde_json::from_str(
            r#"{"folder":"Archive","dirs":["/mail/cur"],"mode":"dry-sync","retry":{"max-attempts":5},"local-duplicates":"keep-all"}"#,
        )
        .unwrap();

        assert_eq!(config.folder, "Archive");
        assert_eq!(config.mode, SyncMode::DrySync);
        assert_eq!(config.direction, SyncDirection::Both);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.max_failures, 5);
        assert_eq!(config.local_duplicates, DuplicatePolicy::KeepAll);
        assert_eq!(config.remote_duplicates, DuplicatePolicy::LastWins);
    }
}
