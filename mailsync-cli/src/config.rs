//! Module dedicated to the CLI configuration.
//!
//! The configuration is read from an optional TOML file, then
//! overridden by command line arguments and environment variables.

use std::{fs, io, path::PathBuf};

use mailsync::{
    config::{SyncConfig, SyncDirection, SyncMode},
    imap::config::{ImapConfig, DEFAULT_PORT},
};
use serde::Deserialize;
use thiserror::Error;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read configuration file {1}")]
    ReadConfigFileError(#[source] io::Error, PathBuf),
    #[error("cannot parse configuration file {1}")]
    ParseConfigFileError(#[source] toml::de::Error, PathBuf),
    #[error("cannot build IMAP configuration: missing {0}")]
    MissingImapParamError(&'static str),
}

/// The global `Result` alias of the module.
pub type Result<T> = std::result::Result<T, Error>;

/// The IMAP section of the configuration file.
///
/// All fields are optional since they can be given from the command
/// line or from the environment.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ImapFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub login: Option<String>,
    pub password: Option<String>,
}

/// The configuration file.
///
/// Sync options live at the top level, IMAP options live in the
/// `[imap]` table.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileConfig {
    #[serde(flatten)]
    pub sync: SyncConfig,
    pub imap: ImapFileConfig,
}

impl FileConfig {
    pub fn from_path(path: PathBuf) -> Result<Self> {
        let content =
            fs::read_to_string(&path).map_err(|err| Error::ReadConfigFileError(err, path.clone()))?;
        toml::from_str(&content).map_err(|err| Error::ParseConfigFileError(err, path))
    }
}

/// The overrides given from the command line.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub login: Option<String>,
    pub password: Option<String>,
    pub folder: Option<String>,
    pub dirs: Vec<PathBuf>,
    pub download_dir: Option<PathBuf>,
    pub limit: Option<usize>,
    pub remote_pool_size: Option<usize>,
    pub local_pool_size: Option<usize>,
    pub mode: Option<SyncMode>,
    pub direction: Option<SyncDirection>,
    pub cache_path: Option<PathBuf>,
}

impl FileConfig {
    /// Apply the given overrides, then split the configuration into
    /// its IMAP and sync parts.
    pub fn merge(self, overrides: Overrides) -> Result<(ImapConfig, SyncConfig)> {
        let Self { mut sync, imap } = self;

        let host = overrides
            .host
            .or(imap.host)
            .ok_or(Error::MissingImapParamError("host"))?;
        let login = overrides
            .login
            .or(imap.login)
            .ok_or(Error::MissingImapParamError("login"))?;
        let password = overrides
            .password
            .or(imap.password)
            .ok_or(Error::MissingImapParamError("password"))?;

        let mut imap_config = ImapConfig::new(host, login, password);
        imap_config.port = overrides.port.or(imap.port).unwrap_or(DEFAULT_PORT);

        if let Some(folder) = overrides.folder {
            sync.folder = folder;
        }
        if !overrides.dirs.is_empty() {
            sync.dirs = overrides.dirs;
        }
        if overrides.download_dir.is_some() {
            sync.download_dir = overrides.download_dir;
        }
        if overrides.limit.is_some() {
            sync.limit = overrides.limit;
        }
        if let Some(size) = overrides.remote_pool_size {
            sync.remote_pool_size = size;
        }
        if let Some(size) = overrides.local_pool_size {
            sync.local_pool_size = size;
        }
        if let Some(mode) = overrides.mode {
            sync.mode = mode;
        }
        if let Some(direction) = overrides.direction {
            sync.direction = direction;
        }
        if let Some(path) = overrides.cache_path {
            sync.cache_path = path;
        }

        Ok((imap_config, sync))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use mailsync::config::SyncMode;

    use super::*;

    #[test]
    fn merge_file_and_overrides() {
        let config: FileConfig = toml::from_str(
            r#"
                folder = "Archive"
                dirs = ["/mail/cur", "/mail/new"]
                mode = "dry-sync"

                [retry]
                max-attempts = 5

                [imap]
                host = "imap.localhost"
                login = "alice"
            "#,
        )
        .unwrap();

        let overrides = Overrides {
            password: Some("secret".into()),
            mode: Some(SyncMode::Sync),
            ..Default::default()
        };

        let (imap, sync) = config.merge(overrides).unwrap();

        assert_eq!(imap.host, "imap.localhost");
        assert_eq!(imap.port, 993);
        assert_eq!(imap.password, "secret");
        assert_eq!(sync.folder, "Archive");
        assert_eq!(sync.dirs, vec![PathBuf::from("/mail/cur"), PathBuf::from("/mail/new")]);
        assert_eq!(sync.mode, SyncMode::Sync);
        assert_eq!(sync.retry.max_attempts, 5);
    }

    #[test]
    fn merge_without_credentials() {
        let overrides = Overrides {
            host: Some("imap.localhost".into()),
            ..Default::default()
        };

        let err = FileConfig::default().merge(overrides).unwrap_err();
        assert!(matches!(err, Error::MissingImapParamError("login")));
    }
}
