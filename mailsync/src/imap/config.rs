//! Module dedicated to the IMAP session configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The default IMAP over SSL/TLS port.
pub const DEFAULT_PORT: u16 = 993;

/// The IMAP session configuration.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ImapConfig {
    /// The IMAP server host name.
    pub host: String,

    /// The IMAP server host port.
    ///
    /// Only SSL/TLS is supported. Defaults to 993.
    #[serde(default = "default_port")]
    pub port: u16,

    /// The IMAP server login.
    ///
    /// Usually, the login is either the email address or its left
    /// part (before @).
    pub login: String,

    /// The IMAP server password.
    pub password: String,
}

impl ImapConfig {
    pub fn new(host: impl ToString, login: impl ToString, password: impl ToString) -> Self {
        Self {
            host: host.to_string(),
            port: DEFAULT_PORT,
            login: login.to_string(),
            password: password.to_string(),
        }
    }
}

impl fmt::Debug for ImapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_password() {
        let config = ImapConfig::new("imap.localhost", "alice", "s3cr3t");
        let debug = format!("{config:?}");
        assert!(debug.contains("imap.localhost"));
        assert!(debug.contains("993"));
        assert!(!debug.contains("s3cr3t"));
    }
}
