#![allow(dead_code)]

use std::{
    any::Any,
    collections::BTreeMap,
    fs,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use mailsync::{
    mailbox::{Generation, MailboxSession, MailboxSessionBuilder, Uid},
    message::MessageIdentifier,
    retry::RetryPolicy,
    AnyError, AnyResult,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FakeError {
    #[error("connection refused")]
    ConnectionRefused,
    #[error("connection reset")]
    ConnectionReset,
    #[error("session is dead")]
    DeadSession,
}

impl AnyError for FakeError {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn fail<T>(err: FakeError) -> AnyResult<T> {
    Err(Box::new(err))
}

/// The state of the in-memory folder, shared by all sessions.
#[derive(Debug, Default)]
pub struct FakeState {
    pub generation: Generation,
    pub messages: BTreeMap<Uid, Vec<u8>>,
    pub next_uid: Uid,

    pub connects: usize,
    pub appended: Vec<(String, Vec<u8>, Option<DateTime<FixedOffset>>)>,

    /// Remaining connections to refuse.
    pub refuse_connects: usize,
    /// Remaining header fetches to fail.
    pub fail_fetch_headers: usize,
    /// Remaining appends to fail. A failed append kills its session.
    pub fail_appends: usize,
    /// Makes every append fail.
    pub always_fail_appends: bool,
    /// Remaining header fetches that never answer.
    pub hang_fetch_headers: usize,
    /// Remaining message fetches that never answer.
    pub hang_fetch_messages: usize,
}

/// Sleep for a long time if the given counter is not exhausted yet.
async fn hang(state: &Mutex<FakeState>, counter: impl FnOnce(&mut FakeState) -> &mut usize) {
    let hang = {
        let mut state = state.lock().unwrap();
        let remaining = counter(&mut *state);
        let hang = *remaining > 0;
        *remaining = remaining.saturating_sub(1);
        hang
    };

    if hang {
        tokio::time::sleep(Duration::from_secs(60)).await;
    }
}

/// In-memory mailbox, cloned into every session.
#[derive(Clone, Debug, Default)]
pub struct FakeMailbox {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeMailbox {
    pub fn new(generation: Generation) -> Self {
        let mailbox = Self::default();
        mailbox.state.lock().unwrap().generation = generation;
        mailbox
    }

    pub fn insert(&self, raw: impl AsRef<[u8]>) -> Uid {
        let mut state = self.state.lock().unwrap();
        state.next_uid += 1;
        let uid = state.next_uid;
        state.messages.insert(uid, raw.as_ref().to_vec());
        uid
    }

    /// Move all messages to a new generation, renumbering them.
    pub fn renumber(&self, generation: Generation) {
        let mut state = self.state.lock().unwrap();
        let messages: Vec<_> = std::mem::take(&mut state.messages).into_values().collect();
        state.generation = generation;

        for raw in messages {
            state.next_uid += 100;
            let uid = state.next_uid;
            state.messages.insert(uid, raw);
        }
    }

    pub fn identifiers(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<_> = state
            .messages
            .values()
            .filter_map(|raw| identifier_value(raw))
            .collect();
        ids.sort();
        ids
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }
}

#[async_trait]
impl MailboxSessionBuilder for FakeMailbox {
    type Session = FakeSession;

    async fn connect(&self) -> AnyResult<Self::Session> {
        let mut state = self.state.lock().unwrap();

        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return fail(FakeError::ConnectionRefused);
        }

        state.connects += 1;

        Ok(FakeSession {
            state: self.state.clone(),
            dead: false,
        })
    }
}

pub struct FakeSession {
    state: Arc<Mutex<FakeState>>,
    dead: bool,
}

impl FakeSession {
    fn check(&self) -> AnyResult<()> {
        if self.dead {
            return fail(FakeError::DeadSession);
        }
        Ok(())
    }
}

#[async_trait]
impl MailboxSession for FakeSession {
    async fn select(&mut self, _folder: &str, _read_only: bool) -> AnyResult<Generation> {
        self.check()?;
        Ok(self.state.lock().unwrap().generation)
    }

    async fn search_all(&mut self) -> AnyResult<Vec<Uid>> {
        self.check()?;
        Ok(self.state.lock().unwrap().messages.keys().copied().collect())
    }

    async fn fetch_identifier_headers(&mut self, uids: &[Uid]) -> AnyResult<Vec<(Uid, Vec<u8>)>> {
        self.check()?;
        hang(&self.state, |state| &mut state.hang_fetch_headers).await;
        let mut state = self.state.lock().unwrap();

        if state.fail_fetch_headers > 0 {
            state.fail_fetch_headers -= 1;
            self.dead = true;
            return fail(FakeError::ConnectionReset);
        }

        let headers = uids
            .iter()
            .filter_map(|uid| {
                let raw = state.messages.get(uid)?;
                let line = match identifier_line(raw) {
                    Some(line) => format!("{line}\r\n\r\n").into_bytes(),
                    None => b"\r\n".to_vec(),
                };
                Some((*uid, line))
            })
            .collect();

        Ok(headers)
    }

    async fn fetch_message(&mut self, uid: Uid) -> AnyResult<Option<Vec<u8>>> {
        self.check()?;
        hang(&self.state, |state| &mut state.hang_fetch_messages).await;
        Ok(self.state.lock().unwrap().messages.get(&uid).cloned())
    }

    async fn search_identifier(&mut self, id: &MessageIdentifier) -> AnyResult<Vec<Uid>> {
        self.check()?;
        let state = self.state.lock().unwrap();

        let uids = state
            .messages
            .iter()
            .filter(|(_, raw)| identifier_value(raw).as_deref() == Some(id.as_str()))
            .map(|(uid, _)| *uid)
            .collect();

        Ok(uids)
    }

    async fn append(
        &mut self,
        folder: &str,
        raw: &[u8],
        date: Option<DateTime<FixedOffset>>,
    ) -> AnyResult<()> {
        self.check()?;
        let mut state = self.state.lock().unwrap();

        if state.always_fail_appends {
            return fail(FakeError::ConnectionReset);
        }

        if state.fail_appends > 0 {
            state.fail_appends -= 1;
            self.dead = true;
            return fail(FakeError::ConnectionReset);
        }

        state.next_uid += 1;
        let uid = state.next_uid;
        state.messages.insert(uid, raw.to_vec());
        state.appended.push((folder.to_owned(), raw.to_vec(), date));

        Ok(())
    }

    async fn close(&mut self) -> AnyResult<()> {
        Ok(())
    }
}

fn identifier_line(raw: &[u8]) -> Option<String> {
    String::from_utf8_lossy(raw)
        .lines()
        .take_while(|line| !line.is_empty())
        .find(|line| line.to_ascii_lowercase().starts_with("message-id:"))
        .map(|line| line.trim_end().to_owned())
}

fn identifier_value(raw: &[u8]) -> Option<String> {
    let line = identifier_line(raw)?;
    Some(line["message-id:".len()..].trim().to_owned())
}

/// Build a raw message with the given identifier and subject.
pub fn message(id: &str, subject: &str) -> Vec<u8> {
    format!(
        "Message-ID: {id}\r\nSubject: {subject}\r\nDate: Tue, 1 Jul 2003 10:52:37 +0200\r\nFrom: alice@localhost\r\n\r\nHello!\r\n"
    )
    .into_bytes()
}

pub fn write_message(dir: &Path, name: &str, id: &str, subject: &str) {
    fs::write(dir.join(name), message(id, subject)).unwrap();
}

/// A retry policy that does not make tests wait.
pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff_ms: 1,
        max_backoff_ms: 5,
        max_failures: 5,
        timeout_ms: 5_000,
    }
}

/// List regular file names of the given directory, temporary ones
/// included.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| {
            let entry = entry.unwrap();
            entry
                .file_type()
                .unwrap()
                .is_file()
                .then(|| entry.file_name().to_string_lossy().into_owned())
        })
        .collect();
    names.sort();
    names
}
