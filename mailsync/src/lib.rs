//! Rust library to reconcile an IMAP folder with local message
//! directories.
//!
//! Both stores are reduced to sets of message identifiers (the value
//! of the `Message-ID` header). The difference between those sets
//! tells which messages need to be downloaded into a local directory
//! and which ones need to be appended to the remote folder. Transfers
//! run concurrently, each worker owning its own mailbox session.
//!
//! The entry point is the [`SyncBuilder`](crate::sync::SyncBuilder):
//!
//! 1. local directories are scanned, reusing the
//!    [`IdentifierCache`](crate::cache::IdentifierCache) for files
//!    that did not change since the last run,
//! 2. remote identifiers are fetched in parallel chunks,
//! 3. both sides are [reconciled](crate::reconcile::reconcile) into a
//!    [`SyncPlan`](crate::reconcile::SyncPlan),
//! 4. missing messages are transferred in the configured direction.
//!
//! The remote side is abstracted behind the
//! [`MailboxSession`](crate::mailbox::MailboxSession) trait. An IMAP
//! implementation is available with the `imap` cargo feature.
//!
//! See examples in the /tests folder.

pub mod cache;
pub mod config;
pub mod dedup;
mod error;
pub mod filename;
#[cfg(feature = "imap")]
pub mod imap;
pub mod local;
pub mod mailbox;
pub mod message;
pub mod reconcile;
pub mod remote;
pub mod retry;
pub mod sync;
pub mod thread_pool;
pub mod transfer;

#[doc(inline)]
pub use self::error::{AnyBoxedError, AnyError, AnyResult};

/// Re-export of the cooperative cancellation token used across the
/// library.
pub use tokio_util::sync::CancellationToken;
