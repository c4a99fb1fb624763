//! # Deduplication
//!
//! Module dedicated to duplicated identifiers. Several remote
//! references or several local files can carry the same message
//! identifier. The [`DuplicatePolicy`] decides which ones take part
//! in the reconciliation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::message::MessageIdentifier;

/// The duplicate identifiers policy.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Keep the first entry seen for an identifier.
    FirstWins,

    /// Keep the last entry seen for an identifier.
    #[default]
    LastWins,

    /// Keep all entries, suffixing the identifier of the 2nd to nth
    /// copies with `~2` to `~n`.
    KeepAll,
}

/// The result of a deduplication.
#[derive(Debug)]
pub struct Deduplicated<T> {
    /// The retained entries, indexed by identifier.
    pub entries: HashMap<MessageIdentifier, T>,

    /// The number of entries whose identifier was already seen.
    pub repeated: usize,
}

impl<T> Default for Deduplicated<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            repeated: 0,
        }
    }
}

impl DuplicatePolicy {
    /// Return `true` if the given policy can be used on the other
    /// side of a sync.
    ///
    /// Suffixed identifiers only match suffixed identifiers, so
    /// [`DuplicatePolicy::KeepAll`] must be used on both sides or on
    /// none of them. Otherwise the extra copies of one side never
    /// match and get transferred again on every sync.
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        (*self == Self::KeepAll) == (*other == Self::KeepAll)
    }

    /// Apply the policy on the given entries.
    ///
    /// Entries must be given in a deterministic order, since
    /// [`DuplicatePolicy::FirstWins`] and [`DuplicatePolicy::LastWins`]
    /// depend on it.
    pub fn apply<T>(
        &self,
        entries: impl IntoIterator<Item = (MessageIdentifier, T)>,
    ) -> Deduplicated<T> {
        let mut dedup = Deduplicated::default();
        let mut copies: HashMap<MessageIdentifier, usize> = HashMap::new();

        for (id, entry) in entries {
            if !dedup.entries.contains_key(&id) {
                dedup.entries.insert(id, entry);
                continue;
            }

            dedup.repeated += 1;
            debug!(id = id.as_str(), policy = ?self, "duplicated identifier");

            match self {
                Self::FirstWins => (),
                Self::LastWins => {
                    dedup.entries.insert(id, entry);
                }
                Self::KeepAll => {
                    let nth = copies.entry(id.clone()).or_insert(1);

                    let copy_id = loop {
                        *nth += 1;
                        let copy_id = id.with_copy_suffix(*nth);
                        if !dedup.entries.contains_key(&copy_id) {
                            break copy_id;
                        }
                    };

                    dedup.entries.insert(copy_id, entry);
                }
            }
        }

        dedup
    }
}
