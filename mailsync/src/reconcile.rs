//! # Reconciliation
//!
//! Module dedicated to the comparison of local and remote
//! identifiers. The [`reconcile`] function is pure: the same inputs
//! always give the same [`SyncPlan`].

use std::{
    collections::HashMap,
    fmt,
    hash::{BuildHasher, Hash},
};

use crate::message::MessageIdentifier;

/// The sync plan.
///
/// The three sets are disjoint and sorted by identifier.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SyncPlan {
    /// Identifiers only present in the remote folder, to download.
    pub only_remote: Vec<MessageIdentifier>,

    /// Identifiers only present in local directories, to upload.
    pub only_local: Vec<MessageIdentifier>,

    /// Identifiers present on both sides.
    pub common: Vec<MessageIdentifier>,
}

impl SyncPlan {
    /// Return `true` if both sides already hold the same messages.
    pub fn is_synced(&self) -> bool {
        self.only_remote.is_empty() && self.only_local.is_empty()
    }
}

impl fmt::Display for SyncPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "found {} remote-only, {} local-only, {} common identifiers",
            self.only_remote.len(),
            self.only_local.len(),
            self.common.len()
        )
    }
}

/// Compare local and remote identifiers.
///
/// Identifiers are compared using exact string equality.
pub fn reconcile<L, R, S>(
    local: &HashMap<MessageIdentifier, L, S>,
    remote: &HashMap<MessageIdentifier, R, S>,
) -> SyncPlan
where
    S: BuildHasher,
{
    let mut plan = SyncPlan {
        only_remote: difference(remote, local),
        only_local: difference(local, remote),
        common: local
            .keys()
            .filter(|id| remote.contains_key(*id))
            .cloned()
            .collect(),
    };

    plan.common.sort_unstable();
    plan
}

fn difference<K, A, B, S>(left: &HashMap<K, A, S>, right: &HashMap<K, B, S>) -> Vec<K>
where
    K: Clone + Eq + Hash + Ord,
    S: BuildHasher,
{
    let mut keys: Vec<K> = left
        .keys()
        .filter(|key| !right.contains_key(*key))
        .cloned()
        .collect();

    keys.sort_unstable();
    keys
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn ids(ids: &[&str]) -> HashMap<MessageIdentifier, ()> {
        ids.iter()
            .map(|id| (MessageIdentifier::from_header_value(id).unwrap(), ()))
            .collect()
    }

    fn strs(ids: &[MessageIdentifier]) -> Vec<&str> {
        ids.iter().map(MessageIdentifier::as_str).collect()
    }

    #[test]
    fn reconcile_three_messages() {
        let local = ids(&["<c>", "<b>"]);
        let remote = ids(&["<b>", "<a>"]);

        let plan = reconcile(&local, &remote);

        assert_eq!(strs(&plan.only_remote), vec!["<a>"]);
        assert_eq!(strs(&plan.only_local), vec!["<c>"]);
        assert_eq!(strs(&plan.common), vec!["<b>"]);
        assert!(!plan.is_synced());
        assert_eq!(
            plan.to_string(),
            "found 1 remote-only, 1 local-only, 1 common identifiers"
        );
    }

    #[test]
    fn reconcile_is_a_partition() {
        let local = ids(&["<1>", "<2>", "<3>", "<4>"]);
        let remote = ids(&["<3>", "<4>", "<5>", "<6>", "<7>"]);

        let plan = reconcile(&local, &remote);

        let only_remote: HashSet<_> = plan.only_remote.iter().collect();
        let only_local: HashSet<_> = plan.only_local.iter().collect();
        let common: HashSet<_> = plan.common.iter().collect();

        assert!(only_remote.is_disjoint(&only_local));
        assert!(only_remote.is_disjoint(&common));
        assert!(only_local.is_disjoint(&common));

        let union: HashSet<_> = only_remote
            .union(&only_local)
            .chain(common.iter())
            .collect();
        assert_eq!(union.len(), 7);
        assert_eq!(plan.only_local.len() + plan.common.len(), local.len());
        assert_eq!(plan.only_remote.len() + plan.common.len(), remote.len());
    }

    #[test]
    fn reconcile_identical_sides() {
        let local = ids(&["<a>", "<b>"]);
        let plan = reconcile(&local, &local.clone());

        assert!(plan.is_synced());
        assert_eq!(strs(&plan.common), vec!["<a>", "<b>"]);
    }

    #[test]
    fn reconcile_is_case_sensitive() {
        let plan = reconcile(&ids(&["<A@x>"]), &ids(&["<a@x>"]));

        assert_eq!(strs(&plan.only_local), vec!["<A@x>"]);
        assert_eq!(strs(&plan.only_remote), vec!["<a@x>"]);
        assert!(plan.common.is_empty());
    }
}
