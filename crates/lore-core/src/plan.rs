//! Sync planning: classify a source listing against known state.
//!
//! Every sync engine uses [`diff`]; engines differ only in what they pass
//! as current items, known state and signature.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Classification of a source listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkPlan<K> {
    pub to_add: Vec<K>,
    pub to_update: Vec<K>,
    pub to_delete: Vec<K>,
    pub unchanged: Vec<K>,
}

impl<K> Default for WorkPlan<K> {
    fn default() -> Self {
        Self {
            to_add: Vec::new(),
            to_update: Vec::new(),
            to_delete: Vec::new(),
            unchanged: Vec::new(),
        }
    }
}

impl<K> WorkPlan<K> {
    /// Items that need processing (adds then updates).
    pub fn pending(&self) -> impl Iterator<Item = &K> {
        self.to_add.iter().chain(self.to_update.iter())
    }

    pub fn pending_len(&self) -> usize {
        self.to_add.len() + self.to_update.len()
    }

    /// True when nothing needs to be added, updated or deleted.
    pub fn is_noop(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

/// Diff `current` against `known`.
///
/// A key missing from `known` is an add, a key whose signature differs is
/// an update, anything else is unchanged. Known keys missing from
/// `current` are deletes. Each output list is sorted by key; duplicate
/// keys in `current` keep their first occurrence.
pub fn diff<K, S>(current: &[(K, S)], known: &HashMap<K, S>) -> WorkPlan<K>
where
    K: Eq + Hash + Clone + Ord,
    S: PartialEq,
{
    let mut plan = WorkPlan::default();
    let mut seen: HashSet<&K> = HashSet::with_capacity(current.len());

    for (key, signature) in current {
        if !seen.insert(key) {
            continue;
        }
        match known.get(key) {
            None => plan.to_add.push(key.clone()),
            Some(previous) if previous != signature => plan.to_update.push(key.clone()),
            Some(_) => plan.unchanged.push(key.clone()),
        }
    }

    plan.to_delete = known
        .keys()
        .filter(|key| !seen.contains(key))
        .cloned()
        .collect();

    plan.to_add.sort();
    plan.to_update.sort();
    plan.to_delete.sort();
    plan.unchanged.sort();
    plan
}
