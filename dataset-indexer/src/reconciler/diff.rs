//! Three-way diff between the ids in the index and the ids that belong there.

use std::collections::{BTreeSet, HashSet};

use dataset_indexer_shared::RecordId;

/// Ids partitioned by the action that brings the index in line with the
/// catalog. The three sets are pairwise disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    /// Wanted and not yet indexed.
    pub to_create: BTreeSet<RecordId>,
    /// Wanted and already indexed; rewritten with fresh content.
    pub to_update: BTreeSet<RecordId>,
    /// Indexed but no longer wanted.
    pub to_delete: BTreeSet<RecordId>,
}

impl Diff {
    /// Ids that need a freshly transformed document, in id order.
    pub fn to_write(&self) -> impl Iterator<Item = &RecordId> {
        self.to_update.iter().chain(self.to_create.iter())
    }
}

/// Compare the indexed ids with the wanted ids.
///
/// Applying the result to `existing` yields exactly `wanted`:
/// `(existing ∪ to_create ∪ to_update) − to_delete == wanted`.
pub fn compute_diff(existing: &HashSet<RecordId>, wanted: &HashSet<RecordId>) -> Diff {
    Diff {
        to_create: wanted.difference(existing).cloned().collect(),
        to_update: wanted.intersection(existing).cloned().collect(),
        to_delete: existing.difference(wanted).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(ids: &[&str]) -> HashSet<RecordId> {
        ids.iter().map(|id| RecordId::from(*id)).collect()
    }

    fn sorted(ids: &BTreeSet<RecordId>) -> Vec<&str> {
        ids.iter().map(RecordId::as_str).collect()
    }

    #[test]
    fn test_diff_partitions_ids() {
        let diff = compute_diff(&ids(&["a", "b", "c"]), &ids(&["b", "c", "d"]));

        assert_eq!(sorted(&diff.to_create), vec!["d"]);
        assert_eq!(sorted(&diff.to_update), vec!["b", "c"]);
        assert_eq!(sorted(&diff.to_delete), vec!["a"]);
        assert_eq!(
            diff.to_write().map(RecordId::as_str).collect::<Vec<_>>(),
            vec!["b", "c", "d"]
        );
    }

    #[test]
    fn test_applying_diff_yields_wanted() {
        let existing = ids(&["x", "y", "stale-1", "stale-2"]);
        let wanted = ids(&["x", "y", "new"]);
        let diff = compute_diff(&existing, &wanted);

        let mut result: HashSet<RecordId> = existing.clone();
        result.extend(diff.to_create.iter().cloned());
        result.extend(diff.to_update.iter().cloned());
        for id in &diff.to_delete {
            result.remove(id);
        }
        assert_eq!(result, wanted);

        assert!(diff.to_create.is_disjoint(&diff.to_update));
        assert!(diff.to_create.is_disjoint(&diff.to_delete));
        assert!(diff.to_update.is_disjoint(&diff.to_delete));
    }

    #[test]
    fn test_empty_sides() {
        let diff = compute_diff(&HashSet::new(), &ids(&["a"]));
        assert_eq!(sorted(&diff.to_create), vec!["a"]);
        assert!(diff.to_delete.is_empty());

        let diff = compute_diff(&ids(&["a"]), &HashSet::new());
        assert_eq!(sorted(&diff.to_delete), vec!["a"]);

        assert_eq!(compute_diff(&HashSet::new(), &HashSet::new()), Diff::default());
    }
}
