//! Three-way reconciliation of the persisted snapshot against a fresh walk
//!
//! `localPath` is the only group field a re-walk cannot reproduce, so it is
//! copied forward explicitly for every group present on both sides. Every
//! other field comes from the fresh walk.

use crate::model::{ChartGroup, GroupKey, Snapshot};
use std::collections::{BTreeSet, HashSet};

/// Reconciliation switches
#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    /// Queue unchanged groups for fetch as well
    pub force_rescan: bool,
    /// Roots deliberately left out of this run; assumed unchanged
    pub excluded_roots: HashSet<String>,
}

/// Disjoint decision sets over `(rootId, groupId)`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationResult {
    pub to_fetch: BTreeSet<GroupKey>,
    pub to_remove: BTreeSet<GroupKey>,
    pub retained: BTreeSet<GroupKey>,
}

/// Full reconciliation output
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub result: ReconciliationResult,
    /// Snapshot to persist now: removals applied, new groups not yet added
    pub updated: Snapshot,
    /// Groups to fetch. Forced rescans keep their old `local_path`.
    pub to_fetch: Vec<ChartGroup>,
    /// Groups leaving the snapshot, as they were persisted
    pub to_remove: Vec<ChartGroup>,
}

impl Reconciliation {
    fn fetch(&mut self, group: ChartGroup) {
        self.result.to_fetch.insert(group.key());
        self.to_fetch.push(group);
    }

    fn remove(&mut self, group: ChartGroup) {
        self.result.to_remove.insert(group.key());
        self.to_remove.push(group);
    }
}

/// Diff `old` against `new`
pub fn reconcile(old: &Snapshot, new: &Snapshot, options: &ReconcileOptions) -> Reconciliation {
    let mut out = Reconciliation::default();

    let roots: BTreeSet<&String> = old.root_ids().chain(new.root_ids()).collect();

    for root_id in roots {
        match (old.groups_in(root_id), new.groups_in(root_id)) {
            (None, Some(new_groups)) => {
                out.updated.touch_root(root_id);
                for group in new_groups.values() {
                    let mut group = group.clone();
                    group.local_path = None;
                    out.fetch(group);
                }
            }
            (Some(old_groups), None) => {
                if options.excluded_roots.contains(root_id.as_str()) {
                    tracing::debug!(root_id = %root_id, groups = old_groups.len(), "Root excluded from this run; carried forward");
                    out.updated.touch_root(root_id);
                    for group in old_groups.values() {
                        out.result.retained.insert(group.key());
                        out.updated.insert(group.clone());
                    }
                } else {
                    tracing::info!(root_id = %root_id, groups = old_groups.len(), "Root no longer scanned; removing its groups");
                    for group in old_groups.values() {
                        out.remove(group.clone());
                    }
                }
            }
            (Some(old_groups), Some(new_groups)) => {
                out.updated.touch_root(root_id);

                for (group_id, old_group) in old_groups {
                    if !new_groups.contains_key(group_id) {
                        out.remove(old_group.clone());
                    }
                }

                for (group_id, new_group) in new_groups {
                    let Some(old_group) = old_groups.get(group_id) else {
                        let mut group = new_group.clone();
                        group.local_path = None;
                        out.fetch(group);
                        continue;
                    };

                    let mut refreshed = new_group.clone();
                    refreshed.local_path = old_group.local_path.clone();
                    out.updated.insert(refreshed.clone());

                    if options.force_rescan {
                        out.fetch(refreshed);
                    } else {
                        out.result.retained.insert(refreshed.key());
                    }
                }
            }
            (None, None) => {}
        }
    }

    tracing::info!(
        to_fetch = out.result.to_fetch.len(),
        to_remove = out.result.to_remove.len(),
        retained = out.result.retained.len(),
        force_rescan = options.force_rescan,
        "Reconciliation complete"
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RemoteFile, SourceRoot};
    use std::path::PathBuf;

    fn group(root: &str, id: &str, name: &str, local: Option<&str>) -> ChartGroup {
        ChartGroup {
            group_id: id.to_string(),
            source: SourceRoot {
                root_id: root.to_string(),
                display_name: root.to_uppercase(),
                is_single_file_source: false,
                required_icon: None,
            },
            folder_name: name.to_string(),
            folder_id: format!("{}-folder", id),
            is_archive: false,
            members: vec![RemoteFile {
                id: format!("{}-file", id),
                name: "notes.chart".to_string(),
                size_bytes: 10,
                content_hash: Some(id.to_string()),
                modified_time: None,
            }],
            local_path: local.map(PathBuf::from),
        }
    }

    fn keys(pairs: &[(&str, &str)]) -> BTreeSet<GroupKey> {
        pairs.iter().map(|(r, g)| GroupKey::new(r, g)).collect()
    }

    #[test]
    fn test_identical_snapshots_are_idempotent() {
        let old: Snapshot = vec![
            group("a", "g1", "One", Some("/dl/1")),
            group("a", "g2", "Two", Some("/dl/2")),
            group("b", "g3", "Three", Some("/dl/3")),
        ]
        .into_iter()
        .collect();
        let mut new = old.clone();
        for key in old.keys() {
            if let Some(g) = new.remove(&key) {
                new.insert(ChartGroup { local_path: None, ..g });
            }
        }

        let rec = reconcile(&old, &new, &ReconcileOptions::default());

        assert!(rec.result.to_fetch.is_empty());
        assert!(rec.result.to_remove.is_empty());
        assert_eq!(rec.result.retained, old.keys().collect());
        assert_eq!(rec.updated, old);
    }

    #[test]
    fn test_group_changes_within_a_root() {
        let old: Snapshot = vec![
            group("a", "keep", "Keep", Some("/dl/keep")),
            group("a", "gone", "Gone", Some("/dl/gone")),
        ]
        .into_iter()
        .collect();
        let new: Snapshot = vec![
            group("a", "keep", "Keep", None),
            group("a", "fresh", "Fresh", None),
        ]
        .into_iter()
        .collect();

        let rec = reconcile(&old, &new, &ReconcileOptions::default());

        assert_eq!(rec.result.to_fetch, keys(&[("a", "fresh")]));
        assert_eq!(rec.result.to_remove, keys(&[("a", "gone")]));
        assert_eq!(rec.result.retained, keys(&[("a", "keep")]));
        assert_eq!(rec.to_remove[0].local_path, Some(PathBuf::from("/dl/gone")));
        // New groups are added only once fetched
        assert!(rec.updated.get(&GroupKey::new("a", "fresh")).is_none());
        assert!(rec.updated.get(&GroupKey::new("a", "gone")).is_none());
    }

    #[test]
    fn test_new_root_is_fetched_whole() {
        let old = Snapshot::new();
        let new: Snapshot = vec![group("n", "g1", "One", None), group("n", "g2", "Two", None)]
            .into_iter()
            .collect();

        let rec = reconcile(&old, &new, &ReconcileOptions::default());

        assert_eq!(rec.result.to_fetch, keys(&[("n", "g1"), ("n", "g2")]));
        assert!(rec.to_fetch.iter().all(|g| g.local_path.is_none()));
        assert!(rec.updated.contains_root("n"));
    }

    #[test]
    fn test_missing_root_is_removed_unless_excluded() {
        let old: Snapshot = vec![group("x", "g1", "One", Some("/dl/1"))].into_iter().collect();
        let new = Snapshot::new();

        let rec = reconcile(&old, &new, &ReconcileOptions::default());
        assert_eq!(rec.result.to_remove, keys(&[("x", "g1")]));
        assert!(rec.updated.is_empty());

        let options = ReconcileOptions {
            excluded_roots: ["x".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let rec = reconcile(&old, &new, &options);
        assert!(rec.result.to_remove.is_empty());
        assert_eq!(rec.result.retained, keys(&[("x", "g1")]));
        assert_eq!(rec.updated, old);
    }

    #[test]
    fn test_local_path_carries_over_with_refreshed_fields() {
        let old: Snapshot = vec![group("a", "g", "Old Name", Some("/dl/g"))].into_iter().collect();
        let new: Snapshot = vec![group("a", "g", "New Name", None)].into_iter().collect();

        let rec = reconcile(&old, &new, &ReconcileOptions::default());
        let updated = rec.updated.get(&GroupKey::new("a", "g")).unwrap();

        assert_eq!(updated.folder_name, "New Name");
        assert_eq!(updated.local_path, Some(PathBuf::from("/dl/g")));
    }

    #[test]
    fn test_force_rescan_queues_unchanged_groups() {
        let old: Snapshot = vec![group("a", "g", "Name", Some("/dl/g"))].into_iter().collect();
        let new: Snapshot = vec![group("a", "g", "Renamed", None)].into_iter().collect();
        let options = ReconcileOptions {
            force_rescan: true,
            ..Default::default()
        };

        let rec = reconcile(&old, &new, &options);

        assert_eq!(rec.result.to_fetch, keys(&[("a", "g")]));
        assert!(rec.result.retained.is_empty());
        assert_eq!(rec.to_fetch[0].local_path, Some(PathBuf::from("/dl/g")));
        assert_eq!(rec.to_fetch[0].folder_name, "Renamed");
        let updated = rec.updated.get(&GroupKey::new("a", "g")).unwrap();
        assert_eq!(updated.local_path, Some(PathBuf::from("/dl/g")));
    }
}
