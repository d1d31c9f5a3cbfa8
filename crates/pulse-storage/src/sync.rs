//! Relation Synchronizer: reconcile a moment's desired tag set with the
//! persisted one using the fewest writes.
//!
//! Names present on both sides are never touched, so re-running a sync with
//! an unchanged desired set performs no writes at all.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use pulse_core::error::Result;
use pulse_core::types::normalize_tag;

use crate::tags::TagRepository;

/// Writes needed to turn the persisted tag set into the desired one.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub to_add: Vec<String>,
    pub to_remove: Vec<String>,
}

impl SyncPlan {
    pub fn is_noop(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Compute the [`SyncPlan`] for two tag-name collections.
///
/// Desired names are normalized (trimmed, lowercased, de-duplicated, empty
/// names dropped); persisted names are already normalized. Output vectors
/// are sorted.
pub fn plan_sync<D, P, S, T>(desired: D, persisted: P) -> SyncPlan
where
    D: IntoIterator<Item = S>,
    P: IntoIterator<Item = T>,
    S: AsRef<str>,
    T: AsRef<str>,
{
    let desired: BTreeSet<String> = desired
        .into_iter()
        .filter_map(|n| normalize_tag(n.as_ref()))
        .collect();
    let persisted: BTreeSet<String> = persisted
        .into_iter()
        .map(|n| n.as_ref().to_string())
        .collect();

    match (desired.is_empty(), persisted.is_empty()) {
        (true, true) => SyncPlan::default(),
        (true, false) => SyncPlan {
            to_add: Vec::new(),
            to_remove: persisted.into_iter().collect(),
        },
        (false, true) => SyncPlan {
            to_add: desired.into_iter().collect(),
            to_remove: Vec::new(),
        },
        (false, false) if desired == persisted => SyncPlan::default(),
        (false, false) => SyncPlan {
            to_add: desired.difference(&persisted).cloned().collect(),
            to_remove: persisted.difference(&desired).cloned().collect(),
        },
    }
}

/// What a sync actually changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Names whose add or remove reported failure and was rolled back.
    pub failed: Vec<String>,
}

impl SyncReport {
    pub fn writes(&self) -> usize {
        self.added.len() + self.removed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Applies [`SyncPlan`]s through a [`TagRepository`].
pub struct RelationSynchronizer {
    tags: TagRepository,
}

impl RelationSynchronizer {
    pub fn new(tags: TagRepository) -> Self {
        Self { tags }
    }

    pub fn tags(&self) -> &TagRepository {
        &self.tags
    }

    /// Make the persisted tags of `moment_id` equal `desired`.
    ///
    /// Each add and remove is its own transaction. A failing name is
    /// recorded in [`SyncReport::failed`] and the remaining names are still
    /// processed; storage errors abort the sync and propagate.
    pub fn sync<S: AsRef<str>>(&self, moment_id: i64, desired: &[S]) -> Result<SyncReport> {
        let persisted = self.tags.tag_names_of_moment(moment_id)?;
        let plan = plan_sync(desired, &persisted);

        let mut report = SyncReport::default();
        if plan.is_noop() {
            return Ok(report);
        }

        for name in plan.to_add {
            match self.tags.add_tag(&name, moment_id)? {
                Some(_) => report.added.push(name),
                None => report.failed.push(name),
            }
        }
        for name in plan.to_remove {
            if self.tags.remove_tag(&name, moment_id)? {
                report.removed.push(name);
            } else {
                report.failed.push(name);
            }
        }

        if report.is_clean() {
            debug!(
                moment_id,
                added = report.added.len(),
                removed = report.removed.len(),
                "Tags synchronized"
            );
        } else {
            warn!(moment_id, failed = ?report.failed, "Tag sync incomplete");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::testing::{insert_moment_row, make_store};

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_plan_desired_empty_removes_all() {
        let plan = plan_sync(Vec::<String>::new(), ["a", "b"]);
        assert_eq!(plan.to_remove, names(&["a", "b"]));
        assert!(plan.to_add.is_empty());
    }

    #[test]
    fn test_plan_persisted_empty_adds_all() {
        let plan = plan_sync(["B", "a"], Vec::<String>::new());
        assert_eq!(plan.to_add, names(&["a", "b"]));
        assert!(plan.to_remove.is_empty());
    }

    #[test]
    fn test_plan_difference_both_ways() {
        let plan = plan_sync(["home", "gym"], ["work", "home"]);
        assert_eq!(plan.to_add, names(&["gym"]));
        assert_eq!(plan.to_remove, names(&["work"]));
    }

    #[test]
    fn test_plan_equal_sets_is_noop() {
        let plan = plan_sync(["Home", "work", "home "], ["home", "work"]);
        assert!(plan.is_noop());
    }

    #[test]
    fn test_plan_ignores_blank_names() {
        let plan = plan_sync(["  ", ""], Vec::<String>::new());
        assert!(plan.is_noop());
    }

    #[test]
    fn test_sync_home_work_to_home_gym() {
        let (db, ctx) = make_store();
        let sync = RelationSynchronizer::new(TagRepository::new(Arc::clone(&db), &ctx));
        let m = insert_moment_row(&db, &ctx, 1_000);

        sync.sync(m, &["work", "home"]).unwrap();
        let home_id = sync.tags().find("home").unwrap().unwrap().id;

        let report = sync.sync(m, &["home", "gym"]).unwrap();
        assert_eq!(report.added, names(&["gym"]));
        assert_eq!(report.removed, names(&["work"]));
        assert!(report.is_clean());

        assert_eq!(
            sync.tags().tag_names_of_moment(m).unwrap(),
            names(&["gym", "home"])
        );
        assert!(sync.tags().find("work").unwrap().is_none());
        // The untouched tag keeps its identity.
        assert_eq!(sync.tags().find("home").unwrap().unwrap().id, home_id);
    }

    #[test]
    fn test_sync_is_idempotent() {
        let (db, ctx) = make_store();
        let sync = RelationSynchronizer::new(TagRepository::new(Arc::clone(&db), &ctx));
        let m = insert_moment_row(&db, &ctx, 1_000);

        let first = sync.sync(m, &["a", "b"]).unwrap();
        assert_eq!(first.writes(), 2);
        let second = sync.sync(m, &["b", "A"]).unwrap();
        assert_eq!(second.writes(), 0);
        assert!(second.failed.is_empty());
    }

    #[test]
    fn test_sync_to_empty_reclaims_tags() {
        let (db, ctx) = make_store();
        let sync = RelationSynchronizer::new(TagRepository::new(Arc::clone(&db), &ctx));
        let m = insert_moment_row(&db, &ctx, 1_000);

        sync.sync(m, &["a", "b"]).unwrap();
        let report = sync.sync::<&str>(m, &[]).unwrap();
        assert_eq!(report.removed, names(&["a", "b"]));
        assert!(sync.tags().list().unwrap().is_empty());
        assert_eq!(sync.tags().orphan_count().unwrap(), 0);
    }

    #[test]
    fn test_sync_unknown_moment_reports_failures() {
        let (db, ctx) = make_store();
        let sync = RelationSynchronizer::new(TagRepository::new(Arc::clone(&db), &ctx));

        let report = sync.sync(404, &["x"]).unwrap();
        assert_eq!(report.failed, names(&["x"]));
        assert!(sync.tags().list().unwrap().is_empty());
    }
}
