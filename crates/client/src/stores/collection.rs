//! Keyed snapshot of one entity type.
//!
//! A collection is filled from two sources that race each other: the REST
//! snapshot and live changes. The subscription is opened first, so changes
//! can arrive before the snapshot does; [`Collection::set_snapshot`] merges
//! instead of overwriting so none of them are lost.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use hms_shared::{Change, DialysisMachine, DialysisSession, Drug, InventoryItem, LabRequest, Prescription};

/// An entity with a stable id and an optional last-modified time.
pub trait Record: Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
    fn updated_at(&self) -> Option<DateTime<Utc>>;
}

macro_rules! impl_record {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Record for $ty {
                fn id(&self) -> &str {
                    &self.id
                }

                fn updated_at(&self) -> Option<DateTime<Utc>> {
                    self.updated_at
                }
            }
        )*
    };
}

impl_record!(
    Prescription,
    InventoryItem,
    Drug,
    DialysisMachine,
    DialysisSession,
    LabRequest,
);

#[derive(Debug, Clone)]
pub struct Collection<T> {
    items: BTreeMap<String, T>,
    /// Ids removed by a live change before the snapshot was merged; that
    /// snapshot must not bring them back.
    removed: HashSet<String>,
    /// Whether the REST snapshot has been applied.
    pub is_loaded: bool,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            items: BTreeMap::new(),
            removed: HashSet::new(),
            is_loaded: false,
        }
    }
}

impl<T: Record> Collection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a live change. Returns true if the collection changed.
    pub fn apply(&mut self, change: Change<T>) -> bool {
        match change {
            Change::Upsert(item) => self.upsert(item),
            Change::Removed { id, removed: true } => self.remove(&id),
            Change::Removed { removed: false, .. } => false,
        }
    }

    /// Insert or replace an item, keeping the newer of two versions.
    ///
    /// An incoming item without `updated_at` always wins.
    pub fn upsert(&mut self, item: T) -> bool {
        let id = item.id().to_string();
        self.removed.remove(&id);
        if let Some(existing) = self.items.get(&id) {
            if is_stale(&item, existing) {
                return false;
            }
        }
        self.items.insert(id, item);
        true
    }

    pub fn remove(&mut self, id: &str) -> bool {
        if !self.is_loaded {
            self.removed.insert(id.to_string());
        }
        self.items.remove(id).is_some()
    }

    /// Merge the REST snapshot.
    ///
    /// Items already present keep whichever version is newer, ids removed by
    /// a live change stay removed, and items only known locally are kept.
    pub fn set_snapshot(&mut self, snapshot: Vec<T>) {
        for item in snapshot {
            if self.removed.contains(item.id()) {
                continue;
            }
            match self.items.get(item.id()) {
                Some(existing) if is_stale(&item, existing) => {}
                _ => {
                    self.items.insert(item.id().to_string(), item);
                }
            }
        }
        self.removed.clear();
        self.is_loaded = true;
    }

    /// Replace the contents outright, as after a manual refresh.
    pub fn replace(&mut self, snapshot: Vec<T>) {
        self.items = snapshot
            .into_iter()
            .map(|item| (item.id().to_string(), item))
            .collect();
        self.removed.clear();
        self.is_loaded = true;
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.get(id)
    }

    /// Items ordered by id.
    pub fn items(&self) -> Vec<T> {
        self.items.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn is_stale<T: Record>(incoming: &T, existing: &T) -> bool {
    match (incoming.updated_at(), existing.updated_at()) {
        (Some(new), Some(old)) => new < old,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hms_shared::{LabPriority, LabStatus};

    fn lab(id: &str, status: LabStatus, minute: u32) -> LabRequest {
        LabRequest {
            id: id.into(),
            patient_id: "p-1".into(),
            test_code: "CBC".into(),
            priority: LabPriority::Routine,
            status,
            updated_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, minute, 0).unwrap()),
        }
    }

    #[test]
    fn snapshot_keeps_newer_live_updates() {
        let mut labs = Collection::new();
        labs.apply(Change::Upsert(lab("l-1", LabStatus::Processing, 30)));

        labs.set_snapshot(vec![
            lab("l-1", LabStatus::Requested, 10),
            lab("l-2", LabStatus::Requested, 10),
        ]);

        assert!(labs.is_loaded);
        assert_eq!(labs.len(), 2);
        assert_eq!(labs.get("l-1").unwrap().status, LabStatus::Processing);
    }

    #[test]
    fn snapshot_does_not_resurrect_removed_ids() {
        let mut labs = Collection::new();
        labs.apply(Change::Removed {
            id: "l-1".into(),
            removed: true,
        });
        labs.set_snapshot(vec![lab("l-1", LabStatus::Requested, 10)]);
        assert!(labs.get("l-1").is_none());
    }

    #[test]
    fn stale_upsert_is_ignored() {
        let mut labs = Collection::new();
        assert!(labs.upsert(lab("l-1", LabStatus::Completed, 40)));
        assert!(!labs.upsert(lab("l-1", LabStatus::Processing, 20)));
        assert_eq!(labs.get("l-1").unwrap().status, LabStatus::Completed);
    }

    #[test]
    fn replace_clears_tombstones() {
        let mut labs = Collection::new();
        labs.remove("l-1");
        labs.replace(vec![lab("l-1", LabStatus::Requested, 10)]);
        assert_eq!(labs.items().len(), 1);
    }

    #[test]
    fn tombstones_are_dropped_once_the_snapshot_is_merged() {
        let mut labs = Collection::new();
        labs.remove("l-1");
        labs.set_snapshot(vec![lab("l-2", LabStatus::Requested, 10)]);
        assert!(labs.removed.is_empty());

        for minute in 0..50 {
            let id = format!("l-{}", minute + 10);
            labs.upsert(lab(&id, LabStatus::Requested, minute));
            assert!(labs.remove(&id));
        }
        assert!(labs.removed.is_empty());
        assert_eq!(labs.len(), 1);
    }
}
