// ABOUTME: The persisted record of what currently exists for a deployment unit.
// ABOUTME: Records stay in dependency order so teardown can simply walk them backwards.

mod lock;
mod store;

pub use lock::{ApplyLock, LockError, LockInfo, LockOptions};
pub use store::{SnapshotError, SnapshotStore};

use crate::fragment::{Fields, Fingerprint, Fragment};
use crate::graph::StackGraph;
use crate::types::{ResourceKey, ResourceKind, ResourceName, RuntimeHandle};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

pub const SNAPSHOT_VERSION: u32 = 1;

/// One realized resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub name: ResourceName,
    pub kind: ResourceKind,
    pub fingerprint: Fingerprint,
    pub handle: RuntimeHandle,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<ResourceKey>,
    #[serde(default)]
    pub fields: Fields,
}

impl SnapshotRecord {
    pub fn from_fragment(fragment: &Fragment, handle: RuntimeHandle) -> Self {
        let fields = fragment.fields();
        Self {
            name: fragment.name().clone(),
            kind: fragment.kind(),
            fingerprint: Fingerprint::compute(fragment.kind(), &fields),
            handle,
            depends_on: fragment.dependencies(),
            fields,
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.kind, self.name.clone())
    }

    /// Whether the stored fingerprint still matches the stored fields.
    pub fn is_consistent(&self) -> bool {
        Fingerprint::compute(self.kind, &self.fields) == self.fingerprint
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    #[serde(default)]
    records: Vec<SnapshotRecord>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            records: Vec::new(),
        }
    }
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records in the given order; callers are responsible for dependency order.
    pub fn from_records(records: Vec<SnapshotRecord>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            records,
        }
    }

    pub fn records(&self) -> &[SnapshotRecord] {
        &self.records
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&SnapshotRecord> {
        self.records
            .iter()
            .find(|r| r.kind == key.kind && r.name == key.name)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.get(key).is_some()
    }

    /// Inserts a record, replacing one with the same key in place.
    pub fn upsert(&mut self, record: SnapshotRecord) {
        let key = record.key();
        match self.records.iter_mut().find(|r| r.key() == key) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    pub fn remove(&mut self, key: &ResourceKey) -> Option<SnapshotRecord> {
        let pos = self.records.iter().position(|r| &r.key() == key)?;
        Some(self.records.remove(pos))
    }

    /// Sorts the records so each follows everything its `depends_on` names.
    /// Ties go to `desired` order first, then to the previous relative order.
    pub fn reorder(&mut self, desired: &StackGraph) {
        let rank: HashMap<ResourceKey, usize> = desired
            .order()
            .enumerate()
            .map(|(i, f)| (f.key(), i))
            .collect();
        let records = std::mem::take(&mut self.records);
        let keys: Vec<ResourceKey> = records.iter().map(SnapshotRecord::key).collect();
        let position: HashMap<&ResourceKey, usize> =
            keys.iter().enumerate().map(|(i, k)| (k, i)).collect();
        let priority: Vec<usize> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| rank.get(k).copied().unwrap_or(rank.len() + i))
            .collect();

        let mut waiting = vec![0usize; records.len()];
        let mut dependents = vec![Vec::new(); records.len()];
        for (i, record) in records.iter().enumerate() {
            for dep in &record.depends_on {
                if let Some(&j) = position.get(dep) {
                    dependents[j].push(i);
                    waiting[i] += 1;
                }
            }
        }

        let mut ready: BTreeSet<(usize, usize)> = (0..records.len())
            .filter(|&i| waiting[i] == 0)
            .map(|i| (priority[i], i))
            .collect();
        let mut order = Vec::with_capacity(records.len());
        while let Some((_, i)) = ready.pop_first() {
            order.push(i);
            for &d in &dependents[i] {
                waiting[d] -= 1;
                if waiting[d] == 0 {
                    ready.insert((priority[d], d));
                }
            }
        }
        // Records on a reference cycle keep their priority order.
        let mut stuck: Vec<usize> = (0..records.len()).filter(|&i| waiting[i] > 0).collect();
        stuck.sort_by_key(|&i| priority[i]);
        order.extend(stuck);

        let mut slots: Vec<Option<SnapshotRecord>> = records.into_iter().map(Some).collect();
        self.records = order.into_iter().filter_map(|i| slots[i].take()).collect();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
