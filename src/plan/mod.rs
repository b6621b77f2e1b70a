// ABOUTME: Diff planner: compares the desired graph with the snapshot and orders the changes.
// ABOUTME: Creates and updates follow dependency order; teardowns always take dependents down first.

mod sensitivity;

pub use sensitivity::{Change, classify, classify_field};

use crate::fragment::{Fields, field_group};
use crate::graph::StackGraph;
use crate::snapshot::Snapshot;
use crate::types::ResourceKey;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanningError {
    #[error("snapshot lists '{key}' more than once")]
    DuplicateRecord { key: ResourceKey },

    #[error("snapshot record '{key}' does not match its fingerprint")]
    CorruptRecord { key: ResourceKey },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create,
    Update,
    Destroy,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Destroy => write!(f, "destroy"),
        }
    }
}

/// Why an operation is in the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    NotDeployed,
    /// Only in-place fields changed.
    InPlaceChange(Vec<String>),
    /// At least one field changed that requires a new resource.
    ReplacingChange(Vec<String>),
    /// Torn down and re-created because a resource it uses is replaced.
    DependencyReplaced(ResourceKey),
    RemovedFromStack,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::NotDeployed => write!(f, "not deployed"),
            Reason::InPlaceChange(fields) => write!(f, "{} changed", fields.join(", ")),
            Reason::ReplacingChange(fields) => {
                write!(f, "{} changed, replacing", fields.join(", "))
            }
            Reason::DependencyReplaced(key) => write!(f, "{} is replaced", key),
            Reason::RemovedFromStack => write!(f, "removed from stack"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub kind: OperationKind,
    pub target: ResourceKey,
    pub reason: Reason,
}

impl Operation {
    pub fn new(kind: OperationKind, target: ResourceKey, reason: Reason) -> Self {
        Self {
            kind,
            target,
            reason,
        }
    }

    /// Half of a destroy/create pair replacing the same resource.
    pub fn is_recreate(&self) -> bool {
        matches!(
            self.reason,
            Reason::ReplacingChange(_) | Reason::DependencyReplaced(_)
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.kind, self.target, self.reason)
    }
}

/// Counts per operation kind; a recreate counts once, not as a create plus a destroy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub recreate: usize,
    pub destroy: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to destroy",
            self.create, self.update, self.recreate, self.destroy
        )
    }
}

/// An ordered list of operations. Empty means the snapshot already matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangePlan {
    operations: Vec<Operation>,
}

impl ChangePlan {
    pub fn from_operations(operations: Vec<Operation>) -> Self {
        Self { operations }
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.operations.iter()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for op in &self.operations {
            match (op.kind, op.is_recreate()) {
                (OperationKind::Destroy, true) => summary.recreate += 1,
                (OperationKind::Create, true) => {}
                (OperationKind::Create, false) => summary.create += 1,
                (OperationKind::Update, _) => summary.update += 1,
                (OperationKind::Destroy, false) => summary.destroy += 1,
            }
        }
        summary
    }
}

impl<'a> IntoIterator for &'a ChangePlan {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}

/// Field groups whose values differ between two normalized field maps.
pub fn changed_groups(old: &Fields, new: &Fields) -> Vec<String> {
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    let groups: BTreeSet<&str> = keys
        .into_iter()
        .filter(|k| old.get(*k) != new.get(*k))
        .map(|k| field_group(k))
        .collect();
    groups.into_iter().map(str::to_string).collect()
}

fn check_snapshot(snapshot: &Snapshot) -> Result<(), PlanningError> {
    let mut seen = HashSet::new();
    for record in snapshot.records() {
        let key = record.key();
        if !record.is_consistent() {
            return Err(PlanningError::CorruptRecord { key });
        }
        if !seen.insert(key.clone()) {
            return Err(PlanningError::DuplicateRecord { key });
        }
    }
    Ok(())
}

/// Walks the desired order while tracking which resources are live and
/// what each of them currently references.
struct Planner<'a> {
    desired: &'a StackGraph,
    /// Live resources and their references, in snapshot order.
    live: Vec<(ResourceKey, Vec<ResourceKey>)>,
    /// Torn down ahead of their own position, mapped to the replaced
    /// resource that forced it.
    torn_down: HashMap<ResourceKey, ResourceKey>,
    operations: Vec<Operation>,
}

impl<'a> Planner<'a> {
    fn new(desired: &'a StackGraph, snapshot: &Snapshot) -> Self {
        Self {
            desired,
            live: snapshot
                .records()
                .iter()
                .map(|r| (r.key(), r.depends_on.clone()))
                .collect(),
            torn_down: HashMap::new(),
            operations: Vec::new(),
        }
    }

    fn is_live(&self, key: &ResourceKey) -> bool {
        self.live.iter().any(|(k, _)| k == key)
    }

    fn set_live(&mut self, key: ResourceKey, depends_on: Vec<ResourceKey>) {
        match self.live.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = depends_on,
            None => self.live.push((key, depends_on)),
        }
    }

    fn push(&mut self, kind: OperationKind, key: ResourceKey, reason: Reason) {
        self.operations.push(Operation::new(kind, key, reason));
    }

    /// Destroys `key` after everything live that references it.
    /// Referrers still wanted come back when the walk reaches them.
    fn tear_down(&mut self, key: &ResourceKey, reason: Reason) {
        let dependents: Vec<ResourceKey> = self
            .live
            .iter()
            .rev()
            .filter(|(_, deps)| deps.contains(key))
            .map(|(k, _)| k.clone())
            .collect();
        self.live.retain(|(k, _)| k != key);

        for dependent in dependents {
            if !self.is_live(&dependent) {
                continue;
            }
            let cause = if self.desired.contains(&dependent) {
                self.torn_down.insert(dependent.clone(), key.clone());
                Reason::DependencyReplaced(key.clone())
            } else {
                Reason::RemovedFromStack
            };
            self.tear_down(&dependent, cause);
        }
        self.push(OperationKind::Destroy, key.clone(), reason);
    }

    fn run(mut self, snapshot: &Snapshot) -> Vec<Operation> {
        let desired = self.desired;
        for fragment in desired.order() {
            let key = fragment.key();
            if let Some(replaced) = self.torn_down.remove(&key) {
                self.push(
                    OperationKind::Create,
                    key.clone(),
                    Reason::DependencyReplaced(replaced),
                );
                self.set_live(key, fragment.dependencies());
                continue;
            }

            let Some(record) = snapshot.get(&key) else {
                self.push(OperationKind::Create, key.clone(), Reason::NotDeployed);
                self.set_live(key, fragment.dependencies());
                continue;
            };
            if fragment.fingerprint() == record.fingerprint {
                continue;
            }

            let groups = changed_groups(&record.fields, &fragment.fields());
            match classify(key.kind, groups.iter().map(String::as_str)) {
                Change::InPlace => {
                    self.push(
                        OperationKind::Update,
                        key.clone(),
                        Reason::InPlaceChange(groups),
                    );
                }
                Change::Replace => {
                    self.tear_down(&key, Reason::ReplacingChange(groups.clone()));
                    self.push(
                        OperationKind::Create,
                        key.clone(),
                        Reason::ReplacingChange(groups),
                    );
                }
            }
            self.set_live(key, fragment.dependencies());
        }

        for record in snapshot.records().iter().rev() {
            let key = record.key();
            if !desired.contains(&key) && self.is_live(&key) {
                self.tear_down(&key, Reason::RemovedFromStack);
            }
        }
        self.operations
    }
}

/// Computes the ordered operations that turn `snapshot` into `desired`.
///
/// Replacing a resource first destroys everything live that references it,
/// dependents first; those still in `desired` are created again at their
/// own position in the order.
pub fn plan(desired: &StackGraph, snapshot: &Snapshot) -> Result<ChangePlan, PlanningError> {
    check_snapshot(snapshot)?;
    let plan = ChangePlan::from_operations(Planner::new(desired, snapshot).run(snapshot));
    tracing::debug!(operations = plan.len(), "computed change plan");
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{Fragment, ImageLayer, Network, Service, Volume};
    use crate::snapshot::SnapshotRecord;
    use crate::types::{ResourceKind, ResourceName, RuntimeHandle};

    fn applied(graph: &StackGraph) -> Snapshot {
        Snapshot::from_records(
            graph
                .order()
                .map(|f| SnapshotRecord::from_fragment(f, RuntimeHandle::new(f.name().as_str())))
                .collect(),
        )
    }

    fn rendered(plan: &ChangePlan) -> Vec<String> {
        plan.iter()
            .map(|op| format!("{} {}", op.kind, op.target))
            .collect()
    }

    fn db() -> Fragment {
        Service::from_image("db", "postgres:16").unwrap().into()
    }

    fn app(tag: &str) -> Fragment {
        Service::from_image("app", &format!("shop/app:{tag}"))
            .unwrap()
            .depends_on("db")
            .unwrap()
            .into()
    }

    #[test]
    fn empty_snapshot_creates_in_dependency_order() {
        let graph = StackGraph::assemble([app("1"), db()]).unwrap();
        let plan = plan(&graph, &Snapshot::new()).unwrap();
        assert_eq!(rendered(&plan), vec!["create service/db", "create service/app"]);
    }

    #[test]
    fn matching_snapshot_plans_nothing() {
        let graph = StackGraph::assemble([db(), app("1")]).unwrap();
        let plan = plan(&graph, &applied(&graph)).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn image_change_recreates() {
        let before = StackGraph::assemble([db(), app("1")]).unwrap();
        let after = StackGraph::assemble([db(), app("2")]).unwrap();
        let plan = plan(&after, &applied(&before)).unwrap();
        assert_eq!(
            rendered(&plan),
            vec!["destroy service/app", "create service/app"]
        );
        assert!(plan.iter().all(Operation::is_recreate));
        assert_eq!(plan.summary().recreate, 1);
        assert_eq!(plan.operations()[0].reason.to_string(), "image changed, replacing");
    }

    #[test]
    fn env_change_updates_in_place() {
        let before = StackGraph::assemble([db()]).unwrap();
        let changed: Fragment = Service::from_image("db", "postgres:16")
            .unwrap()
            .env("POSTGRES_DB", "shop")
            .unwrap()
            .into();
        let after = StackGraph::assemble([changed]).unwrap();
        let plan = plan(&after, &applied(&before)).unwrap();
        assert_eq!(rendered(&plan), vec!["update service/db"]);
        assert_eq!(
            plan.operations()[0].reason,
            Reason::InPlaceChange(vec!["env".into()])
        );
    }

    #[test]
    fn removed_resources_are_destroyed_last_in_reverse_order() {
        let before = StackGraph::assemble([
            Network::new("backend").unwrap().into(),
            Service::from_image("db", "postgres:16")
                .unwrap()
                .network("backend")
                .unwrap()
                .into(),
        ])
        .unwrap();
        let cache: Fragment = Service::from_image("cache", "redis:7").unwrap().into();
        let after = StackGraph::assemble([cache]).unwrap();

        let plan = plan(&after, &applied(&before)).unwrap();
        assert_eq!(
            rendered(&plan),
            vec![
                "create service/cache",
                "destroy service/db",
                "destroy network/backend"
            ]
        );
        assert_eq!(plan.summary().destroy, 2);
    }

    fn db_on(volume: Volume) -> StackGraph {
        StackGraph::assemble([
            volume.into(),
            Service::from_image("db", "postgres:16")
                .unwrap()
                .mount("pgdata:/var/lib/postgresql/data")
                .unwrap()
                .into(),
            app("1"),
        ])
        .unwrap()
    }

    #[test]
    fn replacing_a_volume_recreates_the_services_using_it() {
        let before = db_on(Volume::new("pgdata").unwrap());
        let after = db_on(Volume::new("pgdata").unwrap().label("backup", "daily").unwrap());

        let plan = plan(&after, &applied(&before)).unwrap();
        assert_eq!(
            rendered(&plan),
            vec![
                "destroy service/app",
                "destroy service/db",
                "destroy volume/pgdata",
                "create volume/pgdata",
                "create service/db",
                "create service/app",
            ]
        );
        assert!(plan.iter().all(Operation::is_recreate));
        assert_eq!(
            plan.operations()[1].reason,
            Reason::DependencyReplaced(ResourceKey::new(
                ResourceKind::Volume,
                ResourceName::new("pgdata").unwrap()
            ))
        );
        assert_eq!(plan.summary().recreate, 3);
    }

    #[test]
    fn changed_build_steps_recreate_the_service_built_from_them() {
        let stack = |command: &str| {
            StackGraph::assemble([
                ImageLayer::new("app-image", "shop/app:1", "python:3.12-slim")
                    .unwrap()
                    .run(command)
                    .unwrap()
                    .into(),
                Service::from_build("app", "app-image").unwrap().into(),
            ])
            .unwrap()
        };
        let before = stack("pip install -r requirements.txt");
        let after = stack("pip install --no-cache-dir -r requirements.txt");

        let plan = plan(&after, &applied(&before)).unwrap();
        assert_eq!(
            rendered(&plan),
            vec![
                "destroy service/app",
                "destroy image_layer/app-image",
                "create image_layer/app-image",
                "create service/app",
            ]
        );
    }

    #[test]
    fn replaced_network_takes_removed_members_down_first() {
        let db_on_backend: Fragment = Service::from_image("db", "postgres:16")
            .unwrap()
            .network("backend")
            .unwrap()
            .into();
        let before = StackGraph::assemble([
            Network::new("backend").unwrap().into(),
            db_on_backend,
        ])
        .unwrap();
        let after =
            StackGraph::assemble([Network::new("backend").unwrap().internal(true).unwrap().into()])
                .unwrap();

        let plan = plan(&after, &applied(&before)).unwrap();
        assert_eq!(
            rendered(&plan),
            vec![
                "destroy service/db",
                "destroy network/backend",
                "create network/backend",
            ]
        );
        assert_eq!(plan.operations()[0].reason, Reason::RemovedFromStack);
    }

    #[test]
    fn in_place_change_leaves_dependents_alone() {
        let before = StackGraph::assemble([db(), app("1")]).unwrap();
        let db_with_env: Fragment = Service::from_image("db", "postgres:16")
            .unwrap()
            .env("POSTGRES_DB", "shop")
            .unwrap()
            .into();
        let after = StackGraph::assemble([db_with_env, app("1")]).unwrap();
        let plan = plan(&after, &applied(&before)).unwrap();
        assert_eq!(rendered(&plan), vec!["update service/db"]);
    }

    #[test]
    fn corrupt_record_is_a_planning_error() {
        let graph = StackGraph::assemble([db()]).unwrap();
        let mut records = applied(&graph).records().to_vec();
        records[0].fields.insert("image".into(), "postgres:17".into());
        let err = plan(&graph, &Snapshot::from_records(records)).unwrap_err();
        assert!(matches!(err, PlanningError::CorruptRecord { .. }));
    }

    #[test]
    fn duplicate_record_is_a_planning_error() {
        let graph = StackGraph::assemble([db()]).unwrap();
        let record = applied(&graph).records()[0].clone();
        let snapshot = Snapshot::from_records(vec![record.clone(), record]);
        assert!(matches!(
            plan(&graph, &snapshot),
            Err(PlanningError::DuplicateRecord { .. })
        ));
    }

    #[test]
    fn changed_groups_reports_added_and_removed_fields() {
        let old: Fields = [("env.A".to_string(), "1".to_string())].into();
        let new: Fields = [
            ("labels.x".to_string(), "y".to_string()),
            ("env.A".to_string(), "1".to_string()),
        ]
        .into();
        assert_eq!(changed_groups(&old, &new), vec!["labels"]);
        assert_eq!(changed_groups(&new, &old), vec!["labels"]);
    }
}
