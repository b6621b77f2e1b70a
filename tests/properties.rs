// ABOUTME: Property tests for plan ordering and fingerprint stability.
// ABOUTME: Generates random service dependency graphs and builder call orders.

mod support;

use dockr::fragment::{Fragment, Service};
use dockr::plan::{OperationKind, plan};
use dockr::snapshot::{Snapshot, SnapshotRecord};
use dockr::types::RuntimeHandle;
use proptest::prelude::*;
use std::collections::HashMap;

/// Services `s0..sN` where each may depend on any lower-numbered service.
fn dag() -> impl Strategy<Value = Vec<Fragment>> {
    (1usize..8)
        .prop_flat_map(|n| proptest::collection::vec(any::<u8>(), n))
        .prop_map(|masks| {
            masks
                .iter()
                .enumerate()
                .map(|(i, mask)| {
                    let mut service =
                        Service::from_image(&format!("s{}", i), "busybox:1.36").unwrap();
                    for dep in (0..i).filter(|d| mask & (1 << (d % 8)) != 0) {
                        service = service.depends_on(&format!("s{}", dep)).unwrap();
                    }
                    Fragment::from(service)
                })
                .collect::<Vec<_>>()
        })
        .prop_shuffle()
}

fn deployed(fragments: &[Fragment]) -> Snapshot {
    Snapshot::from_records(
        fragments
            .iter()
            .map(|f| SnapshotRecord::from_fragment(f, RuntimeHandle::new(f.name().to_string())))
            .collect(),
    )
}

proptest! {
    #[test]
    fn creates_follow_dependencies(fragments in dag()) {
        let graph = support::stack(fragments);
        let changes = plan(&graph, &Snapshot::new()).unwrap();
        prop_assert_eq!(changes.len(), graph.len());

        let position: HashMap<_, _> = changes
            .iter()
            .enumerate()
            .map(|(i, op)| (op.target.clone(), i))
            .collect();
        for fragment in graph.order() {
            for dep in fragment.dependencies() {
                prop_assert!(position[&dep] < position[&fragment.key()]);
            }
        }
    }

    #[test]
    fn destroys_run_dependents_first(fragments in dag()) {
        let graph = support::stack(fragments);
        let ordered: Vec<Fragment> = graph.order().cloned().collect();
        let snapshot = deployed(&ordered);

        let changes = plan(&dockr::graph::StackGraph::empty(), &snapshot).unwrap();
        prop_assert!(changes.iter().all(|op| op.kind == OperationKind::Destroy));

        let position: HashMap<_, _> = changes
            .iter()
            .enumerate()
            .map(|(i, op)| (op.target.clone(), i))
            .collect();
        for fragment in &ordered {
            for dep in fragment.dependencies() {
                prop_assert!(position[&fragment.key()] < position[&dep]);
            }
        }
    }

    #[test]
    fn unchanged_stack_plans_nothing(fragments in dag()) {
        let graph = support::stack(fragments);
        let ordered: Vec<Fragment> = graph.order().cloned().collect();
        prop_assert!(plan(&graph, &deployed(&ordered)).unwrap().is_empty());
    }

    #[test]
    fn fingerprint_ignores_builder_call_order(
        entries in proptest::collection::btree_map("[A-Z]{1,6}", "[a-z0-9]{0,8}", 1..6)
            .prop_flat_map(|map| Just(map.into_iter().collect::<Vec<_>>()).prop_shuffle()),
    ) {
        let build = |pairs: &[(String, String)]| {
            let mut service = Service::from_image("app", "shop/app:1.0").unwrap();
            for (key, value) in pairs {
                service = service
                    .env(key, value)
                    .unwrap()
                    .label(&format!("shop.{}", key.to_lowercase()), value)
                    .unwrap();
            }
            Fragment::from(service).fingerprint()
        };

        let mut sorted = entries.clone();
        sorted.sort();
        prop_assert_eq!(build(&entries), build(&sorted));
    }

    #[test]
    fn fingerprint_ignores_port_order(
        ports in proptest::sample::subsequence(vec![80u16, 443, 5432, 6379, 8000, 9000], 1..6)
            .prop_shuffle(),
    ) {
        let build = |ports: &[u16]| {
            let mut service = Service::from_image("app", "shop/app:1.0").unwrap();
            for port in ports {
                service = service.port(&format!("{}:{}", port + 10000, port)).unwrap();
            }
            Fragment::from(service).fingerprint()
        };

        let mut sorted = ports.clone();
        sorted.sort();
        prop_assert_eq!(build(&ports), build(&sorted));
    }
}
