// ABOUTME: Assembles fragments into a validated dependency graph with a cached topological order.
// ABOUTME: Rejects duplicate names, dangling references and cycles (reporting the full cycle path).

use crate::fragment::{Fragment, SecretKey};
use crate::types::ResourceKey;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate resource '{key}'")]
    DuplicateName { key: ResourceKey },

    #[error("'{from}' references '{missing}', which is not declared")]
    DanglingDependency {
        from: ResourceKey,
        missing: ResourceKey,
    },

    #[error("dependency cycle: {}", format_path(.path))]
    Cycle { path: Vec<ResourceKey> },
}

fn format_path(path: &[ResourceKey]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// A validated set of fragments. Immutable once assembled.
#[derive(Debug, Clone, Default)]
pub struct StackGraph {
    fragments: Vec<Fragment>,
    index: HashMap<ResourceKey, usize>,
    /// Indices into `fragments`, dependencies first.
    order: Vec<usize>,
    /// Per fragment, the indices of its dependencies.
    edges: Vec<Vec<usize>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

impl StackGraph {
    /// A graph with no resources; applying it tears a stack down.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn assemble(fragments: impl IntoIterator<Item = Fragment>) -> Result<Self, GraphError> {
        let fragments: Vec<Fragment> = fragments.into_iter().collect();

        let mut index = HashMap::with_capacity(fragments.len());
        for (i, fragment) in fragments.iter().enumerate() {
            let key = fragment.key();
            if index.insert(key.clone(), i).is_some() {
                return Err(GraphError::DuplicateName { key });
            }
        }

        let mut edges = Vec::with_capacity(fragments.len());
        for fragment in &fragments {
            let mut deps = Vec::new();
            for dep in fragment.dependencies() {
                let Some(&target) = index.get(&dep) else {
                    return Err(GraphError::DanglingDependency {
                        from: fragment.key(),
                        missing: dep,
                    });
                };
                if !deps.contains(&target) {
                    deps.push(target);
                }
            }
            edges.push(deps);
        }

        let mut graph = Self {
            fragments,
            index,
            order: Vec::new(),
            edges,
        };
        graph.check_acyclic()?;
        graph.order = graph.topological_order();
        tracing::debug!(resources = graph.len(), "assembled stack graph");
        Ok(graph)
    }

    fn check_acyclic(&self) -> Result<(), GraphError> {
        let mut marks = vec![Mark::Unvisited; self.fragments.len()];
        let mut stack = Vec::new();
        for start in 0..self.fragments.len() {
            if marks[start] == Mark::Unvisited {
                self.visit(start, &mut marks, &mut stack)?;
            }
        }
        Ok(())
    }

    fn visit(
        &self,
        node: usize,
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
    ) -> Result<(), GraphError> {
        marks[node] = Mark::OnStack;
        stack.push(node);
        for &dep in &self.edges[node] {
            match marks[dep] {
                Mark::Done => {}
                Mark::OnStack => {
                    // The cycle runs from the first occurrence of `dep` on the stack back to it.
                    let start = stack.iter().position(|&n| n == dep).unwrap_or(0);
                    let mut path: Vec<ResourceKey> = stack[start..]
                        .iter()
                        .map(|&n| self.fragments[n].key())
                        .collect();
                    path.push(self.fragments[dep].key());
                    return Err(GraphError::Cycle { path });
                }
                Mark::Unvisited => self.visit(dep, marks, stack)?,
            }
        }
        stack.pop();
        marks[node] = Mark::Done;
        Ok(())
    }

    /// Kahn's algorithm; among ready nodes the earliest declared goes first.
    fn topological_order(&self) -> Vec<usize> {
        let n = self.fragments.len();
        let mut remaining: Vec<usize> = self.edges.iter().map(Vec::len).collect();
        let mut dependents = vec![Vec::new(); n];
        for (node, deps) in self.edges.iter().enumerate() {
            for &dep in deps {
                dependents[dep].push(node);
            }
        }

        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| remaining[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &dependent in &dependents[next] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }
        order
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&Fragment> {
        self.index.get(key).map(|&i| &self.fragments[i])
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.index.contains_key(key)
    }

    /// Fragments in declaration order.
    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// Fragments in dependency order: every fragment after everything it references.
    pub fn order(&self) -> impl Iterator<Item = &Fragment> {
        self.order.iter().map(|&i| &self.fragments[i])
    }

    /// Position of `key` in the topological order.
    pub fn rank(&self, key: &ResourceKey) -> Option<usize> {
        let i = *self.index.get(key)?;
        self.order.iter().position(|&n| n == i)
    }

    /// Keys of the fragments that reference `key` directly.
    pub fn dependents(&self, key: &ResourceKey) -> Vec<ResourceKey> {
        let Some(&target) = self.index.get(key) else {
            return Vec::new();
        };
        self.edges
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.contains(&target))
            .map(|(i, _)| self.fragments[i].key())
            .collect()
    }

    /// The same graph with `key` attached to every fragment holding secrets.
    pub fn with_secret_key(mut self, key: &SecretKey) -> Self {
        self.fragments = self
            .fragments
            .iter()
            .map(|f| f.with_secret_key(key))
            .collect();
        self
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{Network, Service, Volume};
    use crate::types::{ResourceKind, ResourceName};

    fn svc(name: &str) -> Service {
        Service::from_image(name, "nginx").unwrap()
    }

    fn names(graph: &StackGraph) -> Vec<String> {
        graph.order().map(|f| f.key().to_string()).collect()
    }

    #[test]
    fn orders_dependencies_first() {
        let graph = StackGraph::assemble([
            svc("app").depends_on("db").unwrap().into(),
            svc("db").into(),
        ])
        .unwrap();
        assert_eq!(names(&graph), vec!["service/db", "service/app"]);
    }

    #[test]
    fn ties_follow_declaration_order() {
        let graph = StackGraph::assemble([
            svc("c").into(),
            svc("a").into(),
            svc("b").into(),
        ])
        .unwrap();
        assert_eq!(names(&graph), vec!["service/c", "service/a", "service/b"]);
    }

    #[test]
    fn released_nodes_keep_declaration_priority() {
        // "late" becomes ready after "base" but was declared before "other".
        let graph = StackGraph::assemble([
            svc("late").depends_on("base").unwrap().into(),
            svc("other").into(),
            svc("base").into(),
        ])
        .unwrap();
        assert_eq!(
            names(&graph),
            vec!["service/other", "service/base", "service/late"]
        );
    }

    #[test]
    fn duplicate_names_are_rejected_per_kind() {
        let err = StackGraph::assemble([svc("db").into(), svc("db").into()]).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateName { ref key } if key.to_string() == "service/db"));

        let ok = StackGraph::assemble([svc("db").into(), Volume::new("db").unwrap().into()]);
        assert!(ok.is_ok());
    }

    #[test]
    fn dangling_reference_is_reported() {
        let err = StackGraph::assemble([svc("app").network("backend").unwrap().into()]).unwrap_err();
        assert_eq!(
            err,
            GraphError::DanglingDependency {
                from: ResourceKey::service(ResourceName::new("app").unwrap()),
                missing: ResourceKey::new(
                    ResourceKind::Network,
                    ResourceName::new("backend").unwrap()
                ),
            }
        );
        assert_eq!(
            err.to_string(),
            "'service/app' references 'network/backend', which is not declared"
        );
    }

    #[test]
    fn cycle_names_every_member() {
        let err = StackGraph::assemble([
            svc("a").depends_on("b").unwrap().into(),
            svc("b").depends_on("a").unwrap().into(),
        ])
        .unwrap_err();
        let GraphError::Cycle { path } = &err else {
            panic!("expected cycle, got {err:?}");
        };
        let path: Vec<String> = path.iter().map(ToString::to_string).collect();
        assert_eq!(path, vec!["service/a", "service/b", "service/a"]);
        assert_eq!(
            err.to_string(),
            "dependency cycle: service/a -> service/b -> service/a"
        );
    }

    #[test]
    fn longer_cycle_excludes_entry_path() {
        let err = StackGraph::assemble([
            svc("entry").depends_on("x").unwrap().into(),
            svc("x").depends_on("y").unwrap().into(),
            svc("y").depends_on("z").unwrap().into(),
            svc("z").depends_on("x").unwrap().into(),
        ])
        .unwrap_err();
        let GraphError::Cycle { path } = err else {
            panic!("expected cycle");
        };
        let path: Vec<String> = path.iter().map(ToString::to_string).collect();
        assert_eq!(
            path,
            vec!["service/x", "service/y", "service/z", "service/x"]
        );
    }

    #[test]
    fn dependents_lists_direct_referrers() {
        let graph = StackGraph::assemble([
            Network::new("backend").unwrap().into(),
            svc("db").network("backend").unwrap().into(),
            svc("app").network("backend").unwrap().into(),
        ])
        .unwrap();
        let key = graph.fragments()[0].key();
        let dependents: Vec<String> = graph.dependents(&key).iter().map(ToString::to_string).collect();
        assert_eq!(dependents, vec!["service/db", "service/app"]);
        assert_eq!(graph.rank(&key), Some(0));
    }

    #[test]
    fn empty_graph_is_valid() {
        let graph = StackGraph::assemble(Vec::new()).unwrap();
        assert!(graph.is_empty());
        assert_eq!(graph.order().count(), 0);
    }
}
