//! Function Compilation
//!
//! Compilation turns a set of target variables into a [`Program`]: the
//! nodes the targets depend on, in an order where every node comes after
//! all of its operands.
//!
//! # Algorithm
//!
//! 1. Walk breadth-first from the targets along dependency edges.
//! 2. Stop at nodes in the bound set and at leaves. These are the actual
//!    sources of the function; their own dependencies are not followed.
//! 3. Sort the discovered nodes with Kahn's algorithm, treating sources as
//!    having no dependencies.
//! 4. If some node never reaches in-degree zero, the discovered set contains
//!    a cycle. Walk the unresolved dependencies until a node repeats to name
//!    one that is actually on it.
//!
//! Discovery and sorting visit nodes in insertion order of `IndexSet`s, so
//! compiling the same graph twice produces the same order.

use std::collections::VecDeque;

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use crate::error::{Error, Result};
use crate::graph::{Arena, Node, NodeId};

/// A compiled view over part of a graph.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Program {
    /// Discovered nodes, operands before the nodes that read them.
    pub order: Vec<NodeId>,

    /// Where discovery stopped: bound nodes and leaves.
    pub sources: IndexSet<NodeId>,

    /// The function's targets.
    pub targets: IndexSet<NodeId>,

    /// Structural revision of every node whose dependencies the program
    /// followed, at compile time.
    pub revisions: IndexMap<NodeId, u64>,
}

impl Program {
    /// True if no followed node was re-seated onto different operands since
    /// compilation.
    pub fn is_current(&self, arena: &Arena) -> bool {
        self.revisions
            .iter()
            .all(|(&id, &revision)| arena.get_node(id).map(Node::revision) == Some(revision))
    }
}

/// Compile the subgraph reaching `targets`, bounded by `bound`.
pub(crate) fn compile(arena: &Arena, targets: &IndexSet<NodeId>, bound: &IndexSet<NodeId>) -> Result<Program> {
    let (discovered, sources) = discover(arena, targets, bound);
    let order = topological_sort(arena, &discovered, &sources)?;

    let revisions = discovered
        .iter()
        .filter(|id| !bound.contains(*id))
        .filter_map(|&id| arena.get_node(id).map(|node| (id, node.revision())))
        .collect();

    debug!(
        nodes = order.len(),
        sources = sources.len(),
        targets = targets.len(),
        "compiled function"
    );

    Ok(Program {
        order,
        sources,
        targets: targets.clone(),
        revisions,
    })
}

/// Breadth-first dependency walk. Returns all discovered nodes and the
/// subset where the walk stopped.
fn discover(
    arena: &Arena,
    targets: &IndexSet<NodeId>,
    bound: &IndexSet<NodeId>,
) -> (IndexSet<NodeId>, IndexSet<NodeId>) {
    let mut discovered = IndexSet::new();
    let mut sources = IndexSet::new();
    let mut queue: VecDeque<NodeId> = targets.iter().copied().collect();

    while let Some(node_id) = queue.pop_front() {
        if !discovered.insert(node_id) {
            continue;
        }

        match arena.get_node(node_id) {
            Some(node) if !bound.contains(&node_id) && !node.is_leaf() => {
                queue.extend(node.dependencies().iter().copied());
            }
            _ => {
                sources.insert(node_id);
            }
        }
    }

    (discovered, sources)
}

/// Kahn's algorithm over the discovered set.
fn topological_sort(
    arena: &Arena,
    discovered: &IndexSet<NodeId>,
    sources: &IndexSet<NodeId>,
) -> Result<Vec<NodeId>> {
    let mut in_degree: IndexMap<NodeId, usize> = IndexMap::with_capacity(discovered.len());
    let mut queue = VecDeque::new();
    let mut order = Vec::with_capacity(discovered.len());

    // Every dependency of a followed node was discovered
    for &node_id in discovered {
        let degree = match arena.get_node(node_id) {
            Some(node) if !sources.contains(&node_id) => node.dependencies().len(),
            _ => 0,
        };
        in_degree.insert(node_id, degree);
        if degree == 0 {
            queue.push_back(node_id);
        }
    }

    while let Some(node_id) = queue.pop_front() {
        order.push(node_id);

        let Some(node) = arena.get_node(node_id) else {
            continue;
        };
        for dependent_id in node.dependents() {
            if sources.contains(dependent_id) {
                continue;
            }
            if let Some(degree) = in_degree.get_mut(dependent_id) {
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    queue.push_back(*dependent_id);
                }
            }
        }
    }

    if order.len() < discovered.len() {
        return Err(Error::CyclicDependency {
            node: node_on_cycle(arena, &in_degree),
        });
    }
    Ok(order)
}

/// Find a node on a cycle among the nodes Kahn's algorithm could not order.
///
/// Every unordered node still has an unordered dependency, so following
/// those must eventually repeat a node.
fn node_on_cycle(arena: &Arena, in_degree: &IndexMap<NodeId, usize>) -> NodeId {
    let unresolved = |id: &NodeId| in_degree.get(id).is_some_and(|&degree| degree > 0);

    let mut current = in_degree
        .iter()
        .find(|&(_, &degree)| degree > 0)
        .map(|(&id, _)| id)
        .unwrap_or_default();
    let mut seen = IndexSet::new();

    while seen.insert(current) {
        current = arena
            .get_node(current)
            .and_then(|node| node.dependencies().iter().copied().find(unresolved))
            .unwrap_or(current);
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn literal(arena: &mut Arena) -> NodeId {
        arena.add_node(Node::literal(Value::from(0.0)))
    }

    fn derived(arena: &mut Arena, dependencies: &[NodeId]) -> NodeId {
        let id = literal(arena);
        arena.set_dependencies(id, dependencies.iter().copied().collect());
        id
    }

    fn set(ids: &[NodeId]) -> IndexSet<NodeId> {
        ids.iter().copied().collect()
    }

    fn position(order: &[NodeId], id: NodeId) -> usize {
        order.iter().position(|&n| n == id).unwrap()
    }

    #[test]
    fn operands_precede_their_readers() {
        let mut arena = Arena::new();

        // Diamond: x -> (a, b) -> y
        let x = literal(&mut arena);
        let a = derived(&mut arena, &[x]);
        let b = derived(&mut arena, &[x]);
        let y = derived(&mut arena, &[a, b]);

        let program = compile(&arena, &set(&[y]), &IndexSet::new()).unwrap();

        assert_eq!(program.order.len(), 4);
        assert_eq!(program.sources, set(&[x]));
        assert!(position(&program.order, x) < position(&program.order, a));
        assert!(position(&program.order, x) < position(&program.order, b));
        assert!(position(&program.order, a) < position(&program.order, y));
        assert!(position(&program.order, b) < position(&program.order, y));
    }

    #[test]
    fn compilation_is_deterministic() {
        let mut arena = Arena::new();
        let x = literal(&mut arena);
        let z = literal(&mut arena);
        let a = derived(&mut arena, &[x, z]);
        let b = derived(&mut arena, &[a, x]);
        let c = derived(&mut arena, &[b, z]);

        let first = compile(&arena, &set(&[c, a]), &IndexSet::new()).unwrap();
        let second = compile(&arena, &set(&[c, a]), &IndexSet::new()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn bound_nodes_stop_discovery() {
        let mut arena = Arena::new();
        let x = literal(&mut arena);
        let u = derived(&mut arena, &[x]);
        let y = derived(&mut arena, &[u]);

        let program = compile(&arena, &set(&[y]), &set(&[u])).unwrap();

        assert_eq!(program.order, vec![u, y]);
        assert_eq!(program.sources, set(&[u]));
        // Bound nodes are not followed, so their revisions are not recorded
        assert!(!program.revisions.contains_key(&u));
    }

    #[test]
    fn unreachable_bound_nodes_are_not_sources() {
        let mut arena = Arena::new();
        let x = literal(&mut arena);
        let unrelated = literal(&mut arena);
        let y = derived(&mut arena, &[x]);

        let program = compile(&arena, &set(&[y]), &set(&[unrelated])).unwrap();
        assert_eq!(program.sources, set(&[x]));
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let mut arena = Arena::new();
        let x = literal(&mut arena);
        arena.set_dependencies(x, set(&[x]));

        let err = compile(&arena, &set(&[x]), &IndexSet::new()).unwrap_err();
        assert_eq!(err, Error::CyclicDependency { node: x });
    }

    #[test]
    fn reported_node_is_on_the_cycle() {
        let mut arena = Arena::new();

        // t -> a -> b -> c -> a, with a leaf feeding t
        let leaf = literal(&mut arena);
        let a = literal(&mut arena);
        let b = derived(&mut arena, &[a]);
        let c = derived(&mut arena, &[b]);
        arena.set_dependencies(a, set(&[c, leaf]));
        let t = derived(&mut arena, &[a, leaf]);

        let err = compile(&arena, &set(&[t]), &IndexSet::new()).unwrap_err();
        let Error::CyclicDependency { node } = err else {
            panic!("expected a cycle, got {err:?}");
        };
        assert!([a, b, c].contains(&node));
    }

    #[test]
    fn revisions_detect_reseating() {
        let mut arena = Arena::new();
        let x = literal(&mut arena);
        let z = literal(&mut arena);
        let y = derived(&mut arena, &[x]);

        let program = compile(&arena, &set(&[y]), &IndexSet::new()).unwrap();
        assert!(program.is_current(&arena));

        arena.set_dependencies(y, set(&[z]));
        assert!(!program.is_current(&arena));
    }
}
