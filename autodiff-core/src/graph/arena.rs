//! Node Arena
//!
//! The arena owns every node of one computation graph and keeps the forward
//! (dependencies) and reverse (dependents) edge lists consistent.
//!
//! # Ownership
//!
//! Variables, operations and functions never own nodes. They hold a [`Graph`]
//! handle (a shared pointer to the arena) plus node ids. Nodes are never
//! removed individually; the whole arena goes away when the last handle is
//! dropped. This keeps every `NodeId` valid for the lifetime of anything
//! that can name it, including graphs with cycles.
//!
//! # Re-seating
//!
//! When a variable receives a new defining expression, the expression's
//! operand edges are collected and installed as the node's dependency list
//! in one step. Old reverse edges are removed and new ones added, so the
//! graph never holds edges from a discarded definition.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::ops::{Index, IndexMut};
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use super::node::{Node, NodeId};
use crate::evaluator::{Evaluator, Expression};
use crate::value::{Derivative, Value};

/// Storage for the nodes of one graph, indexed by node ID.
#[derive(Debug, Default)]
pub struct Arena {
    /// All nodes in the graph, in creation order.
    nodes: IndexMap<NodeId, Node>,
}

impl Arena {
    /// Create a new empty arena.
    pub fn new() -> Self {
        Self {
            nodes: IndexMap::new(),
        }
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Get a reference to a node.
    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Replace the dependency list of `dependent`, patching reverse edges.
    pub fn set_dependencies(&mut self, dependent: NodeId, dependencies: IndexSet<NodeId>) {
        let Some(node) = self.nodes.get_mut(&dependent) else {
            return;
        };
        let previous = node.replace_dependencies(dependencies.clone());

        for dep_id in previous.difference(&dependencies) {
            if let Some(dep) = self.nodes.get_mut(dep_id) {
                dep.remove_dependent(dependent);
            }
        }
        for dep_id in &dependencies {
            if let Some(dep) = self.nodes.get_mut(dep_id) {
                dep.add_dependent(dependent);
            }
        }
    }

    /// Install an already evaluated definition on a node.
    ///
    /// The expression's children are transferred to the node, its transient
    /// cache is released, and the node's derivative is reset.
    pub fn define(&mut self, node_id: NodeId, mut expression: Expression, value: Value) {
        let mut children = IndexSet::new();
        expression.transfer_children_to(&mut children);
        expression.release_cache();
        self.set_dependencies(node_id, children);

        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.restore_expression(expression);
            node.replace_value(value);
            node.replace_derivative(Derivative::Zero);
        }
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Panics if the node does not belong to this arena. Ids handed out by a
/// [`Graph`] always do.
impl Index<NodeId> for Arena {
    type Output = Node;

    fn index(&self, node_id: NodeId) -> &Node {
        &self.nodes[&node_id]
    }
}

impl IndexMut<NodeId> for Arena {
    fn index_mut(&mut self, node_id: NodeId) -> &mut Node {
        &mut self.nodes[&node_id]
    }
}

/// Shared handle to a computation graph.
///
/// Cloning a `Graph` clones the handle, not the nodes. Graphs are
/// single-threaded (`!Send`); concurrent use is excluded by the type system.
#[derive(Clone, Default)]
pub struct Graph {
    arena: Rc<RefCell<Arena>>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether two handles point at the same graph.
    pub fn same_as(&self, other: &Graph) -> bool {
        Rc::ptr_eq(&self.arena, &other.arena)
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.arena.borrow().node_count()
    }

    pub(crate) fn arena(&self) -> Ref<'_, Arena> {
        self.arena.borrow()
    }

    pub(crate) fn arena_mut(&self) -> RefMut<'_, Arena> {
        self.arena.borrow_mut()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("node_count", &self.node_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal(arena: &mut Arena, x: f64) -> NodeId {
        arena.add_node(Node::literal(Value::from(x)))
    }

    #[test]
    fn add_nodes() {
        let mut arena = Arena::new();

        let id1 = literal(&mut arena, 1.0);
        let id2 = literal(&mut arena, 2.0);

        assert_eq!(arena.node_count(), 2);
        assert!(arena.get_node(id1).is_some());
        assert_eq!(arena[id2].value(), &Value::from(2.0));
        assert!(arena.get_node(NodeId::new()).is_none());
    }

    #[test]
    fn set_dependencies_maintains_reverse_edges() {
        let mut arena = Arena::new();

        let x = literal(&mut arena, 1.0);
        let y = literal(&mut arena, 2.0);
        let z = literal(&mut arena, 3.0);

        arena.set_dependencies(z, [x, y].into_iter().collect());

        // Check the edges exist
        assert!(arena[x].dependents().contains(&z));
        assert!(arena[y].dependents().contains(&z));
        assert!(arena[z].dependencies().contains(&x));

        // Re-seat z onto y only
        arena.set_dependencies(z, [y].into_iter().collect());

        assert!(!arena[x].dependents().contains(&z));
        assert!(arena[y].dependents().contains(&z));
        assert_eq!(arena[z].dependencies().len(), 1);
    }

    #[test]
    fn self_dependency_is_recorded() {
        let mut arena = Arena::new();
        let x = literal(&mut arena, 1.0);

        arena.set_dependencies(x, [x].into_iter().collect());

        assert!(arena[x].dependents().contains(&x));
        assert!(arena[x].dependencies().contains(&x));
    }

    #[test]
    fn graph_handles_share_the_arena() {
        let graph = Graph::new();
        let alias = graph.clone();
        graph.arena_mut().add_node(Node::literal(Value::from(0.0)));

        assert!(graph.same_as(&alias));
        assert_eq!(alias.node_count(), 1);
        assert!(!graph.same_as(&Graph::new()));
    }
}
