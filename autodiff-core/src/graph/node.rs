//! Graph Nodes
//!
//! This module defines the vertices of the computation graph. Every node is
//! owned by a Variable: it stores the Variable's defining expression, its
//! cached value and derivative, and the operand edges of the definition.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;

use crate::evaluator::Expression;
use crate::value::{Derivative, Value};

/// Unique identifier for a node in the computation graph.
///
/// Ids come from a process-wide counter and are never reused, so a
/// compiled `Function` can hold them for as long as it likes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the computation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Defined by a literal. Leaves of every dependency search.
    Literal,

    /// Defined by an operation over other variables (or by aliasing one).
    Derived,
}

/// A node in the computation graph.
#[derive(Debug)]
pub struct Node {
    /// Unique identifier for this node.
    id: NodeId,

    /// Defining expression. Taken out temporarily while it is evaluated.
    expression: Option<Expression>,

    /// Most recently computed value.
    value: Value,

    /// Tangent or gradient from the last propagation (or set by the caller).
    derivative: Derivative,

    /// Nodes that the defining expression reads from.
    dependencies: IndexSet<NodeId>,

    /// Nodes whose defining expressions read from this node.
    dependents: IndexSet<NodeId>,

    /// Bumped whenever `dependencies` changes.
    revision: u64,
}

impl Node {
    /// Create a literal node holding `value`.
    pub fn literal(value: Value) -> Self {
        Self {
            id: NodeId::new(),
            expression: Some(Expression::Literal(value.clone())),
            value,
            derivative: Derivative::Zero,
            dependencies: IndexSet::new(),
            dependents: IndexSet::new(),
            revision: 0,
        }
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the node's kind, derived from its current definition.
    pub fn kind(&self) -> NodeKind {
        match self.expression {
            Some(Expression::Literal(_)) => NodeKind::Literal,
            _ => NodeKind::Derived,
        }
    }

    /// True if this node has no incoming edges.
    pub fn is_leaf(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Get the cached value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Replace the cached value, returning the previous one.
    pub fn replace_value(&mut self, value: Value) -> Value {
        std::mem::replace(&mut self.value, value)
    }

    /// Get the derivative.
    pub fn derivative(&self) -> &Derivative {
        &self.derivative
    }

    /// Mutable access to the derivative, for accumulation.
    pub fn derivative_mut(&mut self) -> &mut Derivative {
        &mut self.derivative
    }

    /// Replace the derivative, returning the previous one.
    pub fn replace_derivative(&mut self, derivative: Derivative) -> Derivative {
        std::mem::replace(&mut self.derivative, derivative)
    }

    /// Take the defining expression out for evaluation.
    pub fn take_expression(&mut self) -> Option<Expression> {
        self.expression.take()
    }

    /// Put a defining expression (back) in place.
    pub fn restore_expression(&mut self, expression: Expression) -> Option<Expression> {
        self.expression.replace(expression)
    }

    /// Get all dependencies, in the order the definition reads them.
    pub fn dependencies(&self) -> &IndexSet<NodeId> {
        &self.dependencies
    }

    /// Replace the dependency list. Bumps the revision if it changed.
    ///
    /// Returns the previous list. Reverse edges are maintained by the arena.
    pub fn replace_dependencies(&mut self, dependencies: IndexSet<NodeId>) -> IndexSet<NodeId> {
        if dependencies != self.dependencies {
            self.revision += 1;
        }
        std::mem::replace(&mut self.dependencies, dependencies)
    }

    /// Add a dependent (a node that reads from this node).
    pub fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    /// Remove a dependent.
    pub fn remove_dependent(&mut self, node_id: NodeId) {
        self.dependents.shift_remove(&node_id);
    }

    /// Get all dependents.
    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }

    /// Structural revision of the dependency list.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}
