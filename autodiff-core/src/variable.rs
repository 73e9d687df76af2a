//! Variables
//!
//! A [`Variable`] is a stable, mutable vertex of the computation graph. It
//! owns a defining expression, the value last computed from it, and a
//! derivative slot that propagations read from and write into.
//!
//! # How Variables Work
//!
//! 1. `graph.variable(init)` evaluates `init` immediately and stores both
//!    the expression and its value in a new node.
//!
//! 2. Other expressions refer to the variable by id. Composing `&x * 2.0`
//!    does not copy `x`'s value; it records a reference that is read each
//!    time the composition is evaluated.
//!
//! 3. `x.set(init)` re-seats the variable: the new expression is evaluated
//!    first, and only if that succeeds does it replace the old definition.
//!    The node's dependency edges are rewritten to the operands of the new
//!    expression and its derivative is reset.
//!
//! # Example
//!
//! ```rust
//! use autodiff_core::Graph;
//!
//! let graph = Graph::new();
//! let x = graph.variable(3.0)?;
//! let u = graph.variable(&x * 2.0)?;
//! assert_eq!(u.value(), 6.0);
//!
//! // Re-seating is eager; `u` keeps its value until it is re-evaluated
//! x.set(4.0)?;
//! assert_eq!(x.value(), 4.0);
//! assert_eq!(u.value(), 6.0);
//! # Ok::<(), autodiff_core::Error>(())
//! ```

use std::fmt;

use tracing::debug;

use crate::error::Result;
use crate::evaluator::{Evaluator, Expression};
use crate::graph::{Graph, Node, NodeId, NodeKind};
use crate::operation::Operation;
use crate::value::{Derivative, Shape, Value};

/// A handle to a variable node.
///
/// Cloning a `Variable` clones the handle: both clones name the same node,
/// and setting one is visible through the other.
#[derive(Clone)]
pub struct Variable {
    graph: Graph,
    id: NodeId,
}

impl Variable {
    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The graph this variable lives in.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The value last computed for this variable.
    pub fn value(&self) -> Value {
        self.graph.arena()[self.id].value().clone()
    }

    /// Shape of the current value.
    pub fn shape(&self) -> Shape {
        self.graph.arena()[self.id].value().shape()
    }

    /// Whether the variable is currently defined by a literal.
    pub fn kind(&self) -> NodeKind {
        self.graph.arena()[self.id].kind()
    }

    /// Replace the defining expression.
    ///
    /// The new expression is evaluated immediately. If that fails, the
    /// variable is left as it was. Functions compiled over the old
    /// definition must be compiled again.
    pub fn set(&self, init: impl Into<Operation>) -> Result<()> {
        let (expression, value) = self.graph.evaluate_definition(init.into())?;
        self.graph.arena_mut().define(self.id, expression, value);

        debug!(variable = %self.id, "re-seated variable");
        Ok(())
    }

    /// The tangent or gradient stored at this variable.
    pub fn derivative(&self) -> Derivative {
        self.graph.arena()[self.id].derivative().clone()
    }

    /// Seed this variable's derivative before a propagation.
    pub fn set_derivative(&self, derivative: impl Into<Derivative>) {
        self.graph.arena_mut()[self.id].replace_derivative(derivative.into());
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.graph.same_as(&other.graph)
    }
}

impl Eq for Variable {}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variable")
            .field("id", &self.id)
            .field("value", &self.value())
            .finish()
    }
}

impl Graph {
    /// Create a variable holding a literal. Cannot fail.
    pub fn literal(&self, value: impl Into<Value>) -> Variable {
        let id = self.arena_mut().add_node(Node::literal(value.into()));
        Variable {
            graph: self.clone(),
            id,
        }
    }

    /// Create a variable from any expression, evaluating it eagerly.
    pub fn variable(&self, init: impl Into<Operation>) -> Result<Variable> {
        let (expression, value) = self.evaluate_definition(init.into())?;

        let mut arena = self.arena_mut();
        let id = arena.add_node(Node::literal(value.clone()));
        arena.define(id, expression, value);

        Ok(Variable {
            graph: self.clone(),
            id,
        })
    }

    /// Evaluate a new definition without touching any node.
    fn evaluate_definition(&self, operation: Operation) -> Result<(Expression, Value)> {
        let mut expression = operation.bind(self)?;
        expression.release_cache();

        let arena = self.arena();
        let value = expression.value(&arena).cloned()?;
        Ok((expression, value))
    }
}
