//! Error Types
//!
//! Every fallible operation in the crate returns [`Result`]. Errors are
//! synchronous and never retried internally: the caller fixes the graph
//! (removes the cycle, picks a valid seed, evaluates first, ...) and repeats
//! the whole operation.

use thiserror::Error;

use crate::graph::NodeId;
use crate::value::Shape;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the graph engine and the bundled operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A `Function` was constructed without any target variable.
    #[error("function has no targets")]
    EmptyTargets,

    /// A node is reachable from itself through defining-expression edges.
    #[error("cyclic dependency through node {node}")]
    CyclicDependency {
        /// A node on the cycle.
        node: NodeId,
    },

    /// The seed passed to a seeded propagation is not an actual source
    /// (forward mode) or target (reverse mode) of the function.
    #[error("node {node} cannot seed this propagation")]
    InvalidSeed {
        /// The rejected seed.
        node: NodeId,
    },

    /// Differentiation was requested before a successful `evaluate`.
    #[error("function must be evaluated before it is differentiated")]
    NotEvaluated,

    /// A variable used by the function was re-seated after compilation.
    #[error("graph topology changed since compilation; compile the function again")]
    StaleCompilation,

    /// Operand or derivative shapes do not fit together.
    #[error("{operation}: expected {expected}, found {found}")]
    ShapeMismatch {
        /// The operation that rejected its operands.
        operation: &'static str,
        /// What the operation required.
        expected: String,
        /// What it was given.
        found: String,
    },

    /// An operation does not accept operands of this kind at all.
    #[error("{operation} does not accept a {shape} operand")]
    UnsupportedOperand {
        /// The operation that rejected its operand.
        operation: &'static str,
        /// Shape of the rejected operand.
        shape: Shape,
    },

    /// Variables or operations from different graphs were combined.
    #[error("operands belong to different graphs")]
    ForeignGraph,
}

impl Error {
    /// Shorthand for a [`Error::ShapeMismatch`] built from displayable parts.
    pub(crate) fn shape_mismatch(
        operation: &'static str,
        expected: impl ToString,
        found: impl ToString,
    ) -> Self {
        Self::ShapeMismatch {
            operation,
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}
