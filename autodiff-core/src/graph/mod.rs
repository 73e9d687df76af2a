//! Computation Graph
//!
//! This module implements the graph that variables live in and functions
//! are compiled from.
//!
//! # Overview
//!
//! The computation graph is a directed graph where:
//!
//! - Nodes are variables: each owns its defining expression, its cached
//!   value and its derivative
//! - Edges are operand references: if the definition of A reads B, there is
//!   an edge from B to A
//!
//! Operations (anonymous compositions) are not nodes. When an operation is
//! assigned to a variable, its operand edges are transferred to that
//! variable's node and the operation itself disappears into the node's
//! defining expression.
//!
//! # Design Decisions
//!
//! 1. Nodes live in an arena addressed by stable ids rather than behind
//!    pointers to each other. Re-seating a variable rewrites one node's
//!    edge list; nothing else has to be re-pointed.
//!
//! 2. The graph may contain cycles (a variable re-seated onto an expression
//!    that reads itself). They are legal to build and rejected when a
//!    function is compiled over them.
//!
//! 3. We maintain both forward (dependencies) and reverse (dependents) edges
//!    to enable traversal in both directions.

mod arena;
mod node;

pub use arena::Graph;
pub use node::{NodeId, NodeKind};

pub(crate) use arena::Arena;
pub(crate) use node::Node;
