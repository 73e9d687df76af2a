//! Autodiff Core
//!
//! This crate provides a computation-graph engine for automatic
//! differentiation. It implements:
//!
//! - Mutable graph variables over scalars, vectors and matrices
//! - Eager evaluation on assignment, with re-seating of definitions
//! - Compiled functions with dependency discovery and cycle detection
//! - Forward-mode (tangent) and reverse-mode (gradient) propagation
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: node arena, node identity and the shared graph handle
//! - `evaluator`: value/derivative evaluation of one expression instance
//! - `variable` / `operation`: the user-facing node model
//! - `ops`: the bundled elementary functions and their derivative rules
//! - `function`: compilation and the propagation drivers
//!
//! # Example
//!
//! ```rust
//! use autodiff_core::{ops, Function, Graph};
//!
//! let graph = Graph::new();
//! let x = graph.variable(0.5)?;
//! let y = graph.variable(2.0)?;
//! let u = graph.variable(ops::sin(&x) * &y)?;
//!
//! let mut f = Function::new([&u])?;
//! f.evaluate()?;
//!
//! // ∂u/∂x = y cos x
//! f.push_tangent_at(&x)?;
//! assert!((u.derivative().as_scalar().unwrap() - 2.0 * 0.5f64.cos()).abs() < 1e-12);
//!
//! // ∇u = (y cos x, sin x)
//! f.pull_gradient_at(&u)?;
//! assert!((y.derivative().as_scalar().unwrap() - 0.5f64.sin()).abs() < 1e-12);
//! # Ok::<(), autodiff_core::Error>(())
//! ```

pub mod config;
pub mod error;
mod evaluator;
pub mod function;
pub mod graph;
mod operation;
pub mod ops;
pub mod value;
mod variable;

pub use config::FunctionConfig;
pub use error::{Error, Result};
pub use function::{Function, FunctionState};
pub use graph::{Graph, NodeId, NodeKind};
pub use operation::Operation;
pub use value::{Derivative, Shape, Value};
pub use variable::Variable;
