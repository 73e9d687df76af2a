//! Functions
//!
//! A [`Function`] is a compiled, non-owning view over the part of a graph
//! that a set of target variables depends on. It drives evaluation and both
//! directions of differentiation over that part.
//!
//! # State Machine
//!
//! ```text
//!              compile()              evaluate()
//! Uncompiled ───────────▶ Compiled ───────────────▶ Evaluated
//!      ▲                                               │
//!      └──────── topology changed (detected) ◀─────────┘
//! ```
//!
//! - `evaluate`, `push_tangent*` and `pull_gradient*` compile implicitly when
//!   the function is uncompiled.
//! - Differentiation requires a successful `evaluate` first.
//! - Re-seating a variable the function followed makes the compiled order
//!   stale. With [`FunctionConfig::verify_topology`] on, the next call
//!   detects this, drops the function back to uncompiled and fails. The
//!   caller recompiles explicitly.
//!
//! # Seeding
//!
//! The `_at` variants replace derivatives rather than accumulate: every
//! source (forward) or target (backward) other than the seed is reset to
//! zero and the seed receives the identity. The result at each node is one
//! column (forward) or one row (backward) block of the Jacobian.
//!
//! # Example
//!
//! ```rust
//! use autodiff_core::{Function, Graph};
//!
//! let graph = Graph::new();
//! let x = graph.variable(3.0)?;
//! let u = graph.variable(&x * 2.0)?;
//!
//! let mut f = Function::new([&u])?;
//! f.evaluate()?;
//! assert_eq!(u.value(), 6.0);
//!
//! f.pull_gradient_at(&u)?;
//! assert_eq!(x.derivative(), 2.0);
//! # Ok::<(), autodiff_core::Error>(())
//! ```

mod compile;
mod propagate;

use std::fmt;

use indexmap::IndexSet;
use tracing::warn;

use crate::config::FunctionConfig;
use crate::error::{Error, Result};
use crate::graph::{Arena, Graph, NodeId};
use crate::variable::Variable;

use compile::Program;

/// Lifecycle state of a [`Function`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionState {
    /// No valid compiled order.
    Uncompiled,
    /// Ordered and cycle-checked.
    Compiled,
    /// Values along the compiled order are current.
    Evaluated,
}

impl fmt::Display for FunctionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionState::Uncompiled => write!(f, "uncompiled"),
            FunctionState::Compiled => write!(f, "compiled"),
            FunctionState::Evaluated => write!(f, "evaluated"),
        }
    }
}

/// Program mapping source variables to target variables.
#[derive(Debug)]
pub struct Function {
    graph: Graph,
    config: FunctionConfig,

    targets: IndexSet<NodeId>,

    /// Bound on the dependency search, as given. Need not be actual sources.
    bound: IndexSet<NodeId>,

    program: Option<Program>,
    state: FunctionState,
}

impl Function {
    /// Create a function of `targets`, searching dependencies down to the
    /// literal leaves.
    pub fn new<'a>(targets: impl IntoIterator<Item = &'a Variable>) -> Result<Self> {
        Self::with_config(targets, std::iter::empty(), FunctionConfig::default())
    }

    /// Create a function of `targets`, stopping the dependency search at
    /// `sources`.
    pub fn with_sources<'a, 'b>(
        targets: impl IntoIterator<Item = &'a Variable>,
        sources: impl IntoIterator<Item = &'b Variable>,
    ) -> Result<Self> {
        Self::with_config(targets, sources, FunctionConfig::default())
    }

    /// Create a function with explicit options.
    pub fn with_config<'a, 'b>(
        targets: impl IntoIterator<Item = &'a Variable>,
        sources: impl IntoIterator<Item = &'b Variable>,
        config: FunctionConfig,
    ) -> Result<Self> {
        let mut graph = None;
        let targets = collect_nodes(targets, &mut graph)?;
        let bound = collect_nodes(sources, &mut graph)?;
        let graph = graph.ok_or(Error::EmptyTargets)?;
        if targets.is_empty() {
            return Err(Error::EmptyTargets);
        }

        Ok(Self {
            graph,
            config,
            targets,
            bound,
            program: None,
            state: FunctionState::Uncompiled,
        })
    }

    /// Discover, order and cycle-check the subgraph.
    pub fn compile(&mut self) -> Result<()> {
        self.program = None;
        self.state = FunctionState::Uncompiled;

        let program = compile::compile(&self.graph.arena(), &self.targets, &self.bound)?;
        self.program = Some(program);
        self.state = FunctionState::Compiled;
        Ok(())
    }

    /// Whether the function holds a valid compiled order.
    pub fn compiled(&self) -> bool {
        self.state != FunctionState::Uncompiled
    }

    pub fn state(&self) -> FunctionState {
        self.state
    }

    pub fn config(&self) -> &FunctionConfig {
        &self.config
    }

    pub fn targets(&self) -> &IndexSet<NodeId> {
        &self.targets
    }

    /// The actual sources once compiled, the given bound otherwise.
    pub fn sources(&self) -> &IndexSet<NodeId> {
        match &self.program {
            Some(program) => &program.sources,
            None => &self.bound,
        }
    }

    /// The compiled order. Empty while uncompiled.
    pub fn order(&self) -> &[NodeId] {
        match &self.program {
            Some(program) => &program.order,
            None => &[],
        }
    }

    /// Recompute every variable between the sources and the targets.
    pub fn evaluate(&mut self) -> Result<()> {
        self.ready()?;
        let program = self.program()?;

        let result = propagate::evaluate(&mut self.graph.arena_mut(), program);
        self.state = match result {
            Ok(()) => FunctionState::Evaluated,
            Err(_) => FunctionState::Compiled,
        };
        result
    }

    /// Forward mode with the tangents currently stored at the sources.
    pub fn push_tangent(&mut self) -> Result<()> {
        self.differentiate(|arena, program| propagate::push_tangent(arena, program, None))
    }

    /// Forward mode seeded at one actual source.
    pub fn push_tangent_at(&mut self, seed: &Variable) -> Result<()> {
        let seed = seed.id();
        self.differentiate(|arena, program| {
            if !program.sources.contains(&seed) {
                return Err(Error::InvalidSeed { node: seed });
            }
            propagate::push_tangent(arena, program, Some(seed))
        })
    }

    /// Reverse mode with the gradients currently stored at the targets.
    pub fn pull_gradient(&mut self) -> Result<()> {
        self.differentiate(|arena, program| propagate::pull_gradient(arena, program, None))
    }

    /// Reverse mode seeded at one target.
    pub fn pull_gradient_at(&mut self, seed: &Variable) -> Result<()> {
        let seed = seed.id();
        self.differentiate(|arena, program| {
            if !program.targets.contains(&seed) {
                return Err(Error::InvalidSeed { node: seed });
            }
            propagate::pull_gradient(arena, program, Some(seed))
        })
    }

    fn differentiate(&mut self, pass: impl FnOnce(&mut Arena, &Program) -> Result<()>) -> Result<()> {
        self.ready()?;
        if self.state != FunctionState::Evaluated {
            return Err(Error::NotEvaluated);
        }
        let program = self.program()?;
        pass(&mut self.graph.arena_mut(), program)
    }

    /// Compile if needed, then check the compiled order is still current.
    fn ready(&mut self) -> Result<()> {
        if self.state == FunctionState::Uncompiled {
            self.compile()?;
        }
        if !self.config.verify_topology {
            return Ok(());
        }

        let current = match &self.program {
            Some(program) => program.is_current(&self.graph.arena()),
            None => true,
        };
        if current {
            return Ok(());
        }

        warn!(targets = ?self.targets, "graph topology changed since compilation");
        let recompiled = compile::compile(&self.graph.arena(), &self.targets, &self.bound);
        self.program = None;
        self.state = FunctionState::Uncompiled;

        Err(match recompiled {
            Err(err @ Error::CyclicDependency { .. }) => err,
            _ => Error::StaleCompilation,
        })
    }

    fn program(&self) -> Result<&Program> {
        self.program.as_ref().ok_or(Error::StaleCompilation)
    }
}

fn collect_nodes<'a>(
    variables: impl IntoIterator<Item = &'a Variable>,
    graph: &mut Option<Graph>,
) -> Result<IndexSet<NodeId>> {
    variables
        .into_iter()
        .map(|var| {
            if let Some(first) = graph.as_ref() {
                if !first.same_as(var.graph()) {
                    return Err(Error::ForeignGraph);
                }
            } else {
                *graph = Some(var.graph().clone());
            }
            Ok(var.id())
        })
        .collect()
}

/// For debugging.
impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, ids: impl IntoIterator<Item = NodeId>) -> fmt::Result {
            let ids: Vec<String> = ids.into_iter().map(|id| id.to_string()).collect();
            write!(f, "[{}]", ids.join(", "))
        }

        write!(f, "Function(state={}, targets=", self.state)?;
        list(f, self.targets.iter().copied())?;
        write!(f, ", sources=")?;
        list(f, self.sources().iter().copied())?;
        write!(f, ", order=")?;
        list(f, self.order().iter().copied())?;
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops;

    #[test]
    fn state_transitions() {
        let graph = Graph::new();
        let x = graph.variable(3.0).unwrap();
        let u = graph.variable(&x * 2.0).unwrap();

        let mut f = Function::new([&u]).unwrap();
        assert_eq!(f.state(), FunctionState::Uncompiled);
        assert!(!f.compiled());
        assert!(f.order().is_empty());

        f.compile().unwrap();
        assert_eq!(f.state(), FunctionState::Compiled);
        assert_eq!(f.order(), &[x.id(), u.id()]);

        f.evaluate().unwrap();
        assert_eq!(f.state(), FunctionState::Evaluated);
    }

    #[test]
    fn evaluate_compiles_implicitly() {
        let graph = Graph::new();
        let x = graph.variable(1.0).unwrap();
        let u = graph.variable(ops::exp(&x)).unwrap();

        let mut f = Function::new([&u]).unwrap();
        x.set(0.0).unwrap();
        f.evaluate().unwrap();

        assert!(f.compiled());
        assert_eq!(u.value(), 1.0);
    }

    #[test]
    fn differentiation_requires_evaluation() {
        let graph = Graph::new();
        let x = graph.variable(1.0).unwrap();
        let u = graph.variable(&x + 1.0).unwrap();
        let mut f = Function::new([&u]).unwrap();

        assert_eq!(f.push_tangent().unwrap_err(), Error::NotEvaluated);
        // The implicit compile still happened
        assert_eq!(f.state(), FunctionState::Compiled);
        assert_eq!(f.pull_gradient_at(&u).unwrap_err(), Error::NotEvaluated);
    }

    #[test]
    fn targets_are_required() {
        let err = Function::new(Vec::<&Variable>::new()).unwrap_err();
        assert_eq!(err, Error::EmptyTargets);

        // Sources alone do not make a function
        let x = Graph::new().variable(1.0).unwrap();
        let err = Function::with_sources(Vec::<&Variable>::new(), [&x]).unwrap_err();
        assert_eq!(err, Error::EmptyTargets);
    }

    #[test]
    fn variables_must_share_a_graph() {
        let x = Graph::new().variable(1.0).unwrap();
        let y = Graph::new().variable(1.0).unwrap();

        assert_eq!(Function::new([&x, &y]).unwrap_err(), Error::ForeignGraph);
        assert_eq!(Function::with_sources([&x], [&y]).unwrap_err(), Error::ForeignGraph);
    }

    #[test]
    fn sources_report_discovered_nodes_after_compile() {
        let graph = Graph::new();
        let x = graph.variable(1.0).unwrap();
        let y = graph.variable(2.0).unwrap();
        let u = graph.variable(&x + &y).unwrap();
        let v = graph.variable(&u * 3.0).unwrap();

        // `x` bounds nothing on the path to `v` through `u`
        let mut f = Function::with_sources([&v], [&u, &x]).unwrap();
        assert_eq!(f.sources().len(), 2);

        f.compile().unwrap();
        let sources: Vec<NodeId> = f.sources().iter().copied().collect();
        assert_eq!(sources, vec![u.id()]);
    }

    #[test]
    fn display_summarises_the_function() {
        let graph = Graph::new();
        let x = graph.variable(1.0).unwrap();
        let u = graph.variable(ops::sin(&x)).unwrap();
        let mut f = Function::new([&u]).unwrap();

        assert_eq!(
            f.to_string(),
            format!("Function(state=uncompiled, targets=[{}], sources=[], order=[])", u.id())
        );

        f.evaluate().unwrap();
        assert_eq!(
            f.to_string(),
            format!(
                "Function(state=evaluated, targets=[{u}], sources=[{x}], order=[{x}, {u}])",
                u = u.id(),
                x = x.id()
            )
        );
    }
}
