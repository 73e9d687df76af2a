//! Evaluators
//!
//! An evaluator wraps one expression instance and separates *what* is
//! computed (the elementary rule) from *where* the result is cached.
//!
//! # Variants
//!
//! - [`CachingEvaluator`] applies an elementary rule to its operands and
//!   stores value and tangent in owned storage until [`release_cache`]
//!   is called. It backs every anonymous operation.
//! - [`PassthroughEvaluator`] refers to a variable node. The variable
//!   already owns persistent storage, so reads go straight to the node and
//!   gradients are accumulated into it.
//! - Literals are leaves with a fixed value and zero derivative.
//!
//! Expressions address variables by [`NodeId`] only, so an expression tree
//! never owns or aliases a node.
//!
//! [`release_cache`]: Evaluator::release_cache

use std::rc::Rc;

use indexmap::IndexSet;
use smallvec::SmallVec;

use crate::error::Result;
use crate::graph::{Arena, NodeId};
use crate::ops::Rule;
use crate::value::{Derivative, Value};

/// Derivative of anything that is not differentiated.
static ZERO: Derivative = Derivative::Zero;

/// Capability object over one expression instance.
pub(crate) trait Evaluator {
    /// Current value, computed on first access and cached until
    /// [`Evaluator::release_cache`].
    fn value<'a>(&'a mut self, arena: &'a Arena) -> Result<&'a Value>;

    /// Tangent computed from the operand tangents. Recomputed on every call,
    /// since operand tangents change between passes.
    fn push_forward<'a>(&'a mut self, arena: &'a Arena) -> Result<&'a Derivative>;

    /// Accumulate the adjoint contribution of `gradient` into the operands.
    fn pull_back(&mut self, gradient: &Derivative, arena: &mut Arena) -> Result<()>;

    /// Collect the operand edges that the node adopting this expression
    /// will depend on.
    fn transfer_children_to(&self, children: &mut IndexSet<NodeId>);

    /// Drop cached results, recursively.
    fn release_cache(&mut self);
}

/// Evaluator for a composed operation.
#[derive(Debug, Clone)]
pub(crate) struct CachingEvaluator {
    rule: Rc<dyn Rule>,
    operands: Vec<Expression>,
    value: Option<Value>,
    derivative: Option<Derivative>,
}

impl CachingEvaluator {
    pub fn new(rule: Rc<dyn Rule>, operands: Vec<Expression>) -> Self {
        Self {
            rule,
            operands,
            value: None,
            derivative: None,
        }
    }

    /// Operand values. Only complete after `value` succeeded.
    fn operand_values<'a>(&'a self, arena: &'a Arena) -> SmallVec<[&'a Value; 2]> {
        self.operands
            .iter()
            .filter_map(|operand| operand.cached_value(arena))
            .collect()
    }
}

impl Evaluator for CachingEvaluator {
    fn value<'a>(&'a mut self, arena: &'a Arena) -> Result<&'a Value> {
        let value = match self.value.take() {
            Some(value) => value,
            None => {
                for operand in &mut self.operands {
                    operand.value(arena)?;
                }
                self.rule.apply(&self.operand_values(arena))?
            }
        };
        Ok(self.value.insert(value))
    }

    fn push_forward<'a>(&'a mut self, arena: &'a Arena) -> Result<&'a Derivative> {
        self.value(arena)?;
        for operand in &mut self.operands {
            operand.push_forward(arena)?;
        }

        let tangents: SmallVec<[&Derivative; 2]> = self
            .operands
            .iter()
            .map(|operand| operand.cached_derivative(arena).unwrap_or(&ZERO))
            .collect();
        let derivative = self
            .rule
            .push_forward(&self.operand_values(arena), &tangents)?;

        Ok(self.derivative.insert(derivative))
    }

    fn pull_back(&mut self, gradient: &Derivative, arena: &mut Arena) -> Result<()> {
        if gradient.is_zero() {
            return Ok(());
        }
        self.value(arena)?;

        let contributions = self
            .rule
            .pull_back(&self.operand_values(arena), gradient)?;

        for (operand, contribution) in self.operands.iter_mut().zip(contributions) {
            operand.pull_back(&contribution, arena)?;
        }
        Ok(())
    }

    fn transfer_children_to(&self, children: &mut IndexSet<NodeId>) {
        for operand in &self.operands {
            operand.transfer_children_to(children);
        }
    }

    fn release_cache(&mut self) {
        self.value = None;
        self.derivative = None;
        for operand in &mut self.operands {
            operand.release_cache();
        }
    }
}

/// Evaluator for a reference to a variable node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PassthroughEvaluator {
    node: NodeId,
}

impl PassthroughEvaluator {
    pub fn new(node: NodeId) -> Self {
        Self { node }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }
}

impl Evaluator for PassthroughEvaluator {
    fn value<'a>(&'a mut self, arena: &'a Arena) -> Result<&'a Value> {
        Ok(arena[self.node].value())
    }

    fn push_forward<'a>(&'a mut self, arena: &'a Arena) -> Result<&'a Derivative> {
        Ok(arena[self.node].derivative())
    }

    fn pull_back(&mut self, gradient: &Derivative, arena: &mut Arena) -> Result<()> {
        arena[self.node].derivative_mut().accumulate(gradient.clone())
    }

    fn transfer_children_to(&self, children: &mut IndexSet<NodeId>) {
        children.insert(self.node);
    }

    // The node owns its cache.
    fn release_cache(&mut self) {}
}

/// A defining expression: the closed set of evaluator kinds.
#[derive(Debug, Clone)]
pub(crate) enum Expression {
    Literal(Value),
    Variable(PassthroughEvaluator),
    Operation(CachingEvaluator),
}

impl Expression {
    /// Value cached by the last call to `value`, if any.
    fn cached_value<'a>(&'a self, arena: &'a Arena) -> Option<&'a Value> {
        match self {
            Expression::Literal(value) => Some(value),
            Expression::Variable(var) => Some(arena[var.node()].value()),
            Expression::Operation(op) => op.value.as_ref(),
        }
    }

    /// Tangent cached by the last call to `push_forward`, if any.
    fn cached_derivative<'a>(&'a self, arena: &'a Arena) -> Option<&'a Derivative> {
        match self {
            Expression::Literal(_) => Some(&ZERO),
            Expression::Variable(var) => Some(arena[var.node()].derivative()),
            Expression::Operation(op) => op.derivative.as_ref(),
        }
    }
}

impl Evaluator for Expression {
    fn value<'a>(&'a mut self, arena: &'a Arena) -> Result<&'a Value> {
        match self {
            Expression::Literal(value) => Ok(value),
            Expression::Variable(var) => var.value(arena),
            Expression::Operation(op) => op.value(arena),
        }
    }

    fn push_forward<'a>(&'a mut self, arena: &'a Arena) -> Result<&'a Derivative> {
        match self {
            Expression::Literal(_) => Ok(&ZERO),
            Expression::Variable(var) => var.push_forward(arena),
            Expression::Operation(op) => op.push_forward(arena),
        }
    }

    fn pull_back(&mut self, gradient: &Derivative, arena: &mut Arena) -> Result<()> {
        match self {
            Expression::Literal(_) => Ok(()),
            Expression::Variable(var) => var.pull_back(gradient, arena),
            Expression::Operation(op) => op.pull_back(gradient, arena),
        }
    }

    fn transfer_children_to(&self, children: &mut IndexSet<NodeId>) {
        match self {
            Expression::Literal(_) => {}
            Expression::Variable(var) => var.transfer_children_to(children),
            Expression::Operation(op) => op.transfer_children_to(children),
        }
    }

    fn release_cache(&mut self) {
        if let Expression::Operation(op) = self {
            op.release_cache();
        }
    }
}
