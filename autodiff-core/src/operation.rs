//! Operations
//!
//! An [`Operation`] is an anonymous composition of operands through one
//! elementary rule. It is what `&x * 2.0` or [`ops::sin`](crate::ops::sin)
//! returns, and it lives only until it is assigned to a variable or
//! evaluated.
//!
//! # Graph Membership
//!
//! An operation remembers the graph its variable operands belong to.
//! Composing operands from two different graphs does not fail immediately;
//! the operation is marked and rejected with [`Error::ForeignGraph`] when it
//! is assigned or evaluated.

use std::ops::{Add, Div, Mul, Neg, Sub};
use std::rc::Rc;

use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};
use crate::evaluator::{CachingEvaluator, Evaluator, Expression, PassthroughEvaluator};
use crate::graph::{Arena, Graph};
use crate::ops::{BinaryOp, Rule, UnaryOp};
use crate::value::Value;
use crate::variable::Variable;

/// An anonymous expression built from variables, literals and rules.
#[derive(Debug, Clone)]
pub struct Operation {
    /// Graph of the variable operands, if there are any.
    graph: Option<Graph>,
    expression: Expression,
    /// Set if operands from different graphs were combined.
    foreign: bool,
}

impl Operation {
    /// A constant expression.
    pub fn literal(value: impl Into<Value>) -> Self {
        Self {
            graph: None,
            expression: Expression::Literal(value.into()),
            foreign: false,
        }
    }

    /// Apply `rule` to `operands`.
    ///
    /// This is how the bundled functions in [`ops`](crate::ops) are built and
    /// how custom rules are composed into a graph.
    pub fn from_rule(rule: Rc<dyn Rule>, operands: impl IntoIterator<Item = Operation>) -> Self {
        let mut graph: Option<Graph> = None;
        let mut foreign = false;
        let mut expressions = Vec::new();

        for operand in operands {
            foreign |= operand.foreign;
            if let Some(theirs) = operand.graph {
                match &graph {
                    Some(ours) => foreign |= !ours.same_as(&theirs),
                    None => graph = Some(theirs),
                }
            }
            expressions.push(operand.expression);
        }

        Self {
            graph,
            expression: Expression::Operation(CachingEvaluator::new(rule, expressions)),
            foreign,
        }
    }

    /// The graph the variable operands live in. `None` for pure literals.
    pub fn graph(&self) -> Option<&Graph> {
        self.graph.as_ref()
    }

    /// Compute the value without assigning it to a variable.
    pub fn evaluate(&self) -> Result<Value> {
        if self.foreign {
            return Err(Error::ForeignGraph);
        }

        let mut expression = self.expression.clone();
        expression.release_cache();
        let value = match &self.graph {
            Some(graph) => expression.value(&graph.arena()).cloned(),
            None => expression.value(&Arena::new()).cloned(),
        };
        value
    }

    /// Take the expression for assignment to a variable of `graph`.
    pub(crate) fn bind(self, graph: &Graph) -> Result<Expression> {
        match self.graph {
            _ if self.foreign => Err(Error::ForeignGraph),
            Some(ref own) if !own.same_as(graph) => Err(Error::ForeignGraph),
            _ => Ok(self.expression),
        }
    }
}

impl From<f64> for Operation {
    fn from(x: f64) -> Self {
        Operation::literal(x)
    }
}

impl From<Value> for Operation {
    fn from(value: Value) -> Self {
        Operation::literal(value)
    }
}

impl From<DVector<f64>> for Operation {
    fn from(v: DVector<f64>) -> Self {
        Operation::literal(v)
    }
}

impl From<DMatrix<f64>> for Operation {
    fn from(m: DMatrix<f64>) -> Self {
        Operation::literal(m)
    }
}

/// A reference to the variable, not a copy of its value.
impl From<&Variable> for Operation {
    fn from(var: &Variable) -> Self {
        Self {
            graph: Some(var.graph().clone()),
            expression: Expression::Variable(PassthroughEvaluator::new(var.id())),
            foreign: false,
        }
    }
}

impl From<Variable> for Operation {
    fn from(var: Variable) -> Self {
        Operation::from(&var)
    }
}

// ──────────────────────────────────────────────
//  Operators
// ──────────────────────────────────────────────

macro_rules! binary_operator {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<R: Into<Operation>> $trait<R> for Operation {
            type Output = Operation;

            fn $method(self, rhs: R) -> Operation {
                Operation::from_rule(Rc::new($op), [self, rhs.into()])
            }
        }

        impl<R: Into<Operation>> $trait<R> for &Variable {
            type Output = Operation;

            fn $method(self, rhs: R) -> Operation {
                Operation::from_rule(Rc::new($op), [self.into(), rhs.into()])
            }
        }

        impl<R: Into<Operation>> $trait<R> for Variable {
            type Output = Operation;

            fn $method(self, rhs: R) -> Operation {
                Operation::from_rule(Rc::new($op), [self.into(), rhs.into()])
            }
        }

        impl $trait<Operation> for f64 {
            type Output = Operation;

            fn $method(self, rhs: Operation) -> Operation {
                Operation::from_rule(Rc::new($op), [self.into(), rhs])
            }
        }

        impl $trait<&Variable> for f64 {
            type Output = Operation;

            fn $method(self, rhs: &Variable) -> Operation {
                Operation::from_rule(Rc::new($op), [self.into(), rhs.into()])
            }
        }

        impl $trait<Variable> for f64 {
            type Output = Operation;

            fn $method(self, rhs: Variable) -> Operation {
                Operation::from_rule(Rc::new($op), [self.into(), rhs.into()])
            }
        }
    };
}

binary_operator!(Add, add, BinaryOp::Add);
binary_operator!(Sub, sub, BinaryOp::Sub);
binary_operator!(Mul, mul, BinaryOp::Mul);
binary_operator!(Div, div, BinaryOp::Div);

impl Neg for Operation {
    type Output = Operation;

    fn neg(self) -> Operation {
        Operation::from_rule(Rc::new(UnaryOp::Neg), [self])
    }
}

impl Neg for &Variable {
    type Output = Operation;

    fn neg(self) -> Operation {
        -Operation::from(self)
    }
}

impl Neg for Variable {
    type Output = Operation;

    fn neg(self) -> Operation {
        -Operation::from(self)
    }
}
