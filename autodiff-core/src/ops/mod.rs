//! Elementary Functions
//!
//! Every composed operation applies one [`Rule`] to its operand values. A
//! rule knows how to compute its output and its local Jacobians; the forward
//! and reverse derivative steps are derived from those.
//!
//! # How Differentiation Works
//!
//! For an operation `y = f(x₁, …, xₘ)` with local Jacobians `Jᵢ = ∂y/∂xᵢ`
//! (shape `len(y) × len(xᵢ)`, matrices flattened column-major):
//!
//! ```text
//! forward:  ṫ(y) = Σᵢ Jᵢ · ṫ(xᵢ)        (tangents are len × k)
//! reverse:  ḡ(xᵢ) += ḡ(y) · Jᵢ          (gradients are k × len)
//! ```
//!
//! Both directions are default methods on [`Rule`]. Element-wise rules and
//! the matrix product override them with structured forms that never build
//! the dense Jacobian; the Jacobian form is the reference both must agree
//! with.
//!
//! # Custom Rules
//!
//! Rules are trait objects, so user code can add its own and compose them
//! with [`Operation::from_rule`].

mod elementwise;
mod linalg;
mod reduction;

use std::fmt;
use std::rc::Rc;

use nalgebra::DMatrix;
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::operation::Operation;
use crate::value::{Derivative, Value};

pub use elementwise::{BinaryOp, UnaryOp};
pub use linalg::{Dot, MatMul, Outer};
pub use reduction::Reduction;

/// Local Jacobians of one application, one per operand.
pub type Jacobians = SmallVec<[DMatrix<f64>; 2]>;

/// An elementary function with its derivative rules.
pub trait Rule: fmt::Debug {
    /// Name used in error messages.
    fn name(&self) -> &'static str;

    /// Compute the output value.
    fn apply(&self, operands: &[&Value]) -> Result<Value>;

    /// Local Jacobian of the output with respect to each operand.
    fn jacobians(&self, operands: &[&Value]) -> Result<Jacobians>;

    /// Forward step: combine operand tangents into the output tangent.
    fn push_forward(&self, operands: &[&Value], tangents: &[&Derivative]) -> Result<Derivative> {
        jacobian_push_forward(self, operands, tangents)
    }

    /// Reverse step: the adjoint contribution of `gradient` to each operand.
    fn pull_back(&self, operands: &[&Value], gradient: &Derivative) -> Result<SmallVec<[Derivative; 2]>> {
        jacobian_pull_back(self, operands, gradient)
    }
}

/// `Σ Jᵢ · tᵢ` over the dense local Jacobians of `rule`.
pub(crate) fn jacobian_push_forward<R: Rule + ?Sized>(
    rule: &R,
    operands: &[&Value],
    tangents: &[&Derivative],
) -> Result<Derivative> {
    if tangents.iter().all(|tangent| tangent.is_zero()) {
        return Ok(Derivative::Zero);
    }

    let mut output = Derivative::Zero;
    for (jacobian, tangent) in rule.jacobians(operands)?.iter().zip(tangents) {
        output.accumulate(tangent.push_through(jacobian, rule.name())?)?;
    }
    Ok(output)
}

/// `g · Jᵢ` for every dense local Jacobian of `rule`.
pub(crate) fn jacobian_pull_back<R: Rule + ?Sized>(
    rule: &R,
    operands: &[&Value],
    gradient: &Derivative,
) -> Result<SmallVec<[Derivative; 2]>> {
    if gradient.is_zero() {
        return Ok(operands.iter().map(|_| Derivative::Zero).collect());
    }

    rule.jacobians(operands)?
        .iter()
        .map(|jacobian| gradient.pull_through(jacobian, rule.name()))
        .collect()
}

/// Fail unless a tangent block has one row per operand component.
pub(crate) fn expect_tangent_rows(operation: &'static str, tangent: &DMatrix<f64>, rows: usize) -> Result<()> {
    if tangent.nrows() != rows {
        return Err(Error::shape_mismatch(
            operation,
            format!("tangent with {rows} rows"),
            format!("tangent with {} rows", tangent.nrows()),
        ));
    }
    Ok(())
}

/// Fail unless a gradient block has one column per output component.
pub(crate) fn expect_gradient_columns(operation: &'static str, gradient: &DMatrix<f64>, columns: usize) -> Result<()> {
    if gradient.ncols() != columns {
        return Err(Error::shape_mismatch(
            operation,
            format!("gradient with {columns} columns"),
            format!("gradient with {} columns", gradient.ncols()),
        ));
    }
    Ok(())
}

/// Check that a rule received exactly `N` operands.
pub(crate) fn arity<'a, const N: usize>(name: &'static str, operands: &[&'a Value]) -> Result<[&'a Value; N]> {
    operands.try_into().map_err(|_| {
        Error::shape_mismatch(
            name,
            format!("{N} operands"),
            operands.len(),
        )
    })
}

fn unary(rule: impl Rule + 'static, x: impl Into<Operation>) -> Operation {
    Operation::from_rule(Rc::new(rule), [x.into()])
}

fn binary(rule: impl Rule + 'static, lhs: impl Into<Operation>, rhs: impl Into<Operation>) -> Operation {
    Operation::from_rule(Rc::new(rule), [lhs.into(), rhs.into()])
}

/// Element-wise sine.
pub fn sin(x: impl Into<Operation>) -> Operation {
    unary(UnaryOp::Sin, x)
}

/// Element-wise cosine.
pub fn cos(x: impl Into<Operation>) -> Operation {
    unary(UnaryOp::Cos, x)
}

/// Element-wise exponential.
pub fn exp(x: impl Into<Operation>) -> Operation {
    unary(UnaryOp::Exp, x)
}

/// Element-wise natural logarithm.
pub fn log(x: impl Into<Operation>) -> Operation {
    unary(UnaryOp::Log, x)
}

/// Element-wise square root.
pub fn sqrt(x: impl Into<Operation>) -> Operation {
    unary(UnaryOp::Sqrt, x)
}

/// Element-wise square.
pub fn square(x: impl Into<Operation>) -> Operation {
    unary(UnaryOp::Square, x)
}

/// Element-wise `max(x, 0)`.
pub fn maximum(x: impl Into<Operation>) -> Operation {
    unary(UnaryOp::Maximum, x)
}

/// Element-wise `min(x, 0)`.
pub fn minimum(x: impl Into<Operation>) -> Operation {
    unary(UnaryOp::Minimum, x)
}

/// Element-wise power, broadcasting scalars.
pub fn pow(base: impl Into<Operation>, exponent: impl Into<Operation>) -> Operation {
    binary(BinaryOp::Pow, base, exponent)
}

/// Inner product of two vectors.
pub fn dot(a: impl Into<Operation>, b: impl Into<Operation>) -> Operation {
    binary(Dot, a, b)
}

/// Outer product `a bᵀ` of two vectors.
pub fn outer(a: impl Into<Operation>, b: impl Into<Operation>) -> Operation {
    binary(Outer, a, b)
}

/// Matrix product with a matrix or a vector.
pub fn matmul(a: impl Into<Operation>, b: impl Into<Operation>) -> Operation {
    binary(MatMul, a, b)
}

/// Sum of all components.
pub fn sum(x: impl Into<Operation>) -> Operation {
    unary(Reduction::Sum, x)
}

/// Mean of all components.
pub fn mean(x: impl Into<Operation>) -> Operation {
    unary(Reduction::Mean, x)
}

/// Euclidean (Frobenius for matrices) norm.
pub fn norm(x: impl Into<Operation>) -> Operation {
    unary(Reduction::Norm, x)
}

/// Squared Euclidean norm.
pub fn squared_norm(x: impl Into<Operation>) -> Operation {
    unary(Reduction::SquaredNorm, x)
}
