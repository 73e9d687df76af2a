//! Element-wise rules.
//!
//! Binary rules accept two operands of the same shape, or a scalar and any
//! value; the scalar is broadcast. The Jacobian of an element-wise rule is
//! diagonal, except for a broadcast scalar operand, where it is a single
//! column.
//!
//! The derivative steps never build that Jacobian. Forward mode scales the
//! rows of an operand tangent by the per-component partials; reverse mode
//! scales the columns of the gradient, summing them for a broadcast scalar.

use nalgebra::{DMatrix, DVector};
use smallvec::SmallVec;

use super::{arity, expect_gradient_columns, expect_tangent_rows, Jacobians, Rule};
use crate::error::{Error, Result};
use crate::value::{Derivative, Shape, Value};

/// Element-wise binary arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    fn eval(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
        }
    }

    /// `(∂/∂a, ∂/∂b)` at one component.
    fn partials(self, a: f64, b: f64) -> (f64, f64) {
        match self {
            BinaryOp::Add => (1.0, 1.0),
            BinaryOp::Sub => (1.0, -1.0),
            BinaryOp::Mul => (b, a),
            BinaryOp::Div => (1.0 / b, -a / (b * b)),
            // a^b ln a is taken as 0 at a == 0, where the limit exists for b > 0
            BinaryOp::Pow => {
                let db = if a == 0.0 { 0.0 } else { a.powf(b) * a.ln() };
                (b * a.powf(b - 1.0), db)
            }
        }
    }

    /// Partials with respect to `a` and `b` at every output component.
    fn component_partials(self, a: &Value, b: &Value) -> Result<(Vec<f64>, Vec<f64>)> {
        let shape = self.broadcast(a.shape(), b.shape())?;
        Ok((0..shape.len())
            .map(|i| self.partials(component(a, i), component(b, i)))
            .unzip())
    }

    /// Output shape of `a op b`, broadcasting scalars.
    fn broadcast(self, a: Shape, b: Shape) -> Result<Shape> {
        match (a, b) {
            (a, b) if a == b => Ok(a),
            (Shape::Scalar, other) | (other, Shape::Scalar) => Ok(other),
            (a, b) => Err(Error::shape_mismatch(self.name(), a, b)),
        }
    }
}

/// Component `i` of an operand broadcast to the output length.
fn component(value: &Value, i: usize) -> f64 {
    match value {
        Value::Scalar(x) => *x,
        other => other.as_slice()[i],
    }
}

/// Forward contribution `diag(partials) · t` of one operand.
fn scale_tangent(
    operation: &'static str,
    operand: &Value,
    partials: &[f64],
    tangent: &Derivative,
) -> Result<Derivative> {
    let Derivative::Dense(tangent) = tangent else {
        return Ok(Derivative::Zero);
    };
    expect_tangent_rows(operation, tangent, operand.len())?;

    let broadcast = matches!(operand, Value::Scalar(_));
    let row = |i: usize| if broadcast { 0 } else { i };
    Ok(Derivative::Dense(DMatrix::from_fn(partials.len(), tangent.ncols(), |i, j| {
        partials[i] * tangent[(row(i), j)]
    })))
}

/// Reverse contribution `g · diag(partials)` to one operand.
fn scale_gradient(
    operation: &'static str,
    operand: &Value,
    partials: &[f64],
    gradient: &Derivative,
) -> Result<Derivative> {
    let Derivative::Dense(gradient) = gradient else {
        return Ok(Derivative::Zero);
    };
    expect_gradient_columns(operation, gradient, partials.len())?;

    let scaled = DMatrix::from_fn(gradient.nrows(), partials.len(), |r, i| gradient[(r, i)] * partials[i]);
    Ok(match operand {
        Value::Scalar(_) => Derivative::from(scaled.column_sum()),
        _ => Derivative::Dense(scaled),
    })
}

/// Local Jacobian of an element-wise rule from per-component partials.
fn local_jacobian(operand: &Value, partials: Vec<f64>) -> DMatrix<f64> {
    match operand {
        Value::Scalar(_) => DMatrix::from_column_slice(partials.len(), 1, &partials),
        _ => DMatrix::from_diagonal(&DVector::from_vec(partials)),
    }
}

impl Rule for BinaryOp {
    fn name(&self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Pow => "pow",
        }
    }

    fn apply(&self, operands: &[&Value]) -> Result<Value> {
        let [a, b] = arity(self.name(), operands)?;
        let shape = self.broadcast(a.shape(), b.shape())?;

        let data = (0..shape.len())
            .map(|i| self.eval(component(a, i), component(b, i)))
            .collect();
        Ok(Value::from_flat(shape, data))
    }

    fn jacobians(&self, operands: &[&Value]) -> Result<Jacobians> {
        let [a, b] = arity(self.name(), operands)?;
        let (da, db) = self.component_partials(a, b)?;
        Ok([local_jacobian(a, da), local_jacobian(b, db)].into_iter().collect())
    }

    fn push_forward(&self, operands: &[&Value], tangents: &[&Derivative]) -> Result<Derivative> {
        if tangents.iter().all(|tangent| tangent.is_zero()) {
            return Ok(Derivative::Zero);
        }
        let [a, b] = arity(self.name(), operands)?;
        let (da, db) = self.component_partials(a, b)?;

        let mut output = Derivative::Zero;
        for ((operand, partials), tangent) in [(a, da), (b, db)].iter().zip(tangents) {
            output.accumulate(scale_tangent(self.name(), operand, partials, tangent)?)?;
        }
        Ok(output)
    }

    fn pull_back(&self, operands: &[&Value], gradient: &Derivative) -> Result<SmallVec<[Derivative; 2]>> {
        let [a, b] = arity(self.name(), operands)?;
        if gradient.is_zero() {
            return Ok([Derivative::Zero, Derivative::Zero].into_iter().collect());
        }
        let (da, db) = self.component_partials(a, b)?;

        Ok([
            scale_gradient(self.name(), a, &da, gradient)?,
            scale_gradient(self.name(), b, &db, gradient)?,
        ]
        .into_iter()
        .collect())
    }
}

/// Element-wise unary functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Sin,
    Cos,
    Exp,
    Log,
    Sqrt,
    Square,
    /// `max(x, 0)`
    Maximum,
    /// `min(x, 0)`
    Minimum,
}

impl UnaryOp {
    fn eval(self, x: f64) -> f64 {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Sin => x.sin(),
            UnaryOp::Cos => x.cos(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Square => x * x,
            UnaryOp::Maximum => x.max(0.0),
            UnaryOp::Minimum => x.min(0.0),
        }
    }

    fn derivative(self, x: f64) -> f64 {
        match self {
            UnaryOp::Neg => -1.0,
            UnaryOp::Sin => x.cos(),
            UnaryOp::Cos => -x.sin(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => 1.0 / x,
            UnaryOp::Sqrt => 0.5 / x.sqrt(),
            UnaryOp::Square => 2.0 * x,
            UnaryOp::Maximum => if x > 0.0 { 1.0 } else { 0.0 },
            UnaryOp::Minimum => if x < 0.0 { 1.0 } else { 0.0 },
        }
    }

    fn partials(self, x: &Value) -> Vec<f64> {
        x.as_slice().iter().map(|&x| self.derivative(x)).collect()
    }
}

impl Rule for UnaryOp {
    fn name(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Square => "square",
            UnaryOp::Maximum => "maximum",
            UnaryOp::Minimum => "minimum",
        }
    }

    fn apply(&self, operands: &[&Value]) -> Result<Value> {
        let [x] = arity(self.name(), operands)?;
        Ok(x.map(|x| self.eval(x)))
    }

    fn jacobians(&self, operands: &[&Value]) -> Result<Jacobians> {
        let [x] = arity(self.name(), operands)?;
        let diagonal = DVector::from_vec(self.partials(x));
        Ok([DMatrix::from_diagonal(&diagonal)].into_iter().collect())
    }

    fn push_forward(&self, operands: &[&Value], tangents: &[&Derivative]) -> Result<Derivative> {
        let [x] = arity(self.name(), operands)?;
        match tangents.first() {
            Some(tangent) if !tangent.is_zero() => scale_tangent(self.name(), x, &self.partials(x), tangent),
            _ => Ok(Derivative::Zero),
        }
    }

    fn pull_back(&self, operands: &[&Value], gradient: &Derivative) -> Result<SmallVec<[Derivative; 2]>> {
        let [x] = arity(self.name(), operands)?;
        let pulled = scale_gradient(self.name(), x, &self.partials(x), gradient)?;
        Ok([pulled].into_iter().collect())
    }
}
