//! Values and Derivatives
//!
//! Graph nodes hold one of three value kinds: scalars, column vectors and
//! dense matrices. Derivatives are kept in a single dense representation so
//! that one propagation interface serves every combination of kinds.
//!
//! # Derivative Layout
//!
//! Every value has a flat length (1, `n`, or `rows * cols`; matrices are
//! flattened column-major). For a node of flat length `n`:
//!
//! - a forward-mode tangent is an `n × k` matrix, one column per seed
//!   direction;
//! - a reverse-mode gradient is a `k × n` matrix, one row per seed output.
//!
//! A scalar node seeded with a scalar therefore holds a `1 × 1` derivative,
//! which [`Derivative::as_scalar`] reads back as an `f64`.

use std::fmt;

use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};

/// Shape of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// A single `f64`.
    Scalar,
    /// A column vector with the given length.
    Vector(usize),
    /// A matrix with the given rows and columns.
    Matrix(usize, usize),
}

impl Shape {
    /// Number of scalar components once flattened.
    pub fn len(&self) -> usize {
        match *self {
            Shape::Scalar => 1,
            Shape::Vector(n) => n,
            Shape::Matrix(rows, cols) => rows * cols,
        }
    }

    /// True for vectors and matrices without components.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Shape::Scalar => write!(f, "scalar"),
            Shape::Vector(n) => write!(f, "vector[{n}]"),
            Shape::Matrix(rows, cols) => write!(f, "matrix[{rows}x{cols}]"),
        }
    }
}

/// A value held by a graph node.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Vector(DVector<f64>),
    Matrix(DMatrix<f64>),
}

impl Value {
    /// Build a value of the given shape from column-major components.
    ///
    /// The caller guarantees `data.len() == shape.len()`.
    pub(crate) fn from_flat(shape: Shape, data: Vec<f64>) -> Self {
        match shape {
            Shape::Scalar => Value::Scalar(data.first().copied().unwrap_or_default()),
            Shape::Vector(_) => Value::Vector(DVector::from_vec(data)),
            Shape::Matrix(rows, cols) => Value::Matrix(DMatrix::from_vec(rows, cols, data)),
        }
    }

    /// Get the shape of this value.
    pub fn shape(&self) -> Shape {
        match self {
            Value::Scalar(_) => Shape::Scalar,
            Value::Vector(v) => Shape::Vector(v.len()),
            Value::Matrix(m) => Shape::Matrix(m.nrows(), m.ncols()),
        }
    }

    /// Flat length of this value.
    pub fn len(&self) -> usize {
        self.shape().len()
    }

    /// True for vectors and matrices without components.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The components in column-major order.
    pub fn as_slice(&self) -> &[f64] {
        match self {
            Value::Scalar(x) => std::slice::from_ref(x),
            Value::Vector(v) => v.as_slice(),
            Value::Matrix(m) => m.as_slice(),
        }
    }

    /// The scalar, if this is a scalar value.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(x) => Some(*x),
            _ => None,
        }
    }

    /// The vector, if this is a vector value.
    pub fn as_vector(&self) -> Option<&DVector<f64>> {
        match self {
            Value::Vector(v) => Some(v),
            _ => None,
        }
    }

    /// The matrix, if this is a matrix value.
    pub fn as_matrix(&self) -> Option<&DMatrix<f64>> {
        match self {
            Value::Matrix(m) => Some(m),
            _ => None,
        }
    }

    /// View any value as a matrix: scalars become `1 × 1`, vectors `n × 1`.
    pub(crate) fn to_matrix(&self) -> DMatrix<f64> {
        let shape = self.shape();
        let (rows, cols) = match shape {
            Shape::Scalar => (1, 1),
            Shape::Vector(n) => (n, 1),
            Shape::Matrix(rows, cols) => (rows, cols),
        };
        DMatrix::from_column_slice(rows, cols, self.as_slice())
    }

    /// Apply `f` to every component, keeping the shape.
    pub(crate) fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        match self {
            Value::Scalar(x) => Value::Scalar(f(*x)),
            Value::Vector(v) => Value::Vector(v.map(f)),
            Value::Matrix(m) => Value::Matrix(m.map(f)),
        }
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Scalar(x)
    }
}

impl From<DVector<f64>> for Value {
    fn from(v: DVector<f64>) -> Self {
        Value::Vector(v)
    }
}

impl From<DMatrix<f64>> for Value {
    fn from(m: DMatrix<f64>) -> Self {
        Value::Matrix(m)
    }
}

impl PartialEq<f64> for Value {
    fn eq(&self, other: &f64) -> bool {
        self.as_scalar() == Some(*other)
    }
}

/// A tangent or gradient held by a graph node.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Derivative {
    /// The additive identity. Shapeless, so it combines with anything.
    #[default]
    Zero,
    /// A dense tangent (`n × k`) or gradient (`k × n`) block.
    Dense(DMatrix<f64>),
}

impl Derivative {
    /// Identity block for a node of flat length `n`.
    ///
    /// This is the seed used by `push_tangent_at` and `pull_gradient_at`.
    pub fn identity(n: usize) -> Self {
        Derivative::Dense(DMatrix::identity(n, n))
    }

    /// True if this is the shapeless zero.
    pub fn is_zero(&self) -> bool {
        matches!(self, Derivative::Zero)
    }

    /// Read a `1 × 1` derivative as a scalar. `Zero` reads as `0.0`.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Derivative::Zero => Some(0.0),
            Derivative::Dense(m) if m.nrows() == 1 && m.ncols() == 1 => Some(m[(0, 0)]),
            Derivative::Dense(_) => None,
        }
    }

    /// The dense block, if any.
    pub fn as_matrix(&self) -> Option<&DMatrix<f64>> {
        match self {
            Derivative::Zero => None,
            Derivative::Dense(m) => Some(m),
        }
    }

    /// Materialise as a `rows × cols` matrix, expanding `Zero`.
    pub fn to_matrix(&self, rows: usize, cols: usize) -> DMatrix<f64> {
        match self {
            Derivative::Zero => DMatrix::zeros(rows, cols),
            Derivative::Dense(m) => m.clone(),
        }
    }

    /// Add `other` into `self`.
    pub(crate) fn accumulate(&mut self, other: Derivative) -> Result<()> {
        let Derivative::Dense(rhs) = other else {
            return Ok(());
        };
        match self {
            Derivative::Zero => *self = Derivative::Dense(rhs),
            Derivative::Dense(lhs) => {
                if lhs.shape() != rhs.shape() {
                    return Err(Error::shape_mismatch(
                        "accumulate",
                        format!("{}x{} derivative", lhs.nrows(), lhs.ncols()),
                        format!("{}x{} derivative", rhs.nrows(), rhs.ncols()),
                    ));
                }
                *lhs += rhs;
            }
        }
        Ok(())
    }

    /// Forward step `J · t` for a tangent `t` of an operand.
    pub(crate) fn push_through(&self, jacobian: &DMatrix<f64>, operation: &'static str) -> Result<Derivative> {
        match self {
            Derivative::Zero => Ok(Derivative::Zero),
            Derivative::Dense(tangent) => {
                if tangent.nrows() != jacobian.ncols() {
                    return Err(Error::shape_mismatch(
                        operation,
                        format!("tangent with {} rows", jacobian.ncols()),
                        format!("tangent with {} rows", tangent.nrows()),
                    ));
                }
                Ok(Derivative::Dense(jacobian * tangent))
            }
        }
    }

    /// Reverse step `g · J` for a gradient `g` of an output.
    pub(crate) fn pull_through(&self, jacobian: &DMatrix<f64>, operation: &'static str) -> Result<Derivative> {
        match self {
            Derivative::Zero => Ok(Derivative::Zero),
            Derivative::Dense(gradient) => {
                if gradient.ncols() != jacobian.nrows() {
                    return Err(Error::shape_mismatch(
                        operation,
                        format!("gradient with {} columns", jacobian.nrows()),
                        format!("gradient with {} columns", gradient.ncols()),
                    ));
                }
                Ok(Derivative::Dense(gradient * jacobian))
            }
        }
    }
}

impl From<f64> for Derivative {
    fn from(x: f64) -> Self {
        Derivative::Dense(DMatrix::from_element(1, 1, x))
    }
}

impl From<DMatrix<f64>> for Derivative {
    fn from(m: DMatrix<f64>) -> Self {
        Derivative::Dense(m)
    }
}

/// A vector becomes a single tangent column.
impl From<DVector<f64>> for Derivative {
    fn from(v: DVector<f64>) -> Self {
        let n = v.len();
        Derivative::Dense(DMatrix::from_column_slice(n, 1, v.as_slice()))
    }
}

impl PartialEq<f64> for Derivative {
    fn eq(&self, other: &f64) -> bool {
        self.as_scalar() == Some(*other)
    }
}
