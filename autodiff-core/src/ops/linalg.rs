//! Products of vectors and matrices.
//!
//! Jacobians of the products follow from the column-major identity
//! `vec(A B) = (Bᵀ ⊗ I) vec(A) = (I ⊗ A) vec(B)`. The matrix product never
//! materialises those Kronecker products when propagating: each tangent
//! column or gradient row is reshaped and multiplied directly.

use nalgebra::{DMatrix, DVector};
use smallvec::SmallVec;

use super::{arity, expect_gradient_columns, expect_tangent_rows, Jacobians, Rule};
use crate::error::{Error, Result};
use crate::value::{Derivative, Shape, Value};

fn expect_vector<'a>(operation: &'static str, value: &'a Value) -> Result<&'a DVector<f64>> {
    value.as_vector().ok_or(Error::UnsupportedOperand {
        operation,
        shape: value.shape(),
    })
}

/// Apply `f` to every tangent column, writing each flattened result as one
/// column of a block with `rows` rows.
fn map_columns(tangent: &DMatrix<f64>, rows: usize, f: impl Fn(&[f64]) -> DMatrix<f64>) -> DMatrix<f64> {
    let mut output = DMatrix::zeros(rows, tangent.ncols());
    for j in 0..tangent.ncols() {
        let column: Vec<f64> = tangent.column(j).iter().copied().collect();
        output.column_mut(j).copy_from_slice(f(&column).as_slice());
    }
    output
}

/// Row counterpart of [`map_columns`] for gradient blocks.
fn map_rows(gradient: &DMatrix<f64>, columns: usize, f: impl Fn(&[f64]) -> DMatrix<f64>) -> DMatrix<f64> {
    let mut output = DMatrix::zeros(gradient.nrows(), columns);
    for i in 0..gradient.nrows() {
        let row: Vec<f64> = gradient.row(i).iter().copied().collect();
        output.row_mut(i).copy_from_slice(f(&row).as_slice());
    }
    output
}

/// Inner product `aᵀ b` of two vectors of equal length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dot;

impl Dot {
    fn vectors<'a>(&self, operands: &[&'a Value]) -> Result<(&'a DVector<f64>, &'a DVector<f64>)> {
        let [a, b] = arity(self.name(), operands)?;
        let (a, b) = (expect_vector(self.name(), a)?, expect_vector(self.name(), b)?);
        if a.len() != b.len() {
            return Err(Error::shape_mismatch(self.name(), Shape::Vector(a.len()), Shape::Vector(b.len())));
        }
        Ok((a, b))
    }
}

impl Rule for Dot {
    fn name(&self) -> &'static str {
        "dot"
    }

    fn apply(&self, operands: &[&Value]) -> Result<Value> {
        let (a, b) = self.vectors(operands)?;
        Ok(Value::Scalar(a.dot(b)))
    }

    fn jacobians(&self, operands: &[&Value]) -> Result<Jacobians> {
        let (a, b) = self.vectors(operands)?;
        let row = |v: &DVector<f64>| DMatrix::from_row_slice(1, v.len(), v.as_slice());
        Ok([row(b), row(a)].into_iter().collect())
    }
}

/// Outer product `a bᵀ` of two vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outer;

impl Rule for Outer {
    fn name(&self) -> &'static str {
        "outer"
    }

    fn apply(&self, operands: &[&Value]) -> Result<Value> {
        let [a, b] = arity(self.name(), operands)?;
        let (a, b) = (expect_vector(self.name(), a)?, expect_vector(self.name(), b)?);
        Ok(Value::Matrix(a * b.transpose()))
    }

    fn jacobians(&self, operands: &[&Value]) -> Result<Jacobians> {
        let [a, b] = arity(self.name(), operands)?;
        let (a, b) = (expect_vector(self.name(), a)?, expect_vector(self.name(), b)?);
        let (n, m) = (a.len(), b.len());

        // Component (i, j) of the output sits at flat index i + j n
        let mut ja = DMatrix::zeros(n * m, n);
        let mut jb = DMatrix::zeros(n * m, m);
        for j in 0..m {
            for i in 0..n {
                ja[(i + j * n, i)] = b[j];
                jb[(i + j * n, j)] = a[i];
            }
        }
        Ok([ja, jb].into_iter().collect())
    }
}

/// Matrix product `A B` where `B` is a matrix or a column vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatMul;

impl MatMul {
    /// Both operands as matrices, with the inner dimension checked.
    fn factors(&self, operands: &[&Value]) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
        let [a, b] = arity(self.name(), operands)?;
        let Value::Matrix(lhs) = a else {
            return Err(Error::UnsupportedOperand {
                operation: self.name(),
                shape: a.shape(),
            });
        };
        if let Value::Scalar(_) = b {
            return Err(Error::UnsupportedOperand {
                operation: self.name(),
                shape: b.shape(),
            });
        }

        let rhs = b.to_matrix();
        if lhs.ncols() != rhs.nrows() {
            return Err(Error::shape_mismatch(
                self.name(),
                format!("{} rows on the right", lhs.ncols()),
                format!("{} rows", rhs.nrows()),
            ));
        }
        Ok((lhs.clone(), rhs))
    }
}

impl Rule for MatMul {
    fn name(&self) -> &'static str {
        "matmul"
    }

    fn apply(&self, operands: &[&Value]) -> Result<Value> {
        let (lhs, rhs) = self.factors(operands)?;
        let product = lhs * rhs;
        Ok(match operands[1] {
            Value::Vector(_) => Value::Vector(product.column(0).into_owned()),
            _ => Value::Matrix(product),
        })
    }

    fn jacobians(&self, operands: &[&Value]) -> Result<Jacobians> {
        let (lhs, rhs) = self.factors(operands)?;
        let ja = rhs.transpose().kronecker(&DMatrix::identity(lhs.nrows(), lhs.nrows()));
        let jb = DMatrix::identity(rhs.ncols(), rhs.ncols()).kronecker(&lhs);
        Ok([ja, jb].into_iter().collect())
    }

    /// `dY = dA B + A dB`, one tangent column at a time.
    fn push_forward(&self, operands: &[&Value], tangents: &[&Derivative]) -> Result<Derivative> {
        if tangents.iter().all(|tangent| tangent.is_zero()) {
            return Ok(Derivative::Zero);
        }
        let (lhs, rhs) = self.factors(operands)?;
        let (r, s, t) = (lhs.nrows(), lhs.ncols(), rhs.ncols());

        let mut output = Derivative::Zero;
        if let Some(Derivative::Dense(da)) = tangents.first() {
            expect_tangent_rows(self.name(), da, r * s)?;
            let dy = map_columns(da, r * t, |column| DMatrix::from_column_slice(r, s, column) * &rhs);
            output.accumulate(Derivative::Dense(dy))?;
        }
        if let Some(Derivative::Dense(db)) = tangents.get(1) {
            expect_tangent_rows(self.name(), db, s * t)?;
            let dy = map_columns(db, r * t, |column| &lhs * DMatrix::from_column_slice(s, t, column));
            output.accumulate(Derivative::Dense(dy))?;
        }
        Ok(output)
    }

    /// `Ā = Ȳ Bᵀ` and `B̄ = Aᵀ Ȳ`, one gradient row at a time.
    fn pull_back(&self, operands: &[&Value], gradient: &Derivative) -> Result<SmallVec<[Derivative; 2]>> {
        let Derivative::Dense(gradient) = gradient else {
            return Ok(operands.iter().map(|_| Derivative::Zero).collect());
        };
        let (lhs, rhs) = self.factors(operands)?;
        let (r, s, t) = (lhs.nrows(), lhs.ncols(), rhs.ncols());
        expect_gradient_columns(self.name(), gradient, r * t)?;

        let (lhs_t, rhs_t) = (lhs.transpose(), rhs.transpose());
        let da = map_rows(gradient, r * s, |row| DMatrix::from_column_slice(r, t, row) * &rhs_t);
        let db = map_rows(gradient, s * t, |row| &lhs_t * DMatrix::from_column_slice(r, t, row));
        Ok([Derivative::Dense(da), Derivative::Dense(db)].into_iter().collect())
    }
}
