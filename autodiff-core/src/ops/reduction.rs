//! Reductions to a scalar.

use nalgebra::DMatrix;

use super::{arity, Jacobians, Rule};
use crate::error::{Error, Result};
use crate::value::Value;

/// Reduce all components of a value to one scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Sum,
    Mean,
    /// Euclidean norm; Frobenius norm for matrices.
    Norm,
    SquaredNorm,
}

impl Rule for Reduction {
    fn name(&self) -> &'static str {
        match self {
            Reduction::Sum => "sum",
            Reduction::Mean => "mean",
            Reduction::Norm => "norm",
            Reduction::SquaredNorm => "squared_norm",
        }
    }

    fn apply(&self, operands: &[&Value]) -> Result<Value> {
        let [x] = arity(self.name(), operands)?;
        let data = x.as_slice();

        let reduced = match self {
            Reduction::Sum => data.iter().sum(),
            Reduction::Mean => {
                if data.is_empty() {
                    return Err(Error::UnsupportedOperand {
                        operation: self.name(),
                        shape: x.shape(),
                    });
                }
                data.iter().sum::<f64>() / data.len() as f64
            }
            Reduction::Norm => data.iter().map(|x| x * x).sum::<f64>().sqrt(),
            Reduction::SquaredNorm => data.iter().map(|x| x * x).sum(),
        };
        Ok(Value::Scalar(reduced))
    }

    fn jacobians(&self, operands: &[&Value]) -> Result<Jacobians> {
        let [x] = arity(self.name(), operands)?;
        let data = x.as_slice();
        let n = data.len();

        let row = match self {
            Reduction::Sum => DMatrix::from_element(1, n, 1.0),
            Reduction::Mean => DMatrix::from_element(1, n, 1.0 / n as f64),
            Reduction::Norm => {
                let norm = data.iter().map(|x| x * x).sum::<f64>().sqrt();
                // Subgradient 0 at the origin
                if norm == 0.0 {
                    DMatrix::zeros(1, n)
                } else {
                    DMatrix::from_row_slice(1, n, data) / norm
                }
            }
            Reduction::SquaredNorm => DMatrix::from_row_slice(1, n, data) * 2.0,
        };
        Ok([row].into_iter().collect())
    }
}
