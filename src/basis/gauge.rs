// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Gauge group elements.
//!
//! A gauge element is an invertible superoperator `S`. Operations transform
//! as `G -> S⁻¹ G S`, preparations as `rho -> S⁻¹ rho` and effects as
//! `E -> Sᵀ E`, which leaves every circuit probability unchanged.

use ndarray::{Array1, Array2};

use crate::error::{Error, Result, StructureError};

const PIVOT_EPS: f64 = 1e-12;

/// An invertible superoperator together with its inverse.
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeGroupElement {
    s: Array2<f64>,
    s_inv: Array2<f64>,
}

impl GaugeGroupElement {
    /// Build from `S`, computing its inverse.
    pub fn new(s: Array2<f64>) -> Result<Self> {
        let s_inv = inverse(&s)?;
        Ok(Self { s, s_inv })
    }

    /// The identity gauge element of dimension `dim`.
    pub fn identity(dim: usize) -> Self {
        Self {
            s: Array2::eye(dim),
            s_inv: Array2::eye(dim),
        }
    }

    pub fn dim(&self) -> usize {
        self.s.nrows()
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.s
    }

    pub fn inverse_matrix(&self) -> &Array2<f64> {
        &self.s_inv
    }

    /// `S⁻¹ G S`.
    pub fn transform_matrix(&self, g: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_dim(g.nrows())?;
        Ok(self.s_inv.dot(g).dot(&self.s))
    }

    /// `S⁻¹ rho`.
    pub fn transform_state(&self, rho: &Array1<f64>) -> Result<Array1<f64>> {
        self.check_dim(rho.len())?;
        Ok(self.s_inv.dot(rho))
    }

    /// `Sᵀ E`.
    pub fn transform_effect(&self, effect: &Array1<f64>) -> Result<Array1<f64>> {
        self.check_dim(effect.len())?;
        Ok(self.s.t().dot(effect))
    }

    fn check_dim(&self, dim: usize) -> Result<()> {
        if dim != self.dim() {
            return Err(StructureError::DimensionMismatch {
                expected: self.dim(),
                actual: dim,
            }
            .into());
        }
        Ok(())
    }
}

/// Real matrix inverse by Gauss-Jordan elimination with partial pivoting.
pub fn inverse(a: &Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(StructureError::Shape(format!(
            "cannot invert a {}x{} matrix",
            n,
            a.ncols()
        ))
        .into());
    }

    let mut work = a.clone();
    let mut inv = Array2::<f64>::eye(n);

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&i, &j| work[[i, col]].abs().total_cmp(&work[[j, col]].abs()))
            .unwrap_or(col);
        if work[[pivot_row, col]].abs() < PIVOT_EPS {
            return Err(Error::Numeric(format!(
                "gauge matrix is singular at column {}",
                col
            )));
        }
        if pivot_row != col {
            for j in 0..n {
                work.swap([col, j], [pivot_row, j]);
                inv.swap([col, j], [pivot_row, j]);
            }
        }

        let pivot = work[[col, col]];
        for j in 0..n {
            work[[col, j]] /= pivot;
            inv[[col, j]] /= pivot;
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = work[[row, col]];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                let (w, v) = (work[[col, j]], inv[[col, j]]);
                work[[row, j]] -= factor * w;
                inv[[row, j]] -= factor * v;
            }
        }
    }
    Ok(inv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_inverse_roundtrip() {
        let a = array![[2.0, 1.0, 0.0], [0.0, 0.0, 3.0], [1.0, 4.0, 1.0]];
        let inv = inverse(&a).unwrap();
        let product = a.dot(&inv);
        for ((i, j), &x) in product.indexed_iter() {
            assert_abs_diff_eq!(x, if i == j { 1.0 } else { 0.0 }, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_inverse_singular() {
        let a = array![[1.0, 2.0], [2.0, 4.0]];
        assert!(matches!(inverse(&a), Err(Error::Numeric(_))));
    }

    #[test]
    fn test_inverse_non_square() {
        let a = Array2::<f64>::zeros((2, 3));
        assert!(matches!(
            inverse(&a),
            Err(Error::Structure(StructureError::Shape(_)))
        ));
    }

    #[test]
    fn test_gauge_preserves_probability() {
        let s = array![
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.1, 0.1, 0.0],
            [0.0, 0.0, 0.9, 0.0],
            [0.05, 0.0, 0.0, 1.0]
        ];
        let gauge = GaugeGroupElement::new(s).unwrap();
        let g = array![
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 0.9, 0.0, 0.0],
            [0.0, 0.0, 0.0, -0.9],
            [0.0, 0.0, 0.9, 0.0]
        ];
        let rho = array![0.7071, 0.0, 0.0, 0.7071];
        let e = array![0.7071, 0.0, 0.0, 0.7071];

        let before = e.dot(&g.dot(&rho));
        let g2 = gauge.transform_matrix(&g).unwrap();
        let rho2 = gauge.transform_state(&rho).unwrap();
        let e2 = gauge.transform_effect(&e).unwrap();
        let after = e2.dot(&g2.dot(&rho2));
        assert_abs_diff_eq!(before, after, epsilon = 1e-12);
    }

    #[test]
    fn test_gauge_dimension_mismatch() {
        let gauge = GaugeGroupElement::identity(4);
        let g = Array2::<f64>::eye(2);
        assert!(gauge.transform_matrix(&g).is_err());
    }
}
