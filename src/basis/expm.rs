// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Complex matrix exponential for rotation generators.
//!
//! Scaling-and-squaring with a Padé(13) approximant, following
//! Higham (2005), "The Scaling and Squaring Method for the Matrix
//! Exponential Revisited", SIAM J. Matrix Anal. Appl. 26(4), 1179.
//!
//! Rotation generators are tiny (2x2 for a qubit, 4x4 for a pair), so no
//! effort goes into lower-order approximants.

use ndarray::{s, Array2};
use num_complex::Complex64;

use crate::error::{Error, Result, StructureError};

/// Largest 1-norm for which the degree-13 approximant is accurate.
const THETA_13: f64 = 5.37;

/// Pivots below this magnitude are treated as singular.
const PIVOT_EPS: f64 = 1e-15;

/// Padé(13,13) coefficients b_0..b_13.
const PADE_13: [f64; 14] = [
    1.0,
    0.5,
    0.12,
    1.833_333_333_333_333_4e-2,
    1.992_753_623_188_405_8e-3,
    1.630_434_782_608_696e-4,
    1.035_196_687_401_6e-5,
    5.175_983_437_008_01e-7,
    2.043_151_356_652_5e-8,
    6.306_022_705_717_593e-10,
    1.483_770_048_404_14e-11,
    2.529_153_491_597_966e-13,
    2.810_170_546_219_962_4e-15,
    1.544_049_750_670_309e-17,
];

/// exp(A) for a square complex matrix.
///
/// Fails with [`StructureError::Shape`] for non-square input and with
/// [`Error::Numeric`] if the Padé denominator is singular.
pub fn matrix_exp(a: &Array2<Complex64>) -> Result<Array2<Complex64>> {
    let n = a.nrows();
    if n != a.ncols() {
        return Err(StructureError::Shape(format!(
            "matrix_exp needs a square matrix, got {}x{}",
            n,
            a.ncols()
        ))
        .into());
    }

    match n {
        0 => return Ok(Array2::zeros((0, 0))),
        1 => return Ok(Array2::from_elem((1, 1), a[[0, 0]].exp())),
        _ => {}
    }

    let norm = one_norm(a);
    let squarings = if norm > THETA_13 {
        (norm / THETA_13).log2().ceil() as i32
    } else {
        0
    };

    let scaled = a.mapv(|z| z * 2f64.powi(-squarings));
    let mut result = pade13(&scaled)?;
    for _ in 0..squarings {
        result = result.dot(&result);
    }
    Ok(result)
}

fn pade13(a: &Array2<Complex64>) -> Result<Array2<Complex64>> {
    let n = a.nrows();
    let eye = Array2::<Complex64>::eye(n);
    let b = |k: usize| Complex64::new(PADE_13[k], 0.0);

    let a2 = a.dot(a);
    let a4 = a2.dot(&a2);
    let a6 = a2.dot(&a4);

    // odd part U, even part V
    let u_inner = (&a6 * b(13) + &a4 * b(11) + &a2 * b(9)).dot(&a6)
        + &a6 * b(7)
        + &a4 * b(5)
        + &a2 * b(3)
        + &eye * b(1);
    let u = a.dot(&u_inner);

    let v = (&a6 * b(12) + &a4 * b(10) + &a2 * b(8)).dot(&a6)
        + &a6 * b(6)
        + &a4 * b(4)
        + &a2 * b(2)
        + &eye * b(0);

    // (V - U) X = (V + U)
    solve(&v - &u, &v + &u)
}

/// Solve `A X = B` by Gaussian elimination with partial pivoting.
pub(crate) fn solve(a: Array2<Complex64>, b: Array2<Complex64>) -> Result<Array2<Complex64>> {
    let n = a.nrows();
    let m = b.ncols();
    if a.ncols() != n || b.nrows() != n {
        return Err(StructureError::Shape(format!(
            "cannot solve {}x{} system against {}x{} right-hand side",
            n,
            a.ncols(),
            b.nrows(),
            m
        ))
        .into());
    }

    let mut aug = Array2::<Complex64>::zeros((n, n + m));
    aug.slice_mut(s![.., ..n]).assign(&a);
    aug.slice_mut(s![.., n..]).assign(&b);

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&i, &j| aug[[i, col]].norm().total_cmp(&aug[[j, col]].norm()))
            .unwrap_or(col);
        if aug[[pivot_row, col]].norm() < PIVOT_EPS {
            return Err(Error::Numeric(format!(
                "singular matrix at column {}",
                col
            )));
        }
        if pivot_row != col {
            for j in 0..(n + m) {
                aug.swap([col, j], [pivot_row, j]);
            }
        }

        let pivot = aug[[col, col]];
        for row in (col + 1)..n {
            let factor = aug[[row, col]] / pivot;
            if factor.norm() == 0.0 {
                continue;
            }
            for j in col..(n + m) {
                let upper = aug[[col, j]];
                aug[[row, j]] -= factor * upper;
            }
        }
    }

    let mut x = Array2::<Complex64>::zeros((n, m));
    for row in (0..n).rev() {
        for j in 0..m {
            let mut acc = aug[[row, n + j]];
            for k in (row + 1)..n {
                acc -= aug[[row, k]] * x[[k, j]];
            }
            x[[row, j]] = acc / aug[[row, row]];
        }
    }
    Ok(x)
}

fn one_norm(a: &Array2<Complex64>) -> f64 {
    a.columns()
        .into_iter()
        .map(|col| col.iter().map(|z| z.norm()).sum::<f64>())
        .fold(0.0, f64::max)
}
