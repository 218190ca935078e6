// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Operator bases and the superoperator matrices built from them.
//!
//! Density-matrix superoperators in this crate are real matrices expressed
//! in the normalized Pauli-product basis `B_k = P_k / sqrt(d)`, where `d`
//! is the Hilbert-space dimension and `P_k` ranges over tensor products of
//! `I, X, Y, Z` (first qubit most significant). A superoperator of
//! dimension `dim = d^2` therefore acts on real vectors of length `dim`
//! whose first component is `Tr(rho) / sqrt(d) = dim^-0.25` for a
//! normalized state.
//!
//! # References
//!
//! - Nielsen, Chuang, "Quantum Computation and Quantum Information",
//!   Section 8.3 (Pauli-transfer representation)

pub mod expm;
pub mod gauge;

use std::fmt;
use std::str::FromStr;

use ndarray::{array, Array1, Array2};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, StructureError};

pub use expm::matrix_exp;
pub use gauge::GaugeGroupElement;

/// Name of a supported superoperator basis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BasisName {
    /// Normalized Pauli-product basis
    #[default]
    Pp,
    /// Gell-Mann basis (coincides with `pp` on a single qubit)
    Gm,
}

impl fmt::Display for BasisName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BasisName::Pp => write!(f, "pp"),
            BasisName::Gm => write!(f, "gm"),
        }
    }
}

impl FromStr for BasisName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pp" => Ok(BasisName::Pp),
            "gm" => Ok(BasisName::Gm),
            other => Err(Error::Config(format!("unknown basis '{}'", other))),
        }
    }
}

/// Amount of depolarization applied to an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DepolarizeAmount {
    /// Same shrink factor on every non-identity axis
    Uniform(f64),
    /// One shrink factor per non-identity axis (`dim - 1` entries)
    PerAxis(Vec<f64>),
}

impl From<f64> for DepolarizeAmount {
    fn from(a: f64) -> Self {
        DepolarizeAmount::Uniform(a)
    }
}

impl From<Vec<f64>> for DepolarizeAmount {
    fn from(a: Vec<f64>) -> Self {
        DepolarizeAmount::PerAxis(a)
    }
}

/// Number of qubits `n` with `dim == 4^n`, if any.
pub fn num_qubits_for_dim(dim: usize) -> Option<u32> {
    let mut n = 0u32;
    let mut d = 1usize;
    while d < dim {
        d = d.checked_mul(4)?;
        n += 1;
    }
    if d == dim && dim > 0 {
        Some(n)
    } else {
        None
    }
}

fn pauli(k: usize) -> Array2<Complex64> {
    let z = Complex64::new(0.0, 0.0);
    let one = Complex64::new(1.0, 0.0);
    let i = Complex64::new(0.0, 1.0);
    match k {
        0 => array![[one, z], [z, one]],
        1 => array![[z, one], [one, z]],
        2 => array![[z, -i], [i, z]],
        _ => array![[one, z], [z, -one]],
    }
}

fn kron(a: &Array2<Complex64>, b: &Array2<Complex64>) -> Array2<Complex64> {
    let (ar, ac) = a.dim();
    let (br, bc) = b.dim();
    let mut out = Array2::zeros((ar * br, ac * bc));
    for ((i, j), &x) in a.indexed_iter() {
        for ((k, l), &y) in b.indexed_iter() {
            out[[i * br + k, j * bc + l]] = x * y;
        }
    }
    out
}

/// Un-normalized Pauli products for `n` qubits, `4^n` matrices of size `2^n`.
pub fn pauli_products(n: u32) -> Vec<Array2<Complex64>> {
    let count = 4usize.pow(n);
    (0..count)
        .map(|mut index| {
            let mut digits = vec![0usize; n as usize];
            for slot in digits.iter_mut().rev() {
                *slot = index % 4;
                index /= 4;
            }
            digits
                .iter()
                .fold(Array2::<Complex64>::eye(1), |acc, &k| kron(&acc, &pauli(k)))
        })
        .collect()
}

/// Basis matrices for a superoperator dimension `dim`.
pub fn basis_matrices(basis: BasisName, dim: usize) -> Result<Vec<Array2<Complex64>>> {
    let n = num_qubits_for_dim(dim).ok_or_else(|| {
        Error::NotImplemented(format!(
            "{} basis needs a dimension that is a power of 4, got {}",
            basis, dim
        ))
    })?;
    if basis == BasisName::Gm && n != 1 {
        return Err(Error::NotImplemented(format!(
            "gm basis is only available for a single qubit, got dimension {}",
            dim
        )));
    }
    let norm = Complex64::new(1.0 / (2f64.powi(n as i32)).sqrt(), 0.0);
    Ok(pauli_products(n).into_iter().map(|p| p * norm).collect())
}

/// Superoperator `G[i,j] = Tr(B_i U B_j U†)` of a unitary in `basis`.
pub fn unitary_to_superop(u: &Array2<Complex64>, basis: BasisName) -> Result<Array2<f64>> {
    let hilbert = u.nrows();
    let dim = hilbert * hilbert;
    let elements = basis_matrices(basis, dim)?;

    let u_dag = u.t().mapv(|z| z.conj());
    let conjugated: Vec<Array2<Complex64>> =
        elements.iter().map(|b| u.dot(b).dot(&u_dag)).collect();

    let mut superop = Array2::<f64>::zeros((dim, dim));
    for (i, bi) in elements.iter().enumerate() {
        for (j, cj) in conjugated.iter().enumerate() {
            let trace: Complex64 = bi.dot(cj).diag().sum();
            superop[[i, j]] = trace.re;
        }
    }
    Ok(superop)
}

/// Rotation superoperator for `U = exp(sum_k i * amount_k / 2 * P_k)`.
///
/// `P_k` ranges over the `dim - 1` non-identity un-normalized Pauli
/// products, so `amount` must have exactly `dim - 1` entries.
pub fn rotation_superop(amount: &[f64], dim: usize, basis: BasisName) -> Result<Array2<f64>> {
    if amount.len() + 1 != dim {
        return Err(StructureError::Shape(format!(
            "rotation amount needs {} entries, got {}",
            dim.saturating_sub(1),
            amount.len()
        ))
        .into());
    }
    let n = num_qubits_for_dim(dim).ok_or_else(|| {
        Error::NotImplemented(format!("rotation in dimension {}", dim))
    })?;
    let paulis = pauli_products(n);
    let hilbert = 2usize.pow(n);

    let mut generator = Array2::<Complex64>::zeros((hilbert, hilbert));
    for (theta, p) in amount.iter().zip(paulis.iter().skip(1)) {
        generator = generator + p * Complex64::new(0.0, theta / 2.0);
    }
    let u = matrix_exp(&generator)?;
    unitary_to_superop(&u, basis)
}

/// `diag(1, 1-a_1, ..., 1-a_{dim-1})`.
pub fn depolarization_matrix(dim: usize, amount: &DepolarizeAmount) -> Result<Array2<f64>> {
    let mut diag = vec![1.0; dim];
    match amount {
        DepolarizeAmount::Uniform(a) => {
            for d in diag.iter_mut().skip(1) {
                *d = 1.0 - a;
            }
        }
        DepolarizeAmount::PerAxis(axes) => {
            if axes.len() + 1 != dim {
                return Err(StructureError::Shape(format!(
                    "depolarization amount needs {} entries, got {}",
                    dim.saturating_sub(1),
                    axes.len()
                ))
                .into());
            }
            for (d, a) in diag.iter_mut().skip(1).zip(axes) {
                *d = 1.0 - a;
            }
        }
    }
    Ok(Array2::from_diag(&Array1::from(diag)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_num_qubits_for_dim() {
        assert_eq!(num_qubits_for_dim(1), Some(0));
        assert_eq!(num_qubits_for_dim(4), Some(1));
        assert_eq!(num_qubits_for_dim(16), Some(2));
        assert_eq!(num_qubits_for_dim(2), None);
        assert_eq!(num_qubits_for_dim(0), None);
    }

    #[test]
    fn test_pp_basis_is_orthonormal() {
        let basis = basis_matrices(BasisName::Pp, 16).unwrap();
        assert_eq!(basis.len(), 16);
        for (i, bi) in basis.iter().enumerate() {
            for (j, bj) in basis.iter().enumerate() {
                let tr: Complex64 = bi.dot(bj).diag().sum();
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(tr.re, expected, epsilon = 1e-12);
                assert_abs_diff_eq!(tr.im, 0.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_gm_rejects_two_qubits() {
        assert!(matches!(
            basis_matrices(BasisName::Gm, 16),
            Err(Error::NotImplemented(_))
        ));
    }

    #[test]
    fn test_identity_unitary_gives_identity_superop() {
        let g = unitary_to_superop(&Array2::eye(2), BasisName::Pp).unwrap();
        for ((i, j), &x) in g.indexed_iter() {
            assert_abs_diff_eq!(x, if i == j { 1.0 } else { 0.0 }, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rotation_about_x_by_pi_over_two() {
        let r = rotation_superop(&[PI / 2.0, 0.0, 0.0], 4, BasisName::Pp).unwrap();
        // I and X are fixed, Y and Z swap up to sign
        assert_abs_diff_eq!(r[[0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r[[1, 1]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r[[2, 2]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r[[3, 3]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r[[2, 3]].abs(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r[[3, 2]].abs(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rotation_is_trace_preserving() {
        let r = rotation_superop(&[0.1, -0.3, 0.7], 4, BasisName::Gm).unwrap();
        assert_abs_diff_eq!(r[[0, 0]], 1.0, epsilon = 1e-12);
        for j in 1..4 {
            assert_abs_diff_eq!(r[[0, j]], 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rotation_wrong_amount_length() {
        assert!(rotation_superop(&[0.1, 0.2], 4, BasisName::Pp).is_err());
    }

    #[test]
    fn test_depolarization_uniform() {
        let d = depolarization_matrix(4, &DepolarizeAmount::Uniform(0.1)).unwrap();
        assert_abs_diff_eq!(d[[0, 0]], 1.0);
        assert_abs_diff_eq!(d[[3, 3]], 0.9, epsilon = 1e-15);
        assert_abs_diff_eq!(d[[1, 2]], 0.0);
    }

    #[test]
    fn test_depolarization_per_axis() {
        let d = depolarization_matrix(4, &vec![0.1, 0.2, 0.3].into()).unwrap();
        assert_abs_diff_eq!(d[[1, 1]], 0.9, epsilon = 1e-15);
        assert_abs_diff_eq!(d[[2, 2]], 0.8, epsilon = 1e-15);
        assert_abs_diff_eq!(d[[3, 3]], 0.7, epsilon = 1e-15);
        assert!(depolarization_matrix(4, &vec![0.1].into()).is_err());
    }

    #[test]
    fn test_basis_name_parse_and_display() {
        assert_eq!("PP".parse::<BasisName>().unwrap(), BasisName::Pp);
        assert_eq!("gm".parse::<BasisName>().unwrap(), BasisName::Gm);
        assert!("std".parse::<BasisName>().is_err());
        assert_eq!(BasisName::Gm.to_string(), "gm");
    }
}
