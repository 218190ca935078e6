// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Evaluation-time representations of states, operations and effects.
//!
//! Only the density-matrix evolution type has a dense real representation;
//! building a representation for any other evolution type is rejected.

use ndarray::{Array1, Array2};

use super::EvoType;
use crate::error::{Error, Result, StructureError};

fn require_densitymx(evotype: EvoType, what: &str) -> Result<()> {
    if evotype != EvoType::DensityMx {
        return Err(Error::NotImplemented(format!(
            "{} representation for the {} evolution type",
            what, evotype
        )));
    }
    Ok(())
}

fn check_same(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(StructureError::DimensionMismatch { expected, actual }.into());
    }
    Ok(())
}

/// A vectorized density matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct StateRep {
    data: Array1<f64>,
    evotype: EvoType,
}

impl StateRep {
    pub fn new(data: Array1<f64>, evotype: EvoType) -> Result<Self> {
        require_densitymx(evotype, "state")?;
        Ok(Self { data, evotype })
    }

    pub fn dim(&self) -> usize {
        self.data.len()
    }

    pub fn evotype(&self) -> EvoType {
        self.evotype
    }

    pub fn to_dense(&self) -> &Array1<f64> {
        &self.data
    }

    pub fn into_dense(self) -> Array1<f64> {
        self.data
    }
}

/// A superoperator matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct OpRep {
    matrix: Array2<f64>,
    evotype: EvoType,
}

impl OpRep {
    pub fn new(matrix: Array2<f64>, evotype: EvoType) -> Result<Self> {
        require_densitymx(evotype, "operation")?;
        Ok(Self { matrix, evotype })
    }

    pub fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn to_dense(&self) -> &Array2<f64> {
        &self.matrix
    }

    /// Apply the operation to `state`.
    pub fn acton(&self, state: &StateRep) -> Result<StateRep> {
        if state.evotype != self.evotype {
            return Err(StructureError::EvotypeMismatch {
                expected: self.evotype.to_string(),
                actual: state.evotype.to_string(),
            }
            .into());
        }
        check_same(self.matrix.ncols(), state.dim())?;
        Ok(StateRep {
            data: self.matrix.dot(&state.data),
            evotype: self.evotype,
        })
    }
}

/// A measurement effect.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectRep {
    data: Array1<f64>,
    evotype: EvoType,
}

impl EffectRep {
    pub fn new(data: Array1<f64>, evotype: EvoType) -> Result<Self> {
        require_densitymx(evotype, "effect")?;
        Ok(Self { data, evotype })
    }

    pub fn dim(&self) -> usize {
        self.data.len()
    }

    pub fn to_dense(&self) -> &Array1<f64> {
        &self.data
    }

    /// `<<E|rho>>`.
    pub fn probability(&self, state: &StateRep) -> Result<f64> {
        if state.evotype != self.evotype {
            return Err(StructureError::EvotypeMismatch {
                expected: self.evotype.to_string(),
                actual: state.evotype.to_string(),
            }
            .into());
        }
        check_same(self.dim(), state.dim())?;
        Ok(self.data.dot(&state.data))
    }
}
