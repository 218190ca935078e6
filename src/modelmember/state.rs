// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! State preparations.
//!
//! A TP state keeps its first component at `dim^-0.25`, the coefficient of
//! the normalized identity for a unit-trace density matrix.

use ndarray::{Array1, ArrayView1};

use super::{check_len, delegate_member, member_bookkeeping, Binding, EvoType, ModelMember};
use super::rep::StateRep;
use crate::basis::GaugeGroupElement;
use crate::error::{Error, Result, StructureError};

const TP_TOLERANCE: f64 = 1e-8;

/// First component of a unit-trace state of superoperator dimension `dim`.
pub fn tp_first_component(dim: usize) -> f64 {
    (dim as f64).powf(-0.25)
}

fn vector_labels(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|i| format!("VecElement {}", i)).collect()
}

/// A state whose every component is a parameter.
#[derive(Debug, Clone)]
pub struct FullState {
    base: Array1<f64>,
    evotype: EvoType,
    binding: Binding,
    dirty: bool,
}

impl FullState {
    pub fn new(base: Array1<f64>, evotype: EvoType) -> Self {
        Self {
            base,
            evotype,
            binding: Binding::default(),
            dirty: false,
        }
    }
}

impl ModelMember for FullState {
    fn dim(&self) -> usize {
        self.base.len()
    }

    fn evotype(&self) -> EvoType {
        self.evotype
    }

    fn num_params(&self) -> usize {
        self.base.len()
    }

    fn to_vector(&self) -> Array1<f64> {
        self.base.clone()
    }

    fn from_vector(&mut self, v: ArrayView1<'_, f64>) -> Result<()> {
        check_len(self.num_params(), &v)?;
        self.base.assign(&v);
        self.dirty = false;
        Ok(())
    }

    fn parameter_labels(&self) -> Vec<String> {
        vector_labels(0..self.dim())
    }

    member_bookkeeping!();
}

/// A trace-preserving state: the first component is fixed.
#[derive(Debug, Clone)]
pub struct TPState {
    base: Array1<f64>,
    evotype: EvoType,
    binding: Binding,
    dirty: bool,
}

impl TPState {
    pub fn new(mut base: Array1<f64>, evotype: EvoType) -> Result<Self> {
        let dim = base.len();
        if dim > 0 {
            let expected = tp_first_component(dim);
            if (base[0] - expected).abs() > TP_TOLERANCE {
                return Err(StructureError::TraceConstraint(format!(
                    "first state component must be {}, got {}",
                    expected, base[0]
                ))
                .into());
            }
            base[0] = expected;
        }
        Ok(Self {
            base,
            evotype,
            binding: Binding::default(),
            dirty: false,
        })
    }
}

impl ModelMember for TPState {
    fn dim(&self) -> usize {
        self.base.len()
    }

    fn evotype(&self) -> EvoType {
        self.evotype
    }

    fn num_params(&self) -> usize {
        self.base.len().saturating_sub(1)
    }

    fn to_vector(&self) -> Array1<f64> {
        self.base.iter().skip(1).cloned().collect()
    }

    fn from_vector(&mut self, v: ArrayView1<'_, f64>) -> Result<()> {
        check_len(self.num_params(), &v)?;
        for (dst, &src) in self.base.iter_mut().skip(1).zip(v.iter()) {
            *dst = src;
        }
        self.dirty = false;
        Ok(())
    }

    fn parameter_labels(&self) -> Vec<String> {
        vector_labels(1..self.dim())
    }

    member_bookkeeping!();
}

/// A state with no parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticState {
    base: Array1<f64>,
    evotype: EvoType,
    binding: Binding,
    dirty: bool,
}

impl StaticState {
    pub fn new(base: Array1<f64>, evotype: EvoType) -> Self {
        Self {
            base,
            evotype,
            binding: Binding::default(),
            dirty: false,
        }
    }

    pub fn dense(&self) -> &Array1<f64> {
        &self.base
    }
}

impl ModelMember for StaticState {
    fn dim(&self) -> usize {
        self.base.len()
    }

    fn evotype(&self) -> EvoType {
        self.evotype
    }

    fn num_params(&self) -> usize {
        0
    }

    fn to_vector(&self) -> Array1<f64> {
        Array1::zeros(0)
    }

    fn from_vector(&mut self, v: ArrayView1<'_, f64>) -> Result<()> {
        check_len(0, &v)?;
        self.dirty = false;
        Ok(())
    }

    fn parameter_labels(&self) -> Vec<String> {
        Vec::new()
    }

    member_bookkeeping!();
}

/// A state preparation in one of the supported parameterizations.
#[derive(Debug, Clone)]
pub enum StatePrep {
    Full(FullState),
    Tp(TPState),
    Static(StaticState),
}

delegate_member!(StatePrep { Full, Tp, Static });

impl From<StaticState> for StatePrep {
    fn from(s: StaticState) -> Self {
        StatePrep::Static(s)
    }
}

impl StatePrep {
    pub fn full(base: Array1<f64>, evotype: EvoType) -> Self {
        StatePrep::Full(FullState::new(base, evotype))
    }

    pub fn tp(base: Array1<f64>, evotype: EvoType) -> Result<Self> {
        Ok(StatePrep::Tp(TPState::new(base, evotype)?))
    }

    pub fn static_state(base: Array1<f64>, evotype: EvoType) -> Self {
        StatePrep::Static(StaticState::new(base, evotype))
    }

    pub fn dense(&self) -> &Array1<f64> {
        match self {
            StatePrep::Full(s) => &s.base,
            StatePrep::Tp(s) => &s.base,
            StatePrep::Static(s) => &s.base,
        }
    }

    /// Replace the dense vector outside `from_vector` and mark dirty.
    pub fn set_dense(&mut self, v: Array1<f64>) -> Result<()> {
        if v.len() != self.dim() {
            return Err(StructureError::DimensionMismatch {
                expected: self.dim(),
                actual: v.len(),
            }
            .into());
        }
        match self {
            StatePrep::Full(s) => s.base = v,
            StatePrep::Tp(s) => {
                let replacement = TPState::new(v, s.evotype)?;
                s.base = replacement.base;
            }
            StatePrep::Static(_) => {
                return Err(Error::ReadOnly(
                    "Cannot set the value of a static state".into(),
                ))
            }
        }
        self.set_dirty(true);
        Ok(())
    }

    /// `rho -> S⁻¹ rho`.
    pub fn transform_inplace(&mut self, s: &GaugeGroupElement) -> Result<()> {
        let transformed = s.transform_state(self.dense())?;
        self.set_dense(transformed)
    }

    pub fn to_rep(&self) -> Result<StateRep> {
        StateRep::new(self.dense().clone(), self.evotype())
    }
}
