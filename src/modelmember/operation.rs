// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Dense operations (gates and instrument elements).
//!
//! | Type | Parameters | Constraint |
//! |------|-----------|------------|
//! | [`FullDenseOp`] | all `dim²` entries | none |
//! | [`TPDenseOp`] | rows `1..dim` | first row is `[1, 0, ..., 0]` |
//! | [`StaticDenseOp`] | none | value cannot change |
//!
//! Parameter vectors are the row-major flattening of the free rows.

use ndarray::{Array1, Array2, ArrayView1};

use super::{check_len, delegate_member, member_bookkeeping, Binding, EvoType, ModelMember};
use super::rep::OpRep;
use crate::basis::{self, BasisName, DepolarizeAmount, GaugeGroupElement};
use crate::error::{Error, Result, StructureError};

/// Absolute tolerance on the `[1, 0, ..., 0]` first row of a TP operation.
const TP_ROW_TOLERANCE: f64 = 1e-8;

fn check_square(m: &Array2<f64>) -> Result<usize> {
    if m.nrows() != m.ncols() {
        return Err(StructureError::Shape(format!(
            "operation matrix must be square, got {}x{}",
            m.nrows(),
            m.ncols()
        ))
        .into());
    }
    Ok(m.nrows())
}

fn check_tp_row(m: &Array2<f64>) -> Result<()> {
    if m.nrows() == 0 {
        return Ok(());
    }
    let row = m.row(0);
    let ok = row
        .iter()
        .enumerate()
        .all(|(j, &x)| (x - if j == 0 { 1.0 } else { 0.0 }).abs() <= TP_ROW_TOLERANCE);
    if !ok {
        return Err(StructureError::TraceConstraint(format!(
            "first row must be [1, 0, ..., 0], got {}",
            row
        ))
        .into());
    }
    Ok(())
}

fn matrix_labels(rows: std::ops::Range<usize>, cols: usize) -> Vec<String> {
    rows.flat_map(|i| (0..cols).map(move |j| format!("MxElement {},{}", i, j)))
        .collect()
}

/// A fully parameterized operation: every matrix entry is a parameter.
#[derive(Debug, Clone)]
pub struct FullDenseOp {
    base: Array2<f64>,
    evotype: EvoType,
    binding: Binding,
    dirty: bool,
}

impl FullDenseOp {
    pub fn new(base: Array2<f64>, evotype: EvoType) -> Result<Self> {
        check_square(&base)?;
        Ok(Self {
            base,
            evotype,
            binding: Binding::default(),
            dirty: false,
        })
    }
}

impl ModelMember for FullDenseOp {
    fn dim(&self) -> usize {
        self.base.nrows()
    }

    fn evotype(&self) -> EvoType {
        self.evotype
    }

    fn num_params(&self) -> usize {
        self.base.len()
    }

    fn to_vector(&self) -> Array1<f64> {
        self.base.iter().cloned().collect()
    }

    fn from_vector(&mut self, v: ArrayView1<'_, f64>) -> Result<()> {
        check_len(self.num_params(), &v)?;
        for (dst, &src) in self.base.iter_mut().zip(v.iter()) {
            *dst = src;
        }
        self.dirty = false;
        Ok(())
    }

    fn parameter_labels(&self) -> Vec<String> {
        matrix_labels(0..self.dim(), self.dim())
    }

    member_bookkeeping!();
}

/// A trace-preserving operation: the first row is fixed to `[1, 0, ..., 0]`.
#[derive(Debug, Clone)]
pub struct TPDenseOp {
    base: Array2<f64>,
    evotype: EvoType,
    binding: Binding,
    dirty: bool,
}

impl TPDenseOp {
    /// Fails with a trace-constraint error unless the first row of `base`
    /// is `[1, 0, ..., 0]` within tolerance; the row is then set exactly.
    pub fn new(mut base: Array2<f64>, evotype: EvoType) -> Result<Self> {
        check_square(&base)?;
        check_tp_row(&base)?;
        Self::pin_first_row(&mut base);
        Ok(Self {
            base,
            evotype,
            binding: Binding::default(),
            dirty: false,
        })
    }

    fn pin_first_row(m: &mut Array2<f64>) {
        if m.nrows() == 0 {
            return;
        }
        let mut row = m.row_mut(0);
        row.fill(0.0);
        row[0] = 1.0;
    }
}

impl ModelMember for TPDenseOp {
    fn dim(&self) -> usize {
        self.base.nrows()
    }

    fn evotype(&self) -> EvoType {
        self.evotype
    }

    fn num_params(&self) -> usize {
        let d = self.dim();
        d * d.saturating_sub(1)
    }

    fn to_vector(&self) -> Array1<f64> {
        self.base.rows().into_iter().skip(1).flatten().cloned().collect()
    }

    fn from_vector(&mut self, v: ArrayView1<'_, f64>) -> Result<()> {
        check_len(self.num_params(), &v)?;
        let free = self.base.rows_mut().into_iter().skip(1).flatten();
        for (dst, &src) in free.zip(v.iter()) {
            *dst = src;
        }
        self.dirty = false;
        Ok(())
    }

    fn parameter_labels(&self) -> Vec<String> {
        matrix_labels(1..self.dim(), self.dim())
    }

    member_bookkeeping!();
}

/// An operation with no parameters.
#[derive(Debug, Clone)]
pub struct StaticDenseOp {
    base: Array2<f64>,
    evotype: EvoType,
    binding: Binding,
    dirty: bool,
}

impl StaticDenseOp {
    pub fn new(base: Array2<f64>, evotype: EvoType) -> Result<Self> {
        check_square(&base)?;
        Ok(Self {
            base,
            evotype,
            binding: Binding::default(),
            dirty: false,
        })
    }
}

impl ModelMember for StaticDenseOp {
    fn dim(&self) -> usize {
        self.base.nrows()
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

/// A dense operation in one of the supported parameterizations.
#[derive(Debug, Clone)]
pub enum Operation {
    Full(FullDenseOp),
    Tp(TPDenseOp),
    Static(StaticDenseOp),
}

delegate_member!(Operation { Full, Tp, Static });

impl From<FullDenseOp> for Operation {
    fn from(op: FullDenseOp) -> Self {
        Operation::Full(op)
    }
}

impl From<TPDenseOp> for Operation {
    fn from(op: TPDenseOp) -> Self {
        Operation::Tp(op)
    }
}

impl From<StaticDenseOp> for Operation {
    fn from(op: StaticDenseOp) -> Self {
        Operation::Static(op)
    }
}

impl Operation {
    /// Wrap a raw matrix in a full parameterization.
    pub fn full(base: Array2<f64>, evotype: EvoType) -> Result<Self> {
        Ok(Operation::Full(FullDenseOp::new(base, evotype)?))
    }

    pub fn tp(base: Array2<f64>, evotype: EvoType) -> Result<Self> {
        Ok(Operation::Tp(TPDenseOp::new(base, evotype)?))
    }

    pub fn static_op(base: Array2<f64>, evotype: EvoType) -> Result<Self> {
        Ok(Operation::Static(StaticDenseOp::new(base, evotype)?))
    }

    /// The dense matrix.
    pub fn dense(&self) -> &Array2<f64> {
        match self {
            Operation::Full(op) => &op.base,
            Operation::Tp(op) => &op.base,
            Operation::Static(op) => &op.base,
        }
    }

    /// Number of matrix entries.
    pub fn size(&self) -> usize {
        self.dense().len()
    }

    /// Short parameterization name (`full`, `TP`, `static`).
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Full(_) => "full",
            Operation::Tp(_) => "TP",
            Operation::Static(_) => "static",
        }
    }

    /// Replace the dense matrix outside `from_vector` and mark the
    /// operation dirty.
    ///
    /// Static operations are read-only; TP operations reject matrices that
    /// break the first-row constraint. On error nothing changes.
    pub fn set_dense(&mut self, m: Array2<f64>) -> Result<()> {
        if m.dim() != self.dense().dim() {
            return Err(StructureError::Shape(format!(
                "expected {:?} matrix, got {:?}",
                self.dense().dim(),
                m.dim()
            ))
            .into());
        }
        match self {
            Operation::Full(op) => op.base = m,
            Operation::Tp(op) => {
                check_tp_row(&m)?;
                op.base = m;
                TPDenseOp::pin_first_row(&mut op.base);
            }
            Operation::Static(_) => {
                return Err(Error::ReadOnly(
                    "Cannot set the value of a static operation".into(),
                ))
            }
        }
        self.set_dirty(true);
        Ok(())
    }

    /// `G -> S⁻¹ G S`.
    pub fn transform_inplace(&mut self, s: &GaugeGroupElement) -> Result<()> {
        let transformed = s.transform_matrix(self.dense())?;
        self.set_dense(transformed)
    }

    /// `G -> D G` with `D = diag(1, 1-a, ...)`.
    pub fn depolarize(&mut self, amount: &DepolarizeAmount) -> Result<()> {
        let d = basis::depolarization_matrix(self.dim(), amount)?;
        let depolarized = d.dot(self.dense());
        self.set_dense(depolarized)
    }

    /// `G -> R G` for the rotation superoperator `R` of `amount`.
    pub fn rotate(&mut self, amount: &[f64], mx_basis: BasisName) -> Result<()> {
        let r = basis::rotation_superop(amount, self.dim(), mx_basis)?;
        let rotated = r.dot(self.dense());
        self.set_dense(rotated)
    }

    pub fn to_rep(&self) -> Result<OpRep> {
        OpRep::new(self.dense().clone(), self.evotype())
    }

    /// Same matrix under a full parameterization, unbound.
    pub fn to_full(&self) -> Result<Operation> {
        Operation::full(self.dense().clone(), self.evotype())
    }

    /// Same matrix under a TP parameterization, unbound.
    pub fn to_tp(&self) -> Result<Operation> {
        Operation::tp(self.dense().clone(), self.evotype())
    }

    /// Same matrix with no parameters, unbound.
    pub fn to_static(&self) -> Result<Operation> {
        Operation::static_op(self.dense().clone(), self.evotype())
    }
}
