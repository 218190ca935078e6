// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Stateless rebuilding of model members from raw parameter slices.
//!
//! A [`Torchable`] member can describe itself as [`StatelessData`]: the
//! structural information (dimension, effect labels, fixed entries) needed
//! to rebuild its dense representation from nothing but a parameter slice.
//! Rebuilding is done on [`Tensor`]s, so the same code path serves plain
//! evaluation (constant tensors) and forward-mode differentiation (seeded
//! tensors).
//!
//! Shapes of rebuilt bases:
//!
//! | Member | Shape |
//! |--------|-------|
//! | operation | `(dim, dim)` |
//! | state preparation | `(dim, 1)` |
//! | POVM | `(num_effects, dim)` |
//! | instrument | one `(dim, dim)` tensor per element |

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StructureError};
use crate::label::Label;
use crate::modelmember::state::tp_first_component;
use crate::modelmember::{ModelMember, Operation, Povm, StatePrep};
use crate::tensor::Tensor;

/// Differentiable dense representations keyed by label.
pub type TorchBases = BTreeMap<Label, Tensor>;

/// Parameterization kind of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberType {
    FullOp,
    TpOp,
    StaticOp,
    FullState,
    TpState,
    StaticState,
    FullPovm,
    TpPovm,
    Instrument,
    TpInstrument,
}

impl fmt::Display for MemberType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemberType::FullOp => "FullDenseOp",
            MemberType::TpOp => "TPDenseOp",
            MemberType::StaticOp => "StaticDenseOp",
            MemberType::FullState => "FullState",
            MemberType::TpState => "TPState",
            MemberType::StaticState => "StaticState",
            MemberType::FullPovm => "FullPOVM",
            MemberType::TpPovm => "TPPOVM",
            MemberType::Instrument => "Instrument",
            MemberType::TpInstrument => "TPInstrument",
        };
        write!(f, "{}", name)
    }
}

/// Everything except the parameter values needed to rebuild a member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatelessData {
    FullOp {
        dim: usize,
    },
    TpOp {
        dim: usize,
    },
    StaticOp {
        base: Array2<f64>,
    },
    FullState {
        dim: usize,
    },
    TpState {
        dim: usize,
    },
    StaticState {
        base: Array1<f64>,
    },
    FullPovm {
        dim: usize,
        effect_labels: Vec<String>,
    },
    TpPovm {
        dim: usize,
        effect_labels: Vec<String>,
        identity: Array1<f64>,
    },
    /// Elements with their local parameter ranges.
    Instrument {
        elements: Vec<(String, Range<usize>, StatelessData)>,
    },
    /// `param_ranges[0]` belongs to the TP sum, the rest to the
    /// differences of every element but the last.
    TpInstrument {
        dim: usize,
        element_labels: Vec<String>,
        param_ranges: Vec<Range<usize>>,
    },
}

/// A rebuilt dense representation.
#[derive(Debug, Clone, PartialEq)]
pub enum TorchBase {
    Single(Tensor),
    /// Instrument elements in order.
    Elements(Vec<(String, Tensor)>),
}

fn tp_op_base(dim: usize, params: &Tensor) -> Result<Tensor> {
    if dim == 0 {
        return Ok(Tensor::constant(Array2::zeros((0, 0))));
    }
    let mut first = Array2::zeros((1, dim));
    first[[0, 0]] = 1.0;
    let rest = params.reshape(dim - 1, dim)?;
    Tensor::vstack(&[Tensor::constant(first), rest])
}

fn single(base: TorchBase) -> Result<Tensor> {
    match base {
        TorchBase::Single(t) => Ok(t),
        TorchBase::Elements(_) => {
            Err(StructureError::Shape("nested instruments are not supported".into()).into())
        }
    }
}

impl StatelessData {
    /// Length of the parameter slice this member is rebuilt from.
    pub fn num_params(&self) -> usize {
        match self {
            StatelessData::FullOp { dim } => dim * dim,
            StatelessData::TpOp { dim } => dim * dim.saturating_sub(1),
            StatelessData::StaticOp { .. } | StatelessData::StaticState { .. } => 0,
            StatelessData::FullState { dim } => *dim,
            StatelessData::TpState { dim } => dim.saturating_sub(1),
            StatelessData::FullPovm { dim, effect_labels } => dim * effect_labels.len(),
            StatelessData::TpPovm {
                dim, effect_labels, ..
            } => dim * effect_labels.len().saturating_sub(1),
            StatelessData::Instrument { elements } => {
                elements.iter().map(|(_, r, _)| r.end).max().unwrap_or(0)
            }
            StatelessData::TpInstrument { param_ranges, .. } => {
                param_ranges.iter().map(|r| r.end).max().unwrap_or(0)
            }
        }
    }

    /// Rebuild the dense representation from a `(num_params, 1)` tensor.
    pub fn torch_base(&self, params: &Tensor) -> Result<TorchBase> {
        let expected = self.num_params();
        if params.shape() != (expected, 1) {
            return Err(StructureError::VectorLength {
                expected,
                actual: params.shape().0 * params.shape().1,
            }
            .into());
        }

        let base = match self {
            StatelessData::FullOp { dim } => TorchBase::Single(params.reshape(*dim, *dim)?),
            StatelessData::TpOp { dim } => TorchBase::Single(tp_op_base(*dim, params)?),
            StatelessData::StaticOp { base } => TorchBase::Single(Tensor::constant(base.clone())),
            StatelessData::FullState { .. } => TorchBase::Single(params.clone()),
            StatelessData::TpState { dim } => {
                let mut first = Array2::zeros((1, 1));
                first[[0, 0]] = tp_first_component(*dim);
                TorchBase::Single(Tensor::vstack(&[Tensor::constant(first), params.clone()])?)
            }
            StatelessData::StaticState { base } => TorchBase::Single(Tensor::column(base.view())),
            StatelessData::FullPovm { dim, effect_labels } => {
                TorchBase::Single(params.reshape(effect_labels.len(), *dim)?)
            }
            StatelessData::TpPovm {
                dim,
                effect_labels,
                identity,
            } => {
                let free = params.reshape(effect_labels.len().saturating_sub(1), *dim)?;
                let identity_row = Tensor::constant(identity.clone().into_shape((1, *dim))?);
                let complement = identity_row.sub(&free.sum_rows())?;
                TorchBase::Single(Tensor::vstack(&[free, complement])?)
            }
            StatelessData::Instrument { elements } => {
                let mut out = Vec::with_capacity(elements.len());
                for (label, range, data) in elements {
                    let slice = params.slice_rows(range.clone())?;
                    out.push((label.clone(), single(data.torch_base(&slice)?)?));
                }
                TorchBase::Elements(out)
            }
            StatelessData::TpInstrument {
                dim,
                element_labels,
                param_ranges,
            } => {
                let mut param_ops = Vec::with_capacity(param_ranges.len());
                for (i, range) in param_ranges.iter().enumerate() {
                    let slice = params.slice_rows(range.clone())?;
                    let op = if i == 0 {
                        tp_op_base(*dim, &slice)?
                    } else {
                        slice.reshape(*dim, *dim)?
                    };
                    param_ops.push(op);
                }
                TorchBase::Elements(derive_tp_elements(element_labels, &param_ops)?)
            }
        };
        Ok(base)
    }
}

/// `Mi = Di + MT` for all but the last element, `Mn = -((n-2)·MT + Σ Di)`.
fn derive_tp_elements(labels: &[String], param_ops: &[Tensor]) -> Result<Vec<(String, Tensor)>> {
    let (mt, diffs) = param_ops
        .split_first()
        .ok_or_else(|| StructureError::Shape("TP instrument has no parameter ops".into()))?;
    let n = labels.len();
    if diffs.len() + 1 != n {
        return Err(StructureError::Shape(format!(
            "{} elements need {} difference ops, got {}",
            n,
            n.saturating_sub(1),
            diffs.len()
        ))
        .into());
    }

    let mut out = Vec::with_capacity(n);
    let mut last = mt.scale(n as f64 - 2.0);
    for (label, d) in labels.iter().zip(diffs) {
        out.push((label.clone(), d.add(mt)?));
        last = last.add(d)?;
    }
    if let Some(label) = labels.last() {
        out.push((label.clone(), last.scale(-1.0)));
    }
    Ok(out)
}

/// Bases of one member keyed for circuit lookup: instrument elements are
/// keyed by their element labels.
pub fn torch_bases(label: &Label, data: &StatelessData, params: &Tensor) -> Result<Vec<(Label, Tensor)>> {
    Ok(match data.torch_base(params)? {
        TorchBase::Single(t) => vec![(label.clone(), t)],
        TorchBase::Elements(elements) => elements
            .into_iter()
            .map(|(key, t)| (label.element(&key), t))
            .collect(),
    })
}

/// A member that can be rebuilt from its stateless data and a slice.
pub trait Torchable: ModelMember {
    fn member_type(&self) -> MemberType;

    fn stateless_data(&self) -> StatelessData;

    fn torch_base(&self, params: &Tensor) -> Result<TorchBase> {
        self.stateless_data().torch_base(params)
    }
}

/// What a snapshot records about one parameterized member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamMetadata {
    pub label: Label,
    pub member_type: MemberType,
    pub stateless_data: StatelessData,
}

impl Torchable for Operation {
    fn member_type(&self) -> MemberType {
        match self {
            Operation::Full(_) => MemberType::FullOp,
            Operation::Tp(_) => MemberType::TpOp,
            Operation::Static(_) => MemberType::StaticOp,
        }
    }

    fn stateless_data(&self) -> StatelessData {
        match self {
            Operation::Full(_) => StatelessData::FullOp { dim: self.dim() },
            Operation::Tp(_) => StatelessData::TpOp { dim: self.dim() },
            Operation::Static(_) => StatelessData::StaticOp {
                base: self.dense().clone(),
            },
        }
    }
}

impl Torchable for StatePrep {
    fn member_type(&self) -> MemberType {
        match self {
            StatePrep::Full(_) => MemberType::FullState,
            StatePrep::Tp(_) => MemberType::TpState,
            StatePrep::Static(_) => MemberType::StaticState,
        }
    }

    fn stateless_data(&self) -> StatelessData {
        match self {
            StatePrep::Full(_) => StatelessData::FullState { dim: self.dim() },
            StatePrep::Tp(_) => StatelessData::TpState { dim: self.dim() },
            StatePrep::Static(_) => StatelessData::StaticState {
                base: self.dense().clone(),
            },
        }
    }
}

impl Torchable for Povm {
    fn member_type(&self) -> MemberType {
        match self {
            Povm::Full(_) => MemberType::FullPovm,
            Povm::Tp(_) => MemberType::TpPovm,
        }
    }

    fn stateless_data(&self) -> StatelessData {
        match self {
            Povm::Full(_) => StatelessData::FullPovm {
                dim: self.dim(),
                effect_labels: self.effect_labels(),
            },
            Povm::Tp(p) => StatelessData::TpPovm {
                dim: self.dim(),
                effect_labels: self.effect_labels(),
                identity: p.identity().clone(),
            },
        }
    }
}
