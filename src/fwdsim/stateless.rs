// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Stateless snapshot of a model and layout.
//!
//! A [`StatelessModel`] records the circuits of a layout and the
//! structural data of every parameterized member, but none of the
//! parameter values. Evaluating it on a list of free-parameter tensors
//! is then a pure function, which is what forward-mode differentiation
//! needs: seeding the tensors with one direction per model parameter
//! yields probabilities and Jacobian together.

use ndarray::{Array1, Array2};
use tracing::debug;

use crate::circuit::SeparatePOVMCircuit;
use crate::error::{Error, Result, StructureError};
use crate::label::Label;
use crate::layout::CircuitOutcomeLayout;
use crate::model::ExplicitModel;
use crate::tensor::Tensor;
use crate::torchable::{torch_bases, ParamMetadata, TorchBases};

/// One circuit reduced to the labels needed to simulate it.
#[derive(Debug, Clone, PartialEq)]
pub struct StatelessCircuit {
    pub prep_label: Label,
    pub op_labels: Vec<Label>,
    pub povm_label: Label,
    /// POVM rows to report, in output order
    pub effect_indices: Vec<usize>,
}

fn missing(label: &Label) -> Error {
    StructureError::UnknownLabel(label.to_string()).into()
}

impl StatelessCircuit {
    pub fn new(spc: &SeparatePOVMCircuit) -> Result<Self> {
        let prep_label = spc
            .prep_label()
            .cloned()
            .ok_or_else(|| StructureError::UnknownLabel("state preparation".into()))?;
        Ok(Self {
            prep_label,
            op_labels: spc.op_labels().to_vec(),
            povm_label: spc.povm_label.clone(),
            effect_indices: spc.effect_indices.clone(),
        })
    }

    /// Column of selected outcome probabilities.
    pub fn outcome_probs(&self, bases: &TorchBases) -> Result<Tensor> {
        let mut superket = bases
            .get(&self.prep_label)
            .ok_or_else(|| missing(&self.prep_label))?
            .clone();
        for label in &self.op_labels {
            let superop = bases.get(label).ok_or_else(|| missing(label))?;
            superket = superop.matmul(&superket)?;
        }
        let povm = bases
            .get(&self.povm_label)
            .ok_or_else(|| missing(&self.povm_label))?;
        povm.matmul(&superket)?.select_rows(&self.effect_indices)
    }
}

/// Structure of a model and the circuits of a layout, without values.
#[derive(Debug, Clone)]
pub struct StatelessModel {
    pub circuits: Vec<StatelessCircuit>,
    /// Total number of outcome probabilities
    pub outcome_probs_dim: usize,
    /// One entry per parameterized member, in parameter order
    pub param_metadata: Vec<ParamMetadata>,
}

impl StatelessModel {
    /// Snapshot `model` for the circuits of `layout`.
    ///
    /// Circuits must expand to a single instrument-free circuit, and the
    /// layout's element ranges must be keyed `0, 1, ...` and tile
    /// `0..outcome_probs_dim` without gaps.
    pub fn new(model: &ExplicitModel, layout: &CircuitOutcomeLayout) -> Result<Self> {
        let eind = layout.element_indices();

        let mut circuits = Vec::with_capacity(layout.num_circuits());
        for (i, circuit, outcomes) in layout.iter_unique_circuits() {
            let expanded = circuit.expand_instruments_and_separate_povm(model, Some(outcomes))?;
            if expanded.len() > 1 {
                return Err(Error::NotImplemented(format!(
                    "circuit {} expands to {} instrument-free circuits",
                    circuit,
                    expanded.len()
                )));
            }
            let (spc, _) = expanded.into_iter().next().ok_or_else(|| {
                StructureError::Shape(format!("circuit {} has no outcomes in the layout", circuit))
            })?;
            if let Some(range) = eind.get(&i) {
                if range.len() != spc.effect_indices.len() {
                    return Err(StructureError::Shape(format!(
                        "circuit {} has {} outcomes but {} layout slots",
                        circuit,
                        spc.effect_indices.len(),
                        range.len()
                    ))
                    .into());
                }
            }
            circuits.push(StatelessCircuit::new(&spc)?);
        }

        let mut expected_key = 0;
        let mut expected_start = 0;
        for (&k, range) in eind {
            if k != expected_key || range.start != expected_start {
                return Err(StructureError::LayoutGap(format!(
                    "element {} starts at {}, expected element {} at {}",
                    k, range.start, expected_key, expected_start
                ))
                .into());
            }
            expected_key += 1;
            expected_start = range.end;
        }
        if expected_key != circuits.len() {
            return Err(StructureError::LayoutGap(format!(
                "{} element ranges for {} circuits",
                expected_key,
                circuits.len()
            ))
            .into());
        }

        let param_metadata: Vec<ParamMetadata> = model
            .iter_parameterized_objs()
            .into_iter()
            .map(|(label, member)| ParamMetadata {
                label: label.clone(),
                member_type: member.member_type(),
                stateless_data: member.stateless_data(),
            })
            .collect();

        debug!(
            circuits = circuits.len(),
            outcomes = expected_start,
            members = param_metadata.len(),
            "Built stateless model"
        );
        Ok(Self {
            circuits,
            outcome_probs_dim: expected_start,
            param_metadata,
        })
    }

    /// Total parameter count recorded in the snapshot.
    pub fn num_params(&self) -> usize {
        self.param_metadata
            .iter()
            .map(|m| m.stateless_data.num_params())
            .sum()
    }

    /// Current parameter values of each member, in snapshot order.
    ///
    /// Fails if members were added, removed, reordered or reallocated
    /// since the snapshot was taken.
    pub fn get_free_parameters(&self, model: &ExplicitModel) -> Result<Vec<Array1<f64>>> {
        let objs = model.iter_parameterized_objs();
        if objs.len() != self.param_metadata.len() {
            return Err(StructureError::LabelDrift {
                expected: format!("{} members", self.param_metadata.len()),
                actual: format!("{} members", objs.len()),
            }
            .into());
        }

        let mut free_params = Vec::with_capacity(objs.len());
        let mut prev = 0;
        for ((label, member), meta) in objs.into_iter().zip(&self.param_metadata) {
            if meta.label != *label {
                return Err(StructureError::LabelDrift {
                    expected: meta.label.to_string(),
                    actual: label.to_string(),
                }
                .into());
            }
            let range = member
                .gpindices()
                .ok_or_else(|| StructureError::Unallocated(label.to_string()))?;
            let vec = member.to_vector();
            if range.start != prev || range.len() != vec.len() {
                return Err(StructureError::IndexDrift {
                    label: label.to_string(),
                    expected_start: prev,
                    actual: format!("{:?}", range),
                }
                .into());
            }
            prev += vec.len();
            free_params.push(vec);
        }
        Ok(free_params)
    }

    /// Rebuild every member's dense representation.
    ///
    /// With `grad`, parameter `j` of the concatenated vector is seeded
    /// with direction `j`.
    pub fn get_torch_bases(&self, free_params: &[Array1<f64>], grad: bool) -> Result<TorchBases> {
        let tensors = self.param_tensors(free_params, grad)?;
        self.bases_from_tensors(&tensors)
    }

    fn param_tensors(&self, free_params: &[Array1<f64>], grad: bool) -> Result<Vec<Tensor>> {
        if free_params.len() != self.param_metadata.len() {
            return Err(StructureError::Shape(format!(
                "expected {} parameter blocks, got {}",
                self.param_metadata.len(),
                free_params.len()
            ))
            .into());
        }
        if !grad {
            return Ok(free_params.iter().map(|v| Tensor::column(v.view())).collect());
        }
        let directions: usize = free_params.iter().map(|v| v.len()).sum();
        let mut offset = 0;
        let mut out = Vec::with_capacity(free_params.len());
        for v in free_params {
            out.push(Tensor::seeded(v.view(), offset, directions)?);
            offset += v.len();
        }
        Ok(out)
    }

    /// Bases from already-built parameter tensors, one per member.
    pub fn bases_from_tensors(&self, params: &[Tensor]) -> Result<TorchBases> {
        if params.len() != self.param_metadata.len() {
            return Err(StructureError::Shape(format!(
                "expected {} parameter blocks, got {}",
                self.param_metadata.len(),
                params.len()
            ))
            .into());
        }
        let mut bases = TorchBases::new();
        for (meta, t) in self.param_metadata.iter().zip(params) {
            for (label, base) in torch_bases(&meta.label, &meta.stateless_data, t)? {
                bases.insert(label, base);
            }
        }
        Ok(bases)
    }

    /// All circuits' probabilities stacked in layout order.
    pub fn circuit_probs_from_torch_bases(&self, bases: &TorchBases) -> Result<Tensor> {
        let parts = self
            .circuits
            .iter()
            .map(|c| c.outcome_probs(bases))
            .collect::<Result<Vec<_>>>()?;
        Tensor::vstack(&parts)
    }

    pub fn circuit_probs_from_free_params(&self, params: &[Tensor]) -> Result<Tensor> {
        let bases = self.bases_from_tensors(params)?;
        self.circuit_probs_from_torch_bases(&bases)
    }

    /// Probabilities and their Jacobian with respect to the concatenated
    /// free parameters, from one seeded evaluation.
    pub fn jacfwd(&self, free_params: &[Array1<f64>]) -> Result<(Array1<f64>, Array2<f64>)> {
        let directions: usize = free_params.iter().map(|v| v.len()).sum();
        let tensors = self.param_tensors(free_params, true)?;
        let probs = self.circuit_probs_from_free_params(&tensors)?;
        Ok((probs.to_flat(), probs.jacobian(directions)?))
    }
}
