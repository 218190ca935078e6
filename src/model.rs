// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Explicit gate-set models.
//!
//! An [`ExplicitModel`] keeps ordered collections of state preparations,
//! POVMs, operations and instruments, and one flat parameter vector that
//! is the concatenation of their slices in that order.

use std::sync::Arc;

use ndarray::{s, Array1, Array2, ArrayView1};
use tracing::{debug, warn};

use crate::basis::BasisName;
use crate::circuit::Circuit;
use crate::config::{Config, SimulatorKind};
use crate::error::{Result, StructureError};
use crate::fwdsim::{ForwardSimulator, MatrixForwardSimulator, TorchForwardSimulator};
use crate::instrument::{ModelInstrument, DEFAULT_CLEAN_TOLERANCE};
use crate::label::{Label, Outcome};
use crate::layout::CircuitOutcomeLayout;
use crate::modelmember::{
    check_len, norm_diff, EffectRep, EvoType, MemberId, ModelMember, OpRep, Operation, Povm,
    StatePrep, StateRep,
};
use crate::torchable::Torchable;

/// Which kind of layer a label names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Prep,
    Op,
    Povm,
}

/// Representation of one circuit layer.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerOperator {
    Prep(StateRep),
    Op(OpRep),
    Povm(Vec<(String, EffectRep)>),
}

fn upsert<T>(items: &mut Vec<(Label, T)>, label: Label, item: T) {
    match items.iter_mut().find(|(l, _)| *l == label) {
        Some(slot) => slot.1 = item,
        None => items.push((label, item)),
    }
}

fn lookup<'a, T>(items: &'a [(Label, T)], label: &Label) -> Option<&'a T> {
    items.iter().find(|(l, _)| l == label).map(|(_, t)| t)
}

fn lookup_mut<'a, T>(items: &'a mut [(Label, T)], label: &Label) -> Option<&'a mut T> {
    items.iter_mut().find(|(l, _)| l == label).map(|(_, t)| t)
}

/// A model built from explicitly listed members.
#[derive(Debug, Clone)]
pub struct ExplicitModel {
    id: MemberId,
    dim: usize,
    evotype: EvoType,
    basis: BasisName,
    preps: Vec<(Label, StatePrep)>,
    povms: Vec<(Label, Povm)>,
    operations: Vec<(Label, Operation)>,
    instruments: Vec<(Label, ModelInstrument)>,
    paramvec: Array1<f64>,
    clean_tolerance: f64,
    sim: Arc<dyn ForwardSimulator>,
}

impl ExplicitModel {
    /// An empty model bound to the forward-mode simulator.
    pub fn new(dim: usize, evotype: EvoType, basis: BasisName) -> Self {
        Self {
            id: MemberId::new(),
            dim,
            evotype,
            basis,
            preps: Vec::new(),
            povms: Vec::new(),
            operations: Vec::new(),
            instruments: Vec::new(),
            paramvec: Array1::zeros(0),
            clean_tolerance: DEFAULT_CLEAN_TOLERANCE,
            sim: Arc::new(TorchForwardSimulator::new()),
        }
    }

    /// An empty model using the configured evolution type, basis,
    /// tolerance and simulator.
    pub fn from_config(dim: usize, config: &Config) -> Self {
        let sim: Arc<dyn ForwardSimulator> = match config.simulation.forward_simulator {
            SimulatorKind::Torch => Arc::new(TorchForwardSimulator::new()),
            SimulatorKind::Matrix => Arc::new(MatrixForwardSimulator::new()),
        };
        let mut model = Self::new(dim, config.model.default_evotype, config.model.basis);
        model.clean_tolerance = config.simulation.clean_tolerance;
        model.sim = sim;
        model
    }

    pub fn id(&self) -> MemberId {
        self.id
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn evotype(&self) -> EvoType {
        self.evotype
    }

    pub fn basis(&self) -> BasisName {
        self.basis
    }

    fn check_member(&self, member: &dyn ModelMember) -> Result<()> {
        if member.evotype() != self.evotype {
            return Err(StructureError::EvotypeMismatch {
                expected: self.evotype.to_string(),
                actual: member.evotype().to_string(),
            }
            .into());
        }
        if member.dim() != self.dim {
            return Err(StructureError::DimensionMismatch {
                expected: self.dim,
                actual: member.dim(),
            }
            .into());
        }
        Ok(())
    }

    /// Add or replace a state preparation.
    pub fn add_prep(&mut self, label: impl Into<Label>, prep: StatePrep) -> Result<()> {
        self.check_member(&prep)?;
        upsert(&mut self.preps, label.into(), prep);
        self.rebuild_paramvec();
        Ok(())
    }

    pub fn add_povm(&mut self, label: impl Into<Label>, povm: Povm) -> Result<()> {
        self.check_member(&povm)?;
        upsert(&mut self.povms, label.into(), povm);
        self.rebuild_paramvec();
        Ok(())
    }

    pub fn add_operation(&mut self, label: impl Into<Label>, op: Operation) -> Result<()> {
        self.check_member(&op)?;
        upsert(&mut self.operations, label.into(), op);
        self.rebuild_paramvec();
        Ok(())
    }

    pub fn add_instrument(
        &mut self,
        label: impl Into<Label>,
        instrument: impl Into<ModelInstrument>,
    ) -> Result<()> {
        let instrument = instrument.into();
        self.check_member(&instrument)?;
        upsert(&mut self.instruments, label.into(), instrument);
        self.rebuild_paramvec();
        Ok(())
    }

    pub fn prep(&self, label: &Label) -> Option<&StatePrep> {
        lookup(&self.preps, label)
    }

    pub fn povm(&self, label: &Label) -> Option<&Povm> {
        lookup(&self.povms, label)
    }

    pub fn operation(&self, label: &Label) -> Option<&Operation> {
        lookup(&self.operations, label)
    }

    pub fn instrument(&self, label: &Label) -> Option<&ModelInstrument> {
        lookup(&self.instruments, label)
    }

    /// Mutable access to an operation's value; structural changes go
    /// through `add_operation`.
    pub fn operation_mut(&mut self, label: &Label) -> Option<&mut Operation> {
        lookup_mut(&mut self.operations, label)
    }

    pub fn prep_mut(&mut self, label: &Label) -> Option<&mut StatePrep> {
        lookup_mut(&mut self.preps, label)
    }

    pub fn instrument_mut(&mut self, label: &Label) -> Option<&mut ModelInstrument> {
        lookup_mut(&mut self.instruments, label)
    }

    /// The only state preparation, if there is exactly one.
    pub fn default_prep_label(&self) -> Option<&Label> {
        match self.preps.as_slice() {
            [(l, _)] => Some(l),
            _ => None,
        }
    }

    /// The only POVM, if there is exactly one.
    pub fn default_povm_label(&self) -> Option<&Label> {
        match self.povms.as_slice() {
            [(l, _)] => Some(l),
            _ => None,
        }
    }

    /// Every parameterized member: preps, POVMs, operations, instruments.
    pub fn iter_parameterized_objs(&self) -> Vec<(&Label, &dyn Torchable)> {
        let mut out: Vec<(&Label, &dyn Torchable)> = Vec::new();
        out.extend(self.preps.iter().map(|(l, m)| (l, m as &dyn Torchable)));
        out.extend(self.povms.iter().map(|(l, m)| (l, m as &dyn Torchable)));
        out.extend(self.operations.iter().map(|(l, m)| (l, m as &dyn Torchable)));
        out.extend(self.instruments.iter().map(|(l, m)| (l, m as &dyn Torchable)));
        out
    }

    fn members_mut(&mut self) -> Vec<(&Label, &mut dyn Torchable)> {
        let mut out: Vec<(&Label, &mut dyn Torchable)> = Vec::new();
        out.extend(self.preps.iter_mut().map(|(l, m)| (&*l, m as &mut dyn Torchable)));
        out.extend(self.povms.iter_mut().map(|(l, m)| (&*l, m as &mut dyn Torchable)));
        out.extend(self.operations.iter_mut().map(|(l, m)| (&*l, m as &mut dyn Torchable)));
        out.extend(self.instruments.iter_mut().map(|(l, m)| (&*l, m as &mut dyn Torchable)));
        out
    }

    /// Reallocate every member in order and rebuild the vector from their
    /// current values.
    fn rebuild_paramvec(&mut self) {
        let id = self.id;
        let mut v: Vec<f64> = Vec::new();
        for (_, member) in self.members_mut() {
            member.allocate_gpindices(v.len(), id);
            v.extend(member.to_vector().iter());
        }
        self.paramvec = Array1::from(v);
        debug!(model = %self.id, num_params = self.paramvec.len(), "Rebuilt model parameter vector");
    }

    pub fn num_params(&self) -> usize {
        self.paramvec.len()
    }

    /// The parameter vector with dirty members' current values applied.
    pub fn to_vector(&self) -> Array1<f64> {
        let mut v = self.paramvec.clone();
        for (_, member) in self.iter_parameterized_objs() {
            if !member.is_dirty() {
                continue;
            }
            if let Some(range) = member.gpindices() {
                let w = member.to_vector();
                let mut slot = v.slice_mut(s![range]);
                let diff = norm_diff(slot.view(), &w);
                if !diff.is_finite() || diff > self.clean_tolerance {
                    slot.assign(&w);
                }
            }
        }
        v
    }

    /// Commit dirty members' values into the cached vector.
    pub fn clean_paramvec(&mut self) {
        let tol = self.clean_tolerance;
        let mut paramvec = std::mem::take(&mut self.paramvec);
        let mut updated = 0;
        for (label, member) in self.members_mut() {
            if !member.is_dirty() {
                continue;
            }
            member.clean_paramvec();
            if let Some(range) = member.gpindices() {
                let w = member.to_vector();
                let mut slot = paramvec.slice_mut(s![range]);
                let diff = norm_diff(slot.view(), &w);
                if !diff.is_finite() || diff > tol {
                    slot.assign(&w);
                    updated += 1;
                } else if let Err(e) = member.from_vector(slot.view()) {
                    warn!(member = %label, error = %e, "Failed to re-sync model member");
                }
            }
            member.set_dirty(false);
        }
        self.paramvec = paramvec;
        if updated > 0 {
            debug!(model = %self.id, updated, "Cleaned model parameter vector");
        }
    }

    /// Load `v` into every member. Nothing changes if the length is wrong.
    pub fn from_vector(&mut self, v: ArrayView1<'_, f64>) -> Result<()> {
        check_len(self.num_params(), &v)?;
        self.clean_paramvec();
        for (_, member) in self.members_mut() {
            if let Some(range) = member.gpindices() {
                member.from_vector(v.slice(s![range]))?;
            }
        }
        self.paramvec.assign(&v);
        Ok(())
    }

    /// `"<member>: <parameter>"` for every parameter.
    pub fn parameter_labels(&self) -> Vec<String> {
        self.iter_parameterized_objs()
            .into_iter()
            .flat_map(|(label, member)| {
                member
                    .parameter_labels()
                    .into_iter()
                    .map(move |p| format!("{}: {}", label, p))
            })
            .collect()
    }

    fn prep_rep(&self, label: &Label) -> Result<StateRep> {
        self.prep(label)
            .ok_or_else(|| StructureError::UnknownLabel(label.to_string()))?
            .to_rep()
    }

    /// An operation or an instrument element (`<instrument>_<key>`).
    fn op_rep(&self, label: &Label) -> Result<OpRep> {
        if let Some(op) = self.operation(label) {
            return op.to_rep();
        }
        for (ilabel, instrument) in &self.instruments {
            for key in instrument.keys() {
                if ilabel.element(&key) == *label {
                    if let Some(m) = instrument.element_dense(&key) {
                        return OpRep::new(m, instrument.evotype());
                    }
                }
            }
        }
        Err(StructureError::UnknownLabel(label.to_string()).into())
    }

    fn povm_reps(&self, label: &Label) -> Result<Vec<(String, EffectRep)>> {
        self.povm(label)
            .ok_or_else(|| StructureError::UnknownLabel(label.to_string()))?
            .to_reps()
    }

    /// Representation of the layer `label` of the given kind.
    pub fn circuit_layer_operator(&self, label: &Label, kind: LayerKind) -> Result<LayerOperator> {
        Ok(match kind {
            LayerKind::Prep => LayerOperator::Prep(self.prep_rep(label)?),
            LayerKind::Op => LayerOperator::Op(self.op_rep(label)?),
            LayerKind::Povm => LayerOperator::Povm(self.povm_reps(label)?),
        })
    }

    /// Outcome probabilities of `circuit` by direct multiplication of
    /// representations.
    pub fn probabilities(&self, circuit: &Circuit) -> Result<Vec<(Outcome, f64)>> {
        let mut out = Vec::new();
        for (sep, outcomes) in circuit.expand_instruments_and_separate_povm(self, None)? {
            let prep_label = sep
                .prep_label()
                .ok_or_else(|| StructureError::UnknownLabel("state preparation".into()))?;
            let mut state = self.prep_rep(prep_label)?;
            for op in sep.op_labels() {
                state = self.op_rep(op)?.acton(&state)?;
            }
            let effects = self.povm_reps(&sep.povm_label)?;
            for (&i, outcome) in sep.effect_indices.iter().zip(outcomes) {
                let (_, effect) = effects
                    .get(i)
                    .ok_or_else(|| StructureError::UnknownLabel(outcome.to_string()))?;
                out.push((outcome, effect.probability(&state)?));
            }
        }
        Ok(out)
    }

    pub fn set_simulator(&mut self, sim: Arc<dyn ForwardSimulator>) {
        debug!(model = %self.id, simulator = sim.name(), "Bound forward simulator");
        self.sim = sim;
    }

    pub fn sim(&self) -> &Arc<dyn ForwardSimulator> {
        &self.sim
    }

    /// Probabilities of every layout element from the bound simulator.
    pub fn sim_probs(&self, layout: &CircuitOutcomeLayout) -> Result<Array1<f64>> {
        self.sim.bulk_probs(self, layout)
    }

    /// Jacobian of every layout element from the bound simulator.
    pub fn sim_dprobs(&self, layout: &CircuitOutcomeLayout) -> Result<Array2<f64>> {
        self.sim.bulk_dprobs(self, layout)
    }
}
