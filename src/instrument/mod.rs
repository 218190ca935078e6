// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Quantum instruments: labelled collections of operations, one per
//! measurement outcome, that act on a state together.
//!
//! An [`Instrument`] owns its elements and a flat parameter vector that is
//! the concatenation of the elements' slices. A [`TPInstrument`] instead
//! parameterizes the trace-preserving sum of its elements and derives the
//! elements from it.

use std::fmt;

use ndarray::{s, Array1, Array2, ArrayView1};
use tracing::{debug, warn};

use crate::basis::{BasisName, DepolarizeAmount, GaugeGroupElement};
use crate::error::{Error, Result, StructureError};
use crate::label::Label;
use crate::modelmember::{
    check_len, common_dim_evotype, compose_gpindices, delegate_member, norm_diff, Binding,
    EvoType, MemberId, ModelMember, OpRep, Operation, StatePrep, StaticState,
};
use crate::torchable::{MemberType, StatelessData, Torchable};

pub mod tp;

pub use tp::{SimplifiedTPInstrument, TPInstrument, TPInstrumentOp};

/// Default reconciliation tolerance between an element and its cached slice.
pub const DEFAULT_CLEAN_TOLERANCE: f64 = 1e-8;

/// One element handed to [`Instrument::new`].
#[derive(Debug, Clone)]
pub enum InstrumentElement {
    /// Raw matrix, wrapped in a full parameterization
    Dense(Array2<f64>),
    /// Pre-built operation, kept as is
    Op(Operation),
}

impl From<Array2<f64>> for InstrumentElement {
    fn from(m: Array2<f64>) -> Self {
        InstrumentElement::Dense(m)
    }
}

impl From<Operation> for InstrumentElement {
    fn from(op: Operation) -> Self {
        InstrumentElement::Op(op)
    }
}

/// Result of applying one instrument element to a state.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentOutcome {
    pub probability: f64,
    /// Post-measurement state, normalized when the probability is nonzero
    pub state: StaticState,
}

/// Apply each `(label, matrix)` to `state` and normalize.
///
/// `prob = out[0] * dim^0.25` because the first basis element of the
/// normalized Pauli-product basis is `I / sqrt(d)`.
pub(crate) fn apply_elements(
    evotype: EvoType,
    elements: impl Iterator<Item = (String, Array2<f64>)>,
    state: &StatePrep,
) -> Result<Vec<(String, InstrumentOutcome)>> {
    if evotype != EvoType::DensityMx {
        return Err(Error::NotImplemented(format!(
            "instrument acton for the {} evolution type",
            evotype
        )));
    }
    if state.evotype() != evotype {
        return Err(StructureError::EvotypeMismatch {
            expected: evotype.to_string(),
            actual: state.evotype().to_string(),
        }
        .into());
    }

    let rho = state.to_rep()?;
    let scale = (rho.dim() as f64).powf(0.25);
    let mut outcomes = Vec::new();
    for (label, m) in elements {
        let out = OpRep::new(m, evotype)?.acton(&rho)?.into_dense();
        let probability = out.first().map_or(0.0, |&x| x * scale);
        let normalized = if probability == 0.0 {
            out
        } else {
            out / probability
        };
        outcomes.push((
            label,
            InstrumentOutcome {
                probability,
                state: StaticState::new(normalized, evotype),
            },
        ));
    }
    Ok(outcomes)
}

/// Render `m` with fixed width 4 and precision 2.
pub(crate) fn write_matrix(f: &mut fmt::Formatter<'_>, m: &Array2<f64>) -> fmt::Result {
    for row in m.rows() {
        let cells: Vec<String> = row.iter().map(|x| format!("{:>4.2}", x)).collect();
        writeln!(f, " {}", cells.join(" "))?;
    }
    Ok(())
}

/// A container of labelled operations sharing one parameter vector.
#[derive(Debug, Clone)]
pub struct Instrument {
    id: MemberId,
    dim: usize,
    evotype: EvoType,
    elements: Vec<(String, Operation)>,
    paramvec: Array1<f64>,
    paramlbls: Vec<String>,
    binding: Binding,
    dirty: bool,
    clean_tolerance: f64,
}

impl Instrument {
    /// Build from an ordered list of elements, allocating fresh slices.
    pub fn new<S, E>(elements: impl IntoIterator<Item = (S, E)>) -> Result<Self>
    where
        S: Into<String>,
        E: Into<InstrumentElement>,
    {
        Self::with_id(MemberId::new(), elements)
    }

    /// Build under a known identity.
    ///
    /// Elements already allocated under `id` keep their indices; the
    /// vector is grown to cover them. Any other element gets a fresh slice
    /// at the running offset.
    pub fn with_id<S, E>(id: MemberId, elements: impl IntoIterator<Item = (S, E)>) -> Result<Self>
    where
        S: Into<String>,
        E: Into<InstrumentElement>,
    {
        let raw: Vec<(String, InstrumentElement)> = elements
            .into_iter()
            .map(|(l, e)| (l.into(), e.into()))
            .collect();

        let default_evotype = raw
            .iter()
            .find_map(|(_, e)| match e {
                InstrumentElement::Op(op) => Some(op.evotype()),
                InstrumentElement::Dense(_) => None,
            })
            .unwrap_or_default();

        let mut ops = Vec::with_capacity(raw.len());
        for (label, element) in raw {
            let op = match element {
                InstrumentElement::Dense(m) => Operation::full(m, default_evotype)?,
                InstrumentElement::Op(op) => op,
            };
            ops.push((label, op));
        }

        let (dim, evotype) = common_dim_evotype(ops.iter().map(|(_, op)| (op.dim(), op.evotype())))?
            .unwrap_or((0, EvoType::DensityMx));

        let mut instrument = Self {
            id,
            dim,
            evotype,
            elements: ops,
            paramvec: Array1::zeros(0),
            paramlbls: Vec::new(),
            binding: Binding::default(),
            dirty: false,
            clean_tolerance: DEFAULT_CLEAN_TOLERANCE,
        };
        instrument.build_paramvec();
        debug!(
            instrument = %instrument.id,
            elements = instrument.elements.len(),
            num_params = instrument.paramvec.len(),
            "Built instrument parameter vector"
        );
        Ok(instrument)
    }

    pub fn with_clean_tolerance(mut self, tolerance: f64) -> Self {
        self.clean_tolerance = tolerance;
        self
    }

    fn build_paramvec(&mut self) {
        let mut v: Vec<f64> = Vec::new();
        let mut labels: Vec<String> = Vec::new();
        // which entries of `v` hold a value already
        let mut filled: Vec<bool> = Vec::new();
        let mut off = 0;

        for (lbl, op) in self.elements.iter_mut() {
            let owned = op
                .gpindices()
                .filter(|_| op.binding().is_owned_by(self.id));
            match owned {
                Some(range) => {
                    if range.is_empty() {
                        continue;
                    }
                    let max = range.end - 1;
                    if max >= v.len() {
                        v.resize(max + 1, 0.0);
                        labels.resize(max + 1, String::new());
                        filled.resize(max + 1, false);
                    }
                    let w = op.to_vector();
                    let plbls = op.parameter_labels();
                    for (i, idx) in range.clone().enumerate() {
                        if filled[idx] {
                            continue;
                        }
                        if let (Some(&x), Some(p)) = (w.get(i), plbls.get(i)) {
                            v[idx] = x;
                            labels[idx] = format!("{}: {}", lbl, p);
                            filled[idx] = true;
                        }
                    }
                    off = off.max(max + 1);
                }
                None => {
                    let w = op.to_vector();
                    let k = w.len();
                    let at = off.min(v.len());
                    v.splice(at..at, w.iter().cloned());
                    labels.splice(
                        at..at,
                        op.parameter_labels()
                            .into_iter()
                            .map(|p| format!("{}: {}", lbl, p)),
                    );
                    filled.splice(at..at, std::iter::repeat(true).take(k));
                    op.allocate_gpindices(off, self.id);
                    off += k;
                }
            }
        }

        self.paramvec = Array1::from(v);
        self.paramlbls = labels;
    }

    pub fn id(&self) -> MemberId {
        self.id
    }

    /// Copy of the cached vector with every dirty element's current values.
    fn reconciled(&self) -> Array1<f64> {
        let mut v = self.paramvec.clone();
        for (_, op) in &self.elements {
            if !op.is_dirty() {
                continue;
            }
            if let Some(range) = op.gpindices() {
                let w = op.to_vector();
                let mut slot = v.slice_mut(s![range]);
                let diff = norm_diff(slot.view(), &w);
                if !diff.is_finite() || diff > self.clean_tolerance {
                    slot.assign(&w);
                }
            }
        }
        v
    }

    pub fn get(&self, key: &str) -> Option<&Operation> {
        self.elements.iter().find(|(l, _)| l == key).map(|(_, op)| op)
    }

    /// Mutable access to an element's value. Changing it through
    /// `set_dense` marks the element, and so the instrument, dirty.
    pub fn element_mut(&mut self, key: &str) -> Option<&mut Operation> {
        self.elements
            .iter_mut()
            .find(|(l, _)| l == key)
            .map(|(_, op)| op)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&str, &Operation)> {
        self.elements.iter().map(|(l, op)| (l.as_str(), op))
    }

    pub fn keys(&self) -> Vec<String> {
        self.elements.iter().map(|(l, _)| l.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Total number of matrix entries over all elements.
    pub fn num_elements(&self) -> usize {
        self.elements.iter().map(|(_, op)| op.size()).sum()
    }

    /// Elements cannot be added or replaced once built.
    pub fn set_item(&mut self, key: &str, _element: impl Into<InstrumentElement>) -> Result<()> {
        Err(Error::ReadOnly(format!(
            "Cannot alter Instrument elements (tried to set '{}')",
            key
        )))
    }

    /// Apply `f` to a copy of every element, then commit all of them and
    /// re-synchronize the cached slices. Nothing changes on error.
    fn transform_elements(&mut self, f: impl Fn(&mut Operation) -> Result<()>) -> Result<()> {
        let mut updated = self.elements.clone();
        for (_, op) in updated.iter_mut() {
            f(op)?;
        }
        self.elements = updated;
        for (_, op) in self.elements.iter_mut() {
            if let Some(range) = op.gpindices() {
                self.paramvec.slice_mut(s![range]).assign(&op.to_vector());
            }
            op.set_dirty(false);
        }
        self.dirty = true;
        Ok(())
    }

    /// `Mi -> S⁻¹ Mi S` for every element.
    pub fn transform_inplace(&mut self, s: &GaugeGroupElement) -> Result<()> {
        self.transform_elements(|op| op.transform_inplace(s))
    }

    pub fn depolarize(&mut self, amount: &DepolarizeAmount) -> Result<()> {
        self.transform_elements(|op| op.depolarize(amount))
    }

    pub fn rotate(&mut self, amount: &[f64], mx_basis: BasisName) -> Result<()> {
        self.transform_elements(|op| op.rotate(amount, mx_basis))
    }

    /// Outcome probabilities and post-measurement states for `state`.
    pub fn acton(&self, state: &StatePrep) -> Result<Vec<(String, InstrumentOutcome)>> {
        apply_elements(
            self.evotype,
            self.elements.iter().map(|(l, op)| (l.clone(), op.dense().clone())),
            state,
        )
    }

    /// Copies of the elements keyed `prefix_<element>`, with parameter
    /// ranges composed into the instrument's own range.
    pub fn simplify_operations(&self, prefix: &Label) -> Vec<(Label, Operation)> {
        self.elements
            .iter()
            .map(|(key, op)| {
                let mut copy = op.clone();
                if let (Some(outer), Some(inner)) = (self.gpindices(), op.gpindices()) {
                    if let Some(parent) = self.parent() {
                        copy.set_gpindices(compose_gpindices(&outer, &inner), parent);
                    }
                }
                (prefix.element(key), copy)
            })
            .collect()
    }
}

impl ModelMember for Instrument {
    fn dim(&self) -> usize {
        self.dim
    }

    fn evotype(&self) -> EvoType {
        self.evotype
    }

    fn num_params(&self) -> usize {
        self.paramvec.len()
    }

    fn to_vector(&self) -> Array1<f64> {
        self.reconciled()
    }

    fn from_vector(&mut self, v: ArrayView1<'_, f64>) -> Result<()> {
        check_len(self.num_params(), &v)?;
        self.clean_paramvec();
        for (_, op) in self.elements.iter_mut() {
            if let Some(range) = op.gpindices() {
                op.from_vector(v.slice(s![range]))?;
            }
        }
        self.paramvec.assign(&v);
        self.dirty = false;
        Ok(())
    }

    fn parameter_labels(&self) -> Vec<String> {
        self.paramlbls.clone()
    }

    fn binding(&self) -> &Binding {
        &self.binding
    }

    fn binding_mut(&mut self) -> &mut Binding {
        &mut self.binding
    }

    /// Dirty when flagged directly or when any element is.
    fn is_dirty(&self) -> bool {
        self.dirty || self.elements.iter().any(|(_, op)| op.is_dirty())
    }

    fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    fn clean_paramvec(&mut self) {
        if !self.is_dirty() {
            return;
        }
        let mut updated = 0;
        for (_, op) in self.elements.iter_mut() {
            op.clean_paramvec();
            if op.is_dirty() {
                if let Some(range) = op.gpindices() {
                    let w = op.to_vector();
                    let mut slot = self.paramvec.slice_mut(s![range]);
                    let diff = norm_diff(slot.view(), &w);
                    if !diff.is_finite() || diff > self.clean_tolerance {
                        slot.assign(&w);
                        updated += 1;
                    }
                }
                op.set_dirty(false);
            }
        }
        for (label, op) in self.elements.iter_mut() {
            if let Some(range) = op.gpindices() {
                if let Err(e) = op.from_vector(self.paramvec.slice(s![range])) {
                    warn!(element = %label, error = %e, "Failed to re-sync instrument element");
                }
            }
        }
        self.dirty = false;
        debug!(instrument = %self.id, updated, "Cleaned instrument parameter vector");
    }
}

impl Torchable for Instrument {
    fn member_type(&self) -> MemberType {
        MemberType::Instrument
    }

    fn stateless_data(&self) -> StatelessData {
        StatelessData::Instrument {
            elements: self
                .elements
                .iter()
                .map(|(l, op)| (l.clone(), op.gpindices().unwrap_or(0..0), op.stateless_data()))
                .collect(),
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Instrument with elements:")?;
        for (label, op) in &self.elements {
            writeln!(f, "{}:", label)?;
            write_matrix(f, op.dense())?;
        }
        Ok(())
    }
}

/// An instrument as stored in a model.
#[derive(Debug, Clone)]
pub enum ModelInstrument {
    Plain(Instrument),
    Tp(TPInstrument),
}

delegate_member!(ModelInstrument { Plain, Tp });

impl From<Instrument> for ModelInstrument {
    fn from(i: Instrument) -> Self {
        ModelInstrument::Plain(i)
    }
}

impl From<TPInstrument> for ModelInstrument {
    fn from(i: TPInstrument) -> Self {
        ModelInstrument::Tp(i)
    }
}

impl Torchable for ModelInstrument {
    fn member_type(&self) -> MemberType {
        match self {
            ModelInstrument::Plain(i) => i.member_type(),
            ModelInstrument::Tp(i) => i.member_type(),
        }
    }

    fn stateless_data(&self) -> StatelessData {
        match self {
            ModelInstrument::Plain(i) => i.stateless_data(),
            ModelInstrument::Tp(i) => i.stateless_data(),
        }
    }
}

impl ModelInstrument {
    pub fn keys(&self) -> Vec<String> {
        match self {
            ModelInstrument::Plain(i) => i.keys(),
            ModelInstrument::Tp(i) => i.keys(),
        }
    }

    /// Dense matrix of element `key`.
    pub fn element_dense(&self, key: &str) -> Option<Array2<f64>> {
        match self {
            ModelInstrument::Plain(i) => i.get(key).map(|op| op.dense().clone()),
            ModelInstrument::Tp(i) => i.get(key).map(|op| op.to_dense()),
        }
    }

    pub fn acton(&self, state: &StatePrep) -> Result<Vec<(String, InstrumentOutcome)>> {
        match self {
            ModelInstrument::Plain(i) => i.acton(state),
            ModelInstrument::Tp(i) => i.acton(state),
        }
    }

    pub fn transform_inplace(&mut self, s: &GaugeGroupElement) -> Result<()> {
        match self {
            ModelInstrument::Plain(i) => i.transform_inplace(s),
            ModelInstrument::Tp(i) => i.transform_inplace(s),
        }
    }

    pub fn depolarize(&mut self, amount: &DepolarizeAmount) -> Result<()> {
        match self {
            ModelInstrument::Plain(i) => i.depolarize(amount),
            ModelInstrument::Tp(i) => i.depolarize(amount),
        }
    }

    pub fn rotate(&mut self, amount: &[f64], mx_basis: BasisName) -> Result<()> {
        match self {
            ModelInstrument::Plain(i) => i.rotate(amount, mx_basis),
            ModelInstrument::Tp(i) => i.rotate(amount, mx_basis),
        }
    }
}

impl fmt::Display for ModelInstrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelInstrument::Plain(i) => fmt::Display::fmt(i, f),
            ModelInstrument::Tp(i) => fmt::Display::fmt(i, f),
        }
    }
}

/// Re-parameterize an instrument.
///
/// `"TP"` yields a [`TPInstrument`] over the same element matrices;
/// `"full"` and `"static"` yield an [`Instrument`] whose elements are
/// converted one by one.
pub fn convert(instrument: &ModelInstrument, to_type: &str) -> Result<ModelInstrument> {
    let (evotype, dense): (EvoType, Vec<(String, Array2<f64>)>) = match instrument {
        ModelInstrument::Plain(i) => (
            i.evotype(),
            i.iter().map(|(l, op)| (l.to_string(), op.dense().clone())).collect(),
        ),
        ModelInstrument::Tp(i) => (
            i.evotype(),
            i.iter().map(|(l, op)| (l.to_string(), op.to_dense())).collect(),
        ),
    };

    match to_type {
        "TP" => Ok(TPInstrument::new(dense, evotype)?.into()),
        "full" | "static" => {
            let mut ops = Vec::with_capacity(dense.len());
            for (label, m) in dense {
                let op = if to_type == "full" {
                    Operation::full(m, evotype)?
                } else {
                    Operation::static_op(m, evotype)?
                };
                ops.push((label, op));
            }
            Ok(Instrument::new(ops)?.into())
        }
        other => Err(Error::Conversion(format!(
            "Cannot convert an instrument to type '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::DepolarizeAmount;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn z_elements() -> Vec<(&'static str, Array2<f64>)> {
        let h = 0.5;
        vec![
            (
                "p0",
                array![[h, 0.0, 0.0, h], [0.0, 0.0, 0.0, 0.0], [0.0, 0.0, 0.0, 0.0], [h, 0.0, 0.0, h]],
            ),
            (
                "p1",
                array![[h, 0.0, 0.0, -h], [0.0, 0.0, 0.0, 0.0], [0.0, 0.0, 0.0, 0.0], [-h, 0.0, 0.0, h]],
            ),
        ]
    }

    fn z_instrument() -> Instrument {
        Instrument::new(z_elements()).unwrap()
    }

    #[test]
    fn test_num_params_is_sum_of_elements() {
        let inst = z_instrument();
        assert_eq!(inst.num_params(), 32);
        assert_eq!(inst.parameter_labels().len(), 32);
        assert_eq!(inst.parameter_labels()[16], "p1: MxElement 0,0");
        assert_eq!(inst.num_elements(), 32);
    }

    #[test]
    fn test_element_ranges_are_disjoint_and_contiguous() {
        let inst = z_instrument();
        let ranges: Vec<_> = inst.iter().map(|(_, op)| op.gpindices().unwrap()).collect();
        assert_eq!(ranges, vec![0..16, 16..32]);
        for (_, op) in inst.iter() {
            assert!(op.binding().is_owned_by(inst.id()));
        }
    }

    #[test]
    fn test_mixed_element_types() {
        let tp = Operation::tp(Array2::eye(4), EvoType::DensityMx).unwrap();
        let fixed = Operation::static_op(Array2::eye(4), EvoType::DensityMx).unwrap();
        let inst = Instrument::new(vec![
            ("a", InstrumentElement::Op(tp)),
            ("b", InstrumentElement::Op(fixed)),
            ("c", InstrumentElement::Dense(Array2::eye(4))),
        ])
        .unwrap();
        assert_eq!(inst.num_params(), 12 + 16);
        assert_eq!(inst.get("b").unwrap().gpindices(), Some(12..12));
        assert_eq!(inst.get("c").unwrap().gpindices(), Some(12..28));
    }

    #[test]
    fn test_mismatched_dims_rejected() {
        let result = Instrument::new(vec![("a", Array2::<f64>::eye(4)), ("b", Array2::eye(16))]);
        assert!(matches!(
            result,
            Err(Error::Structure(StructureError::DimensionMismatch { .. }))
        ));
    }

    #[test]
    fn test_mismatched_evotypes_rejected() {
        let a = Operation::full(Array2::eye(4), EvoType::DensityMx).unwrap();
        let b = Operation::full(Array2::eye(4), EvoType::StateVec).unwrap();
        let result = Instrument::new(vec![("a", a), ("b", b)]);
        assert!(matches!(
            result,
            Err(Error::Structure(StructureError::EvotypeMismatch { .. }))
        ));
    }

    #[test]
    fn test_empty_instrument_defaults() {
        let inst = Instrument::new(Vec::<(String, Array2<f64>)>::new()).unwrap();
        assert_eq!(inst.evotype(), EvoType::DensityMx);
        assert_eq!(inst.num_params(), 0);
        assert!(inst.is_empty());
    }

    #[test]
    fn test_rebuild_with_owned_elements_keeps_indices() {
        let inst = z_instrument();
        let id = inst.id();
        let ops: Vec<(String, Operation)> = inst
            .iter()
            .rev()
            .map(|(l, op)| (l.to_string(), op.clone()))
            .collect();
        let rebuilt = Instrument::with_id(id, ops).unwrap();
        assert_eq!(rebuilt.get("p0").unwrap().gpindices(), Some(0..16));
        assert_eq!(rebuilt.get("p1").unwrap().gpindices(), Some(16..32));
        assert_eq!(rebuilt.to_vector(), inst.to_vector());
        assert_eq!(rebuilt.parameter_labels()[0], "p0: MxElement 0,0");
    }

    #[test]
    fn test_foreign_elements_get_fresh_slices() {
        let first = z_instrument();
        let ops: Vec<(String, Operation)> = first
            .iter()
            .map(|(l, op)| (l.to_string(), op.clone()))
            .collect();
        let second = Instrument::new(ops).unwrap();
        for (_, op) in second.iter() {
            assert!(op.binding().is_owned_by(second.id()));
        }
        assert_eq!(second.num_params(), 32);
    }

    #[test]
    fn test_roundtrip_is_noop() {
        let mut inst = z_instrument();
        let before = inst.to_vector();
        inst.from_vector(before.view()).unwrap();
        assert_eq!(inst.to_vector(), before);
    }

    #[test]
    fn test_from_vector_distributes_slices() {
        let mut inst = z_instrument();
        let v = Array1::from_iter((0..32).map(|i| i as f64));
        inst.from_vector(v.view()).unwrap();
        assert_abs_diff_eq!(inst.get("p1").unwrap().dense()[[0, 0]], 16.0);
        assert_abs_diff_eq!(inst.get("p0").unwrap().dense()[[3, 3]], 15.0);
    }

    #[test]
    fn test_from_vector_wrong_length_does_not_mutate() {
        let mut inst = z_instrument();
        let before = inst.to_vector();
        let err = inst.from_vector(Array1::zeros(31).view()).unwrap_err();
        assert!(matches!(
            err,
            Error::Structure(StructureError::VectorLength { expected: 32, actual: 31 })
        ));
        assert_eq!(inst.to_vector(), before);
    }

    #[test]
    fn test_dirty_element_is_reconciled() {
        let mut inst = z_instrument();
        let mut m = inst.get("p0").unwrap().dense().clone();
        m[[1, 1]] = 0.25;
        inst.element_mut("p0").unwrap().set_dense(m).unwrap();
        assert!(inst.is_dirty());

        let v = inst.to_vector();
        assert_abs_diff_eq!(v[5], 0.25);

        inst.clean_paramvec();
        assert!(!inst.is_dirty());
        let once = inst.to_vector();
        inst.clean_paramvec();
        assert_eq!(inst.to_vector(), once);
        assert_abs_diff_eq!(once[5], 0.25);
    }

    #[test]
    fn test_tiny_change_is_below_tolerance() {
        let mut inst = z_instrument();
        let mut m = inst.get("p0").unwrap().dense().clone();
        m[[1, 1]] = 1e-12;
        inst.element_mut("p0").unwrap().set_dense(m).unwrap();
        inst.clean_paramvec();
        // the cached value wins and is pushed back into the element
        assert_abs_diff_eq!(inst.get("p0").unwrap().dense()[[1, 1]], 0.0);
    }

    #[test]
    fn test_acton_diagonal_state() {
        let inst = z_instrument();
        let r = 2f64.sqrt().recip();
        // diag(0.7, 0.3)
        let state = StatePrep::full(array![r, 0.0, 0.0, 0.4 * r], EvoType::DensityMx);
        let outcomes = inst.acton(&state).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].0, "p0");
        assert_abs_diff_eq!(outcomes[0].1.probability, 0.7, epsilon = 1e-12);
        assert_abs_diff_eq!(outcomes[1].1.probability, 0.3, epsilon = 1e-12);
        let total: f64 = outcomes.iter().map(|(_, o)| o.probability).sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
        let post = outcomes[0].1.state.dense();
        assert_abs_diff_eq!(post[0], r, epsilon = 1e-12);
        assert_abs_diff_eq!(post[3], r, epsilon = 1e-12);
    }

    #[test]
    fn test_acton_zero_probability_keeps_unnormalized_state() {
        let inst = z_instrument();
        let r = 2f64.sqrt().recip();
        let state = StatePrep::full(array![r, 0.0, 0.0, r], EvoType::DensityMx);
        let outcomes = inst.acton(&state).unwrap();
        assert_eq!(outcomes[1].1.probability, 0.0);
        assert!(outcomes[1].1.state.dense().iter().all(|x| x.is_finite()));
        assert_abs_diff_eq!(outcomes[0].1.probability, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_acton_z_measurement_probabilities_sum_to_one() {
        let inst = z_instrument();
        let r = 2f64.sqrt().recip();
        // |+> state
        let state = StatePrep::full(array![r, r, 0.0, 0.0], EvoType::DensityMx);
        let outcomes = inst.acton(&state).unwrap();
        assert_abs_diff_eq!(outcomes[0].1.probability, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(outcomes[1].1.probability, 0.5, epsilon = 1e-12);
        // post-measurement |0>
        let post = outcomes[0].1.state.dense();
        assert_abs_diff_eq!(post[0], r, epsilon = 1e-12);
        assert_abs_diff_eq!(post[3], r, epsilon = 1e-12);
    }

    #[test]
    fn test_acton_other_evotype_not_implemented() {
        let a = Operation::full(Array2::eye(4), EvoType::StateVec).unwrap();
        let inst = Instrument::new(vec![("a", a)]).unwrap();
        let state = StatePrep::full(array![1.0, 0.0, 0.0, 0.0], EvoType::StateVec);
        assert!(matches!(inst.acton(&state), Err(Error::NotImplemented(_))));
    }

    #[test]
    fn test_set_item_is_read_only() {
        let mut inst = z_instrument();
        let before = inst.to_vector();
        assert!(matches!(
            inst.set_item("p2", Array2::<f64>::eye(4)),
            Err(Error::ReadOnly(_))
        ));
        assert_eq!(inst.len(), 2);
        assert_eq!(inst.to_vector(), before);
    }

    #[test]
    fn test_depolarize_resyncs_cache() {
        let mut inst = z_instrument();
        inst.depolarize(&DepolarizeAmount::Uniform(0.5)).unwrap();
        assert!(inst.is_dirty());
        let v = inst.to_vector();
        // p0 row 3 col 0 scaled by 0.5
        assert_abs_diff_eq!(v[12], 0.25, epsilon = 1e-15);
        assert_abs_diff_eq!(v[0], 0.5, epsilon = 1e-15);
    }

    #[test]
    fn test_two_level_diagonal_elements_acton() {
        let inst = Instrument::new(vec![
            ("M1", array![[1.0, 0.0], [0.0, 0.0]]),
            ("M2", array![[0.0, 0.0], [0.0, 1.0]]),
        ])
        .unwrap();
        let state = StatePrep::full(array![2f64.powf(-0.25), 0.3], EvoType::DensityMx);
        let outcomes = inst.acton(&state).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_abs_diff_eq!(outcomes[0].1.probability, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(outcomes[1].1.probability, 0.0, epsilon = 1e-12);
        let total: f64 = outcomes.iter().map(|(_, o)| o.probability).sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_acton_dimension_mismatch() {
        let inst = z_instrument();
        let state = StatePrep::full(array![1.0, 0.0], EvoType::DensityMx);
        assert!(matches!(
            inst.acton(&state),
            Err(Error::Structure(StructureError::DimensionMismatch { .. }))
        ));
    }

    #[test]
    fn test_rotate_by_pi_about_x_resyncs_cache() {
        let mut inst = z_instrument();
        inst.rotate(&[std::f64::consts::PI, 0.0, 0.0], BasisName::Pp).unwrap();
        assert!(inst.is_dirty());
        let v = inst.to_vector();
        for ((_, m), (_, op)) in z_elements().iter().zip(inst.iter()) {
            let expected = crate::test_utils::x_gate().dot(m);
            for (a, b) in op.dense().iter().zip(expected.iter()) {
                assert_abs_diff_eq!(a, b, epsilon = 1e-12);
            }
            let range = op.gpindices().unwrap();
            assert_eq!(v.slice(s![range]).to_owned(), op.to_vector());
        }
        // p0 row 3 flips sign
        assert_abs_diff_eq!(v[12], -0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_gauge_transform_resyncs_cache() {
        let s_mx = array![
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.1, 0.1, 0.0],
            [0.0, 0.0, 0.9, 0.0],
            [0.05, 0.0, 0.0, 1.0]
        ];
        let gauge = GaugeGroupElement::new(s_mx).unwrap();
        let mut inst = z_instrument();
        inst.transform_inplace(&gauge).unwrap();
        assert!(inst.is_dirty());
        let v = inst.to_vector();
        for ((_, m), (_, op)) in z_elements().iter().zip(inst.iter()) {
            let expected = gauge.transform_matrix(m).unwrap();
            for (a, b) in op.dense().iter().zip(expected.iter()) {
                assert_abs_diff_eq!(a, b, epsilon = 1e-12);
            }
            let range = op.gpindices().unwrap();
            assert_eq!(v.slice(s![range]).to_owned(), op.to_vector());
        }
    }

    #[test]
    fn test_tighter_clean_tolerance_keeps_tiny_change() {
        let mut inst = z_instrument().with_clean_tolerance(1e-15);
        let mut m = inst.get("p0").unwrap().dense().clone();
        m[[1, 1]] = 1e-12;
        inst.element_mut("p0").unwrap().set_dense(m).unwrap();
        inst.clean_paramvec();
        assert_abs_diff_eq!(inst.get("p0").unwrap().dense()[[1, 1]], 1e-12);
        assert_abs_diff_eq!(inst.to_vector()[5], 1e-12);
    }

    #[test]
    fn test_transform_with_static_element_is_atomic() {
        let fixed = Operation::static_op(Array2::eye(4), EvoType::DensityMx).unwrap();
        let free = Operation::full(Array2::eye(4), EvoType::DensityMx).unwrap();
        let mut inst = Instrument::new(vec![("a", free), ("b", fixed)]).unwrap();
        let before = inst.to_vector();
        assert!(inst.depolarize(&DepolarizeAmount::Uniform(0.1)).is_err());
        assert_eq!(inst.to_vector(), before);
        assert!(!inst.is_dirty());
    }

    #[test]
    fn test_simplify_operations_composes_ranges() {
        let mut inst = z_instrument();
        let model = MemberId::new();
        inst.allocate_gpindices(10, model);
        let simplified = inst.simplify_operations(&Label::new("Iz"));
        assert_eq!(simplified[0].0, Label::new("Iz_p0"));
        assert_eq!(simplified[1].1.gpindices(), Some(26..42));
        assert_eq!(simplified[1].1.parent(), Some(model));
    }

    #[test]
    fn test_convert() {
        let inst = ModelInstrument::from(z_instrument());
        let tp = convert(&inst, "TP").unwrap();
        assert_eq!(tp.member_type(), MemberType::TpInstrument);
        assert_eq!(tp.keys(), vec!["p0", "p1"]);
        for key in ["p0", "p1"] {
            let a = inst.element_dense(key).unwrap();
            let b = tp.element_dense(key).unwrap();
            for (x, y) in a.iter().zip(b.iter()) {
                assert_abs_diff_eq!(x, y, epsilon = 1e-12);
            }
        }

        let fixed = convert(&tp, "static").unwrap();
        assert_eq!(fixed.num_params(), 0);
        assert_eq!(convert(&fixed, "full").unwrap().num_params(), 32);
        assert!(matches!(convert(&inst, "CPTP"), Err(Error::Conversion(_))));
    }

    #[test]
    fn test_display_lists_elements() {
        let text = z_instrument().to_string();
        assert!(text.starts_with("Instrument with elements:\n"));
        assert!(text.contains("p1:\n"));
        assert!(text.contains("0.50"));
    }
}
