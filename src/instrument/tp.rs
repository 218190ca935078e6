// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Trace-preserving instruments.
//!
//! The parameters are those of the TP sum `MT = Σ Mi` plus one full
//! difference `Di = Mi - MT` for every element but the last. Elements are
//! never stored; each one is derived from the parameter operations when
//! asked for:
//!
//! ```text
//! Mi = Di + MT                  (i < n-1)
//! Mn = -((n-2)·MT + Σ Di)
//! ```
//!
//! so `Σ Mi = MT` holds for every parameter vector.

use std::fmt;

use ndarray::{s, Array1, Array2, ArrayView1};
use tracing::debug;

use super::{apply_elements, write_matrix, InstrumentOutcome};
use crate::basis::{BasisName, DepolarizeAmount, GaugeGroupElement};
use crate::error::{Error, Result, StructureError};
use crate::label::Label;
use crate::modelmember::{
    check_len, compose_gpindices, Binding, EvoType, MemberId, ModelMember, Operation, StatePrep,
};
use crate::torchable::{MemberType, StatelessData, Torchable};

/// Dense matrix of element `index` derived from `param_ops`.
fn derive_element(param_ops: &[Operation], index: usize) -> Array2<f64> {
    let (mt, diffs) = match param_ops.split_first() {
        Some(split) => split,
        None => return Array2::zeros((0, 0)),
    };
    let mt = mt.dense();
    match diffs.get(index) {
        Some(d) => d.dense() + mt,
        None => {
            let n = param_ops.len();
            let mut acc = mt * (n as f64 - 2.0);
            for d in diffs {
                acc += d.dense();
            }
            -acc
        }
    }
}

/// A derived, non-owning view of one TP instrument element.
#[derive(Debug, Clone, Copy)]
pub struct TPInstrumentOp<'a> {
    param_ops: &'a [Operation],
    index: usize,
}

impl<'a> TPInstrumentOp<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn dim(&self) -> usize {
        self.param_ops.first().map_or(0, |op| op.dim())
    }

    /// Every element depends on the TP sum, so on all parameters
    /// of the last one.
    pub fn num_params(&self) -> usize {
        self.param_ops.iter().map(|op| op.num_params()).sum()
    }

    /// Recomputed from the parameter operations on every call.
    pub fn to_dense(&self) -> Array2<f64> {
        derive_element(self.param_ops, self.index)
    }
}

/// A trace-preserving instrument.
#[derive(Debug, Clone)]
pub struct TPInstrument {
    id: MemberId,
    dim: usize,
    evotype: EvoType,
    param_ops: Vec<Operation>,
    element_labels: Vec<String>,
    binding: Binding,
    dirty: bool,
}

impl TPInstrument {
    /// Build from the element matrices; their sum must be trace preserving.
    pub fn new<S: Into<String>>(
        elements: impl IntoIterator<Item = (S, Array2<f64>)>,
        evotype: EvoType,
    ) -> Result<Self> {
        let (element_labels, matrices): (Vec<String>, Vec<Array2<f64>>) = elements
            .into_iter()
            .map(|(l, m)| (l.into(), m))
            .unzip();

        let dim = matrices
            .first()
            .map(|m| m.nrows())
            .ok_or_else(|| StructureError::Shape("TP instrument needs at least one element".into()))?;
        for m in &matrices {
            if m.dim() != (dim, dim) {
                return Err(StructureError::DimensionMismatch {
                    expected: dim,
                    actual: if m.nrows() != dim { m.nrows() } else { m.ncols() },
                }
                .into());
            }
        }

        let total = matrices
            .iter()
            .fold(Array2::<f64>::zeros((dim, dim)), |acc, m| acc + m);
        let mt = Operation::tp(total, evotype)?;
        let mut param_ops = Vec::with_capacity(matrices.len());
        for m in matrices.iter().take(matrices.len() - 1) {
            param_ops.push(Operation::full(m - mt.dense(), evotype)?);
        }
        param_ops.insert(0, mt);

        let id = MemberId::new();
        let mut off = 0;
        for op in param_ops.iter_mut() {
            off += op.allocate_gpindices(off, id);
        }
        debug!(
            instrument = %id,
            elements = element_labels.len(),
            num_params = off,
            "Built TP instrument parameter vector"
        );

        Ok(Self {
            id,
            dim,
            evotype,
            param_ops,
            element_labels,
            binding: Binding::default(),
            dirty: false,
        })
    }

    pub fn id(&self) -> MemberId {
        self.id
    }

    /// The TP sum followed by the differences.
    pub fn param_ops(&self) -> &[Operation] {
        &self.param_ops
    }

    pub fn get(&self, key: &str) -> Option<TPInstrumentOp<'_>> {
        self.element_labels
            .iter()
            .position(|l| l == key)
            .map(|index| TPInstrumentOp {
                param_ops: &self.param_ops,
                index,
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, TPInstrumentOp<'_>)> {
        self.element_labels.iter().enumerate().map(move |(index, l)| {
            (
                l.as_str(),
                TPInstrumentOp {
                    param_ops: &self.param_ops,
                    index,
                },
            )
        })
    }

    pub fn keys(&self) -> Vec<String> {
        self.element_labels.clone()
    }

    pub fn len(&self) -> usize {
        self.element_labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.element_labels.is_empty()
    }

    /// Total number of matrix entries over all elements.
    pub fn num_elements(&self) -> usize {
        self.len() * self.dim * self.dim
    }

    pub fn set_item(&mut self, key: &str, _element: Array2<f64>) -> Result<()> {
        Err(Error::ReadOnly(format!(
            "Cannot alter TPInstrument elements (tried to set '{}')",
            key
        )))
    }

    fn transform_param_ops(&mut self, f: impl Fn(&mut Operation) -> Result<()>) -> Result<()> {
        let mut updated = self.param_ops.clone();
        for op in updated.iter_mut() {
            f(op)?;
        }
        for op in updated.iter_mut() {
            op.set_dirty(false);
        }
        self.param_ops = updated;
        self.dirty = true;
        Ok(())
    }

    pub fn transform_inplace(&mut self, s: &GaugeGroupElement) -> Result<()> {
        self.transform_param_ops(|op| op.transform_inplace(s))
    }

    pub fn depolarize(&mut self, amount: &DepolarizeAmount) -> Result<()> {
        self.transform_param_ops(|op| op.depolarize(amount))
    }

    pub fn rotate(&mut self, amount: &[f64], mx_basis: BasisName) -> Result<()> {
        self.transform_param_ops(|op| op.rotate(amount, mx_basis))
    }

    pub fn acton(&self, state: &StatePrep) -> Result<Vec<(String, InstrumentOutcome)>> {
        apply_elements(
            self.evotype,
            self.iter().map(|(l, op)| (l.to_string(), op.to_dense())),
            state,
        )
    }

    /// Copies of the parameter operations with ranges composed into the
    /// instrument's own range, plus element labels `prefix_<element>`.
    pub fn simplify_operations(&self, prefix: &Label) -> SimplifiedTPInstrument {
        let param_ops = self
            .param_ops
            .iter()
            .map(|op| {
                let mut copy = op.clone();
                if let (Some(outer), Some(inner), Some(parent)) =
                    (self.gpindices(), op.gpindices(), self.parent())
                {
                    copy.set_gpindices(compose_gpindices(&outer, &inner), parent);
                }
                copy
            })
            .collect();
        SimplifiedTPInstrument {
            param_ops,
            elements: self.element_labels.iter().map(|k| prefix.element(k)).collect(),
        }
    }
}

/// Model-level view of a TP instrument's elements.
#[derive(Debug, Clone)]
pub struct SimplifiedTPInstrument {
    pub param_ops: Vec<Operation>,
    pub elements: Vec<Label>,
}

impl SimplifiedTPInstrument {
    pub fn iter(&self) -> impl Iterator<Item = (&Label, TPInstrumentOp<'_>)> {
        self.elements.iter().enumerate().map(move |(index, l)| {
            (
                l,
                TPInstrumentOp {
                    param_ops: &self.param_ops,
                    index,
                },
            )
        })
    }
}

impl ModelMember for TPInstrument {
    fn dim(&self) -> usize {
        self.dim
    }

    fn evotype(&self) -> EvoType {
        self.evotype
    }

    fn num_params(&self) -> usize {
        self.param_ops.iter().map(|op| op.num_params()).sum()
    }

    fn to_vector(&self) -> Array1<f64> {
        self.param_ops
            .iter()
            .flat_map(|op| op.to_vector().into_iter())
            .collect()
    }

    fn from_vector(&mut self, v: ArrayView1<'_, f64>) -> Result<()> {
        check_len(self.num_params(), &v)?;
        for op in self.param_ops.iter_mut() {
            if let Some(range) = op.gpindices() {
                op.from_vector(v.slice(s![range]))?;
            }
        }
        self.dirty = false;
        Ok(())
    }

    fn parameter_labels(&self) -> Vec<String> {
        let mut labels = Vec::with_capacity(self.num_params());
        for (i, op) in self.param_ops.iter().enumerate() {
            let name = match i {
                0 => "TP sum".to_string(),
                _ => format!("{} - TP sum", self.element_labels[i - 1]),
            };
            labels.extend(
                op.parameter_labels()
                    .into_iter()
                    .map(|p| format!("{}: {}", name, p)),
            );
        }
        labels
    }

    fn binding(&self) -> &Binding {
        &self.binding
    }

    fn binding_mut(&mut self) -> &mut Binding {
        &mut self.binding
    }

    fn is_dirty(&self) -> bool {
        self.dirty || self.param_ops.iter().any(|op| op.is_dirty())
    }

    fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    /// The vector is always read from the parameter operations, so cleaning
    /// only clears the dirty bits.
    fn clean_paramvec(&mut self) {
        for op in self.param_ops.iter_mut() {
            op.clean_paramvec();
            op.set_dirty(false);
        }
        self.dirty = false;
    }
}

impl Torchable for TPInstrument {
    fn member_type(&self) -> MemberType {
        MemberType::TpInstrument
    }

    fn stateless_data(&self) -> StatelessData {
        StatelessData::TpInstrument {
            dim: self.dim,
            element_labels: self.element_labels.clone(),
            param_ranges: self
                .param_ops
                .iter()
                .map(|op| op.gpindices().unwrap_or(0..0))
                .collect(),
        }
    }
}

impl fmt::Display for TPInstrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "TPInstrument with elements:")?;
        for (label, op) in self.iter() {
            writeln!(f, "{}:", label)?;
            write_matrix(f, &op.to_dense())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;
    use crate::torchable::TorchBase;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn projectors() -> Vec<(&'static str, Array2<f64>)> {
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

    fn three_outcome() -> TPInstrument {
        let mut els = projectors();
        let (_, p1) = els.pop().unwrap();
        els.push(("a", &p1 * 0.5));
        els.push(("b", &p1 * 0.5));
        TPInstrument::new(els, EvoType::DensityMx).unwrap()
    }

    fn assert_close(a: &Array2<f64>, b: &Array2<f64>) {
        assert_eq!(a.dim(), b.dim());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-12);
        }
    }

    fn sum_of_elements(inst: &TPInstrument) -> Array2<f64> {
        inst.iter()
            .fold(Array2::zeros((4, 4)), |acc, (_, op)| acc + op.to_dense())
    }

    #[test]
    fn test_elements_reproduce_inputs() {
        let inst = TPInstrument::new(projectors(), EvoType::DensityMx).unwrap();
        for (label, m) in projectors() {
            assert_close(&inst.get(label).unwrap().to_dense(), &m);
        }
        assert_eq!(inst.num_params(), 12 + 16);
        assert_eq!(inst.param_ops()[0].kind(), "TP");
        assert_eq!(inst.param_ops()[1].gpindices(), Some(12..28));
    }

    #[test]
    fn test_sum_is_tp_total_after_from_vector() {
        let mut inst = three_outcome();
        assert_eq!(inst.num_params(), 12 + 2 * 16);
        let v = Array1::from_iter((0..inst.num_params()).map(|i| (i as f64 * 0.37).sin()));
        inst.from_vector(v.view()).unwrap();
        assert_close(&sum_of_elements(&inst), inst.param_ops()[0].dense());
        assert_eq!(inst.to_vector(), v);
    }

    #[test]
    fn test_last_element_of_two_is_minus_difference() {
        let mut inst = TPInstrument::new(projectors(), EvoType::DensityMx).unwrap();
        let v = Array1::from_iter((0..28).map(|i| i as f64 / 10.0));
        inst.from_vector(v.view()).unwrap();
        let d1 = inst.param_ops()[1].dense().clone();
        assert_eq!(inst.get("p1").unwrap().to_dense(), -d1);
    }

    #[test]
    fn test_non_tp_sum_rejected() {
        let els = vec![("a", Array2::<f64>::eye(4)), ("b", Array2::eye(4))];
        assert!(matches!(
            TPInstrument::new(els, EvoType::DensityMx),
            Err(Error::Structure(StructureError::TraceConstraint(_)))
        ));
    }

    #[test]
    fn test_empty_rejected() {
        assert!(TPInstrument::new(Vec::<(String, Array2<f64>)>::new(), EvoType::DensityMx).is_err());
    }

    #[test]
    fn test_wrong_length_leaves_state() {
        let mut inst = three_outcome();
        let before = inst.to_vector();
        assert!(inst.from_vector(Array1::zeros(3).view()).is_err());
        assert_eq!(inst.to_vector(), before);
    }

    #[test]
    fn test_acton_probabilities_sum_to_one() {
        let inst = three_outcome();
        let r = 2f64.sqrt().recip();
        let state = StatePrep::tp(array![r, 0.3 * r, 0.0, 0.2 * r], EvoType::DensityMx).unwrap();
        let outcomes = inst.acton(&state).unwrap();
        assert_eq!(outcomes.len(), 3);
        let total: f64 = outcomes.iter().map(|(_, o)| o.probability).sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(outcomes[0].1.probability, 0.6, epsilon = 1e-12);
    }

    #[test]
    fn test_depolarize_follows_elements() {
        let mut inst = three_outcome();
        let before: Vec<Array2<f64>> = inst.iter().map(|(_, op)| op.to_dense()).collect();
        inst.depolarize(&DepolarizeAmount::Uniform(0.2)).unwrap();
        assert!(inst.is_dirty());
        let d = crate::basis::depolarization_matrix(4, &DepolarizeAmount::Uniform(0.2)).unwrap();
        for ((_, op), m) in inst.iter().zip(before.iter()) {
            assert_close(&op.to_dense(), &d.dot(m));
        }
        inst.clean_paramvec();
        assert!(!inst.is_dirty());
    }

    #[test]
    fn test_sum_is_tp_total_after_gauge_and_rotation() {
        let mut inst = three_outcome();
        let gauge = GaugeGroupElement::new(array![
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.1, 0.1, 0.0],
            [0.0, 0.0, 0.9, 0.0],
            [0.05, 0.0, 0.0, 1.0]
        ])
        .unwrap();
        let before: Vec<Array2<f64>> = inst.iter().map(|(_, op)| op.to_dense()).collect();

        inst.transform_inplace(&gauge).unwrap();
        assert!(inst.is_dirty());
        for ((_, op), m) in inst.iter().zip(before.iter()) {
            assert_close(&op.to_dense(), &gauge.transform_matrix(m).unwrap());
        }
        assert_close(&sum_of_elements(&inst), inst.param_ops()[0].dense());

        inst.rotate(&[0.3, -0.2, 0.7], BasisName::Pp).unwrap();
        assert_close(&sum_of_elements(&inst), inst.param_ops()[0].dense());
        assert_eq!(inst.param_ops()[0].dense().row(0), array![1.0, 0.0, 0.0, 0.0]);

        let v = inst.to_vector();
        inst.clean_paramvec();
        assert!(!inst.is_dirty());
        assert_eq!(inst.to_vector(), v);
    }

    #[test]
    fn test_set_item_is_read_only() {
        let mut inst = three_outcome();
        assert!(matches!(
            inst.set_item("c", Array2::eye(4)),
            Err(Error::ReadOnly(_))
        ));
        assert_eq!(inst.len(), 3);
    }

    #[test]
    fn test_parameter_labels() {
        let inst = TPInstrument::new(projectors(), EvoType::DensityMx).unwrap();
        let labels = inst.parameter_labels();
        assert_eq!(labels.len(), 28);
        assert_eq!(labels[0], "TP sum: MxElement 1,0");
        assert_eq!(labels[12], "p0 - TP sum: MxElement 0,0");
    }

    #[test]
    fn test_simplify_operations() {
        let mut inst = three_outcome();
        let model = MemberId::new();
        inst.allocate_gpindices(4, model);
        let simplified = inst.simplify_operations(&Label::new("Iz"));
        assert_eq!(simplified.param_ops[1].gpindices(), Some(16..32));
        let labels: Vec<String> = simplified.iter().map(|(l, _)| l.to_string()).collect();
        assert_eq!(labels, vec!["Iz_p0", "Iz_a", "Iz_b"]);
        for ((_, a), (_, b)) in simplified.iter().zip(inst.iter()) {
            assert_close(&a.to_dense(), &b.to_dense());
        }
    }

    #[test]
    fn test_torch_base_matches_derived_elements() {
        let inst = three_outcome();
        let params = Tensor::column(inst.to_vector().view());
        let elements = match inst.torch_base(&params).unwrap() {
            TorchBase::Elements(e) => e,
            TorchBase::Single(_) => panic!("expected elements"),
        };
        assert_eq!(elements.len(), 3);
        for ((label, t), (key, op)) in elements.iter().zip(inst.iter()) {
            assert_eq!(label, key);
            assert_close(t.value(), &op.to_dense());
        }
    }
}
