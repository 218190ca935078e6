// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Circuits and their expansion into instrument-free, POVM-separated form.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StructureError};
use crate::label::{Label, Outcome};
use crate::model::ExplicitModel;

/// A sequence of layers with optional explicit preparation and measurement.
///
/// When `prep` or `povm` is omitted the model's only state preparation or
/// POVM is used.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Circuit {
    #[serde(default)]
    pub prep: Option<Label>,
    pub layers: Vec<Label>,
    #[serde(default)]
    pub povm: Option<Label>,
}

/// One instrument expansion of a circuit, with the POVM split off.
#[derive(Debug, Clone, PartialEq)]
pub struct SeparatePOVMCircuit {
    /// Preparation label first, then operation labels in application order
    pub circuit_without_povm: Vec<Label>,
    pub povm_label: Label,
    /// Selected effects, in output order
    pub effect_labels: Vec<String>,
    /// Position of each selected effect in the POVM
    pub effect_indices: Vec<usize>,
    /// Instrument element keys chosen along the circuit
    pub outcome_prefix: Vec<String>,
}

impl SeparatePOVMCircuit {
    pub fn prep_label(&self) -> Option<&Label> {
        self.circuit_without_povm.first()
    }

    pub fn op_labels(&self) -> &[Label] {
        self.circuit_without_povm.get(1..).unwrap_or(&[])
    }
}

impl Circuit {
    pub fn new<L: Into<Label>>(layers: impl IntoIterator<Item = L>) -> Self {
        Self {
            prep: None,
            layers: layers.into_iter().map(Into::into).collect(),
            povm: None,
        }
    }

    pub fn with_prep(mut self, prep: impl Into<Label>) -> Self {
        self.prep = Some(prep.into());
        self
    }

    pub fn with_povm(mut self, povm: impl Into<Label>) -> Self {
        self.povm = Some(povm.into());
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    fn resolve_prep(&self, model: &ExplicitModel) -> Result<Label> {
        match &self.prep {
            Some(l) => Ok(l.clone()),
            None => model
                .default_prep_label()
                .cloned()
                .ok_or_else(|| StructureError::UnknownLabel("default state preparation".into()).into()),
        }
    }

    fn resolve_povm(&self, model: &ExplicitModel) -> Result<Label> {
        match &self.povm {
            Some(l) => Ok(l.clone()),
            None => model
                .default_povm_label()
                .cloned()
                .ok_or_else(|| StructureError::UnknownLabel("default POVM".into()).into()),
        }
    }

    /// Replace every instrument layer by each of its elements in turn and
    /// split off the POVM.
    ///
    /// Outcomes of an expansion are the chosen element keys followed by an
    /// effect label. When `outcomes` is given only those outcomes are kept,
    /// in the requested order, and expansions with none of them are
    /// dropped.
    pub fn expand_instruments_and_separate_povm(
        &self,
        model: &ExplicitModel,
        outcomes: Option<&[Outcome]>,
    ) -> Result<Vec<(SeparatePOVMCircuit, Vec<Outcome>)>> {
        let prep = self.resolve_prep(model)?;
        let povm_label = self.resolve_povm(model)?;
        let povm_effects = model
            .povm(&povm_label)
            .ok_or_else(|| StructureError::UnknownLabel(povm_label.to_string()))?
            .effect_labels();

        let mut expansions: Vec<(Vec<Label>, Vec<String>)> = vec![(vec![prep], Vec::new())];
        for layer in &self.layers {
            if let Some(instrument) = model.instrument(layer) {
                let keys = instrument.keys();
                let mut next = Vec::with_capacity(expansions.len() * keys.len());
                for (ops, prefix) in &expansions {
                    for key in &keys {
                        let mut ops = ops.clone();
                        ops.push(layer.element(key));
                        let mut prefix = prefix.clone();
                        prefix.push(key.clone());
                        next.push((ops, prefix));
                    }
                }
                expansions = next;
            } else if model.operation(layer).is_some() {
                for (ops, _) in expansions.iter_mut() {
                    ops.push(layer.clone());
                }
            } else {
                return Err(StructureError::UnknownLabel(layer.to_string()).into());
            }
        }

        let mut out = Vec::with_capacity(expansions.len());
        for (ops, prefix) in expansions {
            let all: Vec<Outcome> = povm_effects
                .iter()
                .map(|e| Outcome::new(prefix.iter().cloned().chain(std::iter::once(e.clone()))))
                .collect();

            let effect_indices: Vec<usize> = match outcomes {
                None => (0..all.len()).collect(),
                Some(requested) => requested
                    .iter()
                    .filter_map(|o| all.iter().position(|a| a == o))
                    .collect(),
            };
            if effect_indices.is_empty() {
                continue;
            }

            let selected: Vec<Outcome> = effect_indices.iter().map(|&i| all[i].clone()).collect();
            out.push((
                SeparatePOVMCircuit {
                    circuit_without_povm: ops,
                    povm_label: povm_label.clone(),
                    effect_labels: effect_indices.iter().map(|&i| povm_effects[i].clone()).collect(),
                    effect_indices,
                    outcome_prefix: prefix,
                },
                selected,
            ));
        }
        Ok(out)
    }
}

impl fmt::Display for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prep) = &self.prep {
            write!(f, "{}", prep)?;
        }
        if self.layers.is_empty() {
            write!(f, "{{}}")?;
        }
        for layer in &self.layers {
            write!(f, "{}", layer)?;
        }
        if let Some(povm) = &self.povm {
            write!(f, "{}", povm)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::xz_model;

    #[test]
    fn test_plain_circuit_has_one_expansion() {
        let model = xz_model();
        let circuit = Circuit::new(["Gx", "Gz"]);
        let expanded = circuit.expand_instruments_and_separate_povm(&model, None).unwrap();
        assert_eq!(expanded.len(), 1);
        let (sep, outcomes) = &expanded[0];
        assert_eq!(sep.prep_label(), Some(&Label::new("rho0")));
        assert_eq!(sep.op_labels(), &[Label::new("Gx"), Label::new("Gz")]);
        assert_eq!(sep.povm_label, Label::new("Mdefault"));
        assert_eq!(outcomes, &vec![Outcome::from("0"), Outcome::from("1")]);
    }

    #[test]
    fn test_instrument_layer_expands_per_element() {
        let model = xz_model();
        let circuit = Circuit::new(["Gx", "Iz"]);
        let expanded = circuit.expand_instruments_and_separate_povm(&model, None).unwrap();
        assert_eq!(expanded.len(), 2);
        assert_eq!(expanded[1].0.op_labels()[1], Label::new("Iz_p1"));
        assert_eq!(expanded[1].0.outcome_prefix, vec!["p1".to_string()]);
        assert_eq!(expanded[1].1[0], Outcome::new(["p1", "0"]));
    }

    #[test]
    fn test_requested_outcomes_filter_and_order() {
        let model = xz_model();
        let circuit = Circuit::new(["Iz"]);
        let requested = vec![Outcome::new(["p0", "1"]), Outcome::new(["p0", "0"])];
        let expanded = circuit
            .expand_instruments_and_separate_povm(&model, Some(&requested))
            .unwrap();
        assert_eq!(expanded.len(), 1);
        let (sep, outcomes) = &expanded[0];
        assert_eq!(sep.effect_labels, vec!["1".to_string(), "0".to_string()]);
        assert_eq!(sep.effect_indices, vec![1, 0]);
        assert_eq!(outcomes, &requested);
    }

    #[test]
    fn test_unknown_layer() {
        let model = xz_model();
        let err = Circuit::new(["Gy"])
            .expand_instruments_and_separate_povm(&model, None)
            .unwrap_err();
        assert!(err.to_string().contains("Gy"));
    }

    #[test]
    fn test_display() {
        assert_eq!(Circuit::new(["Gx", "Gz"]).to_string(), "GxGz");
        assert_eq!(Circuit::new(Vec::<Label>::new()).with_povm("Mdefault").to_string(), "{}Mdefault");
    }
}
