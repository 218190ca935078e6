// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Where each circuit's outcome probabilities live in a flat output array.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::circuit::Circuit;
use crate::error::Result;
use crate::label::Outcome;
use crate::model::ExplicitModel;

/// Unique circuits, their outcomes, and the output range of each circuit.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitOutcomeLayout {
    circuits: Vec<(Circuit, Vec<Outcome>)>,
    element_indices: BTreeMap<usize, Range<usize>>,
}

fn contiguous_ranges(circuits: &[(Circuit, Vec<Outcome>)]) -> BTreeMap<usize, Range<usize>> {
    let mut indices = BTreeMap::new();
    let mut start = 0;
    for (i, (_, outcomes)) in circuits.iter().enumerate() {
        indices.insert(i, start..start + outcomes.len());
        start += outcomes.len();
    }
    indices
}

impl CircuitOutcomeLayout {
    /// Every outcome of every (deduplicated) circuit, in circuit order.
    pub fn new(model: &ExplicitModel, circuits: &[Circuit]) -> Result<Self> {
        let mut unique: Vec<(Circuit, Vec<Outcome>)> = Vec::new();
        for circuit in circuits {
            if unique.iter().any(|(c, _)| c == circuit) {
                continue;
            }
            let outcomes = circuit
                .expand_instruments_and_separate_povm(model, None)?
                .into_iter()
                .flat_map(|(_, outcomes)| outcomes)
                .collect();
            unique.push((circuit.clone(), outcomes));
        }
        Ok(Self::with_outcomes(unique))
    }

    /// Explicit outcomes per circuit. Repeated circuits are merged.
    pub fn with_outcomes(circuits: Vec<(Circuit, Vec<Outcome>)>) -> Self {
        let mut unique: Vec<(Circuit, Vec<Outcome>)> = Vec::new();
        for (circuit, outcomes) in circuits {
            match unique.iter_mut().find(|(c, _)| *c == circuit) {
                Some((_, existing)) => {
                    for o in outcomes {
                        if !existing.contains(&o) {
                            existing.push(o);
                        }
                    }
                }
                None => unique.push((circuit, outcomes)),
            }
        }
        let element_indices = contiguous_ranges(&unique);
        Self {
            circuits: unique,
            element_indices,
        }
    }

    /// Assemble a layout without any consistency checks.
    pub fn from_parts(
        circuits: Vec<(Circuit, Vec<Outcome>)>,
        element_indices: BTreeMap<usize, Range<usize>>,
    ) -> Self {
        Self {
            circuits,
            element_indices,
        }
    }

    /// `(index, circuit, outcomes)` for each unique circuit.
    pub fn iter_unique_circuits(&self) -> impl Iterator<Item = (usize, &Circuit, &[Outcome])> {
        self.circuits
            .iter()
            .enumerate()
            .map(|(i, (c, o))| (i, c, o.as_slice()))
    }

    pub fn element_indices(&self) -> &BTreeMap<usize, Range<usize>> {
        &self.element_indices
    }

    pub fn num_circuits(&self) -> usize {
        self.circuits.len()
    }

    /// Length of the flat output array.
    pub fn num_elements(&self) -> usize {
        self.element_indices.values().map(|r| r.end).max().unwrap_or(0)
    }

    /// Output range and outcomes of `circuit`, if present.
    pub fn indices_for(&self, circuit: &Circuit) -> Option<(Range<usize>, &[Outcome])> {
        let i = self.circuits.iter().position(|(c, _)| c == circuit)?;
        let range = self.element_indices.get(&i)?.clone();
        Some((range, self.circuits[i].1.as_slice()))
    }
}
