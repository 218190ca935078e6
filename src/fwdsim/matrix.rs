// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Dense-matrix reference simulator.
//!
//! Probabilities are computed by multiplying member representations
//! directly. The Jacobian is a central finite difference per output row,
//! which makes this simulator slow but independent of the stateless
//! rebuild path.

use std::cell::RefCell;

use finitediff::FiniteDiff;
use ndarray::{Array1, ArrayViewMut1, ArrayViewMut2};
use tracing::debug;

use super::{check_capacity, ForwardSimulator};
use crate::circuit::Circuit;
use crate::error::{Error, Result, StructureError};
use crate::label::Outcome;
use crate::layout::CircuitOutcomeLayout;
use crate::model::ExplicitModel;

#[derive(Debug, Clone, Copy, Default)]
pub struct MatrixForwardSimulator;

fn pick(probs: &[(Outcome, f64)], outcome: &Outcome) -> Result<f64> {
    probs
        .iter()
        .find(|(o, _)| o == outcome)
        .map(|(_, p)| *p)
        .ok_or_else(|| StructureError::UnknownLabel(outcome.to_string()).into())
}

/// `(start, circuit, outcomes)` for every circuit with an output range.
fn rows(layout: &CircuitOutcomeLayout) -> Result<Vec<(usize, &Circuit, &[Outcome])>> {
    layout
        .iter_unique_circuits()
        .map(|(i, circuit, outcomes)| {
            let range = layout.element_indices().get(&i).ok_or_else(|| {
                StructureError::LayoutGap(format!("circuit {} has no element range", circuit))
            })?;
            if range.len() != outcomes.len() {
                return Err(StructureError::Shape(format!(
                    "circuit {} has {} outcomes but {} layout slots",
                    circuit,
                    outcomes.len(),
                    range.len()
                ))
                .into());
            }
            Ok((range.start, circuit, outcomes))
        })
        .collect()
}

impl MatrixForwardSimulator {
    pub fn new() -> Self {
        Self
    }
}

impl ForwardSimulator for MatrixForwardSimulator {
    fn name(&self) -> &'static str {
        "matrix"
    }

    fn bulk_fill_probs(
        &self,
        mut out: ArrayViewMut1<'_, f64>,
        model: &ExplicitModel,
        layout: &CircuitOutcomeLayout,
    ) -> Result<()> {
        check_capacity("probability array", out.len(), layout.num_elements())?;
        for (start, circuit, outcomes) in rows(layout)? {
            let probs = model.probabilities(circuit)?;
            for (j, outcome) in outcomes.iter().enumerate() {
                out[start + j] = pick(&probs, outcome)?;
            }
        }
        Ok(())
    }

    fn bulk_fill_dprobs(
        &self,
        mut out: ArrayViewMut2<'_, f64>,
        model: &ExplicitModel,
        layout: &CircuitOutcomeLayout,
        pr_out: Option<ArrayViewMut1<'_, f64>>,
    ) -> Result<()> {
        let num_params = model.num_params();
        check_capacity("jacobian", out.nrows(), layout.num_elements())?;
        if out.ncols() != num_params {
            return Err(StructureError::Shape(format!(
                "jacobian has {} columns, model has {} parameters",
                out.ncols(),
                num_params
            ))
            .into());
        }
        if let Some(pr_out) = pr_out {
            self.bulk_fill_probs(pr_out, model, layout)?;
        }

        let theta: Array1<f64> = model.to_vector();
        let scratch = RefCell::new(model.clone());
        let closure_err: RefCell<Option<Error>> = RefCell::new(None);

        for (start, circuit, outcomes) in rows(layout)? {
            for (j, outcome) in outcomes.iter().enumerate() {
                let prob = |x: &Array1<f64>| -> f64 {
                    let mut m = scratch.borrow_mut();
                    let value = m
                        .from_vector(x.view())
                        .and_then(|_| m.probabilities(circuit))
                        .and_then(|probs| pick(&probs, outcome));
                    match value {
                        Ok(p) => p,
                        Err(e) => {
                            let mut slot = closure_err.borrow_mut();
                            if slot.is_none() {
                                *slot = Some(e);
                            }
                            f64::NAN
                        }
                    }
                };
                let grad = theta.central_diff(&prob);
                if let Some(e) = closure_err.borrow_mut().take() {
                    return Err(e);
                }
                out.row_mut(start + j).assign(&grad);
            }
        }
        debug!(rows = layout.num_elements(), params = num_params, "Filled finite-difference jacobian");
        Ok(())
    }
}
