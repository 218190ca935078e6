// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Forward-mode differentiable simulator.

use ndarray::{s, ArrayViewMut1, ArrayViewMut2};
use tracing::debug;

use super::{check_capacity, ForwardSimulator, StatelessModel};
use crate::error::{Result, StructureError};
use crate::layout::CircuitOutcomeLayout;
use crate::model::ExplicitModel;
use crate::torchable::TorchBases;

/// Evaluates circuits on tensors rebuilt from a [`StatelessModel`].
///
/// The Jacobian comes from a single evaluation with every model parameter
/// seeded as its own tangent direction.
#[derive(Debug, Clone, Copy, Default)]
pub struct TorchForwardSimulator;

impl TorchForwardSimulator {
    pub fn new() -> Self {
        Self
    }

    /// Fill `out[..outcome_probs_dim]`, reusing an existing snapshot and
    /// bases when given.
    pub fn fill_probs(
        &self,
        mut out: ArrayViewMut1<'_, f64>,
        model: &ExplicitModel,
        layout: &CircuitOutcomeLayout,
        split_model: Option<(&StatelessModel, &TorchBases)>,
    ) -> Result<()> {
        let owned;
        let (slm, bases) = match split_model {
            Some(split) => split,
            None => {
                let slm = StatelessModel::new(model, layout)?;
                let free_params = slm.get_free_parameters(model)?;
                let bases = slm.get_torch_bases(&free_params, false)?;
                owned = (slm, bases);
                (&owned.0, &owned.1)
            }
        };

        let probs = slm.circuit_probs_from_torch_bases(bases)?.to_flat();
        check_capacity("probability array", out.len(), slm.outcome_probs_dim)?;
        if probs.len() != slm.outcome_probs_dim {
            return Err(StructureError::Shape(format!(
                "circuits produced {} probabilities, layout has {}",
                probs.len(),
                slm.outcome_probs_dim
            ))
            .into());
        }
        out.slice_mut(s![..slm.outcome_probs_dim]).assign(&probs);
        Ok(())
    }
}

impl ForwardSimulator for TorchForwardSimulator {
    fn name(&self) -> &'static str {
        "torch"
    }

    fn bulk_fill_probs(
        &self,
        out: ArrayViewMut1<'_, f64>,
        model: &ExplicitModel,
        layout: &CircuitOutcomeLayout,
    ) -> Result<()> {
        self.fill_probs(out, model, layout, None)
    }

    fn bulk_fill_dprobs(
        &self,
        mut out: ArrayViewMut2<'_, f64>,
        model: &ExplicitModel,
        layout: &CircuitOutcomeLayout,
        pr_out: Option<ArrayViewMut1<'_, f64>>,
    ) -> Result<()> {
        let slm = StatelessModel::new(model, layout)?;
        let free_params = slm.get_free_parameters(model)?;

        if let Some(pr_out) = pr_out {
            let bases = slm.get_torch_bases(&free_params, false)?;
            self.fill_probs(pr_out, model, layout, Some((&slm, &bases)))?;
        }

        let (_, jac) = slm.jacfwd(&free_params)?;
        if out.dim() != jac.dim() {
            return Err(StructureError::Shape(format!(
                "jacobian is {:?}, output array is {:?}",
                jac.dim(),
                out.dim()
            ))
            .into());
        }
        out.assign(&jac);
        debug!(rows = jac.nrows(), params = jac.ncols(), "Filled forward-mode jacobian");
        Ok(())
    }
}
