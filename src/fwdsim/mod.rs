// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Forward simulators: circuit outcome probabilities and their Jacobians.
//!
//! # Simulators
//!
//! - [`TorchForwardSimulator`]: rebuilds every member as a differentiable
//!   [`Tensor`](crate::tensor::Tensor) through a [`StatelessModel`] snapshot
//!   and gets the Jacobian from one forward-mode pass
//! - [`MatrixForwardSimulator`]: multiplies dense representations directly;
//!   its Jacobian uses central finite differences
//!
//! Both write into caller-provided arrays laid out by a
//! [`CircuitOutcomeLayout`].

use std::fmt;

use ndarray::{Array1, Array2, ArrayViewMut1, ArrayViewMut2};

use crate::error::{Error, Result, StructureError};
use crate::layout::CircuitOutcomeLayout;
use crate::model::ExplicitModel;

pub mod matrix;
pub mod stateless;
pub mod torch;

pub use matrix::MatrixForwardSimulator;
pub use stateless::{StatelessCircuit, StatelessModel};
pub use torch::TorchForwardSimulator;

/// Check that `len` can hold `needed` entries.
pub(crate) fn check_capacity(what: &str, len: usize, needed: usize) -> Result<()> {
    if len < needed {
        return Err(StructureError::Shape(format!(
            "{} has {} rows, layout needs {}",
            what, len, needed
        ))
        .into());
    }
    Ok(())
}

/// Computes outcome probabilities of the circuits in a layout.
pub trait ForwardSimulator: fmt::Debug + Send + Sync {
    /// Short simulator name.
    fn name(&self) -> &'static str;

    /// Write probabilities into `out[..layout.num_elements()]`.
    fn bulk_fill_probs(
        &self,
        out: ArrayViewMut1<'_, f64>,
        model: &ExplicitModel,
        layout: &CircuitOutcomeLayout,
    ) -> Result<()>;

    /// Write the Jacobian (rows are outcomes, columns are model parameters)
    /// and, when `pr_out` is given, the probabilities too.
    fn bulk_fill_dprobs(
        &self,
        out: ArrayViewMut2<'_, f64>,
        model: &ExplicitModel,
        layout: &CircuitOutcomeLayout,
        pr_out: Option<ArrayViewMut1<'_, f64>>,
    ) -> Result<()>;

    /// Time-dependent evaluation.
    fn bulk_fill_timedep_probs(
        &self,
        _out: ArrayViewMut1<'_, f64>,
        _model: &ExplicitModel,
        _layout: &CircuitOutcomeLayout,
        _times: &[f64],
    ) -> Result<()> {
        Err(Error::NotImplemented(format!(
            "time-dependent probabilities in the {} simulator",
            self.name()
        )))
    }

    fn bulk_probs(&self, model: &ExplicitModel, layout: &CircuitOutcomeLayout) -> Result<Array1<f64>> {
        let mut out = Array1::<f64>::zeros(layout.num_elements());
        self.bulk_fill_probs(out.view_mut(), model, layout)?;
        Ok(out)
    }

    fn bulk_dprobs(&self, model: &ExplicitModel, layout: &CircuitOutcomeLayout) -> Result<Array2<f64>> {
        let mut out = Array2::<f64>::zeros((layout.num_elements(), model.num_params()));
        self.bulk_fill_dprobs(out.view_mut(), model, layout, None)?;
        Ok(out)
    }
}
