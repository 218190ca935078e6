// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared test fixtures: single-qubit matrices in the normalized Pauli
//! product basis and a small model built from them.

use ndarray::{array, Array1, Array2};

use crate::basis::BasisName;
use crate::instrument::Instrument;
use crate::model::ExplicitModel;
use crate::modelmember::{EvoType, Operation, Povm, StatePrep};

fn r() -> f64 {
    2f64.sqrt().recip()
}

/// `|0><0|`.
pub fn zero_state() -> Array1<f64> {
    array![r(), 0.0, 0.0, r()]
}

/// `|1><1|`.
pub fn one_state() -> Array1<f64> {
    array![r(), 0.0, 0.0, -r()]
}

/// Pi rotation about X.
pub fn x_gate() -> Array2<f64> {
    Array2::from_diag(&array![1.0, 1.0, -1.0, -1.0])
}

/// Pi rotation about Z.
pub fn z_gate() -> Array2<f64> {
    Array2::from_diag(&array![1.0, -1.0, -1.0, 1.0])
}

/// `rho -> P rho P` for the Z-basis projector onto `|0>` (`sign = 1`) or
/// `|1>` (`sign = -1`).
pub fn z_projector(sign: f64) -> Array2<f64> {
    let h = 0.5;
    array![
        [h, 0.0, 0.0, sign * h],
        [0.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 0.0],
        [sign * h, 0.0, 0.0, h],
    ]
}

/// One qubit: `rho0`, `Mdefault` (effects `0`, `1`), TP gates `Gx` and
/// `Gz`, and a Z-measuring instrument `Iz` (elements `p0`, `p1`).
pub fn xz_model() -> ExplicitModel {
    let evotype = EvoType::DensityMx;
    let mut model = ExplicitModel::new(4, evotype, BasisName::Pp);
    model
        .add_prep("rho0", StatePrep::tp(zero_state(), evotype).unwrap())
        .unwrap();
    model
        .add_povm(
            "Mdefault",
            Povm::tp(
                vec![("0".to_string(), zero_state()), ("1".to_string(), one_state())],
                evotype,
            )
            .unwrap(),
        )
        .unwrap();
    model
        .add_operation("Gx", Operation::tp(x_gate(), evotype).unwrap())
        .unwrap();
    model
        .add_operation("Gz", Operation::tp(z_gate(), evotype).unwrap())
        .unwrap();
    model
        .add_instrument(
            "Iz",
            Instrument::new(vec![("p0", z_projector(1.0)), ("p1", z_projector(-1.0))]).unwrap(),
        )
        .unwrap();
    model
}
