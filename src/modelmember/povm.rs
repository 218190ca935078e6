// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! POVMs: ordered collections of measurement effects.

use ndarray::{Array1, Array2, ArrayView1};

use super::{check_len, delegate_member, member_bookkeeping, Binding, EvoType, ModelMember};
use super::rep::EffectRep;
use crate::error::{Error, Result, StructureError};

fn check_effects(effects: &[(String, Array1<f64>)]) -> Result<usize> {
    let dim = effects
        .first()
        .map(|(_, e)| e.len())
        .ok_or_else(|| Error::Structure(StructureError::Shape("POVM has no effects".into())))?;
    for (_, e) in effects {
        if e.len() != dim {
            return Err(StructureError::DimensionMismatch {
                expected: dim,
                actual: e.len(),
            }
            .into());
        }
    }
    Ok(dim)
}

fn effect_param_labels<'a>(labels: impl Iterator<Item = &'a String>, dim: usize) -> Vec<String> {
    labels
        .flat_map(|l| (0..dim).map(move |i| format!("{}: VecElement {}", l, i)))
        .collect()
}

fn load_effects(effects: &mut [(String, Array1<f64>)], v: ArrayView1<'_, f64>) {
    let mut values = v.iter();
    for (_, e) in effects.iter_mut() {
        for (dst, &src) in e.iter_mut().zip(values.by_ref()) {
            *dst = src;
        }
    }
}

/// A POVM whose every effect entry is a parameter.
#[derive(Debug, Clone)]
pub struct FullPOVM {
    effects: Vec<(String, Array1<f64>)>,
    evotype: EvoType,
    binding: Binding,
    dirty: bool,
}

impl FullPOVM {
    pub fn new(effects: Vec<(String, Array1<f64>)>, evotype: EvoType) -> Result<Self> {
        check_effects(&effects)?;
        Ok(Self {
            effects,
            evotype,
            binding: Binding::default(),
            dirty: false,
        })
    }
}

impl ModelMember for FullPOVM {
    fn dim(&self) -> usize {
        self.effects.first().map_or(0, |(_, e)| e.len())
    }

    fn evotype(&self) -> EvoType {
        self.evotype
    }

    fn num_params(&self) -> usize {
        self.effects.len() * self.dim()
    }

    fn to_vector(&self) -> Array1<f64> {
        self.effects.iter().flat_map(|(_, e)| e.iter().cloned()).collect()
    }

    fn from_vector(&mut self, v: ArrayView1<'_, f64>) -> Result<()> {
        check_len(self.num_params(), &v)?;
        load_effects(&mut self.effects, v);
        self.dirty = false;
        Ok(())
    }

    fn parameter_labels(&self) -> Vec<String> {
        effect_param_labels(self.effects.iter().map(|(l, _)| l), self.dim())
    }

    member_bookkeeping!();
}

/// A trace-preserving POVM: the last effect is `identity - sum(others)`.
#[derive(Debug, Clone)]
pub struct TPPOVM {
    free: Vec<(String, Array1<f64>)>,
    complement_label: String,
    identity: Array1<f64>,
    evotype: EvoType,
    binding: Binding,
    dirty: bool,
}

impl TPPOVM {
    /// The identity is taken to be the sum of all given effects; the last
    /// effect becomes the complement.
    pub fn new(mut effects: Vec<(String, Array1<f64>)>, evotype: EvoType) -> Result<Self> {
        let dim = check_effects(&effects)?;
        let identity = effects
            .iter()
            .fold(Array1::<f64>::zeros(dim), |acc, (_, e)| acc + e);
        let (complement_label, _) = effects
            .pop()
            .ok_or_else(|| Error::Structure(StructureError::Shape("POVM has no effects".into())))?;
        Ok(Self {
            free: effects,
            complement_label,
            identity,
            evotype,
            binding: Binding::default(),
            dirty: false,
        })
    }

    pub fn identity(&self) -> &Array1<f64> {
        &self.identity
    }

    fn complement(&self) -> Array1<f64> {
        self.free
            .iter()
            .fold(self.identity.clone(), |acc, (_, e)| acc - e)
    }
}

impl ModelMember for TPPOVM {
    fn dim(&self) -> usize {
        self.identity.len()
    }

    fn evotype(&self) -> EvoType {
        self.evotype
    }

    fn num_params(&self) -> usize {
        self.free.len() * self.dim()
    }

    fn to_vector(&self) -> Array1<f64> {
        self.free.iter().flat_map(|(_, e)| e.iter().cloned()).collect()
    }

    fn from_vector(&mut self, v: ArrayView1<'_, f64>) -> Result<()> {
        check_len(self.num_params(), &v)?;
        load_effects(&mut self.free, v);
        self.dirty = false;
        Ok(())
    }

    fn parameter_labels(&self) -> Vec<String> {
        effect_param_labels(self.free.iter().map(|(l, _)| l), self.dim())
    }

    member_bookkeeping!();
}

/// A POVM in one of the supported parameterizations.
#[derive(Debug, Clone)]
pub enum Povm {
    Full(FullPOVM),
    Tp(TPPOVM),
}

delegate_member!(Povm { Full, Tp });

impl Povm {
    pub fn full(effects: Vec<(String, Array1<f64>)>, evotype: EvoType) -> Result<Self> {
        Ok(Povm::Full(FullPOVM::new(effects, evotype)?))
    }

    pub fn tp(effects: Vec<(String, Array1<f64>)>, evotype: EvoType) -> Result<Self> {
        Ok(Povm::Tp(TPPOVM::new(effects, evotype)?))
    }

    pub fn effect_labels(&self) -> Vec<String> {
        match self {
            Povm::Full(p) => p.effects.iter().map(|(l, _)| l.clone()).collect(),
            Povm::Tp(p) => p
                .free
                .iter()
                .map(|(l, _)| l.clone())
                .chain(std::iter::once(p.complement_label.clone()))
                .collect(),
        }
    }

    pub fn num_effects(&self) -> usize {
        match self {
            Povm::Full(p) => p.effects.len(),
            Povm::Tp(p) => p.free.len() + 1,
        }
    }

    /// All effects in order, the complement included.
    pub fn effects(&self) -> Vec<(String, Array1<f64>)> {
        match self {
            Povm::Full(p) => p.effects.clone(),
            Povm::Tp(p) => {
                let mut all = p.free.clone();
                all.push((p.complement_label.clone(), p.complement()));
                all
            }
        }
    }

    /// Effects stacked as rows, shape `(num_effects, dim)`.
    pub fn effect_matrix(&self) -> Array2<f64> {
        let effects = self.effects();
        let mut m = Array2::zeros((effects.len(), self.dim()));
        for (mut row, (_, e)) in m.rows_mut().into_iter().zip(effects.iter()) {
            row.assign(e);
        }
        m
    }

    pub fn to_reps(&self) -> Result<Vec<(String, EffectRep)>> {
        let evotype = self.evotype();
        self.effects()
            .into_iter()
            .map(|(l, e)| Ok((l, EffectRep::new(e, evotype)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn z_effects() -> Vec<(String, Array1<f64>)> {
        let r = 2f64.sqrt().recip();
        vec![
            ("0".to_string(), array![r, 0.0, 0.0, r]),
            ("1".to_string(), array![r, 0.0, 0.0, -r]),
        ]
    }

    #[test]
    fn test_full_povm_params() {
        let p = Povm::full(z_effects(), EvoType::DensityMx).unwrap();
        assert_eq!(p.num_params(), 8);
        assert_eq!(p.parameter_labels()[4], "1: VecElement 0");
        assert_eq!(p.effect_labels(), vec!["0", "1"]);
    }

    #[test]
    fn test_tp_povm_complement_tracks_free_effects() {
        let mut p = Povm::tp(z_effects(), EvoType::DensityMx).unwrap();
        assert_eq!(p.num_params(), 4);
        assert_eq!(p.num_effects(), 2);

        let r = 2f64.sqrt().recip();
        p.from_vector(array![0.9 * r, 0.0, 0.0, 0.8 * r].view()).unwrap();
        let effects = p.effects();
        let sum = &effects[0].1 + &effects[1].1;
        assert_abs_diff_eq!(sum[0], 2.0 * r, epsilon = 1e-15);
        assert_abs_diff_eq!(sum[3], 0.0, epsilon = 1e-15);
        assert_abs_diff_eq!(effects[1].1[0], 1.1 * r, epsilon = 1e-15);
    }

    #[test]
    fn test_effect_matrix_rows() {
        let p = Povm::tp(z_effects(), EvoType::DensityMx).unwrap();
        let m = p.effect_matrix();
        assert_eq!(m.dim(), (2, 4));
        assert_abs_diff_eq!(m[[1, 3]], -(2f64.sqrt().recip()), epsilon = 1e-15);
    }

    #[test]
    fn test_empty_povm_rejected() {
        assert!(Povm::full(Vec::new(), EvoType::DensityMx).is_err());
        assert!(Povm::tp(Vec::new(), EvoType::DensityMx).is_err());
    }

    #[test]
    fn test_mismatched_effects_rejected() {
        let effects = vec![
            ("0".to_string(), array![1.0, 0.0]),
            ("1".to_string(), array![1.0, 0.0, 0.0, 0.0]),
        ];
        assert!(matches!(
            Povm::full(effects, EvoType::DensityMx),
            Err(Error::Structure(StructureError::DimensionMismatch { .. }))
        ));
    }
}
