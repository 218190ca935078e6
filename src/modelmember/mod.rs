// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Parameterized model members and the parameter allocator contract.
//!
//! Every parameterized object owns a dense representation and a local
//! parameter count `k`. When it is inserted into a container it claims a
//! contiguous slice `offset..offset+k` of the container's flat parameter
//! vector. The claim is stored on the member as an explicit [`Binding`]
//! (index range plus the [`MemberId`] of the owning container), so there
//! is never a pointer back to the container itself.
//!
//! Reconciliation between a member's dense representation and the
//! container's cached vector is an explicit pass: a member whose
//! representation is changed outside `from_vector` raises its `dirty`
//! bit, and the owning container's `clean_paramvec` copies its current
//! vector back and clears the bit.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result, StructureError};

pub use operation::{FullDenseOp, Operation, StaticDenseOp, TPDenseOp};
pub use povm::{FullPOVM, Povm, TPPOVM};
pub use rep::{EffectRep, OpRep, StateRep};
pub use state::{FullState, StatePrep, StaticState, TPState};

/// Evolution type of a member's representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvoType {
    /// Real superoperators acting on vectorized density matrices
    #[default]
    DensityMx,
    /// Unitaries acting on state vectors
    StateVec,
    /// Clifford tableaux
    Stabilizer,
}

impl fmt::Display for EvoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvoType::DensityMx => write!(f, "densitymx"),
            EvoType::StateVec => write!(f, "statevec"),
            EvoType::Stabilizer => write!(f, "stabilizer"),
        }
    }
}

impl FromStr for EvoType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "densitymx" | "default" => Ok(EvoType::DensityMx),
            "statevec" => Ok(EvoType::StateVec),
            "stabilizer" => Ok(EvoType::Stabilizer),
            other => Err(Error::Config(format!("unknown evolution type '{}'", other))),
        }
    }
}

/// Identity of a parameter-owning container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(Uuid);

impl MemberId {
    pub fn new() -> Self {
        MemberId(Uuid::new_v4())
    }
}

impl Default for MemberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a member's parameters live inside its owner's vector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Binding {
    pub gpindices: Option<Range<usize>>,
    pub parent: Option<MemberId>,
}

impl Binding {
    /// Whether this binding belongs to `owner`.
    pub fn is_owned_by(&self, owner: MemberId) -> bool {
        self.gpindices.is_some() && self.parent == Some(owner)
    }
}

/// Common contract of every parameterized object.
pub trait ModelMember {
    /// Dimension of the superoperator space the member acts on.
    fn dim(&self) -> usize;

    fn evotype(&self) -> EvoType;

    /// Local parameter count `k`.
    fn num_params(&self) -> usize;

    /// Current parameters, length `num_params()`.
    fn to_vector(&self) -> Array1<f64>;

    /// Load parameters; clears the dirty bit.
    ///
    /// Applying the same slice twice leaves the member in the same state.
    fn from_vector(&mut self, v: ArrayView1<'_, f64>) -> Result<()>;

    /// One human-readable label per parameter.
    fn parameter_labels(&self) -> Vec<String>;

    fn binding(&self) -> &Binding;

    fn binding_mut(&mut self) -> &mut Binding;

    fn is_dirty(&self) -> bool;

    fn set_dirty(&mut self, dirty: bool);

    /// Reconcile any cached vector held by the member itself.
    ///
    /// Leaves have nothing to reconcile; containers override this.
    fn clean_paramvec(&mut self) {}

    fn gpindices(&self) -> Option<Range<usize>> {
        self.binding().gpindices.clone()
    }

    fn parent(&self) -> Option<MemberId> {
        self.binding().parent
    }

    /// Claim `offset..offset+k` inside `parent` and return `k`.
    ///
    /// Any earlier claim (under this or another parent) is replaced.
    fn allocate_gpindices(&mut self, offset: usize, parent: MemberId) -> usize {
        let k = self.num_params();
        self.set_gpindices(offset..offset + k, parent);
        k
    }

    fn set_gpindices(&mut self, gpindices: Range<usize>, parent: MemberId) {
        let binding = self.binding_mut();
        binding.gpindices = Some(gpindices);
        binding.parent = Some(parent);
    }
}

/// Binding and dirty-bit accessors for a struct with `binding` and `dirty`
/// fields.
macro_rules! member_bookkeeping {
    () => {
        fn binding(&self) -> &$crate::modelmember::Binding {
            &self.binding
        }

        fn binding_mut(&mut self) -> &mut $crate::modelmember::Binding {
            &mut self.binding
        }

        fn is_dirty(&self) -> bool {
            self.dirty
        }

        fn set_dirty(&mut self, dirty: bool) {
            self.dirty = dirty;
        }
    };
}

/// Forward every [`ModelMember`] method of an enum to its variants.
macro_rules! delegate_member {
    ($enum:ident { $($variant:ident),+ $(,)? }) => {
        impl $crate::modelmember::ModelMember for $enum {
            fn dim(&self) -> usize {
                match self { $($enum::$variant(m) => $crate::modelmember::ModelMember::dim(m)),+ }
            }

            fn evotype(&self) -> $crate::modelmember::EvoType {
                match self { $($enum::$variant(m) => $crate::modelmember::ModelMember::evotype(m)),+ }
            }

            fn num_params(&self) -> usize {
                match self { $($enum::$variant(m) => $crate::modelmember::ModelMember::num_params(m)),+ }
            }

            fn to_vector(&self) -> ::ndarray::Array1<f64> {
                match self { $($enum::$variant(m) => $crate::modelmember::ModelMember::to_vector(m)),+ }
            }

            fn from_vector(&mut self, v: ::ndarray::ArrayView1<'_, f64>) -> $crate::error::Result<()> {
                match self { $($enum::$variant(m) => $crate::modelmember::ModelMember::from_vector(m, v)),+ }
            }

            fn parameter_labels(&self) -> Vec<String> {
                match self { $($enum::$variant(m) => $crate::modelmember::ModelMember::parameter_labels(m)),+ }
            }

            fn binding(&self) -> &$crate::modelmember::Binding {
                match self { $($enum::$variant(m) => $crate::modelmember::ModelMember::binding(m)),+ }
            }

            fn binding_mut(&mut self) -> &mut $crate::modelmember::Binding {
                match self { $($enum::$variant(m) => $crate::modelmember::ModelMember::binding_mut(m)),+ }
            }

            fn is_dirty(&self) -> bool {
                match self { $($enum::$variant(m) => $crate::modelmember::ModelMember::is_dirty(m)),+ }
            }

            fn set_dirty(&mut self, dirty: bool) {
                match self { $($enum::$variant(m) => $crate::modelmember::ModelMember::set_dirty(m, dirty)),+ }
            }

            fn clean_paramvec(&mut self) {
                match self { $($enum::$variant(m) => $crate::modelmember::ModelMember::clean_paramvec(m)),+ }
            }
        }
    };
}

pub(crate) use delegate_member;
pub(crate) use member_bookkeeping;

pub mod operation;
pub mod povm;
pub mod rep;
pub mod state;

/// Check that `v` has the length a member expects.
pub(crate) fn check_len(expected: usize, v: &ArrayView1<'_, f64>) -> Result<()> {
    if v.len() != expected {
        return Err(StructureError::VectorLength {
            expected,
            actual: v.len(),
        }
        .into());
    }
    Ok(())
}

/// Euclidean distance between a cached slice and a member's vector.
pub(crate) fn norm_diff(cached: ArrayView1<'_, f64>, current: &Array1<f64>) -> f64 {
    cached
        .iter()
        .zip(current.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Check that every `(dim, evotype)` pair matches the first one.
///
/// Returns the common pair, or `None` for an empty iterator.
pub(crate) fn common_dim_evotype(
    items: impl IntoIterator<Item = (usize, EvoType)>,
) -> Result<Option<(usize, EvoType)>> {
    let mut common: Option<(usize, EvoType)> = None;
    for (dim, evotype) in items {
        match common {
            None => common = Some((dim, evotype)),
            Some((d, e)) => {
                if e != evotype {
                    return Err(StructureError::EvotypeMismatch {
                        expected: e.to_string(),
                        actual: evotype.to_string(),
                    }
                    .into());
                }
                if d != dim {
                    return Err(StructureError::DimensionMismatch {
                        expected: d,
                        actual: dim,
                    }
                    .into());
                }
            }
        }
    }
    Ok(common)
}

/// Compose a member's local range with its container's range.
pub(crate) fn compose_gpindices(outer: &Range<usize>, inner: &Range<usize>) -> Range<usize> {
    (outer.start + inner.start)..(outer.start + inner.end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_evotype_parse_and_display() {
        assert_eq!("densitymx".parse::<EvoType>().unwrap(), EvoType::DensityMx);
        assert_eq!("default".parse::<EvoType>().unwrap(), EvoType::DensityMx);
        assert_eq!("StateVec".parse::<EvoType>().unwrap(), EvoType::StateVec);
        assert!("cterm".parse::<EvoType>().is_err());
        assert_eq!(EvoType::Stabilizer.to_string(), "stabilizer");
        assert_eq!(EvoType::default(), EvoType::DensityMx);
    }

    #[test]
    fn test_member_ids_are_distinct() {
        assert_ne!(MemberId::new(), MemberId::new());
    }

    #[test]
    fn test_allocate_replaces_previous_binding() {
        let mut op = FullDenseOp::new(ndarray::Array2::eye(2), EvoType::DensityMx).unwrap();
        let first = MemberId::new();
        let second = MemberId::new();

        assert_eq!(op.allocate_gpindices(3, first), 4);
        assert_eq!(op.gpindices(), Some(3..7));
        assert!(op.binding().is_owned_by(first));

        op.allocate_gpindices(0, second);
        assert_eq!(op.gpindices(), Some(0..4));
        assert!(!op.binding().is_owned_by(first));
        assert!(op.binding().is_owned_by(second));
    }

    #[test]
    fn test_common_dim_evotype() {
        let ok = common_dim_evotype(vec![(4, EvoType::DensityMx), (4, EvoType::DensityMx)]);
        assert_eq!(ok.unwrap(), Some((4, EvoType::DensityMx)));

        let empty = common_dim_evotype(Vec::new());
        assert_eq!(empty.unwrap(), None);

        let bad_dim = common_dim_evotype(vec![(4, EvoType::DensityMx), (16, EvoType::DensityMx)]);
        assert!(matches!(
            bad_dim,
            Err(Error::Structure(StructureError::DimensionMismatch { .. }))
        ));

        let bad_evo = common_dim_evotype(vec![(4, EvoType::DensityMx), (4, EvoType::StateVec)]);
        assert!(matches!(
            bad_evo,
            Err(Error::Structure(StructureError::EvotypeMismatch { .. }))
        ));
    }

    #[test]
    fn test_check_len() {
        let v = array![1.0, 2.0];
        assert!(check_len(2, &v.view()).is_ok());
        assert!(matches!(
            check_len(3, &v.view()),
            Err(Error::Structure(StructureError::VectorLength {
                expected: 3,
                actual: 2
            }))
        ));
    }

    #[test]
    fn test_compose_gpindices() {
        assert_eq!(compose_gpindices(&(10..30), &(4..8)), 14..18);
    }
}
