// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Dense tensors with optional forward-mode tangents.
//!
//! A [`Tensor`] is a real matrix value together with, when differentiation
//! is requested, one tangent matrix per seeded direction. Tangents are
//! stored as an array of shape `(directions, rows, cols)` and propagated by
//! the usual product and sum rules, so evaluating a pure function of seeded
//! parameter tensors yields the function value and its full Jacobian in a
//! single pass.
//!
//! Vectors are represented as single-column tensors.

use std::ops::Range;

use ndarray::{concatenate, s, Array1, Array2, Array3, ArrayView1, Axis};

use crate::error::{Result, StructureError};

/// A value plus optional forward-mode tangents.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    value: Array2<f64>,
    tangent: Option<Array3<f64>>,
}

impl Tensor {
    /// A constant (non-differentiable) tensor.
    pub fn constant(value: Array2<f64>) -> Self {
        Self {
            value,
            tangent: None,
        }
    }

    /// A constant column vector.
    pub fn column(v: ArrayView1<'_, f64>) -> Self {
        let n = v.len();
        let value = v.to_owned().into_shape((n, 1)).unwrap_or_else(|_| Array2::zeros((n, 1)));
        Self::constant(value)
    }

    /// A column vector whose entry `i` is seeded with direction
    /// `offset + i` out of `directions`.
    pub fn seeded(v: ArrayView1<'_, f64>, offset: usize, directions: usize) -> Result<Self> {
        let n = v.len();
        if offset + n > directions {
            return Err(StructureError::Shape(format!(
                "cannot seed {} directions at offset {} out of {}",
                n, offset, directions
            ))
            .into());
        }
        let mut tangent = Array3::zeros((directions, n, 1));
        for i in 0..n {
            tangent[[offset + i, i, 0]] = 1.0;
        }
        let mut t = Self::column(v);
        t.tangent = Some(tangent);
        Ok(t)
    }

    pub fn value(&self) -> &Array2<f64> {
        &self.value
    }

    pub fn tangent(&self) -> Option<&Array3<f64>> {
        self.tangent.as_ref()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.value.dim()
    }

    pub fn requires_grad(&self) -> bool {
        self.tangent.is_some()
    }

    /// Flatten the value row-major.
    pub fn to_flat(&self) -> Array1<f64> {
        self.value.iter().cloned().collect()
    }

    fn directions(&self) -> Option<usize> {
        self.tangent.as_ref().map(|t| t.len_of(Axis(0)))
    }

    fn common_directions(tensors: &[&Tensor]) -> Result<Option<usize>> {
        let mut common = None;
        for t in tensors {
            if let Some(d) = t.directions() {
                match common {
                    None => common = Some(d),
                    Some(c) if c != d => {
                        return Err(StructureError::Shape(format!(
                            "tangent directions disagree: {} vs {}",
                            c, d
                        ))
                        .into())
                    }
                    _ => {}
                }
            }
        }
        Ok(common)
    }

    /// Tangent array, materialized as zeros when absent.
    fn tangent_or_zeros(&self, directions: usize) -> Array3<f64> {
        match &self.tangent {
            Some(t) => t.clone(),
            None => {
                let (r, c) = self.shape();
                Array3::zeros((directions, r, c))
            }
        }
    }

    /// Row-major reshape.
    pub fn reshape(&self, rows: usize, cols: usize) -> Result<Tensor> {
        let flat: Vec<f64> = self.value.iter().cloned().collect();
        let value = Array2::from_shape_vec((rows, cols), flat)?;
        let tangent = match &self.tangent {
            Some(t) => {
                let d = t.len_of(Axis(0));
                let flat: Vec<f64> = t.iter().cloned().collect();
                Some(Array3::from_shape_vec((d, rows, cols), flat)?)
            }
            None => None,
        };
        Ok(Tensor { value, tangent })
    }

    /// Matrix product with the product rule on tangents.
    pub fn matmul(&self, rhs: &Tensor) -> Result<Tensor> {
        let (_, inner) = self.shape();
        let (rhs_rows, _) = rhs.shape();
        if inner != rhs_rows {
            return Err(StructureError::Shape(format!(
                "cannot multiply {:?} by {:?}",
                self.shape(),
                rhs.shape()
            ))
            .into());
        }
        let value = self.value.dot(&rhs.value);
        let tangent = match Self::common_directions(&[self, rhs])? {
            None => None,
            Some(d) => {
                let (r, c) = value.dim();
                let mut out = Array3::zeros((d, r, c));
                for k in 0..d {
                    let mut slot = out.index_axis_mut(Axis(0), k);
                    if let Some(ta) = &self.tangent {
                        slot += &ta.index_axis(Axis(0), k).dot(&rhs.value);
                    }
                    if let Some(tb) = &rhs.tangent {
                        slot += &self.value.dot(&tb.index_axis(Axis(0), k));
                    }
                }
                Some(out)
            }
        };
        Ok(Tensor { value, tangent })
    }

    fn check_same_shape(&self, rhs: &Tensor) -> Result<()> {
        if self.shape() != rhs.shape() {
            return Err(StructureError::Shape(format!(
                "shapes differ: {:?} vs {:?}",
                self.shape(),
                rhs.shape()
            ))
            .into());
        }
        Ok(())
    }

    fn combine(&self, rhs: &Tensor, sign: f64) -> Result<Tensor> {
        self.check_same_shape(rhs)?;
        let value = &self.value + &(&rhs.value * sign);
        let tangent = match Self::common_directions(&[self, rhs])? {
            None => None,
            Some(d) => {
                let mut out = self.tangent_or_zeros(d);
                if let Some(tb) = &rhs.tangent {
                    out.scaled_add(sign, tb);
                }
                Some(out)
            }
        };
        Ok(Tensor { value, tangent })
    }

    pub fn add(&self, rhs: &Tensor) -> Result<Tensor> {
        self.combine(rhs, 1.0)
    }

    pub fn sub(&self, rhs: &Tensor) -> Result<Tensor> {
        self.combine(rhs, -1.0)
    }

    pub fn scale(&self, factor: f64) -> Tensor {
        Tensor {
            value: &self.value * factor,
            tangent: self.tangent.as_ref().map(|t| t * factor),
        }
    }

    /// Stack tensors with equal column counts on top of each other.
    pub fn vstack(parts: &[Tensor]) -> Result<Tensor> {
        let cols = match parts.first() {
            Some(p) => p.shape().1,
            None => return Ok(Tensor::constant(Array2::zeros((0, 1)))),
        };
        if let Some(bad) = parts.iter().find(|p| p.shape().1 != cols) {
            return Err(StructureError::Shape(format!(
                "cannot stack {} columns onto {}",
                bad.shape().1,
                cols
            ))
            .into());
        }
        let values: Vec<_> = parts.iter().map(|p| p.value.view()).collect();
        let value = concatenate(Axis(0), &values)?;

        let refs: Vec<&Tensor> = parts.iter().collect();
        let tangent = match Self::common_directions(&refs)? {
            None => None,
            Some(d) => {
                let owned: Vec<Array3<f64>> = parts.iter().map(|p| p.tangent_or_zeros(d)).collect();
                let views: Vec<_> = owned.iter().map(|t| t.view()).collect();
                Some(concatenate(Axis(1), &views)?)
            }
        };
        Ok(Tensor { value, tangent })
    }

    /// Sum over rows, giving a single-row tensor.
    pub fn sum_rows(&self) -> Tensor {
        let (_, c) = self.shape();
        let value = self
            .value
            .sum_axis(Axis(0))
            .into_shape((1, c))
            .unwrap_or_else(|_| Array2::zeros((1, c)));
        let tangent = self.tangent.as_ref().map(|t| t.sum_axis(Axis(1)).insert_axis(Axis(1)));
        Tensor { value, tangent }
    }

    /// Rows `range` of the tensor.
    pub fn slice_rows(&self, range: Range<usize>) -> Result<Tensor> {
        if range.end > self.shape().0 || range.start > range.end {
            return Err(StructureError::Shape(format!(
                "row range {:?} out of bounds for {} rows",
                range,
                self.shape().0
            ))
            .into());
        }
        let value = self.value.slice(s![range.clone(), ..]).to_owned();
        let tangent = self
            .tangent
            .as_ref()
            .map(|t| t.slice(s![.., range.clone(), ..]).to_owned());
        Ok(Tensor { value, tangent })
    }

    /// The rows at `indices`, in order.
    pub fn select_rows(&self, indices: &[usize]) -> Result<Tensor> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.shape().0) {
            return Err(StructureError::Shape(format!(
                "row {} out of bounds for {} rows",
                bad,
                self.shape().0
            ))
            .into());
        }
        Ok(Tensor {
            value: self.value.select(Axis(0), indices),
            tangent: self.tangent.as_ref().map(|t| t.select(Axis(1), indices)),
        })
    }

    /// Jacobian of a column tensor: `J[i, k] = d value[i] / d direction k`.
    ///
    /// A tensor without tangents has an all-zero Jacobian with
    /// `directions` columns.
    pub fn jacobian(&self, directions: usize) -> Result<Array2<f64>> {
        let (rows, cols) = self.shape();
        if cols != 1 {
            return Err(StructureError::Shape(format!(
                "jacobian needs a column tensor, got {:?}",
                self.shape()
            ))
            .into());
        }
        match &self.tangent {
            None => Ok(Array2::zeros((rows, directions))),
            Some(t) => {
                if t.len_of(Axis(0)) != directions {
                    return Err(StructureError::Shape(format!(
                        "expected {} tangent directions, got {}",
                        directions,
                        t.len_of(Axis(0))
                    ))
                    .into());
                }
                Ok(t.index_axis(Axis(2), 0).t().to_owned())
            }
        }
    }
}
