//! Tensor shape and view descriptors (spec §3, §4.7 canonical serialization).
//!
//! These are lightweight, non-owning descriptors: callers supply the backing
//! storage, consistent with the "never allocate in the numerical path"
//! non-goal. Contiguity is checked explicitly before any operation (such as
//! canonical hashing) that requires a flat byte stream.

use crate::error::{CtError, CtResult};

/// Element scalar format stored in a tensor (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DType {
    Q16_16,
    Q8_24,
}

impl DType {
    pub const fn size_bytes(self) -> usize {
        4
    }
}

/// Dense tensor shape with row-major strides, up to 4 dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Shape {
    dims: Vec<usize>,
    strides: Vec<usize>,
}

impl Shape {
    /// Build a shape with canonical row-major (C order) strides.
    pub fn row_major(dims: &[usize]) -> CtResult<Self> {
        if dims.is_empty() || dims.iter().any(|&d| d == 0) {
            return Err(CtError::Dimension);
        }
        let mut strides = vec![0usize; dims.len()];
        let mut acc = 1usize;
        for i in (0..dims.len()).rev() {
            strides[i] = acc;
            acc = acc.checked_mul(dims[i]).ok_or(CtError::Dimension)?;
        }
        Ok(Self { dims: dims.to_vec(), strides })
    }

    /// Build a shape with caller-supplied strides (may be non-contiguous).
    pub fn with_strides(dims: &[usize], strides: &[usize]) -> CtResult<Self> {
        if dims.len() != strides.len() || dims.is_empty() {
            return Err(CtError::Dimension);
        }
        Ok(Self { dims: dims.to_vec(), strides: strides.to_vec() })
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when strides match the canonical row-major layout for `dims`,
    /// i.e. the backing storage can be read as one flat run (spec §4.7).
    pub fn is_contiguous(&self) -> bool {
        let mut acc = 1usize;
        for i in (0..self.dims.len()).rev() {
            if self.strides[i] != acc {
                return false;
            }
            acc *= self.dims[i];
        }
        true
    }
}

/// A read-only view over a flat Q-format buffer plus its shape.
pub struct TensorView<'a> {
    shape: Shape,
    dtype: DType,
    data: &'a [i32],
}

impl<'a> TensorView<'a> {
    pub fn new(shape: Shape, dtype: DType, data: &'a [i32]) -> CtResult<Self> {
        if data.len() < shape.len() {
            return Err(CtError::Memory);
        }
        Ok(Self { shape, dtype, data })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn is_contiguous(&self) -> bool {
        self.shape.is_contiguous()
    }

    /// Flat element slice; only meaningful when `is_contiguous()` is true.
    pub fn as_slice(&self) -> &'a [i32] {
        self.data
    }
}

/// A mutable view over a flat Q-format buffer plus its shape.
pub struct TensorMut<'a> {
    shape: Shape,
    dtype: DType,
    data: &'a mut [i32],
}

impl<'a> TensorMut<'a> {
    pub fn new(shape: Shape, dtype: DType, data: &'a mut [i32]) -> CtResult<Self> {
        if data.len() < shape.len() {
            return Err(CtError::Memory);
        }
        Ok(Self { shape, dtype, data })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn is_contiguous(&self) -> bool {
        self.shape.is_contiguous()
    }

    pub fn as_slice(&self) -> &[i32] {
        self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [i32] {
        self.data
    }
}
