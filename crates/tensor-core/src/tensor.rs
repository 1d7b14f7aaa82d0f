// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Owned, arena-backed tensors with shared aliasing slices.

use crate::layout::{self, channel_range, flat_range, row_range};
use crate::{DType, Element, QuantParams, Shape, TensorError};
use memory_manager::{AlignedBuffer, MemoryPool};
use std::fmt;
use std::sync::{Arc, RwLock};

type Storage = Arc<RwLock<AlignedBuffer>>;

/// A tensor whose bytes live in a [`MemoryPool`] allocation.
///
/// # Sharing
/// Cloning a `RamTensor` yields another handle to the same allocation and
/// the same quantization metadata. Slices (`grep_*`) also share the
/// allocation, but view it at a byte offset with their own shape and fresh
/// metadata. The allocation returns to the arena when the last handle is
/// dropped or [`release`](RamTensor::release)d.
///
/// # Access
/// Bytes are reached through closures (`with_bytes`, `with_slice_mut`, ...)
/// that hold the allocation lock for the duration of the call. Do not nest a
/// mutable access inside any other access to the same allocation.
#[derive(Clone)]
pub struct RamTensor {
    shape: Shape,
    dtype: DType,
    storage: Option<Storage>,
    /// Byte offset of this view into the allocation.
    offset: usize,
    quant: Arc<RwLock<QuantParams>>,
}

impl RamTensor {
    /// Allocates a zeroed tensor from a private, unbounded arena.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{DType, RamTensor, Shape};
    /// let t = RamTensor::new(Shape::new(1, 3, 5, 5), DType::F32).unwrap();
    /// assert_eq!(t.cstep(), 28);
    /// assert_eq!(t.size_bytes(), 3 * 28 * 4);
    /// assert_eq!(t.reference_count(), 1);
    /// ```
    pub fn new(shape: Shape, dtype: DType) -> Result<Self, TensorError> {
        Self::new_in(&MemoryPool::unbounded(), shape, dtype)
    }

    /// Allocates a zeroed tensor from `pool`.
    pub fn new_in(pool: &MemoryPool, shape: Shape, dtype: DType) -> Result<Self, TensorError> {
        let buffer = pool.allocate(shape.size_bytes(dtype))?;
        Ok(Self {
            shape,
            dtype,
            storage: Some(Arc::new(RwLock::new(buffer))),
            offset: 0,
            quant: Arc::default(),
        })
    }

    /// The empty tensor: no storage, zero shape.
    pub fn empty() -> Self {
        Self {
            shape: Shape::default(),
            dtype: DType::F32,
            storage: None,
            offset: 0,
            quant: Arc::default(),
        }
    }

    /// Allocates from `pool` and copies `bytes`, which must already be in the
    /// plane-padded layout.
    pub fn from_bytes_in(
        pool: &MemoryPool,
        shape: Shape,
        dtype: DType,
        bytes: &[u8],
    ) -> Result<Self, TensorError> {
        let expected = shape.size_bytes(dtype);
        if bytes.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        let tensor = Self::new_in(pool, shape, dtype)?;
        tensor.write_data(bytes)?;
        Ok(tensor)
    }

    /// [`from_bytes_in`](Self::from_bytes_in) on a private arena.
    pub fn from_bytes(shape: Shape, dtype: DType, bytes: &[u8]) -> Result<Self, TensorError> {
        Self::from_bytes_in(&MemoryPool::unbounded(), shape, dtype, bytes)
    }

    /// Creates a tensor from values already in the plane-padded layout.
    pub fn from_slice<T: Element>(shape: Shape, values: &[T]) -> Result<Self, TensorError> {
        Self::from_bytes(shape, T::DTYPE, bytemuck::cast_slice(values))
    }

    /// Creates a tensor from dense `N*C*H*W` values, inserting plane padding.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{RamTensor, Shape};
    /// let t = RamTensor::from_dense(Shape::new(1, 2, 1, 3), &[1u8, 2, 3, 4, 5, 6]).unwrap();
    /// assert_eq!(t.cstep(), 16);
    /// assert_eq!(t.to_dense_vec::<u8>().unwrap(), vec![1, 2, 3, 4, 5, 6]);
    /// ```
    pub fn from_dense<T: Element>(shape: Shape, dense: &[T]) -> Result<Self, TensorError> {
        Self::from_dense_in(&MemoryPool::unbounded(), shape, dense)
    }

    /// [`from_dense`](Self::from_dense) allocating from `pool`.
    pub fn from_dense_in<T: Element>(
        pool: &MemoryPool,
        shape: Shape,
        dense: &[T],
    ) -> Result<Self, TensorError> {
        let packed = layout::pack_planes(shape, dense)?;
        Self::from_bytes_in(pool, shape, T::DTYPE, bytemuck::cast_slice(&packed))
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Element byte width.
    pub fn elem_size(&self) -> usize {
        self.dtype.size_bytes()
    }

    pub fn cstep(&self) -> usize {
        self.shape.cstep(self.dtype)
    }

    /// Elements including plane padding.
    pub fn total_elements(&self) -> usize {
        self.shape.total_elements(self.dtype)
    }

    pub fn size_bytes(&self) -> usize {
        self.shape.size_bytes(self.dtype)
    }

    /// `true` when there is no storage or the shape holds no elements.
    pub fn is_empty(&self) -> bool {
        self.storage.is_none() || self.shape.is_empty()
    }

    /// Number of handles sharing this allocation; 0 when empty.
    pub fn reference_count(&self) -> usize {
        self.storage.as_ref().map_or(0, Arc::strong_count)
    }

    /// `true` if both handles view the same allocation.
    pub fn shares_storage_with(&self, other: &RamTensor) -> bool {
        match (&self.storage, &other.storage) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Snapshot of the quantization metadata.
    pub fn quant(&self) -> QuantParams {
        self.quant.read().map(|q| *q).unwrap_or_default()
    }

    /// Replaces the quantization metadata, visible through every clone of
    /// this handle.
    pub fn set_quant(&self, quant: QuantParams) {
        if let Ok(mut q) = self.quant.write() {
            *q = quant;
        }
    }

    /// Records an observed value range, keeping scale and zero point.
    pub fn set_range(&self, min: f32, max: f32) {
        if let Ok(mut q) = self.quant.write() {
            q.min = min;
            q.max = max;
        }
    }

    fn storage(&self, op: &'static str) -> Result<&Storage, TensorError> {
        match &self.storage {
            Some(storage) if !self.shape.is_empty() => Ok(storage),
            _ => Err(TensorError::EmptyTensor { op }),
        }
    }

    fn check_dtype<T: Element>(&self) -> Result<(), TensorError> {
        if T::DTYPE != self.dtype {
            return Err(TensorError::DTypeMismatch {
                expected: T::DTYPE,
                actual: self.dtype,
            });
        }
        Ok(())
    }

    /// Runs `f` over this view's bytes.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R, TensorError> {
        let storage = self.storage("read")?;
        let guard = storage.read().map_err(|_| TensorError::BufferPoisoned)?;
        let end = self.offset + self.size_bytes();
        Ok(f(&guard.as_slice()[self.offset..end]))
    }

    /// Runs `f` over this view's bytes, mutably.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R, TensorError> {
        let storage = self.storage("write")?;
        let mut guard = storage.write().map_err(|_| TensorError::BufferPoisoned)?;
        let end = self.offset + self.size_bytes();
        Ok(f(&mut guard.as_mut_slice()[self.offset..end]))
    }

    /// Runs `f` over this view's elements (plane padding included).
    pub fn with_slice<T: Element, R>(&self, f: impl FnOnce(&[T]) -> R) -> Result<R, TensorError> {
        self.check_dtype::<T>()?;
        self.with_bytes(|bytes| bytemuck::try_cast_slice(bytes).map(f))?
            .map_err(TensorError::Layout)
    }

    /// Runs `f` over this view's elements, mutably.
    pub fn with_slice_mut<T: Element, R>(
        &self,
        f: impl FnOnce(&mut [T]) -> R,
    ) -> Result<R, TensorError> {
        self.check_dtype::<T>()?;
        self.with_bytes_mut(|bytes| bytemuck::try_cast_slice_mut(bytes).map(f))?
            .map_err(TensorError::Layout)
    }

    /// Runs `f` over row `y` of the first plane.
    pub fn with_row<T: Element, R>(
        &self,
        y: usize,
        f: impl FnOnce(&[T]) -> R,
    ) -> Result<R, TensorError> {
        let (start, _) = row_range(self.shape, "row", y, 1)?;
        let width = self.shape.w;
        self.with_slice(|s: &[T]| f(&s[start..start + width]))
    }

    /// Copies out every element, plane padding included.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, TensorError> {
        self.with_slice(|s: &[T]| s.to_vec())
    }

    /// Copies out dense `N*C*H*W` values with plane padding removed.
    pub fn to_dense_vec<T: Element>(&self) -> Result<Vec<T>, TensorError> {
        let shape = self.shape;
        self.with_slice(|s: &[T]| layout::unpack_planes(shape, s))
    }

    /// Copies `bytes` into the tensor. The length must equal
    /// [`size_bytes`](Self::size_bytes) exactly; otherwise nothing is
    /// written.
    pub fn write_data(&self, bytes: &[u8]) -> Result<(), TensorError> {
        let expected = self.size_bytes();
        self.storage("write_data")?;
        if bytes.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        self.with_bytes_mut(|dst| dst.copy_from_slice(bytes))
    }

    /// Typed [`write_data`](Self::write_data).
    pub fn write_slice<T: Element>(&self, values: &[T]) -> Result<(), TensorError> {
        self.check_dtype::<T>()?;
        self.write_data(bytemuck::cast_slice(values))
    }

    /// Sets every element (plane padding included) to `value`.
    pub fn fill<T: Element>(&self, value: T) -> Result<(), TensorError> {
        self.with_slice_mut(|s: &mut [T]| s.fill(value))
    }

    /// Deep copy into a fresh allocation from the same arena.
    ///
    /// Copying an empty tensor yields an empty tensor.
    pub fn clone_deep(&self) -> Result<Self, TensorError> {
        let Some(storage) = self.storage.as_ref().filter(|_| !self.shape.is_empty()) else {
            return Ok(Self::empty());
        };
        let (pool, bytes) = {
            let guard = storage.read().map_err(|_| TensorError::BufferPoisoned)?;
            let end = self.offset + self.size_bytes();
            (guard.pool(), guard.as_slice()[self.offset..end].to_vec())
        };
        let copy = Self::from_bytes_in(&pool, self.shape, self.dtype, &bytes)?;
        copy.set_quant(self.quant());
        Ok(copy)
    }

    fn alias(
        &self,
        op: &'static str,
        elem_offset: usize,
        shape: Shape,
    ) -> Result<Self, TensorError> {
        let storage = Arc::clone(self.storage(op)?);
        Ok(Self {
            shape,
            dtype: self.dtype,
            storage: Some(storage),
            offset: self.offset + elem_offset * self.elem_size(),
            quant: Arc::default(),
        })
    }

    /// Aliasing view of channel plane `c`, shaped `(1, 1, H, W)`.
    pub fn grep_channel(&self, c: usize) -> Result<Self, TensorError> {
        let (off, shape) = channel_range(self.shape, self.dtype, "grep_channel", c, 1)?;
        self.alias("grep_channel", off, shape)
    }

    /// Aliasing view of planes `c..c+count`, shaped `(1, count, H, W)`.
    pub fn grep_channel_range(&self, c: usize, count: usize) -> Result<Self, TensorError> {
        let (off, shape) =
            channel_range(self.shape, self.dtype, "grep_channel_range", c, count)?;
        self.alias("grep_channel_range", off, shape)
    }

    /// Aliasing view of rows `y..y+rows` of the first plane.
    pub fn grep_row_range(&self, y: usize, rows: usize) -> Result<Self, TensorError> {
        let (off, shape) = row_range(self.shape, "grep_row_range", y, rows)?;
        self.alias("grep_row_range", off, shape)
    }

    /// Aliasing view of the flat element range `x..x+count`.
    pub fn grep_range(&self, x: usize, count: usize) -> Result<Self, TensorError> {
        let (off, shape) = flat_range(self.shape, self.dtype, "grep_range", x, count)?;
        self.alias("grep_range", off, shape)
    }

    /// Drops this handle's share of the allocation and resets the handle to
    /// the empty state. Calling it again is a no-op.
    pub fn release(&mut self) {
        if self.storage.take().is_some() {
            self.shape = Shape::default();
            self.offset = 0;
            self.quant = Arc::default();
        }
    }
}

impl Default for RamTensor {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for RamTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RamTensor")
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .field("offset", &self.offset)
            .field("refs", &self.reference_count())
            .finish()
    }
}
