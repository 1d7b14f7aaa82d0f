// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for tensor construction and access.

use crate::DType;

/// Errors that can occur while creating, binding, slicing or accessing a
/// tensor. None of them leave a tensor partially written.
#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    /// The arena could not provide a buffer.
    #[error("tensor allocation failed: {0}")]
    Allocation(#[from] memory_manager::MemoryError),

    /// The provided buffer size does not match the tensor's byte size.
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// An immutable view was bound a second time.
    #[error("immutable tensor is already bound to data")]
    AlreadyBound,

    /// An immutable view was read before being bound.
    #[error("immutable tensor has no data bound")]
    Unbound,

    /// The tensor has no backing buffer or zero elements.
    #[error("{op} on an empty tensor")]
    EmptyTensor { op: &'static str },

    /// A slice would extend past its parent.
    #[error("{op}: range {start}..{start}+{count} exceeds limit {limit}")]
    SliceOutOfBounds {
        op: &'static str,
        start: usize,
        count: usize,
        limit: usize,
    },

    /// Typed access with a scalar type that does not match the dtype.
    #[error("dtype mismatch: tensor is {actual}, access requested {expected}")]
    DTypeMismatch { expected: DType, actual: DType },

    /// A writer panicked while holding the buffer lock.
    #[error("tensor buffer lock poisoned")]
    BufferPoisoned,

    /// The bytes could not be reinterpreted as the requested scalar type.
    #[error("byte layout error: {0:?}")]
    Layout(bytemuck::PodCastError),
}
