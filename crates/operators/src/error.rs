// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for operator construction and execution.

use crate::QuantizeStrategy;
use kpu_hal::HalError;
use tensor_core::{Shape, TensorError};

/// Errors raised while validating or computing an operator.
///
/// Validation errors are raised by the constructors, before any data is
/// touched. `Tensor` and `Hardware` come out of `compute`.
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    /// The output tensor does not have the shape the operator produces.
    #[error("{op}: output shape {actual} does not match expected {expected}")]
    ShapeMismatch {
        op: &'static str,
        expected: Shape,
        actual: Shape,
    },

    /// Input channels differ from the weight's channel count.
    #[error("{op}: input has {input} channels, weights expect {weight}")]
    ChannelMismatch {
        op: &'static str,
        input: usize,
        weight: usize,
    },

    /// The dilated kernel is larger than the padded input.
    #[error("{op}: kernel extent {kernel:?} exceeds padded input {padded:?}")]
    KernelTooLarge {
        op: &'static str,
        kernel: (usize, usize),
        padded: (usize, usize),
    },

    /// The output shares an allocation with one of the inputs.
    #[error("{op}: output aliases an input buffer")]
    AliasedOutput { op: &'static str },

    #[error("quantize strategy {0:?} is not supported")]
    UnsupportedStrategy(QuantizeStrategy),

    /// The parameters are valid in general but not for this backend.
    #[error("{op}: unsupported configuration: {reason}")]
    UnsupportedConfig { op: &'static str, reason: String },

    /// A tensor's element type or size disagrees with the operator parameters.
    #[error("{op}: {reason}")]
    ParamMismatch { op: &'static str, reason: String },

    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error("accelerator fault: {0}")]
    Hardware(#[from] HalError),
}
