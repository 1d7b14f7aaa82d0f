// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The operator contract and the closed set of operators a schedule can run.

use crate::{CpuConvOp, KpuConvOp, OperatorError, QuantizeOp};
use tensor_core::{DType, ParamRef, RamTensor, Shape};

/// Validate-then-compute contract shared by every operator.
///
/// Operators borrow their tensors; they are built right before use, run
/// once and dropped. Constructors call [`check_output_dims`] so a built
/// operator is always valid.
///
/// [`check_output_dims`]: Operator::check_output_dims
pub trait Operator {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Validates the output tensor against the inputs and parameters.
    fn check_output_dims(&self) -> Result<(), OperatorError>;

    /// Writes the result into the pre-allocated output.
    fn compute(&mut self) -> Result<(), OperatorError>;
}

/// One step of a schedule.
#[derive(Debug)]
pub enum Operation<'a> {
    CpuConv(CpuConvOp<'a>),
    KpuConv(KpuConvOp<'a>),
    Quantize(QuantizeOp<'a>),
}

impl Operation<'_> {
    fn as_operator(&mut self) -> &mut dyn Operator {
        match self {
            Operation::CpuConv(op) => op,
            Operation::KpuConv(op) => op,
            Operation::Quantize(op) => op,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::CpuConv(op) => op.name(),
            Operation::KpuConv(op) => op.name(),
            Operation::Quantize(op) => op.name(),
        }
    }

    /// Runs the operator.
    pub fn compute(&mut self) -> Result<(), OperatorError> {
        let op = self.as_operator();
        tracing::debug!("compute {}", op.name());
        op.compute()
    }
}

impl<'a> From<CpuConvOp<'a>> for Operation<'a> {
    fn from(op: CpuConvOp<'a>) -> Self {
        Operation::CpuConv(op)
    }
}

impl<'a> From<KpuConvOp<'a>> for Operation<'a> {
    fn from(op: KpuConvOp<'a>) -> Self {
        Operation::KpuConv(op)
    }
}

impl<'a> From<QuantizeOp<'a>> for Operation<'a> {
    fn from(op: QuantizeOp<'a>) -> Self {
        Operation::Quantize(op)
    }
}

/// Rejects an output that shares an allocation with any input.
pub(crate) fn ensure_distinct(
    op: &'static str,
    output: &RamTensor,
    inputs: &[ParamRef<'_>],
) -> Result<(), OperatorError> {
    if inputs.iter().any(|p| p.shares_storage_with(output)) {
        return Err(OperatorError::AliasedOutput { op });
    }
    Ok(())
}

pub(crate) fn ensure_shape(
    op: &'static str,
    expected: Shape,
    actual: Shape,
) -> Result<(), OperatorError> {
    if expected != actual {
        return Err(OperatorError::ShapeMismatch {
            op,
            expected,
            actual,
        });
    }
    Ok(())
}

pub(crate) fn ensure_dtype(
    op: &'static str,
    what: &str,
    expected: DType,
    actual: DType,
) -> Result<(), OperatorError> {
    if expected != actual {
        return Err(OperatorError::ParamMismatch {
            op,
            reason: format!("{what} must be {expected}, got {actual}"),
        });
    }
    Ok(())
}
