// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # operators
//!
//! The operators a compiled schedule runs.
//!
//! Every operator follows the same contract ([`Operator`]): it borrows its
//! input, output and parameter tensors, validates them when constructed,
//! and writes into the pre-allocated output when computed.
//!
//! - [`CpuConvOp`]: f32 2-D convolution with stride, dilation and padding.
//! - [`KpuConvOp`]: 8-bit convolution offloaded to the accelerator.
//! - [`QuantizeOp`]: affine and symmetric (de)quantization.

mod conv;
mod cpu_conv;
mod error;
mod kpu_conv;
mod operator;
mod quantize;

pub use conv::ConvParam;
pub use cpu_conv::CpuConvOp;
pub use error::OperatorError;
pub use kpu_conv::{kernel_passes, quantize_multiplier, KpuConvOp, Requant, RowPacking};
pub use operator::{Operation, Operator};
pub use quantize::{QuantizeOp, QuantizeParam, QuantizeStrategy};
