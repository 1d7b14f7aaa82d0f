// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! The tensor memory model of the inference runtime.
//!
//! This crate provides:
//! - [`Shape`]: an (N, C, H, W) descriptor and the channel-stride rule.
//! - [`DType`]: supported element types, and [`Element`] for typed access.
//! - [`RamTensor`]: an owned tensor backed by an arena allocation, with
//!   aliasing slices that share the allocation through an `Arc`.
//! - [`FlashTensor`]: an immutable view bound once to caller-owned bytes.
//! - [`ParamRef`]: a weight/bias reference over either variant.
//! - [`QuantParams`]: range, scale and zero point of fixed-point tensors.
//!
//! # Layout
//! Element `(n, c, h, w)` sits at `(n*C + c) * cstep + h*W + w`, where
//! `cstep = align(H*W*E, 16) / E` when `C > 1` and `H*W` otherwise. Every
//! channel plane of a multi-channel tensor therefore starts on a 16-byte
//! boundary, which the accelerator DMA path requires. Padding elements are
//! never read as data.

mod dtype;
mod error;
mod flash;
pub mod layout;
mod param;
mod quant;
mod shape;
mod tensor;

pub use dtype::{DType, Element};
pub use error::TensorError;
pub use flash::FlashTensor;
pub use param::ParamRef;
pub use quant::QuantParams;
pub use shape::{Shape, PLANE_ALIGN};
pub use tensor::RamTensor;
