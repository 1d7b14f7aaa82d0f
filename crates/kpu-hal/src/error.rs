// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for accelerator access.

use crate::{DmaChannel, ParamRegion};

/// Faults raised by a [`KpuDevice`](crate::KpuDevice).
///
/// Any of these aborts the current inference. The configuration FIFO is
/// write-only, so a partially pushed descriptor cannot be rolled back.
#[derive(Debug, thiserror::Error)]
pub enum HalError {
    /// A write to the on-chip I/O memory window would overflow it.
    #[error("I/O memory overflow: {len} bytes at offset {offset} exceed {capacity}")]
    IoWindowOverflow {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    /// Parameter staging failed.
    #[error("cannot stage {len} bytes of {region:?} parameters: {reason}")]
    Staging {
        region: ParamRegion,
        len: usize,
        reason: String,
    },

    /// No DMA channel is free.
    #[error("no free DMA channel")]
    NoFreeDmaChannel,

    /// A DMA call named a channel that is not open.
    #[error("DMA channel {0:?} is not open")]
    DmaChannelClosed(DmaChannel),

    /// The transfer description is not one the device can perform.
    #[error("invalid DMA transfer: {0}")]
    InvalidTransfer(String),

    /// The transfer did not complete.
    #[error("DMA transfer failed: {0}")]
    DmaFault(String),

    /// The device was handed a descriptor it cannot execute.
    #[error("invalid layer descriptor: {0}")]
    InvalidDescriptor(String),
}
