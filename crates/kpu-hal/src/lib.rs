// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # kpu-hal
//!
//! Access to the KPU, the fixed-function 8-bit convolution engine.
//!
//! This crate provides:
//! - The register map ([`KpuRegister`]) and every descriptor word as a typed
//!   struct with exact bit positions.
//! - [`LayerArgument`]: the 12-word layer descriptor in FIFO order.
//! - [`BatchNormEntry`] and [`ActivationTable`]: the per-channel
//!   requantization words and the 16-segment activation table.
//! - [`KpuDevice`]: the narrow interface a board or model implements.
//! - [`Accelerator`]: the process-wide handle that runs one layer at a time.
//! - [`SimulatedKpu`]: a functional model for hosts without the hardware.
//!
//! # Running a layer
//!
//! ```text
//! write_io(input)          stage(Kernels | BatchNorm | Activation)
//!        │                          │
//!        └──────────┬───────────────┘
//!                   ▼
//!        run_layer(&LayerArgument, &mut out)
//!          ├─ interrupt clear, 8-bit mode, FIFO thresholds, mask
//!          ├─ 12 descriptor words ──► LayerArgumentFifo
//!          └─ DMA: FifoDataOut ──► out   (count = (total + 8) / 8 words)
//! ```

#[macro_use]
mod macros;

mod device;
mod error;
mod layer;
mod regs;
mod sim;
mod tables;

pub use device::{Accelerator, DmaChannel, DmaRequest, DmaTransfer, KpuDevice, ParamRegion};
pub use error::HalError;
pub use layer::{
    ConvValue, ConvValue2, DmaParameter, ImageAddr, ImageChannelNum, ImageSize,
    InterruptEnable, KernelCalcTypeCfg, KernelLoadCfg, KernelOffset, KernelPoolTypeCfg,
    LayerArgument, WriteBackCfg,
};
pub use regs::{
    EightBitMode, FifoThreshold, InterruptBits, KpuRegister, AI_BASE_ADDR, AI_IO_BASE_ADDR,
    IO_MEMORY_BYTES, IO_MEMORY_ROWS, IO_ROW_BYTES, KERNEL_CACHE_BYTES, LAYER_ARGUMENT_WORDS,
};
pub use sim::{SimProbe, SimRecord, SimulatedKpu};
pub use tables::{
    batchnorm_entries, batchnorm_table_bytes, ActivateParam, ActivationTable, BatchNormEntry,
    ACTIVATION_SEGMENTS, ACTIVATION_TABLE_BYTES,
};
