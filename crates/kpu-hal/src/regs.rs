// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! KPU register map: addresses, offsets and the control register words.

/// Base address of the KPU configuration registers.
pub const AI_BASE_ADDR: usize = 0x4080_0000;

/// Base address of the on-chip I/O memory window.
pub const AI_IO_BASE_ADDR: usize = 0x4060_0000;

/// The I/O memory is addressed in 64-byte rows.
pub const IO_ROW_BYTES: usize = 64;

/// Number of rows in the I/O memory window. Also the exclusive upper bound
/// of the image address fields.
pub const IO_MEMORY_ROWS: usize = 0x8000;

/// Size of the on-chip I/O memory window (2 MiB).
pub const IO_MEMORY_BYTES: usize = IO_MEMORY_ROWS * IO_ROW_BYTES;

/// Capacity of the on-chip kernel cache.
pub const KERNEL_CACHE_BYTES: usize = 16 * 1024;

/// Number of words in one layer descriptor.
pub const LAYER_ARGUMENT_WORDS: usize = 12;

/// Memory-mapped KPU registers, each 64 bits wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum KpuRegister {
    /// Write-only FIFO receiving layer descriptor words.
    LayerArgumentFifo = 0x00,
    InterruptStatus = 0x08,
    InterruptRaw = 0x10,
    InterruptMask = 0x18,
    InterruptClear = 0x20,
    FifoThreshold = 0x28,
    /// Read side of the output FIFO, drained by DMA.
    FifoDataOut = 0x30,
    FifoCtrl = 0x38,
    EightBitMode = 0x40,
}

impl KpuRegister {
    /// Offset from [`AI_BASE_ADDR`].
    pub fn offset(self) -> usize {
        self as usize
    }

    /// Absolute bus address.
    pub fn address(self) -> usize {
        AI_BASE_ADDR + self.offset()
    }
}

register_word! {
    /// Layout of the interrupt status, raw, mask and clear registers.
    InterruptBits {
        calc_done_int: 1 @ 0,
        layer_cfg_almost_empty_int: 1 @ 1,
        layer_cfg_almost_full_int: 1 @ 2,
    }
}

register_word! {
    /// Configuration FIFO fill thresholds.
    FifoThreshold {
        fifo_full_threshold: 4 @ 0,
        fifo_empty_threshold: 4 @ 4,
    }
}

register_word! {
    EightBitMode {
        eight_bit_mode: 1 @ 0,
    }
}

impl InterruptBits {
    /// All three interrupt sources set.
    pub fn all() -> Self {
        Self {
            calc_done_int: 1,
            layer_cfg_almost_empty_int: 1,
            layer_cfg_almost_full_int: 1,
        }
    }
}
