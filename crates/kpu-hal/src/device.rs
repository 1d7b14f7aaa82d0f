// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The narrow device interface and the accelerator handle built on it.

use crate::layer::LayerArgument;
use crate::regs::{EightBitMode, FifoThreshold, InterruptBits, KpuRegister};
use crate::HalError;

/// A DMA channel handle returned by [`KpuDevice::dma_open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DmaChannel(pub u8);

/// Peripheral request lines a DMA channel can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DmaRequest {
    /// The KPU output FIFO.
    KpuRx = 22,
}

impl DmaRequest {
    /// The request-select code written to the system controller.
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// A peripheral-to-memory transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmaTransfer {
    /// Register read on every element.
    pub source: KpuRegister,
    pub source_increment: bool,
    pub dest_increment: bool,
    /// Bytes per element.
    pub element_size: usize,
    /// Elements to move.
    pub count: usize,
    pub burst_size: usize,
}

impl DmaTransfer {
    /// Drains `count` 8-byte words from the KPU output FIFO into
    /// consecutive host memory.
    pub fn kpu_output(count: usize) -> Self {
        Self {
            source: KpuRegister::FifoDataOut,
            source_increment: false,
            dest_increment: true,
            element_size: 8,
            count,
            burst_size: 8,
        }
    }

    /// Bytes written to the destination.
    pub fn total_bytes(&self) -> usize {
        self.element_size * self.count
    }
}

/// Parameter blocks the KPU fetches by device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamRegion {
    /// Packed kernel bytes.
    Kernels,
    /// One batch-norm word per output channel.
    BatchNorm,
    /// The 16-segment activation table.
    Activation,
}

/// Access to one KPU and its DMA controller.
///
/// Implementations wrap either the real memory-mapped hardware or a model
/// of it such as [`SimulatedKpu`](crate::SimulatedKpu).
pub trait KpuDevice: Send {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Writes a 64-bit KPU register.
    fn write_register(&mut self, reg: KpuRegister, value: u64) -> Result<(), HalError>;

    /// The on-chip I/O memory window the KPU reads input images from.
    fn io_memory_mut(&mut self) -> &mut [u8];

    /// Places a parameter block where the KPU can fetch it and returns its
    /// device address. Staging a region again replaces its previous content.
    fn stage_parameters(&mut self, region: ParamRegion, bytes: &[u8]) -> Result<u32, HalError>;

    fn dma_open(&mut self) -> Result<DmaChannel, HalError>;

    fn dma_set_request_source(
        &mut self,
        channel: DmaChannel,
        request: DmaRequest,
    ) -> Result<(), HalError>;

    /// Performs `transfer` into `dest`, blocking until it completes.
    fn dma_transmit(
        &mut self,
        channel: DmaChannel,
        transfer: &DmaTransfer,
        dest: &mut [u8],
    ) -> Result<(), HalError>;

    fn dma_close(&mut self, channel: DmaChannel) -> Result<(), HalError>;
}

/// The process-wide accelerator handle.
///
/// Acquired once when a session is created and lent mutably to each
/// accelerator operator in turn, so only one layer is ever in flight.
pub struct Accelerator {
    device: Box<dyn KpuDevice>,
    layers_run: u64,
}

impl Accelerator {
    pub fn new(device: impl KpuDevice + 'static) -> Self {
        Self {
            device: Box::new(device),
            layers_run: 0,
        }
    }

    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    /// Layers completed through [`run_layer`](Self::run_layer).
    pub fn layers_run(&self) -> u64 {
        self.layers_run
    }

    /// Copies `bytes` into the I/O memory window at `offset`.
    pub fn write_io(&mut self, offset: usize, bytes: &[u8]) -> Result<(), HalError> {
        let window = self.device.io_memory_mut();
        let capacity = window.len();
        let end = offset
            .checked_add(bytes.len())
            .filter(|&end| end <= capacity)
            .ok_or(HalError::IoWindowOverflow {
                offset,
                len: bytes.len(),
                capacity,
            })?;
        window[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Mutable access to the I/O memory window for in-place packing.
    pub fn io_memory_mut(&mut self) -> &mut [u8] {
        self.device.io_memory_mut()
    }

    pub fn stage(&mut self, region: ParamRegion, bytes: &[u8]) -> Result<u32, HalError> {
        self.device.stage_parameters(region, bytes)
    }

    /// Runs one layer: programs the control registers, pushes the
    /// descriptor into the configuration FIFO and drains the output FIFO
    /// into `output` through DMA.
    ///
    /// `output` must hold `round_up(dma_total_byte + 1, 8)` bytes.
    pub fn run_layer(&mut self, layer: &LayerArgument, output: &mut [u8]) -> Result<(), HalError> {
        let dev = &mut self.device;

        dev.write_register(KpuRegister::InterruptClear, InterruptBits::all().to_word())?;
        dev.write_register(
            KpuRegister::EightBitMode,
            EightBitMode { eight_bit_mode: 1 }.to_word(),
        )?;
        dev.write_register(
            KpuRegister::FifoThreshold,
            FifoThreshold {
                fifo_full_threshold: 10,
                fifo_empty_threshold: 1,
            }
            .to_word(),
        )?;
        dev.write_register(
            KpuRegister::InterruptMask,
            InterruptBits {
                calc_done_int: 0,
                ..InterruptBits::all()
            }
            .to_word(),
        )?;

        for word in layer.words() {
            dev.write_register(KpuRegister::LayerArgumentFifo, word)?;
        }

        let transfer =
            DmaTransfer::kpu_output((layer.dma_parameter.dma_total_byte as usize + 8) / 8);
        if output.len() < transfer.total_bytes() {
            return Err(HalError::InvalidTransfer(format!(
                "destination holds {} bytes, transfer needs {}",
                output.len(),
                transfer.total_bytes()
            )));
        }

        let channel = dev.dma_open()?;
        let result = dev
            .dma_set_request_source(channel, DmaRequest::KpuRx)
            .and_then(|()| dev.dma_transmit(channel, &transfer, output));
        dev.dma_close(channel)?;
        result?;

        self.layers_run += 1;
        tracing::debug!(
            "{}: layer done, {} bytes drained",
            self.device.name(),
            transfer.total_bytes()
        );
        Ok(())
    }
}

impl std::fmt::Debug for Accelerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accelerator")
            .field("device", &self.device.name())
            .field("layers_run", &self.layers_run)
            .finish()
    }
}
