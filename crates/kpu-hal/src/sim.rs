// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! A functional model of the KPU for host runs and tests.
//!
//! The model executes each descriptor as soon as its twelfth word reaches
//! the configuration FIFO: it reads the input image from the I/O window
//! using the descriptor's row/channel grouping, fetches kernels and tables
//! from staged parameter blocks, and queues the 8-bit results for DMA.
//! Timing, interrupts and the write-back image are not modelled.

use crate::layer::LayerArgument;
use crate::macros::sign_extend;
use crate::regs::{IO_MEMORY_BYTES, IO_ROW_BYTES, LAYER_ARGUMENT_WORDS};
use crate::tables::{batchnorm_entries, ActivationTable, ACTIVATION_TABLE_BYTES};
use crate::{
    Accelerator, DmaChannel, DmaRequest, DmaTransfer, HalError, KpuDevice, KpuRegister,
    ParamRegion,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

const DMA_CHANNELS: u8 = 6;

/// Everything the simulator observed, in order.
#[derive(Debug, Default, Clone)]
pub struct SimRecord {
    pub register_writes: Vec<(KpuRegister, u64)>,
    pub layers: Vec<LayerArgument>,
    pub dma_transfers: Vec<DmaTransfer>,
    pub dma_requests: Vec<DmaRequest>,
}

/// Read-only window onto a [`SimulatedKpu`]'s record, usable after the
/// device has been moved into an [`Accelerator`].
#[derive(Debug, Clone)]
pub struct SimProbe {
    record: Arc<Mutex<SimRecord>>,
}

impl SimProbe {
    pub fn snapshot(&self) -> SimRecord {
        self.record.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn layers(&self) -> Vec<LayerArgument> {
        self.snapshot().layers
    }

    pub fn register_writes(&self) -> Vec<(KpuRegister, u64)> {
        self.snapshot().register_writes
    }

    pub fn dma_transfers(&self) -> Vec<DmaTransfer> {
        self.snapshot().dma_transfers
    }
}

/// Software model of the KPU and its DMA path.
pub struct SimulatedKpu {
    io_memory: Vec<u8>,
    staged: HashMap<ParamRegion, (u32, Vec<u8>)>,
    fifo: Vec<u64>,
    output: VecDeque<u8>,
    channels: HashMap<DmaChannel, Option<DmaRequest>>,
    dma_fault: bool,
    record: Arc<Mutex<SimRecord>>,
}

impl SimulatedKpu {
    pub fn new() -> Self {
        Self {
            io_memory: vec![0; IO_MEMORY_BYTES],
            staged: HashMap::new(),
            fifo: Vec::with_capacity(LAYER_ARGUMENT_WORDS),
            output: VecDeque::new(),
            channels: HashMap::new(),
            dma_fault: false,
            record: Arc::default(),
        }
    }

    /// Makes every DMA transfer fail, for exercising error paths.
    pub fn with_dma_fault(mut self) -> Self {
        self.dma_fault = true;
        self
    }

    pub fn probe(&self) -> SimProbe {
        SimProbe {
            record: Arc::clone(&self.record),
        }
    }

    fn record(&self, f: impl FnOnce(&mut SimRecord)) {
        if let Ok(mut r) = self.record.lock() {
            f(&mut r);
        }
    }

    fn region_address(region: ParamRegion) -> u32 {
        match region {
            ParamRegion::Kernels => 0x8000_0000,
            ParamRegion::BatchNorm => 0x8040_0000,
            ParamRegion::Activation => 0x8080_0000,
        }
    }

    fn staged_at(&self, addr: u64, len: usize, what: &str) -> Result<&[u8], HalError> {
        self.staged
            .values()
            .find(|(a, _)| u64::from(*a) == addr)
            .map(|(_, bytes)| bytes.as_slice())
            .filter(|bytes| bytes.len() >= len)
            .ok_or_else(|| {
                HalError::InvalidDescriptor(format!(
                    "{what}: no staged block of {len} bytes at {addr:#x}"
                ))
            })
    }

    fn execute(&mut self, layer: &LayerArgument) -> Result<(), HalError> {
        let ci = layer.image_channel_num.i_ch_num as usize + 1;
        let co = layer.image_channel_num.o_ch_num as usize + 1;
        let wi = layer.image_size.i_row_wid as i64 + 1;
        let hi = layer.image_size.i_col_high as i64 + 1;
        let wo = layer.image_size.o_row_wid as usize + 1;
        let ho = layer.image_size.o_col_high as usize + 1;

        let pool = &layer.kernel_pool_type_cfg;
        let k: usize = match pool.kernel_type {
            0 => 1,
            1 => 3,
            other => {
                return Err(HalError::InvalidDescriptor(format!("kernel type {other}")));
            }
        };
        let stride: i64 = match pool.pool_type {
            0 => 1,
            6 => 2,
            other => return Err(HalError::InvalidDescriptor(format!("pool type {other}"))),
        };
        let pad = (k / 2) as i64;
        let pad_value = pool.pad_value as i64;

        let calc = &layer.kernel_calc_type_cfg;
        let group = calc.coef_group as usize;
        if !matches!(group, 1 | 2 | 4) {
            return Err(HalError::InvalidDescriptor(format!("coef group {group}")));
        }
        let channel_padding = IO_ROW_BYTES / group;
        let row_switch = calc.row_switch_addr as usize * IO_ROW_BYTES;
        let channel_switch = calc.channel_switch_addr as usize * IO_ROW_BYTES;
        let src_base = layer.image_addr.image_src_addr as usize * IO_ROW_BYTES;

        let kernels = self.staged_at(
            layer.kernel_load_cfg.para_start_addr,
            co * ci * k * k,
            "kernels",
        )?;
        let bn = batchnorm_entries(self.staged_at(pool.bwsx_base_addr, co * 8, "batchnorm")?);
        let act = ActivationTable::from_bytes(self.staged_at(
            calc.active_addr,
            ACTIVATION_TABLE_BYTES,
            "activation",
        )?)
        .ok_or_else(|| HalError::InvalidDescriptor("activation table".into()))?;

        let arg_w = sign_extend(layer.conv_value.arg_w, 24);
        let arg_x = sign_extend(layer.conv_value.arg_x, 24);
        let arg_add = sign_extend(layer.conv_value2.arg_add, 40);

        let io = &self.io_memory;
        let pixel = |ic: usize, y: i64, x: i64| -> Result<i64, HalError> {
            if y < 0 || x < 0 || y >= hi || x >= wi {
                return Ok(pad_value);
            }
            let addr = src_base
                + (ic / group) * channel_switch
                + (ic % group) * channel_padding
                + y as usize * row_switch
                + x as usize;
            io.get(addr).map(|&v| i64::from(v)).ok_or(HalError::IoWindowOverflow {
                offset: addr,
                len: 1,
                capacity: io.len(),
            })
        };

        let total = layer.output_bytes();
        if total != co * ho * wo {
            return Err(HalError::InvalidDescriptor(format!(
                "dma_total_byte + 1 = {total}, image is {co}x{ho}x{wo}"
            )));
        }

        let mut out = Vec::with_capacity(total.next_multiple_of(8));
        for oc in 0..co {
            for oy in 0..ho as i64 {
                for ox in 0..wo as i64 {
                    let (cy, cx) = (oy * stride, ox * stride);
                    let mut acc = 0i64;
                    for ic in 0..ci {
                        let (mut xw, mut sum_w, mut sum_x) = (0i64, 0i64, 0i64);
                        for ky in 0..k {
                            for kx in 0..k {
                                let x = pixel(ic, cy + ky as i64 - pad, cx + kx as i64 - pad)?;
                                let w = i64::from(kernels[((oc * ci + ic) * k + ky) * k + kx]);
                                xw += x * w;
                                sum_w += w;
                                sum_x += x;
                            }
                        }
                        // Zero-point correction is applied per input channel.
                        acc += xw - arg_w * sum_w - arg_x * sum_x + arg_add;
                    }
                    out.push(act.apply(bn[oc].apply(acc)));
                }
            }
        }
        out.resize(total.next_multiple_of(8), 0);
        self.output.extend(out);
        Ok(())
    }
}

impl Default for SimulatedKpu {
    fn default() -> Self {
        Self::new()
    }
}

impl KpuDevice for SimulatedKpu {
    fn name(&self) -> &str {
        "kpu-sim"
    }

    fn write_register(&mut self, reg: KpuRegister, value: u64) -> Result<(), HalError> {
        self.record(|r| r.register_writes.push((reg, value)));
        if reg != KpuRegister::LayerArgumentFifo {
            return Ok(());
        }

        self.fifo.push(value);
        if self.fifo.len() < LAYER_ARGUMENT_WORDS {
            return Ok(());
        }
        let mut words = [0u64; LAYER_ARGUMENT_WORDS];
        words.copy_from_slice(&self.fifo);
        self.fifo.clear();

        let layer = LayerArgument::from_words(&words);
        self.record(|r| r.layers.push(layer));
        self.execute(&layer)
    }

    fn io_memory_mut(&mut self) -> &mut [u8] {
        &mut self.io_memory
    }

    fn stage_parameters(&mut self, region: ParamRegion, bytes: &[u8]) -> Result<u32, HalError> {
        if bytes.is_empty() {
            return Err(HalError::Staging {
                region,
                len: 0,
                reason: "empty parameter block".into(),
            });
        }
        let addr = Self::region_address(region);
        self.staged.insert(region, (addr, bytes.to_vec()));
        Ok(addr)
    }

    fn dma_open(&mut self) -> Result<DmaChannel, HalError> {
        let channel = (0..DMA_CHANNELS)
            .map(DmaChannel)
            .find(|c| !self.channels.contains_key(c))
            .ok_or(HalError::NoFreeDmaChannel)?;
        self.channels.insert(channel, None);
        Ok(channel)
    }

    fn dma_set_request_source(
        &mut self,
        channel: DmaChannel,
        request: DmaRequest,
    ) -> Result<(), HalError> {
        let slot = self
            .channels
            .get_mut(&channel)
            .ok_or(HalError::DmaChannelClosed(channel))?;
        *slot = Some(request);
        self.record(|r| r.dma_requests.push(request));
        Ok(())
    }

    fn dma_transmit(
        &mut self,
        channel: DmaChannel,
        transfer: &DmaTransfer,
        dest: &mut [u8],
    ) -> Result<(), HalError> {
        match self.channels.get(&channel) {
            None => return Err(HalError::DmaChannelClosed(channel)),
            Some(Some(DmaRequest::KpuRx)) => {}
            Some(None) => {
                return Err(HalError::InvalidTransfer(
                    "channel has no request source".into(),
                ))
            }
        }
        if transfer.source != KpuRegister::FifoDataOut
            || transfer.source_increment
            || !transfer.dest_increment
            || transfer.element_size != 8
        {
            return Err(HalError::InvalidTransfer(format!("{transfer:?}")));
        }
        let need = transfer.total_bytes();
        if dest.len() < need {
            return Err(HalError::InvalidTransfer(format!(
                "destination holds {} bytes, transfer needs {need}",
                dest.len()
            )));
        }
        if self.dma_fault {
            return Err(HalError::DmaFault("injected fault".into()));
        }
        if self.output.len() < need {
            return Err(HalError::DmaFault(format!(
                "output FIFO underrun: {} of {need} bytes available",
                self.output.len()
            )));
        }

        for (d, s) in dest[..need].iter_mut().zip(self.output.drain(..need)) {
            *d = s;
        }
        self.record(|r| r.dma_transfers.push(transfer.clone()));
        Ok(())
    }

    fn dma_close(&mut self, channel: DmaChannel) -> Result<(), HalError> {
        self.channels
            .remove(&channel)
            .map(|_| ())
            .ok_or(HalError::DmaChannelClosed(channel))
    }
}

impl Accelerator {
    /// An accelerator backed by a fresh [`SimulatedKpu`], plus its probe.
    pub fn simulated() -> (Self, SimProbe) {
        let sim = SimulatedKpu::new();
        let probe = sim.probe();
        (Self::new(sim), probe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::*;
    use crate::tables::{batchnorm_table_bytes, BatchNormEntry};

    /// A 1x1 convolution, one channel in and out, over a 1x2 image.
    fn pointwise_layer(acc: &mut Accelerator, kernel: u8) -> LayerArgument {
        let k = acc.stage(ParamRegion::Kernels, &[kernel]).unwrap();
        let bn = BatchNormEntry {
            norm_mul: 1 << 19,
            norm_add: 0,
            norm_shift: 15,
        };
        let b = acc.stage(ParamRegion::BatchNorm, &batchnorm_table_bytes(&[bn])).unwrap();
        let a = acc
            .stage(ParamRegion::Activation, &ActivationTable::identity().to_bytes())
            .unwrap();
        LayerArgument {
            image_size: ImageSize {
                i_row_wid: 1,
                i_col_high: 0,
                o_row_wid: 1,
                o_col_high: 0,
            },
            kernel_pool_type_cfg: KernelPoolTypeCfg {
                bwsx_base_addr: u64::from(b),
                ..Default::default()
            },
            kernel_load_cfg: KernelLoadCfg {
                para_start_addr: u64::from(k),
                ..Default::default()
            },
            kernel_calc_type_cfg: KernelCalcTypeCfg {
                channel_switch_addr: 1,
                row_switch_addr: 1,
                coef_group: 4,
                active_addr: u64::from(a),
                ..Default::default()
            },
            dma_parameter: DmaParameter {
                send_data_out: 1,
                channel_byte_num: 1,
                dma_total_byte: 1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_pointwise_layer() {
        let (mut acc, probe) = Accelerator::simulated();
        acc.write_io(0, &[3, 5]).unwrap();
        let layer = pointwise_layer(&mut acc, 2);

        let mut out = [0u8; 8];
        acc.run_layer(&layer, &mut out).unwrap();
        assert_eq!(&out[..2], &[6, 10]);
        assert_eq!(acc.layers_run(), 1);

        let rec = probe.snapshot();
        assert_eq!(rec.layers, vec![layer]);
        assert_eq!(rec.dma_requests, vec![DmaRequest::KpuRx]);
        assert_eq!(rec.dma_transfers, vec![DmaTransfer::kpu_output(1)]);
    }

    #[test]
    fn test_register_sequence() {
        let (mut acc, probe) = Accelerator::simulated();
        let layer = pointwise_layer(&mut acc, 1);
        let mut out = [0u8; 8];
        acc.run_layer(&layer, &mut out).unwrap();

        let writes = probe.register_writes();
        let regs: Vec<KpuRegister> = writes.iter().map(|(r, _)| *r).collect();
        assert_eq!(
            &regs[..4],
            &[
                KpuRegister::InterruptClear,
                KpuRegister::EightBitMode,
                KpuRegister::FifoThreshold,
                KpuRegister::InterruptMask,
            ]
        );
        assert_eq!(writes[0].1, 0b111);
        assert_eq!(writes[3].1, 0b110);
        let fifo: Vec<u64> = writes[4..].iter().map(|(_, v)| *v).collect();
        assert_eq!(fifo, layer.words().to_vec());
    }

    #[test]
    fn test_dma_fault_propagates() {
        let sim = SimulatedKpu::new().with_dma_fault();
        let mut acc = Accelerator::new(sim);
        let layer = pointwise_layer(&mut acc, 1);
        let mut out = [0u8; 8];
        let err = acc.run_layer(&layer, &mut out).unwrap_err();
        assert!(matches!(err, HalError::DmaFault(_)));
        assert_eq!(acc.layers_run(), 0);
    }

    #[test]
    fn test_missing_parameters_rejected() {
        let (mut acc, _) = Accelerator::simulated();
        let mut layer = pointwise_layer(&mut acc, 1);
        layer.kernel_load_cfg.para_start_addr = 0x1234;
        let mut out = [0u8; 8];
        assert!(matches!(
            acc.run_layer(&layer, &mut out),
            Err(HalError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn test_short_destination_rejected() {
        let (mut acc, _) = Accelerator::simulated();
        let layer = pointwise_layer(&mut acc, 1);
        let mut out = [0u8; 4];
        assert!(matches!(
            acc.run_layer(&layer, &mut out),
            Err(HalError::InvalidTransfer(_))
        ));
    }

    #[test]
    fn test_dma_channel_lifecycle() {
        let mut sim = SimulatedKpu::new();
        let ch = sim.dma_open().unwrap();
        let mut buf = [0u8; 8];
        assert!(matches!(
            sim.dma_transmit(ch, &DmaTransfer::kpu_output(1), &mut buf),
            Err(HalError::InvalidTransfer(_))
        ));
        sim.dma_close(ch).unwrap();
        assert!(matches!(
            sim.dma_close(ch),
            Err(HalError::DmaChannelClosed(_))
        ));
        for _ in 0..DMA_CHANNELS {
            sim.dma_open().unwrap();
        }
        assert!(matches!(sim.dma_open(), Err(HalError::NoFreeDmaChannel)));
    }

    #[test]
    fn test_empty_staging_rejected() {
        let (mut acc, _) = Accelerator::simulated();
        assert!(matches!(
            acc.stage(ParamRegion::Kernels, &[]),
            Err(HalError::Staging { .. })
        ));
    }

    #[test]
    fn test_io_window_bounds() {
        let (mut acc, _) = Accelerator::simulated();
        assert!(acc.write_io(IO_MEMORY_BYTES - 2, &[1, 2]).is_ok());
        assert!(matches!(
            acc.write_io(IO_MEMORY_BYTES - 1, &[1, 2]),
            Err(HalError::IoWindowOverflow { .. })
        ));
    }
}
