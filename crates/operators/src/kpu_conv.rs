// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! 8-bit convolution on the KPU.
//!
//! The operator turns tensor shapes and quantization parameters into one
//! layer descriptor, stages kernels, batch-norm words and the activation
//! table, then for every batch packs the input into the accelerator's I/O
//! memory, runs the layer and unpacks the DMA'd result.

use crate::operator::{ensure_distinct, ensure_dtype, ensure_shape};
use crate::{ConvParam, Operator, OperatorError};
use kpu_hal::{
    batchnorm_table_bytes, Accelerator, ActivationTable, BatchNormEntry, ConvValue, ConvValue2,
    DmaParameter, HalError, ImageAddr, ImageChannelNum, ImageSize, InterruptEnable,
    KernelCalcTypeCfg, KernelLoadCfg, KernelOffset, KernelPoolTypeCfg, LayerArgument,
    ParamRegion, WriteBackCfg, IO_MEMORY_ROWS, IO_ROW_BYTES, KERNEL_CACHE_BYTES,
};
use tensor_core::{layout, DType, FlashTensor, ParamRef, RamTensor};

/// Batch-norm entries always shift by this amount.
const NORM_SHIFT: u64 = 15;

/// How one image row is laid out in the KPU's 64-byte I/O memory rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowPacking {
    /// Bytes reserved per channel inside a row group.
    pub padding: usize,
    /// Channels sharing one 64-byte row.
    pub group: usize,
    /// 64-byte rows per image row.
    pub length: usize,
}

impl RowPacking {
    pub fn for_width(width: usize) -> Self {
        match width {
            0..=16 => Self {
                padding: 16,
                group: 4,
                length: 1,
            },
            17..=32 => Self {
                padding: 32,
                group: 2,
                length: 1,
            },
            _ => Self {
                padding: 64,
                group: 1,
                length: width.div_ceil(IO_ROW_BYTES),
            },
        }
    }

    /// I/O memory rows occupied by `channels` planes of `height` rows.
    pub fn rows(&self, channels: usize, height: usize) -> usize {
        channels.div_ceil(self.group) * self.length * height
    }
}

/// A fixed-point multiplier in Q31 and its binary exponent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requant {
    pub multiplier: i64,
    pub shift: i32,
}

/// Splits `real` into `multiplier * 2^(shift - 31)` with the multiplier in
/// `[2^30, 2^31)`.
///
/// # Examples
/// ```
/// use operators::{quantize_multiplier, Requant};
/// assert_eq!(quantize_multiplier(1.0), Requant { multiplier: 1 << 30, shift: 1 });
/// assert_eq!(quantize_multiplier(0.75), Requant { multiplier: 3 << 29, shift: 0 });
/// ```
pub fn quantize_multiplier(real: f64) -> Requant {
    let (mantissa, mut shift) = frexp(real);
    let mut multiplier = (mantissa * (1i64 << 31) as f64).round() as i64;
    if multiplier == 1 << 31 {
        multiplier /= 2;
        shift += 1;
    }
    Requant { multiplier, shift }
}

fn frexp(x: f64) -> (f64, i32) {
    if x == 0.0 || !x.is_finite() {
        return (x, 0);
    }
    let bits = x.to_bits();
    let exp = ((bits >> 52) & 0x7ff) as i32;
    if exp == 0 {
        // Subnormal: scale into the normal range first.
        let (m, e) = frexp(x * 2f64.powi(64));
        return (m, e - 64);
    }
    let mantissa = f64::from_bits((bits & !(0x7ff << 52)) | (1022 << 52));
    (mantissa, exp - 1022)
}

/// Output channels per kernel-cache load and the number of loads, or
/// `None` if one output channel's kernels exceed the cache.
pub fn kernel_passes(out_channels: usize, kernel_size: usize) -> Option<(usize, usize)> {
    let fit = KERNEL_CACHE_BYTES / kernel_size.max(1);
    if fit == 0 {
        return None;
    }
    let one_time = out_channels.min(fit);
    Some((one_time, out_channels.div_ceil(one_time)))
}

/// Convolution on the accelerator over u8 tensors.
///
/// Holds the accelerator mutably for its lifetime, so a schedule can only
/// have one such operator alive at a time.
#[derive(Debug)]
pub struct KpuConvOp<'a> {
    accel: &'a mut Accelerator,
    param: ConvParam,
    input: &'a RamTensor,
    output: &'a RamTensor,
    weight: &'a FlashTensor<'a>,
    bias: Option<&'a FlashTensor<'a>>,
}

impl<'a> KpuConvOp<'a> {
    const NAME: &'static str = "kpu_conv";

    /// Builds and validates the operator.
    ///
    /// `weight` is a u8 (Cout, Cin, k, k) view; `bias`, if given, holds Cout
    /// i32 values in accumulator units. Quantization parameters are taken
    /// from the input, weight and output tensors.
    pub fn new(
        accel: &'a mut Accelerator,
        param: ConvParam,
        input: &'a RamTensor,
        output: &'a RamTensor,
        weight: &'a FlashTensor<'a>,
        bias: Option<&'a FlashTensor<'a>>,
    ) -> Result<Self, OperatorError> {
        let op = Self {
            accel,
            param,
            input,
            output,
            weight,
            bias,
        };
        op.check_output_dims()?;
        Ok(op)
    }

    fn unsupported(reason: impl Into<String>) -> OperatorError {
        OperatorError::UnsupportedConfig {
            op: Self::NAME,
            reason: reason.into(),
        }
    }

    fn check_geometry(&self) -> Result<(), OperatorError> {
        let p = &self.param;
        let w = self.weight.shape();
        let pad = match w.h {
            1 => 0,
            3 => 2,
            k => return Err(Self::unsupported(format!("{k}x{k} kernel"))),
        };
        if w.w != w.h {
            return Err(Self::unsupported(format!("{}x{} kernel", w.h, w.w)));
        }
        if p.pad_h != pad || p.pad_w != pad {
            return Err(Self::unsupported(format!(
                "padding ({}, {}) with a {}x{} kernel",
                p.pad_h, p.pad_w, w.h, w.w
            )));
        }
        if p.dilation_h > 1 || p.dilation_w > 1 {
            return Err(Self::unsupported("dilation"));
        }
        if p.stride_h != p.stride_w || !matches!(p.stride_h, 1 | 2) {
            return Err(Self::unsupported(format!(
                "stride ({}, {})",
                p.stride_h, p.stride_w
            )));
        }
        Ok(())
    }

    /// Per-channel batch-norm multiplier: the requantization scale in units
    /// of `2^-19`.
    fn norm_mul(&self) -> Result<u64, OperatorError> {
        let in_q = self.input.quant();
        let out_q = self.output.quant();
        let real = f64::from(in_q.scale) * f64::from(self.weight.quant().scale)
            / f64::from(out_q.scale);
        if !real.is_finite() || real <= 0.0 {
            return Err(Self::unsupported(format!("requantization scale {real}")));
        }
        let rq = quantize_multiplier(real);
        let mul = (12 - rq.shift)
            .try_into()
            .ok()
            .and_then(|s: u32| rq.multiplier.checked_shr(s))
            .filter(|m| (1..1 << 24).contains(m))
            .ok_or_else(|| Self::unsupported(format!("requantization scale {real}")))?;
        Ok(mul as u64)
    }

    /// The layer descriptor, with the parameter addresses left at zero.
    pub fn descriptor(&self) -> Result<LayerArgument, OperatorError> {
        let in_shape = self.input.shape();
        let out_shape = self.output.shape();
        let k = self.weight.shape().h;
        let (ci, hi, wi) = (in_shape.c, in_shape.h, in_shape.w);
        let (co, ho, wo) = (out_shape.c, out_shape.h, out_shape.w);

        for (what, value, bits) in [
            ("input channels", ci, 10),
            ("output channels", co, 10),
            ("input width", wi, 10),
            ("input height", hi, 9),
            ("output width", wo, 10),
            ("output height", ho, 9),
        ] {
            if value == 0 || value > 1 << bits {
                return Err(Self::unsupported(format!("{what} {value}")));
            }
        }

        let in_pack = RowPacking::for_width(wi);
        let out_pack = RowPacking::for_width(wo);
        if in_pack.length > 0xF || in_pack.length * hi > 0x7FFF {
            return Err(Self::unsupported(format!("input rows of {wi}x{hi}")));
        }

        let kernel_size = k * k * ci;
        let (one_time, load_time) = kernel_passes(co, kernel_size)
            .filter(|&(_, loads)| loads <= 64)
            .ok_or_else(|| {
                Self::unsupported(format!("kernels of {kernel_size} bytes per channel"))
            })?;

        let out_group = co.min(out_pack.group);
        let out_rows = (IO_ROW_BYTES * out_pack.length * ho * co / out_group + 63) / IO_ROW_BYTES;
        let dst = IO_MEMORY_ROWS
            .checked_sub(out_rows)
            .filter(|&dst| in_pack.rows(ci, hi) <= dst)
            .ok_or_else(|| Self::unsupported("image does not fit the I/O memory"))?;

        let in_zp = i64::from(self.input.quant().zero_point);
        let w_zp = i64::from(self.weight.quant().zero_point);
        if !(0..=255).contains(&in_zp) {
            return Err(Self::unsupported(format!("input zero point {in_zp}")));
        }
        let masked = |v: i64, bits: u32| (v as u64) & ((1u64 << bits) - 1);

        Ok(LayerArgument {
            interrupt_enable: InterruptEnable {
                int_en: 1,
                ..Default::default()
            },
            image_addr: ImageAddr {
                image_src_addr: 0,
                image_dst_addr: dst as u64,
            },
            image_channel_num: ImageChannelNum {
                i_ch_num: (ci - 1) as u64,
                o_ch_num: (co - 1) as u64,
                o_ch_num_coef: (one_time - 1) as u64,
            },
            image_size: ImageSize {
                i_row_wid: (wi - 1) as u64,
                i_col_high: (hi - 1) as u64,
                o_row_wid: (wo - 1) as u64,
                o_col_high: (ho - 1) as u64,
            },
            kernel_pool_type_cfg: KernelPoolTypeCfg {
                kernel_type: u64::from(k == 3),
                pool_type: if self.param.stride_w == 2 { 6 } else { 0 },
                load_para: 1,
                dma_burst_size: 15,
                pad_value: in_zp as u64,
                ..Default::default()
            },
            kernel_load_cfg: KernelLoadCfg {
                load_coor: 1,
                load_time: (load_time - 1) as u64,
                para_size: (kernel_size * one_time) as u64,
                para_start_addr: 0,
            },
            kernel_offset: KernelOffset::default(),
            kernel_calc_type_cfg: KernelCalcTypeCfg {
                channel_switch_addr: (in_pack.length * hi) as u64,
                row_switch_addr: in_pack.length as u64,
                coef_size: 0,
                coef_group: in_pack.group as u64,
                load_act: 1,
                active_addr: 0,
            },
            write_back_cfg: WriteBackCfg {
                wb_channel_switch_addr: (out_pack.length * ho) as u64,
                wb_row_switch_addr: out_pack.length as u64,
                wb_group: out_pack.group as u64,
            },
            conv_value: ConvValue {
                shr_w: 0,
                shr_x: 0,
                arg_w: masked(in_zp, 24),
                arg_x: masked(w_zp, 24),
            },
            conv_value2: ConvValue2 {
                arg_add: masked(in_zp * w_zp * (k * k) as i64, 40),
            },
            dma_parameter: DmaParameter {
                send_data_out: 1,
                channel_byte_num: (wo * ho - 1) as u64,
                dma_total_byte: (wo * ho * co - 1) as u64,
            },
        })
    }

    /// One batch-norm entry per output channel.
    fn batchnorm(&self, co: usize) -> Result<Vec<BatchNormEntry>, OperatorError> {
        let mul = self.norm_mul()?;
        let out_zp = i64::from(self.output.quant().zero_point);
        let bias = match self.bias {
            Some(b) => b.to_dense_vec::<i32>()?,
            None => vec![0; co],
        };
        bias.iter()
            .map(|&b| {
                let add = ((i64::from(b) * mul as i64) >> NORM_SHIFT) + (out_zp << 4);
                let add = i32::try_from(add).map_err(|_| {
                    Self::unsupported(format!("bias {b} overflows the batch-norm offset"))
                })?;
                Ok(BatchNormEntry {
                    norm_mul: mul,
                    norm_add: u64::from(add as u32),
                    norm_shift: NORM_SHIFT,
                })
            })
            .collect()
    }
}

/// Writes one dense (C, H, W) image into I/O memory in the row-grouped
/// layout.
fn pack_input(
    io: &mut [u8],
    image: &[u8],
    (c, h, w): (usize, usize, usize),
    pack: RowPacking,
) -> Result<(), HalError> {
    let capacity = io.len();
    for ic in 0..c {
        let channel_origin =
            (ic / pack.group) * pack.length * h * IO_ROW_BYTES + (ic % pack.group) * pack.padding;
        for y in 0..h {
            let start = channel_origin + y * pack.length * IO_ROW_BYTES;
            let dst = io
                .get_mut(start..start + w)
                .ok_or(HalError::IoWindowOverflow {
                    offset: start,
                    len: w,
                    capacity,
                })?;
            let src = (ic * h + y) * w;
            dst.copy_from_slice(&image[src..src + w]);
        }
    }
    Ok(())
}

impl Operator for KpuConvOp<'_> {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn check_output_dims(&self) -> Result<(), OperatorError> {
        let op = Self::NAME;
        ensure_dtype(op, "input", DType::U8, self.input.dtype())?;
        ensure_dtype(op, "output", DType::U8, self.output.dtype())?;
        ensure_dtype(op, "weight", DType::U8, self.weight.dtype())?;

        let expected = self
            .param
            .output_shape(op, self.input.shape(), self.weight.shape())?;
        self.check_geometry()?;
        ensure_shape(op, expected, self.output.shape())?;

        if let Some(bias) = self.bias {
            ensure_dtype(op, "bias", DType::I32, bias.dtype())?;
            let n = bias.shape().dense_elements();
            if n != expected.c {
                return Err(OperatorError::ParamMismatch {
                    op,
                    reason: format!("bias holds {n} values for {} output channels", expected.c),
                });
            }
        }
        ensure_distinct(op, self.output, &[ParamRef::from(self.input)])?;

        self.norm_mul()?;
        self.descriptor().map(|_| ())
    }

    fn compute(&mut self) -> Result<(), OperatorError> {
        let in_shape = self.input.shape();
        let out_shape = self.output.shape();
        let (ci, hi, wi) = (in_shape.c, in_shape.h, in_shape.w);
        let out_plane = out_shape.c * out_shape.plane();

        let mut layer = self.descriptor()?;
        let kernels = self.weight.to_dense_vec::<u8>()?;
        let bn = batchnorm_table_bytes(&self.batchnorm(out_shape.c)?);
        let act = ActivationTable::identity().to_bytes();

        layer.kernel_load_cfg.para_start_addr =
            u64::from(self.accel.stage(ParamRegion::Kernels, &kernels)?);
        layer.kernel_pool_type_cfg.bwsx_base_addr =
            u64::from(self.accel.stage(ParamRegion::BatchNorm, &bn)?);
        layer.kernel_calc_type_cfg.active_addr =
            u64::from(self.accel.stage(ParamRegion::Activation, &act)?);

        let input = self.input.to_dense_vec::<u8>()?;
        let pack = RowPacking::for_width(wi);
        let mut host = vec![0u8; layer.output_bytes().next_multiple_of(8)];
        let mut result = Vec::with_capacity(out_shape.dense_elements());

        for image in input.chunks_exact(ci * hi * wi) {
            pack_input(self.accel.io_memory_mut(), image, (ci, hi, wi), pack)?;
            self.accel.run_layer(&layer, &mut host)?;
            result.extend_from_slice(&host[..out_plane]);
        }

        self.output
            .write_slice(&layout::pack_planes(out_shape, &result)?)?;
        tracing::debug!(
            "{}: {} * {} -> {} on {}",
            Self::NAME,
            in_shape,
            self.weight.shape(),
            out_shape,
            self.accel.device_name()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CpuConvOp;
    use kpu_hal::SimulatedKpu;
    use tensor_core::{QuantParams, Shape};

    fn bytes_of(values: &[i32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_row_packing() {
        let p = |w| {
            let r = RowPacking::for_width(w);
            (r.padding, r.group, r.length)
        };
        assert_eq!(p(8), (16, 4, 1));
        assert_eq!(p(16), (16, 4, 1));
        assert_eq!(p(17), (32, 2, 1));
        assert_eq!(p(32), (32, 2, 1));
        assert_eq!(p(33), (64, 1, 1));
        assert_eq!(p(130), (64, 1, 3));
        assert_eq!(RowPacking::for_width(8).rows(5, 8), 16);
    }

    #[test]
    fn test_quantize_multiplier() {
        assert_eq!(
            quantize_multiplier(0.5),
            Requant {
                multiplier: 1 << 30,
                shift: 0
            }
        );
        assert_eq!(
            quantize_multiplier(0.1),
            Requant {
                multiplier: 1717986918,
                shift: -3
            }
        );
        // Rounds up to exactly 2^31 and is renormalised.
        assert_eq!(
            quantize_multiplier(1.0 - 1e-12),
            Requant {
                multiplier: 1 << 30,
                shift: 1
            }
        );
        assert_eq!(quantize_multiplier(0.0).multiplier, 0);
    }

    #[test]
    fn test_kernel_passes() {
        assert_eq!(kernel_passes(64, 3 * 3 * 128), Some((14, 5)));
        assert_eq!(kernel_passes(16, 3 * 3 * 8), Some((16, 1)));
        assert_eq!(kernel_passes(4, 20_000), None);
    }

    #[test]
    fn test_descriptor_fields() {
        let (mut accel, _) = Accelerator::simulated();
        let input = RamTensor::new(Shape::chw(8, 8, 8), DType::U8).unwrap();
        let output = RamTensor::new(Shape::chw(16, 8, 8), DType::U8).unwrap();
        input.set_quant(QuantParams::new(1.0, 3));
        let wbytes = vec![0u8; Shape::new(16, 8, 3, 3).size_bytes(DType::U8)];
        let weight = FlashTensor::from_static(Shape::new(16, 8, 3, 3), DType::U8, &wbytes)
            .unwrap()
            .with_quant(QuantParams::new(1.0, 2));

        let op = KpuConvOp::new(
            &mut accel,
            ConvParam::new(1, 1, 2).quantized(),
            &input,
            &output,
            &weight,
            None,
        )
        .unwrap();
        let l = op.descriptor().unwrap();
        // 16 channels of 8 rows, four channels per row group.
        assert_eq!(l.image_addr.image_dst_addr, 0x8000 - 32);
        assert_eq!(l.image_channel_num.i_ch_num, 7);
        assert_eq!(l.image_channel_num.o_ch_num, 15);
        assert_eq!(l.image_channel_num.o_ch_num_coef, 15);
        assert_eq!(l.kernel_pool_type_cfg.kernel_type, 1);
        assert_eq!(l.kernel_pool_type_cfg.pool_type, 0);
        assert_eq!(l.kernel_pool_type_cfg.pad_value, 3);
        assert_eq!(l.kernel_load_cfg.load_time, 0);
        assert_eq!(l.kernel_load_cfg.para_size, 72 * 16);
        assert_eq!(l.kernel_calc_type_cfg.channel_switch_addr, 8);
        assert_eq!(l.kernel_calc_type_cfg.row_switch_addr, 1);
        assert_eq!(l.kernel_calc_type_cfg.coef_group, 4);
        assert_eq!(l.write_back_cfg.wb_channel_switch_addr, 8);
        assert_eq!(l.conv_value.arg_w, 3);
        assert_eq!(l.conv_value.arg_x, 2);
        assert_eq!(l.conv_value2.arg_add, 3 * 2 * 9);
        assert_eq!(l.dma_parameter.channel_byte_num, 63);
        assert_eq!(l.dma_parameter.dma_total_byte, 16 * 64 - 1);
    }

    #[test]
    fn test_unsupported_geometry() {
        let (mut accel, _) = Accelerator::simulated();
        let input = RamTensor::new(Shape::chw(1, 8, 8), DType::U8).unwrap();
        let wbytes = vec![0u8; 9];
        let weight = FlashTensor::from_static(Shape::new(1, 1, 3, 3), DType::U8, &wbytes).unwrap();

        let out = RamTensor::new(Shape::chw(1, 7, 7), DType::U8).unwrap();
        assert!(matches!(
            KpuConvOp::new(&mut accel, ConvParam::new(1, 1, 1), &input, &out, &weight, None),
            Err(OperatorError::UnsupportedConfig { .. })
        ));

        let out = RamTensor::new(Shape::chw(1, 4, 4), DType::U8).unwrap();
        assert!(matches!(
            KpuConvOp::new(&mut accel, ConvParam::new(1, 2, 0), &input, &out, &weight, None),
            Err(OperatorError::UnsupportedConfig { .. })
        ));

        let f32_out = RamTensor::new(Shape::chw(1, 8, 8), DType::F32).unwrap();
        assert!(matches!(
            KpuConvOp::new(&mut accel, ConvParam::new(1, 1, 2), &input, &f32_out, &weight, None),
            Err(OperatorError::ParamMismatch { .. })
        ));
    }

    /// Runs the same integer data through both backends with unit scales.
    fn parity(c_in: usize, c_out: usize, size: usize, k: usize, stride: usize) {
        let pad = if k == 3 { 2 } else { 0 };
        let param = ConvParam::new(stride, 1, pad);
        let in_shape = Shape::chw(c_in, size, size);
        let w_shape = Shape::new(c_out, c_in, k, k);
        let out_shape = param.output_shape("t", in_shape, w_shape).unwrap();

        let x: Vec<u8> = (0..in_shape.dense_elements()).map(|i| (i * 7 % 4) as u8).collect();
        let w: Vec<u8> = (0..w_shape.dense_elements()).map(|i| (i % 3) as u8).collect();
        let b: Vec<i32> = (0..c_out as i32).map(|i| i * 3).collect();

        let wx = layout::pack_planes(w_shape, &w).unwrap();
        let bx = bytes_of(&b);
        let weight = FlashTensor::from_static(w_shape, DType::U8, &wx).unwrap();
        let bias = FlashTensor::from_static(Shape::new(c_out, 1, 1, 1), DType::I32, &bx).unwrap();
        let input = RamTensor::from_dense(in_shape, &x).unwrap();
        let output = RamTensor::new(out_shape, DType::U8).unwrap();

        let (mut accel, probe) = Accelerator::simulated();
        KpuConvOp::new(&mut accel, param.quantized(), &input, &output, &weight, Some(&bias))
            .unwrap()
            .compute()
            .unwrap();
        assert_eq!(probe.layers().len(), 1);

        let xf: Vec<f32> = x.iter().map(|&v| f32::from(v)).collect();
        let wf: Vec<f32> = w.iter().map(|&v| f32::from(v)).collect();
        let bf: Vec<f32> = b.iter().map(|&v| v as f32).collect();
        let input_f = RamTensor::from_dense(in_shape, &xf).unwrap();
        let weight_f = RamTensor::from_dense(w_shape, &wf).unwrap();
        let bias_f = RamTensor::from_dense(Shape::new(c_out, 1, 1, 1), &bf).unwrap();
        let output_f = RamTensor::new(out_shape, DType::F32).unwrap();
        CpuConvOp::new(param, &input_f, &output_f, &weight_f, Some((&bias_f).into()))
            .unwrap()
            .compute()
            .unwrap();

        let kpu = output.to_dense_vec::<u8>().unwrap();
        let cpu = output_f.to_dense_vec::<f32>().unwrap();
        for (q, r) in kpu.iter().zip(&cpu) {
            assert!((f32::from(*q) - r.clamp(0.0, 255.0)).abs() <= 1.0, "{q} vs {r}");
        }
    }

    #[test]
    fn test_parity_3x3() {
        parity(2, 3, 6, 3, 1);
    }

    #[test]
    fn test_parity_3x3_stride_two() {
        parity(3, 2, 7, 3, 2);
    }

    #[test]
    fn test_parity_pointwise_wide() {
        parity(5, 4, 20, 1, 1);
    }

    #[test]
    fn test_zero_points_and_scales() {
        // Real multiplier in*w/out = 0.5*0.25/0.125 = 1, so results are exact.
        let in_shape = Shape::chw(1, 4, 4);
        let w_shape = Shape::new(1, 1, 3, 3);
        let x: Vec<u8> = (0..16).map(|i| 2 + (i % 5) as u8).collect();
        let w: Vec<u8> = vec![2, 1, 1, 1, 3, 1, 1, 1, 2];
        let input = RamTensor::from_dense(in_shape, &x).unwrap();
        input.set_quant(QuantParams::new(0.5, 2));
        let weight = FlashTensor::from_static(w_shape, DType::U8, &w)
            .unwrap()
            .with_quant(QuantParams::new(0.25, 1));
        let output = RamTensor::new(in_shape, DType::U8).unwrap();
        output.set_quant(QuantParams::new(0.125, 8));

        let (mut accel, _) = Accelerator::simulated();
        KpuConvOp::new(&mut accel, ConvParam::new(1, 1, 2), &input, &output, &weight, None)
            .unwrap()
            .compute()
            .unwrap();

        // Integer reference: sum((x - 2) * (w - 1)) over in-bounds taps, + 8.
        let mut expected = Vec::new();
        for oy in 0..4i32 {
            for ox in 0..4i32 {
                let mut acc = 0i32;
                for ky in 0..3 {
                    for kx in 0..3 {
                        let (y, xx) = (oy + ky - 1, ox + kx - 1);
                        if (0..4).contains(&y) && (0..4).contains(&xx) {
                            let xv = i32::from(x[(y * 4 + xx) as usize]) - 2;
                            acc += xv * (i32::from(w[(ky * 3 + kx) as usize]) - 1);
                        }
                    }
                }
                expected.push((acc + 8).clamp(0, 255) as u8);
            }
        }
        assert_eq!(output.to_dense_vec::<u8>().unwrap(), expected);
    }

    #[test]
    fn test_batches_run_one_layer_each() {
        let in_shape = Shape::new(2, 1, 2, 2);
        let input = RamTensor::from_dense(in_shape, &[1u8, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let output = RamTensor::new(in_shape, DType::U8).unwrap();
        let weight = FlashTensor::from_static(Shape::new(1, 1, 1, 1), DType::U8, &[3]).unwrap();

        let (mut accel, probe) = Accelerator::simulated();
        KpuConvOp::new(&mut accel, ConvParam::default(), &input, &output, &weight, None)
            .unwrap()
            .compute()
            .unwrap();
        assert_eq!(
            output.to_dense_vec::<u8>().unwrap(),
            vec![3, 6, 9, 12, 15, 18, 21, 24]
        );
        assert_eq!(probe.layers().len(), 2);
        assert_eq!(probe.dma_transfers()[0].count, 1);
        assert_eq!(accel.layers_run(), 2);
    }

    #[test]
    fn test_dma_fault_surfaces_as_hardware_error() {
        let mut accel = Accelerator::new(SimulatedKpu::new().with_dma_fault());
        let input = RamTensor::from_dense(Shape::chw(1, 2, 2), &[1u8, 2, 3, 4]).unwrap();
        let output = RamTensor::new(Shape::chw(1, 2, 2), DType::U8).unwrap();
        let weight = FlashTensor::from_static(Shape::new(1, 1, 1, 1), DType::U8, &[1]).unwrap();
        let mut op =
            KpuConvOp::new(&mut accel, ConvParam::default(), &input, &output, &weight, None)
                .unwrap();
        assert!(matches!(
            op.compute(),
            Err(OperatorError::Hardware(HalError::DmaFault(_)))
        ));
        assert_eq!(output.to_dense_vec::<u8>().unwrap(), vec![0; 4]);
    }
}
