// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Reference floating-point convolution on the CPU.

use crate::operator::{ensure_distinct, ensure_dtype, ensure_shape};
use crate::{ConvParam, Operator, OperatorError};
use tensor_core::{layout, DType, ParamRef, RamTensor, Shape};

/// Direct f32 convolution with stride, dilation and padding.
///
/// Taps that fall outside the input are skipped, which is zero padding.
/// Dilated kernels are expanded once per [`compute`](Operator::compute) into
/// a zero-interleaved temporary.
#[derive(Debug)]
pub struct CpuConvOp<'a> {
    param: ConvParam,
    input: &'a RamTensor,
    output: &'a RamTensor,
    weight: ParamRef<'a>,
    bias: Option<ParamRef<'a>>,
}

impl<'a> CpuConvOp<'a> {
    const NAME: &'static str = "cpu_conv";

    /// Builds and validates the operator.
    ///
    /// `weight` is (Cout, Cin, kh, kw); `bias`, if given, holds Cout values.
    pub fn new(
        param: ConvParam,
        input: &'a RamTensor,
        output: &'a RamTensor,
        weight: impl Into<ParamRef<'a>>,
        bias: Option<ParamRef<'a>>,
    ) -> Result<Self, OperatorError> {
        let op = Self {
            param,
            input,
            output,
            weight: weight.into(),
            bias,
        };
        op.check_output_dims()?;
        Ok(op)
    }
}

impl Operator for CpuConvOp<'_> {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn check_output_dims(&self) -> Result<(), OperatorError> {
        let op = Self::NAME;
        if self.param.quantized {
            return Err(OperatorError::UnsupportedConfig {
                op,
                reason: "quantized convolution runs on the accelerator".into(),
            });
        }
        ensure_dtype(op, "input", DType::F32, self.input.dtype())?;
        ensure_dtype(op, "output", DType::F32, self.output.dtype())?;
        ensure_dtype(op, "weight", DType::F32, self.weight.dtype())?;

        let expected = self
            .param
            .output_shape(op, self.input.shape(), self.weight.shape())?;
        ensure_shape(op, expected, self.output.shape())?;

        let mut inputs = vec![ParamRef::from(self.input), self.weight];
        if let Some(bias) = self.bias {
            ensure_dtype(op, "bias", DType::F32, bias.dtype())?;
            let n = bias.shape().dense_elements();
            if n != expected.c {
                return Err(OperatorError::ParamMismatch {
                    op,
                    reason: format!("bias holds {n} values for {} output channels", expected.c),
                });
            }
            inputs.push(bias);
        }
        ensure_distinct(op, self.output, &inputs)
    }

    fn compute(&mut self) -> Result<(), OperatorError> {
        let in_shape = self.input.shape();
        let out_shape = self.output.shape();
        let w_shape = self.weight.shape();

        let input = self.input.to_dense_vec::<f32>()?;
        let weight = self.weight.to_dense_vec::<f32>()?;
        let bias = self
            .bias
            .map(|b| b.to_dense_vec::<f32>())
            .transpose()?;

        let (kh, kw) = self.param.effective_kernel(w_shape.h, w_shape.w);
        let weight = if (kh, kw) == (w_shape.h, w_shape.w) {
            weight
        } else {
            dilate_kernel(&weight, w_shape, kh, kw, &self.param)
        };

        let dense = convolve(
            &input,
            in_shape,
            &weight,
            (kh, kw),
            bias.as_deref(),
            out_shape,
            &self.param,
        );
        self.output
            .write_slice(&layout::pack_planes(out_shape, &dense)?)?;

        tracing::debug!(
            "{}: {} * {} -> {}",
            Self::NAME,
            in_shape,
            w_shape,
            out_shape
        );
        Ok(())
    }
}

/// Spreads each kernel tap `(ky, kx)` to `(ky * dh, kx * dw)` in a
/// `kh x kw` kernel, zero elsewhere.
fn dilate_kernel(weight: &[f32], shape: Shape, kh: usize, kw: usize, p: &ConvParam) -> Vec<f32> {
    let (dh, dw) = (p.dilation_h.max(1), p.dilation_w.max(1));
    let mut out = vec![0.0; shape.n * shape.c * kh * kw];
    for (k, src) in weight.chunks_exact(shape.plane()).enumerate() {
        let dst = &mut out[k * kh * kw..(k + 1) * kh * kw];
        for ky in 0..shape.h {
            for kx in 0..shape.w {
                dst[ky * dh * kw + kx * dw] = src[ky * shape.w + kx];
            }
        }
    }
    out
}

/// Dense NCHW convolution with a dense (Cout, Cin, kh, kw) kernel.
fn convolve(
    input: &[f32],
    in_shape: Shape,
    weight: &[f32],
    (kh, kw): (usize, usize),
    bias: Option<&[f32]>,
    out_shape: Shape,
    p: &ConvParam,
) -> Vec<f32> {
    let (hi, wi) = (in_shape.h as isize, in_shape.w as isize);
    let (ci, co) = (in_shape.c, out_shape.c);
    // Integer division truncates, so odd total padding shifts the window left.
    let (pad_top, pad_left) = ((p.pad_h / 2) as isize, (p.pad_w / 2) as isize);

    let mut out = vec![0.0f32; out_shape.dense_elements()];
    let mut idx = 0;
    for n in 0..out_shape.n {
        let image = &input[n * ci * in_shape.plane()..(n + 1) * ci * in_shape.plane()];
        for oc in 0..co {
            let kernel = &weight[oc * ci * kh * kw..(oc + 1) * ci * kh * kw];
            let b = bias.map_or(0.0, |b| b[oc]);
            for oy in 0..out_shape.h {
                let y0 = (oy * p.stride_h) as isize - pad_top;
                for ox in 0..out_shape.w {
                    let x0 = (ox * p.stride_w) as isize - pad_left;
                    let mut acc = 0.0f32;
                    for ic in 0..ci {
                        let plane = &image[ic * in_shape.plane()..(ic + 1) * in_shape.plane()];
                        let taps = &kernel[ic * kh * kw..(ic + 1) * kh * kw];
                        for ky in 0..kh {
                            let y = y0 + ky as isize;
                            if y < 0 || y >= hi {
                                continue;
                            }
                            let y = y as usize;
                            let row = &plane[y * in_shape.w..(y + 1) * in_shape.w];
                            for kx in 0..kw {
                                let x = x0 + kx as isize;
                                if x < 0 || x >= wi {
                                    continue;
                                }
                                acc += row[x as usize] * taps[ky * kw + kx];
                            }
                        }
                    }
                    out[idx] = acc + b;
                    idx += 1;
                }
            }
        }
    }
    out
}
