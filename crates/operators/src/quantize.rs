// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Conversions between f32 tensors and 8/16-bit fixed-point tensors.
//!
//! Affine forms map `[min, max]` onto the full unsigned range with a zero
//! point. Symmetric forms map `[-amax, amax]` onto `[-qmax, qmax]` with a
//! zero point of 0.

use crate::operator::{ensure_distinct, ensure_shape};
use crate::{Operator, OperatorError};
use std::fmt;
use tensor_core::{layout, DType, Element, ParamRef, QuantParams, RamTensor};

/// Which conversion a [`QuantizeOp`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuantizeStrategy {
    AffineF32ToU8,
    AffineF32ToU16,
    SymmetricF32ToI8,
    SymmetricF32ToI16,
    AffineU8ToF32,
    AffineU16ToF32,
    SymmetricI8ToF32,
    SymmetricI16ToF32,
    None,
}

impl QuantizeStrategy {
    /// Input and output element types, `None` for [`QuantizeStrategy::None`].
    pub fn dtypes(self) -> Option<(DType, DType)> {
        use QuantizeStrategy::*;
        Some(match self {
            AffineF32ToU8 => (DType::F32, DType::U8),
            AffineF32ToU16 => (DType::F32, DType::U16),
            SymmetricF32ToI8 => (DType::F32, DType::I8),
            SymmetricF32ToI16 => (DType::F32, DType::I16),
            AffineU8ToF32 => (DType::U8, DType::F32),
            AffineU16ToF32 => (DType::U16, DType::F32),
            SymmetricI8ToF32 => (DType::I8, DType::F32),
            SymmetricI16ToF32 => (DType::I16, DType::F32),
            None => return Option::None,
        })
    }

    pub fn as_str(self) -> &'static str {
        use QuantizeStrategy::*;
        match self {
            AffineF32ToU8 => "affine_f32_u8",
            AffineF32ToU16 => "affine_f32_u16",
            SymmetricF32ToI8 => "symmetric_f32_i8",
            SymmetricF32ToI16 => "symmetric_f32_i16",
            AffineU8ToF32 => "affine_u8_f32",
            AffineU16ToF32 => "affine_u16_f32",
            SymmetricI8ToF32 => "symmetric_i8_f32",
            SymmetricI16ToF32 => "symmetric_i16_f32",
            None => "none",
        }
    }

    /// Parses the names produced by [`as_str`](Self::as_str).
    pub fn parse(s: &str) -> Option<Self> {
        use QuantizeStrategy::*;
        [
            AffineF32ToU8,
            AffineF32ToU16,
            SymmetricF32ToI8,
            SymmetricF32ToI16,
            AffineU8ToF32,
            AffineU16ToF32,
            SymmetricI8ToF32,
            SymmetricI16ToF32,
            None,
        ]
        .into_iter()
        .find(|q| q.as_str() == s)
    }
}

impl fmt::Display for QuantizeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Element sizes the tensors must have, plus the strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantizeParam {
    pub input_elem_size: usize,
    pub output_elem_size: usize,
    pub strategy: QuantizeStrategy,
}

impl QuantizeParam {
    /// Parameters whose element sizes follow from `strategy`.
    pub fn new(strategy: QuantizeStrategy) -> Self {
        let (input_elem_size, output_elem_size) = strategy
            .dtypes()
            .map_or((0, 0), |(i, o)| (i.size_bytes(), o.size_bytes()));
        Self {
            input_elem_size,
            output_elem_size,
            strategy,
        }
    }
}

/// Fixed-point element types the quantizers produce.
trait Fixed: Element + Copy {
    const QMIN: f32;
    const QMAX: f32;
    fn from_f32(v: f32) -> Self;
    fn to_f32(self) -> f32;
}

macro_rules! impl_fixed {
    ($($t:ty => $min:expr, $max:expr);* $(;)?) => {
        $(impl Fixed for $t {
            const QMIN: f32 = $min;
            const QMAX: f32 = $max;
            fn from_f32(v: f32) -> Self {
                v as $t
            }
            fn to_f32(self) -> f32 {
                f32::from(self)
            }
        })*
    };
}

impl_fixed! {
    u8 => 0.0, 255.0;
    u16 => 0.0, 65535.0;
    i8 => -127.0, 127.0;
    i16 => -32767.0, 32767.0;
}

/// Element-wise quantize or dequantize between two same-shaped tensors.
///
/// # Side effects
/// Every form records the observed range of its input on the input tensor.
/// Quantizing forms store the derived scale and zero point on the output,
/// along with the range of the quantized values.
#[derive(Debug)]
pub struct QuantizeOp<'a> {
    param: QuantizeParam,
    input: &'a RamTensor,
    output: &'a RamTensor,
}

impl<'a> QuantizeOp<'a> {
    const NAME: &'static str = "quantize";

    pub fn new(
        param: QuantizeParam,
        input: &'a RamTensor,
        output: &'a RamTensor,
    ) -> Result<Self, OperatorError> {
        let op = Self {
            param,
            input,
            output,
        };
        op.check_output_dims()?;
        Ok(op)
    }

    fn affine_quantize<T: Fixed>(&self) -> Result<(), OperatorError> {
        let x = self.input.to_dense_vec::<f32>()?;
        let (min, max) = min_max(x.iter().copied());
        self.input.set_range(min, max);

        let scale = (max - min) / (T::QMAX - T::QMIN);
        if scale == 0.0 {
            tracing::warn!("{}: constant input {min}, mapping to the zero point", Self::NAME);
        }
        let zp_from_min = min - min / scale;
        let zero_point = if zp_from_min.is_nan() {
            T::QMIN
        } else {
            zp_from_min.clamp(T::QMIN, T::QMAX).round()
        };
        self.output
            .set_quant(QuantParams::new(scale, zero_point as i32));

        let inverse = 1.0 / f64::from(scale);
        let q: Vec<T> = x
            .iter()
            .map(|&v| {
                let scaled = if scale == 0.0 {
                    f64::from(zero_point)
                } else {
                    f64::from(zero_point) + inverse * f64::from(v)
                };
                T::from_f32((scaled.round() as f32).clamp(T::QMIN, T::QMAX))
            })
            .collect();
        self.write_quantized(&q)
    }

    fn symmetric_quantize<T: Fixed>(&self) -> Result<(), OperatorError> {
        let x = self.input.to_dense_vec::<f32>()?;
        let (min, max) = min_max(x.iter().copied());
        self.input.set_range(min, max);

        let amax = min.abs().max(max.abs());
        let scale = if amax == 0.0 { 1.0 } else { amax / T::QMAX };
        self.output.set_quant(QuantParams::new(scale, 0));

        let q: Vec<T> = x
            .iter()
            .map(|&v| T::from_f32((v / scale).round().clamp(-T::QMAX, T::QMAX)))
            .collect();
        self.write_quantized(&q)
    }

    fn write_quantized<T: Fixed>(&self, q: &[T]) -> Result<(), OperatorError> {
        let (qmin, qmax) = min_max(q.iter().map(|v| v.to_f32()));
        self.output.set_range(qmin, qmax);
        let shape = self.output.shape();
        self.output.write_slice(&layout::pack_planes(shape, q)?)?;
        Ok(())
    }

    /// Affine dequantization. Uses the scale and zero point stored on the
    /// input when they were assigned; otherwise rebuilds a scale from the
    /// observed range of the fixed-point values.
    fn affine_dequantize<T: Fixed>(&self) -> Result<(), OperatorError> {
        let q = self.input.to_dense_vec::<T>()?;
        let (min, max) = min_max(q.iter().map(|v| v.to_f32()));
        self.input.set_range(min, max);

        let stored = self.input.quant();
        let y: Vec<f32> = if stored.calibrated {
            q.iter()
                .map(|v| (v.to_f32() - stored.zero_point as f32) * stored.scale)
                .collect()
        } else {
            let scale = (max - min) / (T::QMAX - T::QMIN);
            let rounded_min = if max == min {
                min
            } else {
                (min / scale).round() * scale
            };
            q.iter()
                .map(|v| (rounded_min - min * scale) + v.to_f32() * scale)
                .collect()
        };
        self.write_real(&y)
    }

    fn symmetric_dequantize<T: Fixed>(&self) -> Result<(), OperatorError> {
        let q = self.input.to_dense_vec::<T>()?;
        let (min, max) = min_max(q.iter().map(|v| v.to_f32()));
        self.input.set_range(min, max);

        let stored = self.input.quant();
        let y: Vec<f32> = q
            .iter()
            .map(|v| (v.to_f32() - stored.zero_point as f32) * stored.scale)
            .collect();
        self.write_real(&y)
    }

    fn write_real(&self, y: &[f32]) -> Result<(), OperatorError> {
        let (ymin, ymax) = min_max(y.iter().copied());
        self.output.set_range(ymin, ymax);
        let shape = self.output.shape();
        self.output.write_slice(&layout::pack_planes(shape, y)?)?;
        Ok(())
    }
}

fn min_max(values: impl Iterator<Item = f32>) -> (f32, f32) {
    let (min, max) = values.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if min > max {
        (0.0, 0.0)
    } else {
        (min, max)
    }
}

impl Operator for QuantizeOp<'_> {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn check_output_dims(&self) -> Result<(), OperatorError> {
        let op = Self::NAME;
        let (in_dtype, out_dtype) = self
            .param
            .strategy
            .dtypes()
            .ok_or(OperatorError::UnsupportedStrategy(self.param.strategy))?;
        ensure_shape(op, self.input.shape(), self.output.shape())?;

        let sizes = [
            ("input", self.param.input_elem_size, self.input.elem_size()),
            ("output", self.param.output_elem_size, self.output.elem_size()),
        ];
        for (what, expected, actual) in sizes {
            if expected != actual {
                return Err(OperatorError::ParamMismatch {
                    op,
                    reason: format!("{what} element size is {actual}, parameters say {expected}"),
                });
            }
        }
        if self.input.dtype() != in_dtype || self.output.dtype() != out_dtype {
            return Err(OperatorError::ParamMismatch {
                op,
                reason: format!(
                    "{} converts {in_dtype} to {out_dtype}, tensors are {} and {}",
                    self.param.strategy,
                    self.input.dtype(),
                    self.output.dtype()
                ),
            });
        }
        ensure_distinct(op, self.output, &[ParamRef::from(self.input)])
    }

    fn compute(&mut self) -> Result<(), OperatorError> {
        use QuantizeStrategy::*;
        match self.param.strategy {
            AffineF32ToU8 => self.affine_quantize::<u8>()?,
            AffineF32ToU16 => self.affine_quantize::<u16>()?,
            SymmetricF32ToI8 => self.symmetric_quantize::<i8>()?,
            SymmetricF32ToI16 => self.symmetric_quantize::<i16>()?,
            AffineU8ToF32 => self.affine_dequantize::<u8>()?,
            AffineU16ToF32 => self.affine_dequantize::<u16>()?,
            SymmetricI8ToF32 => self.symmetric_dequantize::<i8>()?,
            SymmetricI16ToF32 => self.symmetric_dequantize::<i16>()?,
            None => return Err(OperatorError::UnsupportedStrategy(None)),
        }
        tracing::debug!(
            "{} {}: {}",
            Self::NAME,
            self.param.strategy,
            self.input.shape()
        );
        Ok(())
    }
}
