// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Convolution parameters and the output-shape law shared by both backends.

use crate::OperatorError;
use tensor_core::Shape;

/// Stride, dilation and padding of a 2-D convolution.
///
/// `pad_h`/`pad_w` are the *total* padding along each axis; the window
/// origin of output index `o` is `stride * o - pad / 2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvParam {
    pub stride_h: usize,
    pub stride_w: usize,
    pub dilation_h: usize,
    pub dilation_w: usize,
    pub pad_h: usize,
    pub pad_w: usize,
    /// Fixed-point operands. Only the accelerator backend runs quantized.
    pub quantized: bool,
}

impl ConvParam {
    /// Same stride, dilation and padding on both axes.
    pub fn new(stride: usize, dilation: usize, pad: usize) -> Self {
        Self {
            stride_h: stride,
            stride_w: stride,
            dilation_h: dilation,
            dilation_w: dilation,
            pad_h: pad,
            pad_w: pad,
            quantized: false,
        }
    }

    pub fn quantized(mut self) -> Self {
        self.quantized = true;
        self
    }

    /// Kernel extent after dilation.
    pub fn effective_kernel(&self, kh: usize, kw: usize) -> (usize, usize) {
        let dilate = |k: usize, d: usize| if d > 1 { (k - 1) * d + 1 } else { k };
        (dilate(kh, self.dilation_h), dilate(kw, self.dilation_w))
    }

    /// Output shape of convolving `input` with `weight` (Cout, Cin, kh, kw).
    ///
    /// # Examples
    /// ```
    /// use operators::ConvParam;
    /// use tensor_core::Shape;
    ///
    /// let input = Shape::new(1, 3, 8, 8);
    /// let weight = Shape::new(4, 3, 3, 3);
    /// let out = ConvParam::new(1, 1, 2).output_shape("conv", input, weight).unwrap();
    /// assert_eq!(out, Shape::new(1, 4, 8, 8));
    /// ```
    pub fn output_shape(
        &self,
        op: &'static str,
        input: Shape,
        weight: Shape,
    ) -> Result<Shape, OperatorError> {
        if self.stride_h == 0 || self.stride_w == 0 {
            return Err(OperatorError::UnsupportedConfig {
                op,
                reason: "stride must be at least 1".into(),
            });
        }
        if input.c != weight.c {
            return Err(OperatorError::ChannelMismatch {
                op,
                input: input.c,
                weight: weight.c,
            });
        }
        let padded = (input.h + self.pad_h, input.w + self.pad_w);
        let kernel = self.effective_kernel(weight.h, weight.w);
        if kernel.0 == 0 || kernel.1 == 0 || kernel.0 > padded.0 || kernel.1 > padded.1 {
            return Err(OperatorError::KernelTooLarge { op, kernel, padded });
        }
        Ok(Shape::new(
            input.n,
            weight.n,
            (padded.0 - kernel.0) / self.stride_h + 1,
            (padded.1 - kernel.1) / self.stride_w + 1,
        ))
    }
}

impl Default for ConvParam {
    fn default() -> Self {
        Self::new(1, 1, 0)
    }
}
