// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Quantization metadata carried by fixed-point tensors.

/// Observed range and affine parameters of a tensor.
///
/// `real = (q - zero_point) * scale`. The quantize operators fill this in on
/// their outputs; compiled schedules set it on accelerator inputs/outputs
/// and on weight views.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QuantParams {
    pub min: f32,
    pub max: f32,
    pub scale: f32,
    pub zero_point: i32,
    /// Set when `scale` and `zero_point` were assigned rather than left at
    /// their identity defaults.
    #[serde(default)]
    pub calibrated: bool,
}

impl QuantParams {
    /// Parameters with a known scale and zero point and no observed range.
    pub fn new(scale: f32, zero_point: i32) -> Self {
        Self {
            scale,
            zero_point,
            calibrated: true,
            ..Self::default()
        }
    }

    /// Returns a copy with the observed range replaced.
    pub fn with_range(mut self, min: f32, max: f32) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Maps a quantized value back to the real domain.
    pub fn dequantize(&self, q: i32) -> f32 {
        (q - self.zero_point) as f32 * self.scale
    }
}

impl Default for QuantParams {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 0.0,
            scale: 1.0,
            zero_point: 0,
            calibrated: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_identity() {
        let q = QuantParams::default();
        assert_eq!(q.dequantize(42), 42.0);
        assert!(!q.calibrated);
    }

    #[test]
    fn test_identity_params_are_calibrated() {
        let q = QuantParams::new(1.0, 0).with_range(0.0, 255.0);
        assert!(q.calibrated);
        assert_ne!(q, QuantParams::default().with_range(0.0, 255.0));
    }

    #[test]
    fn test_dequantize() {
        let q = QuantParams::new(0.5, 10).with_range(-5.0, 122.5);
        assert_eq!(q.dequantize(10), 0.0);
        assert_eq!(q.dequantize(12), 1.0);
        assert_eq!(q.min, -5.0);
    }
}
