// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Weight and bias references that accept either tensor variant.

use crate::{DType, Element, FlashTensor, QuantParams, RamTensor, Shape, TensorError};

/// A read-only operator parameter (weights or bias).
///
/// Compiled models bind parameters as [`FlashTensor`]s; tests and
/// intermediate results may pass a [`RamTensor`] instead.
#[derive(Debug, Clone, Copy)]
pub enum ParamRef<'a> {
    Ram(&'a RamTensor),
    Flash(&'a FlashTensor<'a>),
}

impl<'a> ParamRef<'a> {
    pub fn shape(&self) -> Shape {
        match self {
            ParamRef::Ram(t) => t.shape(),
            ParamRef::Flash(t) => t.shape(),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            ParamRef::Ram(t) => t.dtype(),
            ParamRef::Flash(t) => t.dtype(),
        }
    }

    pub fn cstep(&self) -> usize {
        self.shape().cstep(self.dtype())
    }

    pub fn quant(&self) -> QuantParams {
        match self {
            ParamRef::Ram(t) => t.quant(),
            ParamRef::Flash(t) => t.quant(),
        }
    }

    /// Copies out every element, plane padding included.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, TensorError> {
        match self {
            ParamRef::Ram(t) => t.to_vec(),
            ParamRef::Flash(t) => t.to_vec(),
        }
    }

    /// Dense `N*C*H*W` values with plane padding removed.
    pub fn to_dense_vec<T: Element>(&self) -> Result<Vec<T>, TensorError> {
        match self {
            ParamRef::Ram(t) => t.to_dense_vec(),
            ParamRef::Flash(t) => t.to_dense_vec(),
        }
    }

    /// `true` if this parameter lives in the same allocation as `other`.
    pub fn shares_storage_with(&self, other: &RamTensor) -> bool {
        match self {
            ParamRef::Ram(t) => t.shares_storage_with(other),
            ParamRef::Flash(_) => false,
        }
    }
}

impl<'a> From<&'a RamTensor> for ParamRef<'a> {
    fn from(t: &'a RamTensor) -> Self {
        ParamRef::Ram(t)
    }
}

impl<'a, 'w: 'a> From<&'a FlashTensor<'w>> for ParamRef<'a> {
    fn from(t: &'a FlashTensor<'w>) -> Self {
        ParamRef::Flash(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_variants_read_alike() {
        let shape = Shape::new(2, 1, 1, 1);
        let bytes: Vec<u8> = bytemuck::cast_slice(&[5i32, -7]).to_vec();
        let flash = FlashTensor::from_static(shape, DType::I32, &bytes).unwrap();
        let ram = RamTensor::from_bytes(shape, DType::I32, &bytes).unwrap();

        let a = ParamRef::from(&flash);
        let b = ParamRef::from(&ram);
        assert_eq!(a.shape(), b.shape());
        assert_eq!(a.to_vec::<i32>().unwrap(), b.to_vec::<i32>().unwrap());
        assert!(b.shares_storage_with(&ram));
        assert!(!a.shares_storage_with(&ram));
    }
}
