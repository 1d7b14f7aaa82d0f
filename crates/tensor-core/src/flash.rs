// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Immutable tensor views over caller-owned bytes.

use crate::layout::{channel_range, flat_range, row_range, unpack_planes};
use crate::{DType, Element, QuantParams, Shape, TensorError};
use std::borrow::Cow;

/// A read-only tensor over bytes the runtime never allocates or frees:
/// weight arrays compiled into the binary or a memory-mapped weight file.
///
/// The view is bound exactly once, either at construction
/// ([`from_static`](FlashTensor::from_static)) or with
/// [`bind_data`](FlashTensor::bind_data). The bytes must already be in the
/// plane-padded layout of the shape.
///
/// # Examples
/// ```
/// use tensor_core::{DType, FlashTensor, Shape, TensorError};
///
/// static BIAS: [u8; 8] = [1, 0, 0, 0, 2, 0, 0, 0];
/// let mut bias = FlashTensor::new(Shape::new(2, 1, 1, 1), DType::I32);
/// bias.bind_data(&BIAS).unwrap();
/// assert!(matches!(bias.bind_data(&BIAS), Err(TensorError::AlreadyBound)));
/// assert_eq!(bias.to_vec::<i32>().unwrap(), vec![1, 2]);
/// ```
#[derive(Debug, Clone)]
pub struct FlashTensor<'w> {
    shape: Shape,
    dtype: DType,
    data: Option<&'w [u8]>,
    quant: QuantParams,
}

impl<'w> FlashTensor<'w> {
    /// An unbound view.
    pub fn new(shape: Shape, dtype: DType) -> Self {
        Self {
            shape,
            dtype,
            data: None,
            quant: QuantParams::default(),
        }
    }

    /// A view bound to `data` at construction.
    pub fn from_static(shape: Shape, dtype: DType, data: &'w [u8]) -> Result<Self, TensorError> {
        let mut view = Self::new(shape, dtype);
        view.bind_data(data)?;
        Ok(view)
    }

    /// Binds the view to `data`. Fails if already bound or if the length is
    /// not the exact byte size of the shape.
    pub fn bind_data(&mut self, data: &'w [u8]) -> Result<(), TensorError> {
        if self.data.is_some() {
            return Err(TensorError::AlreadyBound);
        }
        let expected = self.size_bytes();
        if data.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        self.data = Some(data);
        Ok(())
    }

    /// Attaches quantization parameters (weight scale and zero point).
    pub fn with_quant(mut self, quant: QuantParams) -> Self {
        self.quant = quant;
        self
    }

    pub fn set_quant(&mut self, quant: QuantParams) {
        self.quant = quant;
    }

    pub fn quant(&self) -> QuantParams {
        self.quant
    }

    pub fn is_bound(&self) -> bool {
        self.data.is_some()
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn cstep(&self) -> usize {
        self.shape.cstep(self.dtype)
    }

    pub fn size_bytes(&self) -> usize {
        self.shape.size_bytes(self.dtype)
    }

    /// The bound bytes.
    pub fn bytes(&self) -> Result<&'w [u8], TensorError> {
        self.data.ok_or(TensorError::Unbound)
    }

    /// Typed elements. Borrowed when the bytes are suitably aligned, copied
    /// otherwise (byte arrays in a binary carry no alignment guarantee).
    pub fn as_slice<T: Element>(&self) -> Result<Cow<'w, [T]>, TensorError> {
        if T::DTYPE != self.dtype {
            return Err(TensorError::DTypeMismatch {
                expected: T::DTYPE,
                actual: self.dtype,
            });
        }
        typed(self.bytes()?)
    }

    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, TensorError> {
        self.as_slice().map(Cow::into_owned)
    }

    /// Dense `N*C*H*W` values with plane padding removed.
    pub fn to_dense_vec<T: Element>(&self) -> Result<Vec<T>, TensorError> {
        let shape = self.shape;
        self.as_slice().map(|s: Cow<'_, [T]>| unpack_planes(shape, &s))
    }

    /// Row `y` of the first plane.
    pub fn row<T: Element>(&self, y: usize) -> Result<Cow<'w, [T]>, TensorError> {
        self.grep_row_range(y, 1)?.as_slice()
    }

    fn sub_view(&self, elem_offset: usize, shape: Shape) -> Result<Self, TensorError> {
        let bytes = self.bytes()?;
        let start = elem_offset * self.dtype.size_bytes();
        let len = shape.size_bytes(self.dtype);
        Ok(Self {
            shape,
            dtype: self.dtype,
            data: Some(&bytes[start..start + len]),
            quant: QuantParams::default(),
        })
    }

    /// View of channel plane `c`.
    pub fn grep_channel(&self, c: usize) -> Result<Self, TensorError> {
        let (off, shape) = channel_range(self.shape, self.dtype, "grep_channel", c, 1)?;
        self.sub_view(off, shape)
    }

    /// View of planes `c..c+count`.
    pub fn grep_channel_range(&self, c: usize, count: usize) -> Result<Self, TensorError> {
        let (off, shape) =
            channel_range(self.shape, self.dtype, "grep_channel_range", c, count)?;
        self.sub_view(off, shape)
    }

    /// View of rows `y..y+rows` of the first plane.
    pub fn grep_row_range(&self, y: usize, rows: usize) -> Result<Self, TensorError> {
        let (off, shape) = row_range(self.shape, "grep_row_range", y, rows)?;
        self.sub_view(off, shape)
    }

    /// View of the flat element range `x..x+count`.
    pub fn grep_range(&self, x: usize, count: usize) -> Result<Self, TensorError> {
        let (off, shape) = flat_range(self.shape, self.dtype, "grep_range", x, count)?;
        self.sub_view(off, shape)
    }
}

pub(crate) fn typed<T: Element>(bytes: &[u8]) -> Result<Cow<'_, [T]>, TensorError> {
    match bytemuck::try_cast_slice(bytes) {
        Ok(slice) => Ok(Cow::Borrowed(slice)),
        Err(bytemuck::PodCastError::TargetAlignmentGreaterAndInputNotAligned) => {
            Ok(Cow::Owned(bytemuck::pod_collect_to_vec(bytes)))
        }
        Err(e) => Err(TensorError::Layout(e)),
    }
}
