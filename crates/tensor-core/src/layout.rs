// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Conversions between dense NCHW data and the plane-padded tensor layout,
//! plus the offset arithmetic shared by every slicing operation.

use crate::{DType, Element, Shape, TensorError};

/// Spreads dense `N*C*H*W` values into the plane-padded layout of `shape`.
/// Padding elements are zero.
pub fn pack_planes<T: Element>(shape: Shape, dense: &[T]) -> Result<Vec<T>, TensorError> {
    let elem = T::DTYPE.size_bytes();
    if dense.len() != shape.dense_elements() {
        return Err(TensorError::BufferSizeMismatch {
            expected: shape.dense_elements() * elem,
            actual: dense.len() * elem,
        });
    }
    let plane = shape.plane();
    let cstep = shape.cstep(T::DTYPE);
    if cstep == plane {
        return Ok(dense.to_vec());
    }

    let mut out = vec![T::default(); shape.total_elements(T::DTYPE)];
    for (p, src) in dense.chunks_exact(plane.max(1)).enumerate() {
        out[p * cstep..p * cstep + plane].copy_from_slice(src);
    }
    Ok(out)
}

/// Drops plane padding, returning dense `N*C*H*W` values.
///
/// `strided` must hold at least `shape.total_elements(T::DTYPE)` values.
pub fn unpack_planes<T: Element>(shape: Shape, strided: &[T]) -> Vec<T> {
    let plane = shape.plane();
    let cstep = shape.cstep(T::DTYPE);
    let mut out = Vec::with_capacity(shape.dense_elements());
    for p in 0..shape.planes() {
        out.extend_from_slice(&strided[p * cstep..p * cstep + plane]);
    }
    out
}

/// Element offset and shape of the channel planes `c..c+count`.
pub(crate) fn channel_range(
    shape: Shape,
    dtype: DType,
    op: &'static str,
    c: usize,
    count: usize,
) -> Result<(usize, Shape), TensorError> {
    let planes = shape.planes();
    if count == 0 || c.checked_add(count).map_or(true, |end| end > planes) {
        return Err(TensorError::SliceOutOfBounds {
            op,
            start: c,
            count,
            limit: planes,
        });
    }
    let sub = Shape::new(1, count, shape.h, shape.w);
    let cstep = shape.cstep(dtype);
    // A dense single-channel batch cannot be re-read as an aligned
    // multi-channel tensor unless the plane already happens to be aligned.
    if count > 1 && sub.cstep(dtype) != cstep {
        return Err(TensorError::SliceOutOfBounds {
            op,
            start: c,
            count,
            limit: 1,
        });
    }
    Ok((cstep * c, sub))
}

/// Element offset and shape of rows `y..y+rows` of the first plane.
pub(crate) fn row_range(
    shape: Shape,
    op: &'static str,
    y: usize,
    rows: usize,
) -> Result<(usize, Shape), TensorError> {
    if rows == 0 || y.checked_add(rows).map_or(true, |end| end > shape.h) {
        return Err(TensorError::SliceOutOfBounds {
            op,
            start: y,
            count: rows,
            limit: shape.h,
        });
    }
    Ok((shape.w * y, Shape::new(1, 1, rows, shape.w)))
}

/// Element offset and shape of the flat range `x..x+count`.
pub(crate) fn flat_range(
    shape: Shape,
    dtype: DType,
    op: &'static str,
    x: usize,
    count: usize,
) -> Result<(usize, Shape), TensorError> {
    let total = shape.total_elements(dtype);
    if count == 0 || x.checked_add(count).map_or(true, |end| end > total) {
        return Err(TensorError::SliceOutOfBounds {
            op,
            start: x,
            count,
            limit: total,
        });
    }
    Ok((x, Shape::new(1, 1, 1, count)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        // 3 channels of 2x2 u8: plane 4 bytes, padded to 16.
        let shape = Shape::new(1, 3, 2, 2);
        let dense: Vec<u8> = (1..=12).collect();
        let packed = pack_planes(shape, &dense).unwrap();
        assert_eq!(packed.len(), 48);
        assert_eq!(&packed[0..4], &[1, 2, 3, 4]);
        assert_eq!(&packed[4..16], &[0; 12]);
        assert_eq!(&packed[16..20], &[5, 6, 7, 8]);
        assert_eq!(unpack_planes(shape, &packed), dense);
    }

    #[test]
    fn test_pack_dense_when_aligned() {
        let shape = Shape::new(1, 2, 2, 2);
        let dense = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        assert_eq!(pack_planes(shape, &dense).unwrap(), dense.to_vec());
    }

    #[test]
    fn test_pack_wrong_len() {
        let shape = Shape::new(1, 2, 2, 2);
        assert!(matches!(
            pack_planes(shape, &[1.0f32; 7]),
            Err(TensorError::BufferSizeMismatch {
                expected: 32,
                actual: 28
            })
        ));
    }

    #[test]
    fn test_channel_range_bounds() {
        let shape = Shape::new(1, 4, 3, 3);
        let (off, sub) = channel_range(shape, DType::F32, "t", 1, 2).unwrap();
        assert_eq!(off, 12);
        assert_eq!(sub, Shape::new(1, 2, 3, 3));
        assert!(channel_range(shape, DType::F32, "t", 3, 2).is_err());
        assert!(channel_range(shape, DType::F32, "t", 0, 0).is_err());
    }

    #[test]
    fn test_unaligned_batch_planes_rejected() {
        // N=2, C=1: planes are dense 9-element runs.
        let shape = Shape::new(2, 1, 3, 3);
        assert!(channel_range(shape, DType::F32, "t", 1, 1).is_ok());
        assert!(channel_range(shape, DType::F32, "t", 0, 2).is_err());
    }

    #[test]
    fn test_row_and_flat_range() {
        let shape = Shape::new(1, 1, 4, 5);
        assert_eq!(row_range(shape, "t", 1, 2).unwrap(), (5, Shape::new(1, 1, 2, 5)));
        assert!(row_range(shape, "t", 3, 2).is_err());
        assert_eq!(
            flat_range(shape, DType::U8, "t", 18, 2).unwrap(),
            (18, Shape::new(1, 1, 1, 2))
        );
        assert!(flat_range(shape, DType::U8, "t", 19, 2).is_err());
    }

    #[test]
    fn test_huge_slice_arguments_rejected() {
        let shape = Shape::new(1, 4, 3, 3);
        let big = usize::MAX;
        assert!(matches!(
            channel_range(shape, DType::F32, "t", 1, big),
            Err(TensorError::SliceOutOfBounds { .. })
        ));
        assert!(matches!(
            row_range(shape, "t", big, 2),
            Err(TensorError::SliceOutOfBounds { .. })
        ));
        assert!(matches!(
            flat_range(shape, DType::F32, "t", 2, big),
            Err(TensorError::SliceOutOfBounds { .. })
        ));
    }
}
