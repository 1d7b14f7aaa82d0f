// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor shape descriptors and the channel-stride rule.

use crate::DType;
use std::fmt;

/// Every channel plane of a multi-channel tensor starts on this boundary.
pub const PLANE_ALIGN: usize = 16;

/// A four-dimensional (N, C, H, W) shape.
///
/// Shapes are fixed when a model is compiled, so the type is `Copy` and
/// carries no rank information beyond the four axes.
///
/// In manifests a shape is written as a four-element array, `[1, 3, 8, 8]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(from = "[usize; 4]", into = "[usize; 4]")]
pub struct Shape {
    /// Batch count.
    pub n: usize,
    /// Channel count.
    pub c: usize,
    /// Height (rows).
    pub h: usize,
    /// Width (columns).
    pub w: usize,
}

impl Shape {
    /// Creates a new shape.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{DType, Shape};
    /// let s = Shape::new(1, 3, 5, 5);
    /// assert_eq!(s.plane(), 25);
    /// // 25 f32 = 100 bytes, padded to 112 bytes per plane.
    /// assert_eq!(s.cstep(DType::F32), 28);
    /// ```
    pub const fn new(n: usize, c: usize, h: usize, w: usize) -> Self {
        Self { n, c, h, w }
    }

    /// A single-batch (1, C, H, W) shape.
    pub const fn chw(c: usize, h: usize, w: usize) -> Self {
        Self::new(1, c, h, w)
    }

    /// Elements in one channel plane (`H * W`).
    pub fn plane(&self) -> usize {
        self.h * self.w
    }

    /// Number of channel planes across all batches (`N * C`).
    pub fn planes(&self) -> usize {
        self.n * self.c
    }

    /// Elements without any plane padding (`N * C * H * W`).
    pub fn dense_elements(&self) -> usize {
        self.planes() * self.plane()
    }

    /// Per-channel element stride.
    ///
    /// With more than one channel, each plane is padded so that
    /// `cstep * E` is a multiple of [`PLANE_ALIGN`]. A single-channel
    /// tensor is stored densely.
    pub fn cstep(&self, dtype: DType) -> usize {
        let elem = dtype.size_bytes();
        if self.c > 1 {
            (self.plane() * elem).next_multiple_of(PLANE_ALIGN) / elem
        } else {
            self.plane()
        }
    }

    /// Total elements including plane padding (`N * C * cstep`).
    pub fn total_elements(&self, dtype: DType) -> usize {
        self.planes() * self.cstep(dtype)
    }

    /// Byte size of the strided buffer.
    pub fn size_bytes(&self, dtype: DType) -> usize {
        self.total_elements(dtype) * dtype.size_bytes()
    }

    /// Element index of `(n, c, h, w)` in the strided buffer.
    pub fn index(&self, dtype: DType, n: usize, c: usize, h: usize, w: usize) -> usize {
        (n * self.c + c) * self.cstep(dtype) + h * self.w + w
    }

    /// Returns `true` when the shape holds no elements.
    pub fn is_empty(&self) -> bool {
        self.dense_elements() == 0
    }

    /// The shape as `[N, C, H, W]`.
    pub fn dims(&self) -> [usize; 4] {
        [self.n, self.c, self.h, self.w]
    }
}

impl From<[usize; 4]> for Shape {
    fn from([n, c, h, w]: [usize; 4]) -> Self {
        Self::new(n, c, h, w)
    }
}

impl From<Shape> for [usize; 4] {
    fn from(s: Shape) -> Self {
        s.dims()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.n, self.c, self.h, self.w)
    }
}
