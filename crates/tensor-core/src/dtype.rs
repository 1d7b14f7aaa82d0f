// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Supported tensor element data types.

use std::fmt;

/// Enumerates the numeric types a tensor can hold.
///
/// The element byte width drives the channel stride (`cstep`) and every
/// size check in the crate, so two types of equal width are still distinct:
/// reading an `F16` tensor as `u16` is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 32-bit IEEE 754 floating point.
    F32,
    /// 32-bit signed integer (accelerator bias, accumulator units).
    I32,
    /// 16-bit IEEE 754 floating point. Raw byte access only.
    F16,
    /// 16-bit signed integer (symmetric quantization).
    I16,
    /// 16-bit unsigned integer (affine quantization).
    U16,
    /// 8-bit unsigned integer (affine quantization, accelerator I/O).
    U8,
    /// 8-bit signed integer (symmetric quantization).
    I8,
}

impl DType {
    /// Returns the size of a single element in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F16 | DType::I16 | DType::U16 => 2,
            DType::U8 | DType::I8 => 1,
        }
    }

    /// Returns a human-readable label for this data type.
    pub fn as_str(self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::I32 => "i32",
            DType::F16 => "f16",
            DType::I16 => "i16",
            DType::U16 => "u16",
            DType::U8 => "u8",
            DType::I8 => "i8",
        }
    }

    /// Parses the label produced by [`DType::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "f32" | "float32" => Some(DType::F32),
            "i32" | "int32" => Some(DType::I32),
            "f16" | "float16" => Some(DType::F16),
            "i16" | "int16" => Some(DType::I16),
            "u16" | "uint16" => Some(DType::U16),
            "u8" | "uint8" => Some(DType::U8),
            "i8" | "int8" => Some(DType::I8),
            _ => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Rust scalar type that can be viewed in place over tensor bytes.
pub trait Element: bytemuck::Pod + Default + PartialOrd + fmt::Debug + Send + Sync {
    /// The tensor dtype this scalar corresponds to.
    const DTYPE: DType;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(impl Element for $ty {
            const DTYPE: DType = DType::$dtype;
        })*
    };
}

impl_element!(f32 => F32, i32 => I32, i16 => I16, u16 => U16, u8 => U8, i8 => I8);
