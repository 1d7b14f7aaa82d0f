// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

/// Mask of the low `width` bits.
pub(crate) const fn field_mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Reads a `width`-bit two's-complement field as a signed value.
pub(crate) const fn sign_extend(value: u64, width: u32) -> i64 {
    let shift = 64 - width;
    ((value << shift) as i64) >> shift
}

/// Defines a 64-bit register word as a struct of named fields, each given as
/// `name: width @ lsb`. Bits not covered by a field are reserved and
/// written as zero. Values wider than their field are truncated, so
/// negative numbers land as two's complement of the field width.
macro_rules! register_word {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$fmeta:meta])* $field:ident : $width:literal @ $lsb:literal ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: u64, )*
        }

        impl $name {
            /// Serialises the fields into the hardware bit layout.
            pub fn to_word(&self) -> u64 {
                0u64 $( | ((self.$field & $crate::macros::field_mask($width)) << $lsb) )*
            }

            /// Decodes a word read back from the hardware layout.
            pub fn from_word(word: u64) -> Self {
                Self {
                    $( $field: (word >> $lsb) & $crate::macros::field_mask($width), )*
                }
            }
        }
    };
}
