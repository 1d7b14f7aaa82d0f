// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Batch-norm and activation tables the KPU reads by device address.
//!
//! Both are flat arrays of little-endian 64-bit words.

use crate::macros::sign_extend;

register_word! {
    /// Per-output-channel requantization: `y = ((acc * norm_mul) >> norm_shift) + norm_add`.
    BatchNormEntry {
        norm_mul: 24 @ 0,
        norm_add: 32 @ 24,
        norm_shift: 4 @ 56,
    }
}

register_word! {
    /// One segment of the piecewise-linear activation.
    ActivateParam {
        shift_number: 8 @ 0,
        y_mul: 16 @ 8,
        /// Signed 36-bit start of the segment.
        x_start: 36 @ 24,
    }
}

/// Number of activation segments.
pub const ACTIVATION_SEGMENTS: usize = 16;

/// Byte size of a serialised [`ActivationTable`]: 16 segment words plus two
/// words of per-segment output bias.
pub const ACTIVATION_TABLE_BYTES: usize = (ACTIVATION_SEGMENTS + 2) * 8;

/// Segment starts of the pass-through table. Segment 10 starts at zero and
/// is the only one with a slope; segments below it clamp negatives to zero.
const IDENTITY_X_START: [u64; ACTIVATION_SEGMENTS] = [
    0x8_0000_0000,
    0xf_7d4c_f4b8,
    0xf_8ed5_a20c,
    0xf_a05e_4f60,
    0xf_b2e0_5baa,
    0xf_c469_08fe,
    0xf_d5f1_b652,
    0xf_e77a_63a6,
    0xf_f9fc_6ff0,
    0xf_ffd4_a9b7,
    0,
    0x1d0d_ca98,
    0x2e96_77ec,
    0x401f_253f,
    0x52a1_318a,
    0x6429_dedd,
];

/// The 16-segment activation lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationTable {
    pub segments: [ActivateParam; ACTIVATION_SEGMENTS],
    /// Output bias added per segment.
    pub bias: [u8; ACTIVATION_SEGMENTS],
}

impl ActivationTable {
    /// The pass-through table used by convolution layers without a fused
    /// nonlinearity. The batch-norm stage leaves results scaled by 16, which
    /// segment 10 shifts back out.
    pub fn identity() -> Self {
        let mut segments = [ActivateParam::default(); ACTIVATION_SEGMENTS];
        for (seg, &x_start) in segments.iter_mut().zip(IDENTITY_X_START.iter()) {
            seg.x_start = x_start;
        }
        segments[10].shift_number = 4;
        segments[10].y_mul = 1;
        Self {
            segments,
            bias: [0; ACTIVATION_SEGMENTS],
        }
    }

    /// Serialises to the layout the device reads.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ACTIVATION_TABLE_BYTES);
        for seg in &self.segments {
            out.extend_from_slice(&seg.to_word().to_le_bytes());
        }
        out.extend_from_slice(&self.bias);
        out
    }

    /// Decodes a serialised table; `None` if `bytes` is too short.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < ACTIVATION_TABLE_BYTES {
            return None;
        }
        let mut segments = [ActivateParam::default(); ACTIVATION_SEGMENTS];
        for (seg, chunk) in segments.iter_mut().zip(bytes.chunks_exact(8)) {
            *seg = ActivateParam::from_word(read_word(chunk));
        }
        let mut bias = [0u8; ACTIVATION_SEGMENTS];
        bias.copy_from_slice(&bytes[ACTIVATION_SEGMENTS * 8..ACTIVATION_TABLE_BYTES]);
        Some(Self { segments, bias })
    }

    /// Evaluates the table at `x`, saturating to a byte.
    pub fn apply(&self, x: i64) -> u8 {
        let idx = self
            .segments
            .iter()
            .rposition(|s| sign_extend(s.x_start, 36) <= x)
            .unwrap_or(0);
        let seg = &self.segments[idx];
        let start = sign_extend(seg.x_start, 36);
        let y = (((x - start) * seg.y_mul as i64) >> seg.shift_number) + self.bias[idx] as i64;
        y.clamp(0, 255) as u8
    }
}

impl Default for ActivationTable {
    fn default() -> Self {
        Self::identity()
    }
}

/// Serialises batch-norm entries, one word per output channel.
pub fn batchnorm_table_bytes(entries: &[BatchNormEntry]) -> Vec<u8> {
    entries
        .iter()
        .flat_map(|e| e.to_word().to_le_bytes())
        .collect()
}

/// Decodes batch-norm entries from their serialised form.
pub fn batchnorm_entries(bytes: &[u8]) -> Vec<BatchNormEntry> {
    bytes
        .chunks_exact(8)
        .map(|c| BatchNormEntry::from_word(read_word(c)))
        .collect()
}

impl BatchNormEntry {
    /// Applies the entry to an accumulator value.
    pub fn apply(&self, acc: i64) -> i64 {
        ((acc * self.norm_mul as i64) >> self.norm_shift) + sign_extend(self.norm_add, 32)
    }
}

fn read_word(chunk: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&chunk[..8]);
    u64::from_le_bytes(buf)
}
