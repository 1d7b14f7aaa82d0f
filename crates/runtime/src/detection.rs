// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Detection results handed back to the application.

use crate::RuntimeError;

/// One detected box in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Detection {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
    pub class: u32,
    pub prob: f32,
}

/// Receives each decoded detection, typically to draw it.
pub trait DetectionCallback {
    fn on_detection(&mut self, detection: &Detection);
}

impl<F: FnMut(&Detection)> DetectionCallback for F {
    fn on_detection(&mut self, detection: &Detection) {
        self(detection)
    }
}

/// Turns a result buffer into detections.
pub trait DetectionDecoder {
    fn decode(&self, buf: &[u8]) -> Result<Vec<Detection>, RuntimeError>;
}

/// Decodes packed little-endian records of five `u32`
/// (`x1, y1, x2, y2, class`) followed by an `f32` probability.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordDecoder {
    threshold: Option<f32>,
}

impl RecordDecoder {
    pub const RECORD_BYTES: usize = 24;

    pub fn new() -> Self {
        Self::default()
    }

    /// Drops records whose probability is below `threshold`.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    fn record(chunk: &[u8]) -> Detection {
        let word = |i: usize| {
            let mut b = [0u8; 4];
            b.copy_from_slice(&chunk[i * 4..i * 4 + 4]);
            b
        };
        Detection {
            x1: u32::from_le_bytes(word(0)),
            y1: u32::from_le_bytes(word(1)),
            x2: u32::from_le_bytes(word(2)),
            y2: u32::from_le_bytes(word(3)),
            class: u32::from_le_bytes(word(4)),
            prob: f32::from_le_bytes(word(5)),
        }
    }
}

impl DetectionDecoder for RecordDecoder {
    fn decode(&self, buf: &[u8]) -> Result<Vec<Detection>, RuntimeError> {
        if buf.len() % Self::RECORD_BYTES != 0 {
            return Err(RuntimeError::InvalidResult(format!(
                "{} bytes is not a whole number of {}-byte records",
                buf.len(),
                Self::RECORD_BYTES
            )));
        }
        Ok(buf
            .chunks_exact(Self::RECORD_BYTES)
            .map(Self::record)
            .filter(|d| self.threshold.map_or(true, |t| d.prob >= t))
            .collect())
    }
}
