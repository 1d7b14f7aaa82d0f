// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! JSON compiled-model manifest.
//!
//! The manifest (`model.json`) is what the offline compiler emits for one
//! model: every tensor with a literal shape, and the nodes in the order
//! they run.
//!
//! # Format
//! ```json
//! {
//!   "name": "tiny_detect",
//!   "input": "image",
//!   "output": "scores",
//!   "tensors": [
//!     { "name": "image", "shape": [1, 3, 8, 8], "dtype": "u8",
//!       "quant": { "scale": 0.0039, "zero_point": 0 } },
//!     { "name": "conv0.weight", "shape": [4, 3, 3, 3], "dtype": "u8", "kind": "weight" },
//!     ...
//!   ],
//!   "nodes": [
//!     { "name": "conv0", "op": "kpu_conv", "input": "image", "output": "conv0.out",
//!       "weight": "conv0.weight", "bias": "conv0.bias", "stride": 1, "pad": 2 },
//!     { "name": "dequant0", "op": "quantize", "strategy": "affine_u8_f32",
//!       "input": "conv0.out", "output": "scores" }
//!   ]
//! }
//! ```

use crate::{ModelError, TensorKind};
use std::path::Path;
use tensor_core::{DType, Shape};

/// Top-level manifest, deserialized from `model.json`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    /// Model name, also the registry key.
    pub name: String,
    /// Tensor the caller's image is written into.
    pub input: String,
    /// Tensor returned to the caller.
    pub output: String,
    pub tensors: Vec<ManifestTensor>,
    /// Nodes in execution order.
    pub nodes: Vec<ManifestNode>,
}

/// One entry of the tensor table.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ManifestTensor {
    pub name: String,
    pub shape: Shape,
    pub dtype: DType,
    #[serde(default)]
    pub kind: TensorKind,
    /// Scale and zero point the compiler fixed for this tensor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quant: Option<ManifestQuant>,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ManifestQuant {
    pub scale: f32,
    #[serde(default)]
    pub zero_point: i32,
}

/// One scheduled node. Which optional fields apply depends on `op`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ManifestNode {
    pub name: String,
    /// `"cpu_conv"`, `"kpu_conv"` or `"quantize"`.
    pub op: String,
    pub input: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bias: Option<String>,
    #[serde(default = "one")]
    pub stride: usize,
    #[serde(default = "one")]
    pub dilation: usize,
    /// Total padding per axis.
    #[serde(default)]
    pub pad: usize,
    /// Quantization strategy name, for `quantize` nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

fn one() -> usize {
    1
}

impl ModelManifest {
    /// Loads a manifest from a JSON file path.
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parses a manifest from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let manifest: Self = serde_json::from_str(json)?;
        Ok(manifest)
    }

    pub fn to_json(&self) -> Result<String, ModelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Names of the tensors declared as weights.
    pub fn weight_names(&self) -> impl Iterator<Item = &str> {
        self.tensors
            .iter()
            .filter(|t| t.kind == TensorKind::Weight)
            .map(|t| t.name.as_str())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A KPU conv, a dequantize and a CPU conv, in that order.
    pub(crate) fn sample_manifest_json() -> &'static str {
        r#"{
            "name": "tiny_detect",
            "input": "image",
            "output": "scores",
            "tensors": [
                { "name": "image", "shape": [1, 2, 6, 6], "dtype": "u8",
                  "quant": { "scale": 1.0, "zero_point": 0 } },
                { "name": "conv0.weight", "shape": [3, 2, 3, 3], "dtype": "u8", "kind": "weight",
                  "quant": { "scale": 1.0 } },
                { "name": "conv0.bias", "shape": [3, 1, 1, 1], "dtype": "i32", "kind": "weight" },
                { "name": "conv0.out", "shape": [1, 3, 6, 6], "dtype": "u8",
                  "quant": { "scale": 1.0, "zero_point": 0 } },
                { "name": "conv0.real", "shape": [1, 3, 6, 6], "dtype": "f32" },
                { "name": "head.weight", "shape": [2, 3, 1, 1], "dtype": "f32", "kind": "weight" },
                { "name": "scores", "shape": [1, 2, 6, 6], "dtype": "f32" }
            ],
            "nodes": [
                { "name": "conv0", "op": "kpu_conv", "input": "image", "output": "conv0.out",
                  "weight": "conv0.weight", "bias": "conv0.bias", "pad": 2 },
                { "name": "dequant0", "op": "quantize", "strategy": "affine_u8_f32",
                  "input": "conv0.out", "output": "conv0.real" },
                { "name": "head", "op": "cpu_conv", "input": "conv0.real", "output": "scores",
                  "weight": "head.weight" }
            ]
        }"#
    }

    #[test]
    fn test_parse_manifest() {
        let m = ModelManifest::from_json(sample_manifest_json()).unwrap();
        assert_eq!(m.name, "tiny_detect");
        assert_eq!(m.tensors.len(), 7);
        assert_eq!(m.nodes.len(), 3);
        assert_eq!(m.tensors[0].shape, Shape::new(1, 2, 6, 6));
        assert_eq!(m.tensors[0].kind, TensorKind::Activation);
        assert_eq!(m.tensors[1].quant.unwrap().zero_point, 0);
    }

    #[test]
    fn test_node_defaults() {
        let m = ModelManifest::from_json(sample_manifest_json()).unwrap();
        let head = &m.nodes[2];
        assert_eq!((head.stride, head.dilation, head.pad), (1, 1, 0));
        assert!(head.bias.is_none());
        assert_eq!(m.nodes[1].strategy.as_deref(), Some("affine_u8_f32"));
    }

    #[test]
    fn test_weight_names() {
        let m = ModelManifest::from_json(sample_manifest_json()).unwrap();
        let names: Vec<_> = m.weight_names().collect();
        assert_eq!(names, ["conv0.weight", "conv0.bias", "head.weight"]);
    }

    #[test]
    fn test_bad_dtype_rejected() {
        let json = r#"{
            "name": "bad", "input": "x", "output": "x",
            "tensors": [{ "name": "x", "shape": [1, 1, 1, 1], "dtype": "f64" }],
            "nodes": []
        }"#;
        assert!(matches!(
            ModelManifest::from_json(json),
            Err(ModelError::ManifestParseError(_))
        ));
    }

    #[test]
    fn test_serde_roundtrip() {
        let m = ModelManifest::from_json(sample_manifest_json()).unwrap();
        let back = ModelManifest::from_json(&m.to_json().unwrap()).unwrap();
        assert_eq!(back.name, m.name);
        assert_eq!(back.nodes.len(), m.nodes.len());
        assert_eq!(back.tensors[2].dtype, DType::I32);
    }
}
