// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Resolved tensors and nodes of a compiled model.
//!
//! Names from the manifest are resolved to [`TensorId`] indices into the
//! model's tensor table, and operator parameters are parsed into the types
//! the operators take.

use operators::{ConvParam, QuantizeParam};
use std::fmt;
use tensor_core::{DType, QuantParams, Shape};

/// Index into a model's tensor table.
pub type TensorId = usize;

/// Where a tensor's bytes come from at run time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorKind {
    /// Allocated from the arena once per inference.
    #[default]
    Activation,
    /// An immutable view over weight bytes, bound once per session.
    Weight,
}

impl TensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Activation => "activation",
            Self::Weight => "weight",
        }
    }
}

impl fmt::Display for TensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tensor of the model, with its literal shape.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Shape,
    pub dtype: DType,
    pub kind: TensorKind,
    /// Scale and zero point fixed by the compiler, if any.
    pub quant: Option<QuantParams>,
}

impl TensorSpec {
    /// Bytes the tensor occupies including channel padding.
    pub fn size_bytes(&self) -> usize {
        self.shape.size_bytes(self.dtype)
    }

    /// Bytes of the dense (N, C, H, W) data, as stored in a weight file.
    pub fn dense_bytes(&self) -> usize {
        self.shape.dense_elements() * self.dtype.size_bytes()
    }

    pub fn summary(&self) -> String {
        format!("{} {} {} ({})", self.name, self.shape, self.dtype, self.kind)
    }
}

/// Operands of a convolution node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvNode {
    pub input: TensorId,
    pub output: TensorId,
    pub weight: TensorId,
    pub bias: Option<TensorId>,
    pub param: ConvParam,
}

/// The operator a node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    CpuConv(ConvNode),
    KpuConv(ConvNode),
    Quantize {
        input: TensorId,
        output: TensorId,
        param: QuantizeParam,
    },
}

/// One step of the schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
}

impl Node {
    /// The operator name, as written in the manifest.
    pub fn op_name(&self) -> &'static str {
        match self.kind {
            NodeKind::CpuConv(_) => "cpu_conv",
            NodeKind::KpuConv(_) => "kpu_conv",
            NodeKind::Quantize { .. } => "quantize",
        }
    }

    pub fn input(&self) -> TensorId {
        match self.kind {
            NodeKind::CpuConv(c) | NodeKind::KpuConv(c) => c.input,
            NodeKind::Quantize { input, .. } => input,
        }
    }

    pub fn output(&self) -> TensorId {
        match self.kind {
            NodeKind::CpuConv(c) | NodeKind::KpuConv(c) => c.output,
            NodeKind::Quantize { output, .. } => output,
        }
    }

    /// Weight and bias tensors the node reads.
    pub fn params(&self) -> Vec<TensorId> {
        match self.kind {
            NodeKind::CpuConv(c) | NodeKind::KpuConv(c) => {
                std::iter::once(c.weight).chain(c.bias).collect()
            }
            NodeKind::Quantize { .. } => Vec::new(),
        }
    }

    /// Whether the node runs on the accelerator.
    pub fn is_accelerated(&self) -> bool {
        matches!(self.kind, NodeKind::KpuConv(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use operators::QuantizeStrategy;

    #[test]
    fn test_node_accessors() {
        let conv = Node {
            name: "c".into(),
            kind: NodeKind::KpuConv(ConvNode {
                input: 0,
                output: 3,
                weight: 1,
                bias: Some(2),
                param: ConvParam::new(1, 1, 2).quantized(),
            }),
        };
        assert_eq!(conv.op_name(), "kpu_conv");
        assert_eq!((conv.input(), conv.output()), (0, 3));
        assert_eq!(conv.params(), vec![1, 2]);
        assert!(conv.is_accelerated());

        let q = Node {
            name: "q".into(),
            kind: NodeKind::Quantize {
                input: 3,
                output: 4,
                param: QuantizeParam::new(QuantizeStrategy::AffineU8ToF32),
            },
        };
        assert!(q.params().is_empty());
        assert!(!q.is_accelerated());
    }

    #[test]
    fn test_tensor_sizes() {
        let t = TensorSpec {
            name: "w".into(),
            shape: Shape::new(4, 3, 3, 3),
            dtype: DType::U8,
            kind: TensorKind::Weight,
            quant: None,
        };
        assert_eq!(t.dense_bytes(), 108);
        assert_eq!(t.size_bytes(), 4 * 3 * 16);
        assert!(t.summary().contains("weight"));
    }
}
