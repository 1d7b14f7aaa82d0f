// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Compiled model: a tensor table and a node list in execution order.
//!
//! # Type-State Pattern
//!
//! ```text
//! CompiledModel<Loaded>     names resolved, operator parameters parsed.
//!       │  .validate()
//!       ▼
//! CompiledModel<Validated>  schedule order, shapes and dtypes checked.
//! ```
//!
//! Only a validated model can be handed to the schedule runner.

use crate::manifest::ManifestNode;
use crate::{ConvNode, ModelError, ModelManifest, Node, NodeKind, TensorId, TensorKind, TensorSpec};
use operators::{ConvParam, QuantizeParam, QuantizeStrategy};
use std::collections::HashMap;
use std::fmt;
use tensor_core::{DType, QuantParams};

// ── Type-state markers ─────────────────────────────────────────────

/// Marker: names resolved, not yet checked.
#[derive(Debug, Clone)]
pub struct Loaded;

/// Marker: checked and ready to run.
#[derive(Debug, Clone)]
pub struct Validated;

/// Sealed trait for model states.
pub trait ModelState: fmt::Debug + Clone {}
impl ModelState for Loaded {}
impl ModelState for Validated {}

// ── CompiledModel ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CompiledModel<S: ModelState = Loaded> {
    name: String,
    tensors: Vec<TensorSpec>,
    nodes: Vec<Node>,
    input: TensorId,
    output: TensorId,
    _state: std::marker::PhantomData<S>,
}

// ── Loaded state ───────────────────────────────────────────────────

impl CompiledModel<Loaded> {
    /// Resolves tensor names and parses operator parameters.
    pub fn from_manifest(manifest: &ModelManifest) -> Result<Self, ModelError> {
        let mut ids = HashMap::with_capacity(manifest.tensors.len());
        let mut tensors = Vec::with_capacity(manifest.tensors.len());
        for t in &manifest.tensors {
            if ids.insert(t.name.as_str(), tensors.len()).is_some() {
                return Err(ModelError::InvalidTensor {
                    tensor: t.name.clone(),
                    detail: "declared twice".into(),
                });
            }
            tensors.push(TensorSpec {
                name: t.name.clone(),
                shape: t.shape,
                dtype: t.dtype,
                kind: t.kind,
                quant: t.quant.map(|q| QuantParams::new(q.scale, q.zero_point)),
            });
        }

        let lookup = |owner: &str, name: &str| {
            ids.get(name).copied().ok_or_else(|| ModelError::UnknownTensor {
                owner: owner.to_string(),
                tensor: name.to_string(),
            })
        };

        let input = lookup(&manifest.name, &manifest.input)?;
        let output = lookup(&manifest.name, &manifest.output)?;
        let nodes = manifest
            .nodes
            .iter()
            .map(|n| resolve_node(n, &lookup))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: manifest.name.clone(),
            tensors,
            nodes,
            input,
            output,
            _state: std::marker::PhantomData,
        })
    }

    /// Checks the schedule and transitions to the `Validated` state.
    ///
    /// # Checks
    /// - At least one node; no tensor has a zero-sized shape.
    /// - The model input and output are activations.
    /// - Every node reads activations that the model input or an earlier
    ///   node produced, and writes an activation nothing else writes.
    /// - Weight and bias operands are weight tensors.
    /// - Output shapes follow the operator's shape law; dtypes match what
    ///   the operator accepts.
    /// - The model output is produced by some node.
    pub fn validate(self) -> Result<CompiledModel<Validated>, ModelError> {
        if self.nodes.is_empty() {
            return Err(ModelError::InvalidGraph("model contains no nodes".into()));
        }
        for t in &self.tensors {
            if t.shape.is_empty() {
                return Err(ModelError::InvalidTensor {
                    tensor: t.name.clone(),
                    detail: format!("shape {} has no elements", t.shape),
                });
            }
        }
        for (role, id) in [("input", self.input), ("output", self.output)] {
            if self.tensors[id].kind != TensorKind::Activation {
                return Err(ModelError::InvalidGraph(format!(
                    "model {role} '{}' is a weight",
                    self.tensors[id].name
                )));
            }
        }

        let mut ready: Vec<bool> = self
            .tensors
            .iter()
            .enumerate()
            .map(|(id, t)| t.kind == TensorKind::Weight || id == self.input)
            .collect();
        for node in &self.nodes {
            self.check_order(node, &ready)?;
            self.check_operands(node)?;
            ready[node.output()] = true;
        }
        if !ready[self.output] {
            return Err(ModelError::InvalidGraph(format!(
                "no node produces the model output '{}'",
                self.tensors[self.output].name
            )));
        }

        let used: Vec<TensorId> = self
            .nodes
            .iter()
            .flat_map(|n| n.params().into_iter().chain([n.input(), n.output()]))
            .collect();
        for (id, t) in self.tensors.iter().enumerate() {
            if !used.contains(&id) && id != self.input {
                tracing::warn!("model '{}': tensor '{}' is never used", self.name, t.name);
            }
        }

        Ok(CompiledModel {
            name: self.name,
            tensors: self.tensors,
            nodes: self.nodes,
            input: self.input,
            output: self.output,
            _state: std::marker::PhantomData,
        })
    }

    fn check_order(&self, node: &Node, ready: &[bool]) -> Result<(), ModelError> {
        let invalid = |detail: String| ModelError::InvalidNode {
            node: node.name.clone(),
            detail,
        };
        let input = &self.tensors[node.input()];
        let output = &self.tensors[node.output()];
        if input.kind != TensorKind::Activation || output.kind != TensorKind::Activation {
            return Err(invalid("input and output must be activations".into()));
        }
        if !ready[node.input()] {
            return Err(invalid(format!(
                "reads '{}' before any node produces it",
                input.name
            )));
        }
        if ready[node.output()] {
            return Err(invalid(format!("'{}' is already written", output.name)));
        }
        for p in node.params() {
            if self.tensors[p].kind != TensorKind::Weight {
                return Err(invalid(format!(
                    "parameter '{}' is not a weight",
                    self.tensors[p].name
                )));
            }
        }
        Ok(())
    }

    fn check_operands(&self, node: &Node) -> Result<(), ModelError> {
        let invalid = |detail: String| ModelError::InvalidNode {
            node: node.name.clone(),
            detail,
        };
        let spec = |id: TensorId| &self.tensors[id];
        let expect_dtype = |id: TensorId, dtype: DType| {
            if spec(id).dtype == dtype {
                Ok(())
            } else {
                Err(invalid(format!(
                    "'{}' is {}, {} expects {dtype}",
                    spec(id).name,
                    spec(id).dtype,
                    node.op_name()
                )))
            }
        };

        match node.kind {
            NodeKind::CpuConv(c) | NodeKind::KpuConv(c) => {
                let (data, bias) = if node.is_accelerated() {
                    (DType::U8, DType::I32)
                } else {
                    (DType::F32, DType::F32)
                };
                for id in [c.input, c.output, c.weight] {
                    expect_dtype(id, data)?;
                }
                let weight = spec(c.weight).shape;
                let expected = c
                    .param
                    .output_shape(node.op_name(), spec(c.input).shape, weight)
                    .map_err(|e| invalid(e.to_string()))?;
                if expected != spec(c.output).shape {
                    return Err(invalid(format!(
                        "output '{}' is {}, convolution yields {expected}",
                        spec(c.output).name,
                        spec(c.output).shape
                    )));
                }
                if let Some(b) = c.bias {
                    expect_dtype(b, bias)?;
                    if spec(b).shape.dense_elements() != weight.n {
                        return Err(invalid(format!(
                            "bias '{}' has {} values for {} output channels",
                            spec(b).name,
                            spec(b).shape.dense_elements(),
                            weight.n
                        )));
                    }
                }
            }
            NodeKind::Quantize {
                input,
                output,
                param,
            } => {
                let (from, to) = param
                    .strategy
                    .dtypes()
                    .ok_or_else(|| invalid("strategy 'none' cannot run".into()))?;
                expect_dtype(input, from)?;
                expect_dtype(output, to)?;
                if spec(input).shape != spec(output).shape {
                    return Err(invalid(format!(
                        "shapes differ: {} vs {}",
                        spec(input).shape,
                        spec(output).shape
                    )));
                }
            }
        }
        Ok(())
    }
}

fn resolve_node(
    n: &ManifestNode,
    lookup: &impl Fn(&str, &str) -> Result<TensorId, ModelError>,
) -> Result<Node, ModelError> {
    let invalid = |detail: String| ModelError::InvalidNode {
        node: n.name.clone(),
        detail,
    };
    let input = lookup(&n.name, &n.input)?;
    let output = lookup(&n.name, &n.output)?;

    let conv = |quantized: bool| -> Result<ConvNode, ModelError> {
        let weight = n
            .weight
            .as_deref()
            .ok_or_else(|| invalid("convolution without a weight".into()))?;
        let bias = n.bias.as_deref().map(|b| lookup(&n.name, b)).transpose()?;
        let mut param = ConvParam::new(n.stride, n.dilation, n.pad);
        param.quantized = quantized;
        Ok(ConvNode {
            input,
            output,
            weight: lookup(&n.name, weight)?,
            bias,
            param,
        })
    };

    let kind = match n.op.as_str() {
        "cpu_conv" => NodeKind::CpuConv(conv(false)?),
        "kpu_conv" => NodeKind::KpuConv(conv(true)?),
        "quantize" => {
            let name = n
                .strategy
                .as_deref()
                .ok_or_else(|| invalid("quantize without a strategy".into()))?;
            let strategy = QuantizeStrategy::parse(name)
                .ok_or_else(|| invalid(format!("unknown strategy '{name}'")))?;
            NodeKind::Quantize {
                input,
                output,
                param: QuantizeParam::new(strategy),
            }
        }
        other => return Err(invalid(format!("unknown op '{other}'"))),
    };
    Ok(Node {
        name: n.name.clone(),
        kind,
    })
}

// ── Validated state ────────────────────────────────────────────────

impl CompiledModel<Validated> {
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes in execution order.
    pub fn iter_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Weight tensors and their ids.
    pub fn weights(&self) -> impl Iterator<Item = (TensorId, &TensorSpec)> {
        self.tensors
            .iter()
            .enumerate()
            .filter(|(_, t)| t.kind == TensorKind::Weight)
    }

    /// Total weight bytes including channel padding.
    pub fn total_weight_bytes(&self) -> usize {
        self.weights().map(|(_, t)| t.size_bytes()).sum()
    }

    /// Arena bytes needed if every activation is alive at once.
    pub fn total_activation_bytes(&self) -> usize {
        self.tensors
            .iter()
            .filter(|t| t.kind == TensorKind::Activation)
            .map(TensorSpec::size_bytes)
            .sum()
    }

    pub fn summary(&self) -> String {
        let kpu = self.nodes.iter().filter(|n| n.is_accelerated()).count();
        format!(
            "Model '{}': {} nodes ({} on KPU), {:.1} KB weights, {:.1} KB activations",
            self.name,
            self.num_nodes(),
            kpu,
            self.total_weight_bytes() as f64 / 1024.0,
            self.total_activation_bytes() as f64 / 1024.0,
        )
    }
}

// ── Shared implementations ─────────────────────────────────────────

impl<S: ModelState> CompiledModel<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tensors(&self) -> &[TensorSpec] {
        &self.tensors
    }

    pub fn tensor(&self, id: TensorId) -> Option<&TensorSpec> {
        self.tensors.get(id)
    }

    pub fn input(&self) -> TensorId {
        self.input
    }

    pub fn output(&self) -> TensorId {
        self.output
    }
}

impl<S: ModelState> fmt::Display for CompiledModel<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CompiledModel '{}' ({} nodes):", self.name, self.nodes.len())?;
        for node in &self.nodes {
            let t = |id: TensorId| self.tensors[id].name.as_str();
            writeln!(
                f,
                "  {:<12} {:<9} {} -> {}",
                node.name,
                node.op_name(),
                t(node.input()),
                t(node.output())
            )?;
        }
        Ok(())
    }
}
