// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Interprets a validated [`CompiledModel`] node by node.
//!
//! Weight views are bound once when the runner is built. Each run allocates
//! every activation from the context's arena with the literal shape from
//! the model, builds the node's operator right before computing it, and
//! drops an activation as soon as the last node reading it has run.

use crate::context::check_input;
use crate::{ExecutionContext, RuntimeError, WeightStore};
use model_ir::{graph::Validated, CompiledModel, ModelError, NodeKind, TensorId, TensorKind};
use operators::{CpuConvOp, KpuConvOp, Operator, QuantizeOp};
use tensor_core::{FlashTensor, ParamRef, RamTensor};

/// Runs one validated model against a weight store.
pub struct ScheduleRunner<'m, 'w> {
    model: &'m CompiledModel<Validated>,
    /// Bound weight views, indexed by tensor id.
    weights: Vec<Option<FlashTensor<'w>>>,
    /// Index of the last node reading each tensor.
    last_use: Vec<Option<usize>>,
}

impl<'m, 'w> ScheduleRunner<'m, 'w> {
    /// Binds every weight the model declares.
    pub fn new(
        model: &'m CompiledModel<Validated>,
        store: &'w WeightStore,
    ) -> Result<Self, RuntimeError> {
        let mut weights: Vec<Option<FlashTensor<'w>>> =
            model.tensors().iter().map(|_| None).collect();
        for (id, spec) in model.weights() {
            weights[id] = Some(store.bind(spec)?);
        }

        let mut last_use = vec![None; model.tensors().len()];
        for (i, node) in model.iter_nodes().enumerate() {
            last_use[node.input()] = Some(i);
        }

        tracing::debug!(
            "schedule for '{}': {} nodes, {} weights bound",
            model.name(),
            model.num_nodes(),
            model.weights().count()
        );
        Ok(Self {
            model,
            weights,
            last_use,
        })
    }

    pub fn model(&self) -> &CompiledModel<Validated> {
        self.model
    }

    fn weight(&self, id: TensorId) -> Result<&FlashTensor<'w>, RuntimeError> {
        self.weights
            .get(id)
            .and_then(Option::as_ref)
            .ok_or_else(|| self.missing(id, "weight"))
    }

    fn missing(&self, id: TensorId, what: &str) -> RuntimeError {
        let name = self
            .model
            .tensor(id)
            .map_or_else(|| format!("#{id}"), |t| t.name.clone());
        RuntimeError::ModelError(ModelError::InvalidGraph(format!(
            "{what} '{name}' is not available"
        )))
    }

    /// Runs every node in order and returns the model output.
    ///
    /// The input's quantization parameters are overwritten with the ones
    /// the model declares for it, if any.
    pub fn run(
        &self,
        ctx: &mut ExecutionContext<'_>,
        input: &RamTensor,
    ) -> Result<RamTensor, RuntimeError> {
        let tensors = self.model.tensors();
        let input_spec = &tensors[self.model.input()];
        check_input(input, input_spec.shape, input_spec.dtype)?;
        if let Some(q) = input_spec.quant {
            input.set_quant(q);
        }

        let mut acts: Vec<Option<RamTensor>> = vec![None; tensors.len()];
        acts[self.model.input()] = Some(input.clone());

        for (i, node) in self.model.iter_nodes().enumerate() {
            let out_spec = &tensors[node.output()];
            debug_assert_eq!(out_spec.kind, TensorKind::Activation);
            let output = match out_spec.quant {
                Some(q) => ctx.alloc_quantized(out_spec.shape, out_spec.dtype, q)?,
                None => ctx.alloc(out_spec.shape, out_spec.dtype)?,
            };
            let src = acts[node.input()]
                .as_ref()
                .ok_or_else(|| self.missing(node.input(), "activation"))?;

            match node.kind {
                NodeKind::CpuConv(c) => {
                    let weight = self.weight(c.weight)?;
                    let bias = c.bias.map(|b| self.weight(b)).transpose()?;
                    ctx.run(&node.name, |_| {
                        CpuConvOp::new(c.param, src, &output, weight, bias.map(ParamRef::from))?
                            .compute()
                    })?;
                }
                NodeKind::KpuConv(c) => {
                    let weight = self.weight(c.weight)?;
                    let bias = c.bias.map(|b| self.weight(b)).transpose()?;
                    ctx.run(&node.name, |accel| {
                        KpuConvOp::new(accel, c.param, src, &output, weight, bias)?.compute()
                    })?;
                }
                NodeKind::Quantize { param, .. } => {
                    ctx.run(&node.name, |_| QuantizeOp::new(param, src, &output)?.compute())?;
                }
            }

            acts[node.output()] = Some(output);
            if self.last_use[node.input()] == Some(i) && node.input() != self.model.output() {
                acts[node.input()] = None;
            }
        }

        acts[self.model.output()]
            .take()
            .ok_or_else(|| self.missing(self.model.output(), "output"))
    }
}

impl std::fmt::Debug for ScheduleRunner<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleRunner")
            .field("model", &self.model.name())
            .field("nodes", &self.model.num_nodes())
            .finish()
    }
}
