// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! What a model function needs while it runs: the arena for activations,
//! the accelerator handle, and somewhere to record timings.

use crate::{InferenceMetrics, RuntimeError};
use kpu_hal::Accelerator;
use memory_manager::MemoryPool;
use operators::OperatorError;
use std::time::Instant;
use tensor_core::{DType, QuantParams, RamTensor, Shape};

/// Borrowed execution resources for one inference.
pub struct ExecutionContext<'a> {
    accel: &'a mut Accelerator,
    pool: &'a MemoryPool,
    metrics: Option<&'a mut InferenceMetrics>,
}

impl<'a> ExecutionContext<'a> {
    /// A context that records per-node metrics when `metrics` is given.
    pub fn new(
        accel: &'a mut Accelerator,
        pool: &'a MemoryPool,
        metrics: Option<&'a mut InferenceMetrics>,
    ) -> Self {
        Self {
            accel,
            pool,
            metrics,
        }
    }

    pub fn pool(&self) -> &MemoryPool {
        self.pool
    }

    /// Allocates a zeroed activation from the session arena.
    pub fn alloc(&self, shape: Shape, dtype: DType) -> Result<RamTensor, RuntimeError> {
        Ok(RamTensor::new_in(self.pool, shape, dtype)?)
    }

    /// Allocates an activation carrying fixed quantization parameters.
    pub fn alloc_quantized(
        &self,
        shape: Shape,
        dtype: DType,
        quant: QuantParams,
    ) -> Result<RamTensor, RuntimeError> {
        let t = self.alloc(shape, dtype)?;
        t.set_quant(quant);
        Ok(t)
    }

    /// Runs one node. `step` builds the operator and computes it; the
    /// accelerator is lent to it for the duration of the call.
    pub fn run(
        &mut self,
        node: &str,
        step: impl FnOnce(&mut Accelerator) -> Result<(), OperatorError>,
    ) -> Result<(), RuntimeError> {
        let start = Instant::now();
        step(&mut *self.accel).map_err(|source| RuntimeError::ExecutionError {
            node: node.to_string(),
            source,
        })?;
        let elapsed = start.elapsed();
        tracing::debug!("node '{node}' done in {elapsed:?}");
        if let Some(metrics) = self.metrics.as_deref_mut() {
            metrics.record_node(node, elapsed, self.pool.allocated_bytes());
        }
        Ok(())
    }
}

/// Rejects an input whose shape or element type differs from the model's.
pub fn check_input(input: &RamTensor, shape: Shape, dtype: DType) -> Result<(), RuntimeError> {
    if input.is_empty() {
        return Err(RuntimeError::InvalidInput("input tensor is empty".into()));
    }
    if input.shape() != shape || input.dtype() != dtype {
        return Err(RuntimeError::InvalidInput(format!(
            "model takes {shape} {dtype}, got {} {}",
            input.shape(),
            input.dtype()
        )));
    }
    Ok(())
}

impl std::fmt::Debug for ExecutionContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("arena_bytes", &self.pool.allocated_bytes())
            .field("profiling", &self.metrics.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_manager::MemoryBudget;
    use operators::{Operator, QuantizeOp, QuantizeParam, QuantizeStrategy};

    #[test]
    fn test_run_records_metrics() {
        let (mut accel, _) = Accelerator::simulated();
        let pool = MemoryPool::new(MemoryBudget::from_kb(64));
        let mut metrics = InferenceMetrics::new();
        let mut ctx = ExecutionContext::new(&mut accel, &pool, Some(&mut metrics));

        let input = ctx.alloc(Shape::chw(1, 2, 2), DType::F32).unwrap();
        let output = ctx.alloc(Shape::chw(1, 2, 2), DType::U8).unwrap();
        ctx.run("q", |_| {
            QuantizeOp::new(
                QuantizeParam::new(QuantizeStrategy::AffineF32ToU8),
                &input,
                &output,
            )?
            .compute()
        })
        .unwrap();
        drop(ctx);

        assert_eq!(metrics.node_metrics.len(), 1);
        assert_eq!(metrics.node_metrics[0].node_name, "q");
        assert!(metrics.node_metrics[0].arena_bytes > 0);
    }

    #[test]
    fn test_failure_names_the_node() {
        let (mut accel, _) = Accelerator::simulated();
        let pool = MemoryPool::unbounded();
        let mut ctx = ExecutionContext::new(&mut accel, &pool, None);
        let err = ctx
            .run("broken", |_| Err(OperatorError::AliasedOutput { op: "t" }))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ExecutionError { ref node, .. } if node == "broken"));
    }

    #[test]
    fn test_check_input() {
        let t = RamTensor::new(Shape::chw(3, 4, 4), DType::U8).unwrap();
        check_input(&t, Shape::chw(3, 4, 4), DType::U8).unwrap();
        assert!(matches!(
            check_input(&t, Shape::chw(3, 8, 8), DType::U8),
            Err(RuntimeError::InvalidInput(_))
        ));
        assert!(check_input(&t, Shape::chw(3, 4, 4), DType::F32).is_err());
        assert!(check_input(&RamTensor::empty(), Shape::chw(3, 4, 4), DType::U8).is_err());
    }

    #[test]
    fn test_alloc_respects_budget() {
        let (mut accel, _) = Accelerator::simulated();
        let pool = MemoryPool::new(MemoryBudget::from_bytes(64));
        let ctx = ExecutionContext::new(&mut accel, &pool, None);
        assert!(matches!(
            ctx.alloc(Shape::chw(4, 8, 8), DType::F32),
            Err(RuntimeError::TensorError(_))
        ));
    }
}
