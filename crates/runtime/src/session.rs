// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The application-facing inference session.
//!
//! A [`Session`] owns everything one camera-to-result loop needs: the
//! activation arena, the accelerator handle, the model to run and the
//! current input and output tensors.
//!
//! ```text
//! create → load_image → compute → copy_output / inference_result
//!              ↑______________________|
//! ```

use crate::{
    builtin, DetectionCallback, DetectionDecoder, ExecutionContext, InferenceMetrics, ModelFn,
    ModelRegistry, RuntimeConfig, RuntimeError, ScheduleRunner, WeightStore,
};
use kpu_hal::Accelerator;
use memory_manager::{AllocationStats, MemoryPool};
use model_ir::{graph::Validated, CompiledModel, ModelLoader, WEIGHTS_FILE};
use std::time::Instant;
use tensor_core::{RamTensor, Shape};

enum Program {
    Compiled { name: String, run: ModelFn },
    Scheduled {
        model: CompiledModel<Validated>,
        weights: WeightStore,
    },
}

impl Program {
    fn name(&self) -> &str {
        match self {
            Program::Compiled { name, .. } => name,
            Program::Scheduled { model, .. } => model.name(),
        }
    }
}

/// One model bound to an arena and an accelerator.
pub struct Session {
    config: RuntimeConfig,
    pool: MemoryPool,
    accel: Accelerator,
    program: Program,
    image: Option<RamTensor>,
    output: Option<RamTensor>,
    metrics: Option<InferenceMetrics>,
}

impl Session {
    /// Creates a session on the simulated accelerator, resolving the model
    /// through the built-in registry.
    pub fn create(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let (accel, _) = Accelerator::simulated();
        Self::with_parts(config, &ModelRegistry::with_builtin(), accel)
    }

    /// Creates a session from explicit parts.
    ///
    /// With `manifest_path` set, the manifest is loaded and validated and
    /// its weights are mapped from the SafeTensors file next to it, or taken
    /// from the compiled-in weights of a built-in model of the same name.
    /// Otherwise `model` is looked up in `registry`.
    pub fn with_parts(
        config: RuntimeConfig,
        registry: &ModelRegistry,
        accel: Accelerator,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        let budget = config.parse_budget()?;
        let pool = MemoryPool::new(budget);

        let program = match &config.manifest_path {
            Some(path) => {
                let model = ModelLoader::load_manifest(path)?;
                let weights_path = path.with_file_name(WEIGHTS_FILE);
                let weights = if weights_path.exists() {
                    WeightStore::open_safetensors(&weights_path, &model)?
                } else {
                    builtin::weights_for(model.name()).ok_or_else(|| {
                        RuntimeError::WeightLoadError {
                            name: weights_path.display().to_string(),
                            detail: "no weight file and no compiled-in weights".into(),
                        }
                    })?
                };
                Program::Scheduled { model, weights }
            }
            None => Program::Compiled {
                name: config.model.clone(),
                run: registry.lookup(&config.model)?,
            },
        };

        tracing::info!(
            "session for '{}' on {}, arena budget {budget}",
            program.name(),
            accel.device_name()
        );
        Ok(Self {
            config,
            pool,
            accel,
            program,
            image: None,
            output: None,
            metrics: None,
        })
    }

    pub fn model_name(&self) -> &str {
        self.program.name()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn device_name(&self) -> &str {
        self.accel.device_name()
    }

    /// Copies a dense (C, H, W) 8-bit image into a new input tensor.
    pub fn load_image(
        &mut self,
        buf: &[u8],
        channels: usize,
        height: usize,
        width: usize,
    ) -> Result<(), RuntimeError> {
        let expected = channels
            .checked_mul(height)
            .and_then(|n| n.checked_mul(width));
        if expected.map_or(true, |n| n == 0 || buf.len() != n) {
            return Err(RuntimeError::InvalidInput(format!(
                "image buffer of {} bytes for {channels}x{height}x{width}",
                buf.len()
            )));
        }
        self.image = None;
        let shape = Shape::new(1, channels, height, width);
        self.image = Some(RamTensor::from_dense_in(&self.pool, shape, buf)?);
        tracing::debug!("loaded image {shape}");
        Ok(())
    }

    /// Runs the model on the loaded image.
    pub fn compute(&mut self) -> Result<(), RuntimeError> {
        let image = self
            .image
            .as_ref()
            .ok_or(RuntimeError::NotReady("no image loaded"))?;
        self.output = None;

        let start = Instant::now();
        let mut metrics = InferenceMetrics::new();
        let recorder = self.config.enable_profiling.then_some(&mut metrics);
        let mut ctx = ExecutionContext::new(&mut self.accel, &self.pool, recorder);

        let output = match &self.program {
            Program::Compiled { run, .. } => run(&mut ctx, image)?,
            Program::Scheduled { model, weights } => {
                ScheduleRunner::new(model, weights)?.run(&mut ctx, image)?
            }
        };
        drop(ctx);

        metrics.finalise(start.elapsed(), self.pool.stats().peak_allocated_bytes);
        if self.config.enable_profiling {
            tracing::info!("{}", metrics.summary());
            self.metrics = Some(metrics);
        }
        self.output = Some(output);
        Ok(())
    }

    /// The output of the last [`compute`](Self::compute).
    pub fn output(&self) -> Option<&RamTensor> {
        self.output.as_ref()
    }

    fn ready_output(&self) -> Result<&RamTensor, RuntimeError> {
        self.output
            .as_ref()
            .ok_or(RuntimeError::NotReady("compute has not run"))
    }

    /// Bytes [`copy_output`](Self::copy_output) writes: the output without
    /// channel padding.
    pub fn output_size_bytes(&self) -> Result<usize, RuntimeError> {
        let out = self.ready_output()?;
        Ok(out.shape().dense_elements() * out.elem_size())
    }

    /// Copies the output plane by plane into `dst`, dropping the padding
    /// between channel planes. `dst` must be exactly
    /// [`output_size_bytes`](Self::output_size_bytes) long.
    pub fn copy_output(&self, dst: &mut [u8]) -> Result<(), RuntimeError> {
        let out = self.ready_output()?;
        let expected = self.output_size_bytes()?;
        if dst.len() != expected {
            return Err(RuntimeError::OutputSizeMismatch {
                expected,
                actual: dst.len(),
            });
        }
        let plane = out.shape().plane() * out.elem_size();
        let stride = out.cstep() * out.elem_size();
        out.with_bytes(|src| {
            for (i, chunk) in dst.chunks_exact_mut(plane).enumerate() {
                chunk.copy_from_slice(&src[i * stride..i * stride + plane]);
            }
        })?;
        Ok(())
    }

    /// Decodes `result` and hands each detection to `callback`. Returns the
    /// number of detections.
    pub fn inference_result(
        &self,
        result: &[u8],
        decoder: &dyn DetectionDecoder,
        callback: &mut dyn DetectionCallback,
    ) -> Result<usize, RuntimeError> {
        let detections = decoder.decode(result)?;
        for d in &detections {
            callback.on_detection(d);
        }
        tracing::debug!("'{}': {} detections", self.model_name(), detections.len());
        Ok(detections.len())
    }

    /// Metrics of the last run, when profiling is enabled.
    pub fn metrics(&self) -> Option<&InferenceMetrics> {
        self.metrics.as_ref()
    }

    pub fn pool_stats(&self) -> AllocationStats {
        self.pool.stats()
    }

    /// Live arena bytes.
    pub fn arena_bytes(&self) -> usize {
        self.pool.allocated_bytes()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("model", &self.model_name())
            .field("accel", &self.accel)
            .field("image_loaded", &self.image.is_some())
            .field("output_ready", &self.output.is_some())
            .finish()
    }
}
