// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # runtime
//!
//! Runs compiled models on the CPU + KPU target.
//!
//! A model is a fixed sequence of operators over literal tensor shapes, in
//! one of two forms:
//! - A compiled Rust function registered by name in a [`ModelRegistry`].
//! - A validated `CompiledModel` from `model-ir`, interpreted by
//!   [`ScheduleRunner`] against a [`WeightStore`].
//!
//! Either way the model allocates its activations from the session's
//! `MemoryPool` through an [`ExecutionContext`], which also lends out the
//! accelerator and records per-node metrics.
//!
//! [`Session`] is the application surface: create, load an image, compute,
//! copy the output, decode detections.
//!
//! Execution is single-threaded and synchronous. Errors are never caught:
//! the first failing node aborts the run and is named in the error.

pub mod builtin;
mod config;
mod context;
mod detection;
mod error;
mod metrics;
mod registry;
mod schedule;
mod session;
mod weights;

pub use config::{KpuConfig, RuntimeConfig};
pub use context::{check_input, ExecutionContext};
pub use detection::{Detection, DetectionCallback, DetectionDecoder, RecordDecoder};
pub use error::RuntimeError;
pub use metrics::{InferenceMetrics, NodeMetrics};
pub use registry::{ModelFn, ModelRegistry};
pub use schedule::ScheduleRunner;
pub use session::Session;
pub use weights::WeightStore;
