// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the inference runtime.

/// Errors that can occur while creating a session or running a model.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// No compiled model is registered under this name.
    #[error("unknown model '{0}'")]
    UnknownModel(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Model loading or validation failed.
    #[error("model error: {0}")]
    ModelError(#[from] model_ir::ModelError),

    /// Weight bytes could not be found, mapped or bound.
    #[error("weight loading failed for '{name}': {detail}")]
    WeightLoadError { name: String, detail: String },

    /// A tensor could not be allocated or accessed outside an operator.
    #[error("tensor error: {0}")]
    TensorError(#[from] tensor_core::TensorError),

    /// An operator failed. Device faults arrive here too.
    #[error("execution error in node '{node}': {source}")]
    ExecutionError {
        node: String,
        #[source]
        source: operators::OperatorError,
    },

    /// The caller's input does not match what the model expects.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A session call was made out of order.
    #[error("session not ready: {0}")]
    NotReady(&'static str),

    /// The destination buffer for the output has the wrong size.
    #[error("output buffer size mismatch: expected {expected} bytes, got {actual}")]
    OutputSizeMismatch { expected: usize, actual: usize },

    /// A result buffer could not be decoded.
    #[error("invalid inference result: {0}")]
    InvalidResult(String),
}
