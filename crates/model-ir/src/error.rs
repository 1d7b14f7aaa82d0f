// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for manifest parsing and compiled-model validation.

/// Errors that can occur when reading or validating a compiled model.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The manifest file could not be read.
    #[error("failed to read manifest: {0}")]
    ManifestReadError(#[from] std::io::Error),

    /// The manifest JSON is malformed.
    #[error("failed to parse manifest: {0}")]
    ManifestParseError(#[from] serde_json::Error),

    /// A node or the model header names a tensor the table does not declare.
    #[error("'{owner}' refers to unknown tensor '{tensor}'")]
    UnknownTensor { owner: String, tensor: String },

    /// A tensor declaration is invalid (duplicate name, zero-sized shape).
    #[error("invalid tensor '{tensor}': {detail}")]
    InvalidTensor { tensor: String, detail: String },

    /// A node is inconsistent with the tensors it is bound to.
    #[error("invalid node '{node}': {detail}")]
    InvalidNode { node: String, detail: String },

    /// The node list is not a valid schedule.
    #[error("invalid model graph: {0}")]
    InvalidGraph(String),

    /// A weight tensor declared by the model is missing from the weight file.
    #[error("weight tensor not found: {name}")]
    WeightNotFound { name: String },

    /// A weight file entry disagrees with its declaration.
    #[error("weight '{name}' does not match its declaration: {detail}")]
    WeightMismatch { name: String, detail: String },

    /// The SafeTensors file could not be loaded.
    #[error("failed to load SafeTensors: {0}")]
    SafeTensorsError(String),
}
