// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # model-ir
//!
//! The description of a compiled model: a table of tensors with literal
//! shapes and a list of operator nodes in topological order.
//!
//! - [`ModelManifest`]: the JSON form the offline compiler emits.
//! - [`TensorSpec`], [`Node`], [`NodeKind`]: the resolved tensor table and
//!   schedule, with operator parameters already parsed.
//! - [`CompiledModel`]: the whole model with a **type-state pattern**
//!   (`Loaded` → `Validated`).
//! - [`ModelLoader`]: reads a model directory and checks a SafeTensors
//!   weight file against the declared weights.
//!
//! # Example
//! ```no_run
//! use model_ir::ModelLoader;
//! use std::path::Path;
//!
//! let model = ModelLoader::load(Path::new("./models/tiny_detect")).unwrap();
//! println!("{}", model.summary());
//! for node in model.iter_nodes() {
//!     println!("  {} ({})", node.name, node.op_name());
//! }
//! ```

mod error;
pub mod graph;
mod loader;
mod manifest;
mod node;

pub use error::ModelError;
pub use graph::CompiledModel;
pub use loader::{
    convert_safetensor_dtype, to_safetensor_dtype, ModelLoader, WeightMeta, MANIFEST_FILE,
    WEIGHTS_FILE,
};
pub use manifest::{ManifestNode, ManifestQuant, ManifestTensor, ModelManifest};
pub use node::{ConvNode, Node, NodeKind, TensorId, TensorKind, TensorSpec};
