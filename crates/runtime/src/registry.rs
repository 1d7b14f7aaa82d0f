// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Name → compiled model function lookup.

use crate::{ExecutionContext, RuntimeError};
use std::collections::BTreeMap;
use tensor_core::RamTensor;

/// A compiled model: allocates its activations from the context, runs its
/// operators in order and returns the output tensor.
pub type ModelFn = fn(&mut ExecutionContext<'_>, &RamTensor) -> Result<RamTensor, RuntimeError>;

/// Compiled models known to the runtime, by name.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelFn>,
}

impl ModelRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the models built into this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(crate::builtin::TINY_DETECT, crate::builtin::tiny_detect);
        registry
    }

    /// Registers `model` under `name`, replacing any earlier entry.
    pub fn register(&mut self, name: impl Into<String>, model: ModelFn) {
        let name = name.into();
        if self.models.insert(name.clone(), model).is_some() {
            tracing::warn!("model '{name}' registered twice, keeping the latest");
        }
    }

    pub fn lookup(&self, name: &str) -> Result<ModelFn, RuntimeError> {
        self.models
            .get(name)
            .copied()
            .ok_or_else(|| RuntimeError::UnknownModel(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}
