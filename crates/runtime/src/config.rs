// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! model = "tiny_detect"
//! manifest_path = "./models/tiny_detect/model.json"
//! memory_budget = "2M"
//! enable_profiling = true
//!
//! [kpu]
//! io_memory_bytes = 2097152
//! kernel_cache_bytes = 16384
//! ```

use crate::RuntimeError;
use memory_manager::MemoryBudget;
use std::path::{Path, PathBuf};

/// Configuration for an inference session.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RuntimeConfig {
    /// Registered model name. Ignored when `manifest_path` is set.
    pub model: String,
    /// A compiled-model manifest to run instead of a registered model. The
    /// weight file is looked up next to it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<PathBuf>,
    /// Arena budget for activations (human-readable, e.g., `"2M"`).
    pub memory_budget: String,
    /// Whether to record per-node timings.
    #[serde(default = "default_true")]
    pub enable_profiling: bool,
    #[serde(default)]
    pub kpu: KpuConfig,
}

/// Accelerator sizes the session expects. They describe the hardware and
/// must match it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KpuConfig {
    pub io_memory_bytes: usize,
    pub kernel_cache_bytes: usize,
}

impl Default for KpuConfig {
    fn default() -> Self {
        Self {
            io_memory_bytes: kpu_hal::IO_MEMORY_BYTES,
            kernel_cache_bytes: kpu_hal::KERNEL_CACHE_BYTES,
        }
    }
}

fn default_true() -> bool {
    true
}

impl RuntimeConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::ConfigError(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, RuntimeError> {
        toml::from_str(toml_str)
            .map_err(|e| RuntimeError::ConfigError(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, RuntimeError> {
        toml::to_string_pretty(self)
            .map_err(|e| RuntimeError::ConfigError(format!("TOML serialise error: {e}")))
    }

    /// Parses the memory budget string into a [`MemoryBudget`].
    pub fn parse_budget(&self) -> Result<MemoryBudget, RuntimeError> {
        MemoryBudget::parse(&self.memory_budget)
            .map_err(|e| RuntimeError::ConfigError(format!("invalid budget: {e}")))
    }

    /// Checks the budget parses and the KPU section matches the hardware.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        self.parse_budget()?;
        let hw = KpuConfig::default();
        if self.kpu != hw {
            return Err(RuntimeError::ConfigError(format!(
                "kpu section {:?} does not match the accelerator ({:?})",
                self.kpu, hw
            )));
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model: crate::builtin::TINY_DETECT.to_string(),
            manifest_path: None,
            memory_budget: "2M".to_string(),
            enable_profiling: true,
            kpu: KpuConfig::default(),
        }
    }
}
