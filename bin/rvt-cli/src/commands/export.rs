// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `rvt export`: writes a compiled-in model as a model directory.
//!
//! The directory holds the manifest and a SafeTensors file with dense
//! weights, so `rvt run --manifest` can execute it through the schedule
//! runner.

use anyhow::Context;
use model_ir::{to_safetensor_dtype, CompiledModel, MANIFEST_FILE, WEIGHTS_FILE};
use runtime::builtin;
use safetensors::tensor::TensorView;
use std::path::Path;

pub fn execute(model: &str, dir: &Path) -> anyhow::Result<()> {
    let manifest = builtin::manifest_for(model)
        .with_context(|| format!("'{model}' has no compiled-in manifest"))?;
    let store = builtin::weights_for(model)
        .with_context(|| format!("'{model}' has no compiled-in weights"))?;
    let graph = CompiledModel::from_manifest(&manifest)?.validate()?;

    let mut dense = Vec::new();
    for (_, spec) in graph.weights() {
        let bytes = store.dense_bytes(spec)?;
        let dtype = to_safetensor_dtype(spec.dtype);
        dense.push((spec.name.as_str(), dtype, spec.shape.dims().to_vec(), bytes));
    }
    let views = dense
        .iter()
        .map(|(name, dtype, dims, bytes)| {
            Ok((*name, TensorView::new(*dtype, dims.clone(), bytes)?))
        })
        .collect::<Result<Vec<_>, safetensors::SafeTensorError>>()?;
    let weights = safetensors::tensor::serialize(views, &None)?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("cannot create '{}'", dir.display()))?;
    std::fs::write(dir.join(WEIGHTS_FILE), &weights)?;
    std::fs::write(dir.join(MANIFEST_FILE), manifest.to_json()?)?;

    tracing::info!(
        "exported '{model}' to {} ({} weights, {} bytes)",
        dir.display(),
        dense.len(),
        weights.len()
    );
    println!("  Exported {} to {}", graph.summary(), dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_ir::ModelLoader;

    #[test]
    fn test_export_loads_back() {
        let dir = std::env::temp_dir().join(format!("rvt_cli_export_{}", std::process::id()));
        execute(builtin::TINY_DETECT, &dir).unwrap();

        let graph = ModelLoader::load(&dir).unwrap();
        assert_eq!(graph.name(), builtin::TINY_DETECT);
        assert_eq!(graph.weights().count(), 4);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_model() {
        let dir = std::env::temp_dir().join("rvt_cli_export_unknown");
        assert!(execute("mobilenet", &dir).is_err());
    }
}
