// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `rvt inspect`: tensor table and schedule of a model.
//!
//! Reads a model directory, or the manifest of a compiled-in model when no
//! directory is given.

use anyhow::Context;
use model_ir::{graph::Validated, CompiledModel, ModelLoader, TensorKind};
use runtime::{builtin, ModelRegistry};
use std::path::PathBuf;

pub fn execute(dir: Option<PathBuf>, model: Option<String>) -> anyhow::Result<()> {
    let graph = match dir {
        Some(dir) => ModelLoader::load(&dir)
            .with_context(|| format!("failed to load model from '{}'", dir.display()))?,
        None => {
            let name = model.as_deref().unwrap_or(builtin::TINY_DETECT);
            let manifest = builtin::manifest_for(name)
                .with_context(|| format!("no compiled-in manifest for '{name}'"))?;
            CompiledModel::from_manifest(&manifest)?.validate()?
        }
    };

    println!("  {}", graph.summary());
    println!();

    // ── Tensors ────────────────────────────────────────────────
    println!(
        "  {:<4} {:<24} {:<16} {:<5} {:<10} {:>10}",
        "Id", "Name", "Shape", "Type", "Kind", "Bytes",
    );
    println!("  {}", "-".repeat(74));
    for (id, spec) in graph.tensors().iter().enumerate() {
        println!(
            "  {:<4} {:<24} {:<16} {:<5} {:<10} {:>10}",
            id,
            super::truncate(&spec.name, 24),
            spec.shape.to_string(),
            spec.dtype.to_string(),
            spec.kind.as_str(),
            spec.size_bytes(),
        );
    }
    println!();

    // ── Schedule ───────────────────────────────────────────────
    println!("  {:<4} {:<20} {:<10} {:<36} {:>4}", "Idx", "Node", "Op", "Flow", "KPU");
    println!("  {}", "-".repeat(78));
    for (idx, node) in graph.iter_nodes().enumerate() {
        let flow = format!(
            "{} -> {}",
            tensor_name(&graph, node.input()),
            tensor_name(&graph, node.output())
        );
        println!(
            "  {:<4} {:<20} {:<10} {:<36} {:>4}",
            idx,
            super::truncate(&node.name, 20),
            node.op_name(),
            super::truncate(&flow, 36),
            if node.is_accelerated() { "yes" } else { "" },
        );
    }
    println!();

    println!(
        "  Smallest workable arena: {:.1} KB",
        min_arena_bytes(&graph) as f64 / 1024.0
    );
    Ok(())
}

/// Prints the names the registry resolves.
pub fn list_models() -> anyhow::Result<()> {
    for name in ModelRegistry::with_builtin().names() {
        let marker = if builtin::manifest_for(name).is_some() { " (exportable)" } else { "" };
        println!("  {name}{marker}");
    }
    Ok(())
}

fn tensor_name(graph: &CompiledModel<Validated>, id: usize) -> &str {
    graph.tensor(id).map_or("?", |t| t.name.as_str())
}

/// Largest input plus output of any single node, the floor for a budget.
fn min_arena_bytes(graph: &CompiledModel<Validated>) -> usize {
    let activation = |id| {
        graph
            .tensor(id)
            .filter(|t| t.kind == TensorKind::Activation)
            .map_or(0, |t| t.size_bytes())
    };
    graph
        .iter_nodes()
        .map(|n| activation(n.input()) + activation(n.output()))
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_arena_covers_the_widest_node() {
        let manifest = builtin::manifest_for(builtin::TINY_DETECT).unwrap();
        let graph = CompiledModel::from_manifest(&manifest).unwrap().validate().unwrap();
        let widest = graph
            .iter_nodes()
            .map(|n| graph.tensor(n.output()).unwrap().size_bytes())
            .max()
            .unwrap();
        assert!(min_arena_bytes(&graph) > widest);
    }
}
