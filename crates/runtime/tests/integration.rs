// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: end-to-end inference through a session.
//!
//! These tests exercise the complete flow from model resolution (registry
//! or manifest + weight file) through arena allocation, KPU and CPU
//! operators, to the dense output copy, proving that the crates compose.

use kpu_hal::{Accelerator, SimulatedKpu};
use model_ir::{
    graph::Validated, to_safetensor_dtype, CompiledModel, MANIFEST_FILE, WEIGHTS_FILE,
};
use operators::{Operator, OperatorError, QuantizeOp, QuantizeParam, QuantizeStrategy};
use runtime::builtin::{tiny_detect_manifest, tiny_detect_weights};
use runtime::{ExecutionContext, ModelRegistry, RuntimeConfig, RuntimeError, Session};
use std::path::{Path, PathBuf};
use tensor_core::{DType, RamTensor, Shape};

// ── Helpers ────────────────────────────────────────────────────

const PIXELS: usize = 3 * 8 * 8;

fn test_image() -> Vec<u8> {
    (0..PIXELS).map(|i| (i * 29 % 256) as u8).collect()
}

fn run_session(config: RuntimeConfig) -> Vec<f32> {
    let mut session = Session::create(config).unwrap();
    session.load_image(&test_image(), 3, 8, 8).unwrap();
    session.compute().unwrap();
    let mut dense = vec![0u8; session.output_size_bytes().unwrap()];
    session.copy_output(&mut dense).unwrap();
    bytemuck::pod_collect_to_vec(&dense)
}

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("rvt_it_{tag}_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Writes `tiny_detect` as a manifest plus a dense SafeTensors file.
fn export_tiny_detect(dir: &Path) -> PathBuf {
    let manifest = tiny_detect_manifest();
    let model: CompiledModel<Validated> = CompiledModel::from_manifest(&manifest)
        .unwrap()
        .validate()
        .unwrap();
    let store = tiny_detect_weights();

    let mut dense = Vec::new();
    for (_, spec) in model.weights() {
        let bytes = store.dense_bytes(spec).unwrap();
        let dtype = to_safetensor_dtype(spec.dtype);
        dense.push((spec.name.clone(), dtype, spec.shape.dims().to_vec(), bytes));
    }
    let views: Vec<_> = dense
        .iter()
        .map(|(name, dtype, dims, bytes)| {
            let view = safetensors::tensor::TensorView::new(*dtype, dims.clone(), bytes).unwrap();
            (name.as_str(), view)
        })
        .collect();
    std::fs::write(
        dir.join(WEIGHTS_FILE),
        safetensors::tensor::serialize(views, &None).unwrap(),
    )
    .unwrap();

    let manifest_path = dir.join(MANIFEST_FILE);
    std::fs::write(&manifest_path, manifest.to_json().unwrap()).unwrap();
    manifest_path
}

// ── Session ────────────────────────────────────────────────────

#[test]
fn test_compiled_session_end_to_end() {
    let scores = run_session(RuntimeConfig::default());
    assert_eq!(scores.len(), 2 * 64);
    assert!(scores.iter().all(|v| v.is_finite()));
    // A non-constant image gives a non-constant score map.
    assert!(scores.iter().any(|&v| v != scores[0]));
}

#[test]
fn test_file_backed_schedule_matches_compiled() {
    let dir = scratch_dir("file");
    let manifest_path = export_tiny_detect(&dir);

    let compiled = run_session(RuntimeConfig::default());
    let scheduled = run_session(RuntimeConfig {
        manifest_path: Some(manifest_path),
        ..Default::default()
    });
    assert_eq!(compiled, scheduled);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_manifest_without_weight_file_uses_builtin_weights() {
    let dir = scratch_dir("builtin");
    let path = dir.join(MANIFEST_FILE);
    std::fs::write(&path, tiny_detect_manifest().to_json().unwrap()).unwrap();

    let scheduled = run_session(RuntimeConfig {
        manifest_path: Some(path),
        ..Default::default()
    });
    assert_eq!(scheduled, run_session(RuntimeConfig::default()));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_manifest_without_any_weights() {
    let dir = scratch_dir("noweights");
    let mut manifest = tiny_detect_manifest();
    manifest.name = "renamed".into();
    let path = dir.join(MANIFEST_FILE);
    std::fs::write(&path, manifest.to_json().unwrap()).unwrap();

    let result = Session::create(RuntimeConfig {
        manifest_path: Some(path),
        ..Default::default()
    });
    assert!(matches!(result, Err(RuntimeError::WeightLoadError { .. })));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_unknown_model_name() {
    let result = Session::create(RuntimeConfig {
        model: "mobilenet".into(),
        ..Default::default()
    });
    assert!(matches!(result, Err(RuntimeError::UnknownModel(_))));
}

#[test]
fn test_config_from_toml_file() {
    let dir = scratch_dir("config");
    let path = dir.join("rvt.toml");
    std::fs::write(
        &path,
        "model = \"tiny_detect\"\nmemory_budget = \"64K\"\nenable_profiling = false\n",
    )
    .unwrap();

    let config = RuntimeConfig::from_file(&path).unwrap();
    assert_eq!(run_session(config).len(), 128);

    std::fs::remove_dir_all(&dir).ok();
}

// ── Failures ───────────────────────────────────────────────────

#[test]
fn test_dma_fault_names_the_node() {
    let accel = Accelerator::new(SimulatedKpu::new().with_dma_fault());
    let mut session =
        Session::with_parts(RuntimeConfig::default(), &ModelRegistry::with_builtin(), accel)
            .unwrap();
    session.load_image(&test_image(), 3, 8, 8).unwrap();

    let err = session.compute().unwrap_err();
    assert!(matches!(
        &err,
        RuntimeError::ExecutionError { node, source: OperatorError::Hardware(_) } if node == "conv0"
    ));
    assert!(session.output().is_none());
}

#[test]
fn test_budget_too_small() {
    let mut session = Session::create(RuntimeConfig {
        memory_budget: "1K".into(),
        ..Default::default()
    })
    .unwrap();
    session.load_image(&test_image(), 3, 8, 8).unwrap();
    assert!(matches!(
        session.compute(),
        Err(RuntimeError::TensorError(_))
    ));
}

// ── Arena accounting ───────────────────────────────────────────

#[test]
fn test_intermediates_return_to_the_arena() {
    let mut session = Session::create(RuntimeConfig::default()).unwrap();
    session.load_image(&test_image(), 3, 8, 8).unwrap();
    let image_bytes = session.arena_bytes();
    assert_eq!(image_bytes, Shape::new(1, 3, 8, 8).size_bytes(DType::U8));

    for _ in 0..3 {
        session.compute().unwrap();
        let output_bytes = session.output().unwrap().size_bytes();
        assert_eq!(session.arena_bytes(), image_bytes + output_bytes);
    }

    let stats = session.pool_stats();
    assert_eq!(stats.live_buffers(), 2);
    assert!(stats.peak_allocated_bytes > image_bytes + 512);
    assert!(stats.cache_hits > 0);
}

// ── Custom models ──────────────────────────────────────────────

/// Quantizes the image back to u8 through f32, a two-node model.
fn requantize(
    ctx: &mut ExecutionContext<'_>,
    image: &RamTensor,
) -> Result<RamTensor, RuntimeError> {
    let shape = image.shape();
    let real = ctx.alloc(shape, DType::F32)?;
    ctx.run("dequant", |_| {
        QuantizeOp::new(
            QuantizeParam::new(QuantizeStrategy::AffineU8ToF32),
            image,
            &real,
        )?
        .compute()
    })?;
    let out = ctx.alloc(shape, DType::U8)?;
    ctx.run("quant", |_| {
        QuantizeOp::new(
            QuantizeParam::new(QuantizeStrategy::AffineF32ToU8),
            &real,
            &out,
        )?
        .compute()
    })?;
    Ok(out)
}

#[test]
fn test_registered_model_runs_in_session() {
    let mut registry = ModelRegistry::with_builtin();
    registry.register("requantize", requantize);
    let (accel, probe) = Accelerator::simulated();
    let config = RuntimeConfig {
        model: "requantize".into(),
        ..Default::default()
    };
    let mut session = Session::with_parts(config, &registry, accel).unwrap();

    // Spans 0..=255 so both scans recover unit scales.
    let image: Vec<u8> = (0..PIXELS).map(|i| (i * 255 / (PIXELS - 1)) as u8).collect();
    session.load_image(&image, 3, 8, 8).unwrap();
    session.compute().unwrap();

    let mut out = vec![0u8; PIXELS];
    session.copy_output(&mut out).unwrap();
    for (a, b) in image.iter().zip(&out) {
        assert!(a.abs_diff(*b) <= 1, "{a} vs {b}");
    }
    assert!(probe.layers().is_empty());
    let names: Vec<_> = session
        .metrics()
        .unwrap()
        .node_metrics
        .iter()
        .map(|m| m.node_name.as_str())
        .collect();
    assert_eq!(names, ["dequant", "quant"]);
}
