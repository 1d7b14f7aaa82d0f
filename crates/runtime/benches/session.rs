// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for whole-model inference and schedule interpretation.

use criterion::{criterion_group, criterion_main, Criterion};
use kpu_hal::Accelerator;
use memory_manager::MemoryPool;
use model_ir::CompiledModel;
use runtime::builtin::{tiny_detect, tiny_detect_manifest, tiny_detect_weights};
use runtime::{ExecutionContext, RuntimeConfig, ScheduleRunner, Session};
use std::hint::black_box;
use tensor_core::{RamTensor, Shape};

fn image() -> Vec<u8> {
    (0..192).map(|i| (i * 29 % 256) as u8).collect()
}

fn bench_session_compute(c: &mut Criterion) {
    let config = RuntimeConfig {
        enable_profiling: false,
        ..Default::default()
    };
    let mut session = Session::create(config).unwrap();
    session.load_image(&image(), 3, 8, 8).unwrap();
    let mut out = vec![0u8; 512];

    c.bench_function("session_compute_tiny_detect", |b| {
        b.iter(|| {
            session.compute().unwrap();
            session.copy_output(black_box(&mut out)).unwrap();
        })
    });
}

fn bench_compiled_vs_scheduled(c: &mut Criterion) {
    let model = CompiledModel::from_manifest(&tiny_detect_manifest())
        .unwrap()
        .validate()
        .unwrap();
    let store = tiny_detect_weights();
    let runner = ScheduleRunner::new(&model, &store).unwrap();
    let (mut accel, _) = Accelerator::simulated();
    let pool = MemoryPool::unbounded();
    let input = RamTensor::from_dense_in(&pool, Shape::new(1, 3, 8, 8), &image()).unwrap();

    let mut group = c.benchmark_group("tiny_detect");
    group.bench_function("compiled", |b| {
        b.iter(|| {
            let mut ctx = ExecutionContext::new(&mut accel, &pool, None);
            black_box(tiny_detect(&mut ctx, &input).unwrap())
        })
    });
    group.bench_function("scheduled", |b| {
        b.iter(|| {
            let mut ctx = ExecutionContext::new(&mut accel, &pool, None);
            black_box(runner.run(&mut ctx, &input).unwrap())
        })
    });
    group.finish();
}

criterion_group!(benches, bench_session_compute, bench_compiled_vs_scheduled);
criterion_main!(benches);
