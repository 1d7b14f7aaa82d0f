// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `rvt run`: one inference through a [`Session`].

use anyhow::{bail, Context};
use runtime::{RuntimeConfig, Session};
use std::path::PathBuf;
use tensor_core::DType;

pub struct RunArgs {
    pub config: Option<PathBuf>,
    pub model: Option<String>,
    pub manifest: Option<PathBuf>,
    pub memory_budget: Option<String>,
    pub image: Option<PathBuf>,
    pub dims: String,
    pub output: Option<PathBuf>,
    pub json: bool,
}

pub fn execute(args: RunArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => RuntimeConfig::from_file(path)?,
        None => RuntimeConfig::default(),
    };
    if let Some(model) = args.model {
        config.model = model;
    }
    if args.manifest.is_some() {
        config.manifest_path = args.manifest;
    }
    if let Some(budget) = args.memory_budget {
        config.memory_budget = budget;
    }

    let (c, h, w) = parse_dims(&args.dims)?;
    let image = match &args.image {
        Some(path) => std::fs::read(path)
            .with_context(|| format!("cannot read image '{}'", path.display()))?,
        None => gradient(c * h * w),
    };

    let mut session = Session::create(config)?;
    println!("  Model:  {}", session.model_name());
    println!("  Device: {}", session.device_name());
    println!("  Budget: {}", session.config().memory_budget);
    println!("  Image:  {c}x{h}x{w}{}", if args.image.is_none() { " (synthetic)" } else { "" });
    println!();

    session.load_image(&image, c, h, w)?;
    session.compute()?;

    let out = session
        .output()
        .context("compute finished without an output")?;
    let (shape, dtype) = (out.shape(), out.dtype());
    let mut dense = vec![0u8; session.output_size_bytes()?];
    session.copy_output(&mut dense)?;

    println!("  Output: {shape} {dtype}");
    print_planes(&dense, dtype, shape.c, shape.plane());
    println!();

    if let Some(path) = &args.output {
        std::fs::write(path, &dense)
            .with_context(|| format!("cannot write output '{}'", path.display()))?;
        println!("  Wrote {} bytes to {}", dense.len(), path.display());
    }

    if let Some(metrics) = session.metrics() {
        if args.json {
            println!("{}", serde_json::to_string_pretty(metrics)?);
        } else {
            println!("  {}", metrics.summary());
            for node in &metrics.node_metrics {
                println!(
                    "   {:<24} {:>9.3} ms {:>9.1} KB",
                    super::truncate(&node.node_name, 24),
                    node.compute_duration.as_secs_f64() * 1000.0,
                    node.arena_bytes as f64 / 1024.0,
                );
            }
        }
    }
    println!("  Pool: {}", session.pool_stats().summary());
    Ok(())
}

fn parse_dims(dims: &str) -> anyhow::Result<(usize, usize, usize)> {
    let parts = dims
        .split(',')
        .map(|p| p.trim().parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid dims '{dims}'"))?;
    match parts[..] {
        [c, h, w] if c.checked_mul(h).and_then(|n| n.checked_mul(w)).is_some_and(|n| n > 0) => {
            Ok((c, h, w))
        }
        _ => bail!("dims must be three non-zero values C,H,W, got '{dims}'"),
    }
}

fn gradient(len: usize) -> Vec<u8> {
    let last = len.saturating_sub(1).max(1);
    (0..len).map(|i| (i * 255 / last) as u8).collect()
}

/// Per-plane min, max and mean of a dense output.
fn print_planes(dense: &[u8], dtype: DType, channels: usize, plane: usize) {
    let values: Vec<f32> = match dtype {
        DType::F32 => bytemuck::pod_collect_to_vec::<u8, f32>(dense),
        DType::U8 => dense.iter().map(|&v| f32::from(v)).collect(),
        DType::I8 => dense.iter().map(|&v| f32::from(v as i8)).collect(),
        other => {
            println!("   {} bytes of {other}", dense.len());
            return;
        }
    };
    for (c, chunk) in values.chunks(plane.max(1)).take(channels).enumerate() {
        let min = chunk.iter().copied().fold(f32::INFINITY, f32::min);
        let max = chunk.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mean = chunk.iter().sum::<f32>() / chunk.len() as f32;
        println!("   channel {c:<3} min {min:>10.4}  max {max:>10.4}  mean {mean:>10.4}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dims() {
        assert_eq!(parse_dims("3,8,8").unwrap(), (3, 8, 8));
        assert_eq!(parse_dims(" 1, 240 ,320").unwrap(), (1, 240, 320));
        assert!(parse_dims("3,8").is_err());
        assert!(parse_dims("3,0,8").is_err());
        assert!(parse_dims("a,b,c").is_err());
        assert!(parse_dims(&format!("{},2,2", usize::MAX)).is_err());
    }

    #[test]
    fn test_gradient_spans_full_range() {
        let g = gradient(192);
        assert_eq!((g[0], g[191]), (0, 255));
        assert_eq!(gradient(1), [0]);
    }
}
