// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Models compiled into the runtime.
//!
//! `tiny_detect` is a three-node detector head: an 8-bit 3x3 convolution on
//! the KPU, a dequantize back to f32, and a pointwise f32 convolution on the
//! CPU producing two score planes. Its weights are static arrays already in
//! the channel-padded layout.
//!
//! The same model is also available as a manifest plus weight store, so the
//! schedule interpreter can run it.

use crate::context::check_input;
use crate::{ExecutionContext, RuntimeError, WeightStore};
use model_ir::{ManifestNode, ManifestQuant, ManifestTensor, ModelManifest, TensorKind};
use operators::{
    ConvParam, CpuConvOp, KpuConvOp, Operator, QuantizeOp, QuantizeParam, QuantizeStrategy,
};
use tensor_core::{DType, FlashTensor, QuantParams, RamTensor, Shape};

pub const TINY_DETECT: &str = "tiny_detect";

const INPUT_SHAPE: Shape = Shape::new(1, 3, 8, 8);
const CONV0_WEIGHT_SHAPE: Shape = Shape::new(4, 3, 3, 3);
const CONV0_BIAS_SHAPE: Shape = Shape::new(4, 1, 1, 1);
const CONV0_OUT_SHAPE: Shape = Shape::new(1, 4, 8, 8);
const HEAD_WEIGHT_SHAPE: Shape = Shape::new(2, 4, 1, 1);
const HEAD_BIAS_SHAPE: Shape = Shape::new(2, 1, 1, 1);
const SCORES_SHAPE: Shape = Shape::new(1, 2, 8, 8);

const INPUT_SCALE: f32 = 1.0 / 255.0;
const CONV0_WEIGHT_SCALE: f32 = 1.0 / 64.0;
const CONV0_OUT_SCALE: f32 = 1.0 / 256.0;

/// (4, 3, 3, 3): one 3x3 kernel per (output, input) channel pair.
#[rustfmt::skip]
const CONV0_WEIGHT_DENSE: [u8; 108] = [
    1, 0, 1, 2, 0, 2, 1, 0, 1,
    0, 1, 0, 1, 3, 1, 0, 1, 0,
    1, 1, 1, 1, 1, 1, 1, 1, 1,

    3, 2, 1, 2, 1, 0, 1, 0, 0,
    0, 0, 1, 0, 1, 2, 1, 2, 3,
    0, 1, 0, 0, 2, 0, 0, 1, 0,

    2, 2, 2, 0, 0, 0, 1, 1, 1,
    1, 0, 2, 1, 0, 2, 1, 0, 2,
    0, 0, 0, 0, 3, 0, 0, 0, 0,

    1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, 1,
];

/// Kernel planes of 9 bytes, 16 apart.
static CONV0_WEIGHT: [u8; 192] = pad_u8(CONV0_WEIGHT_DENSE, 9, 16);

/// Accumulator units: input scale times weight scale.
static CONV0_BIAS: [i32; 4] = [0, 510, -255, 1020];

#[rustfmt::skip]
const HEAD_WEIGHT_DENSE: [f32; 8] = [
    0.5, -0.25, 1.0, 0.1,
    -0.5, 0.75, 0.0, 0.2,
];

/// One value per plane, planes 4 floats apart.
static HEAD_WEIGHT: [f32; 32] = pad_f32(HEAD_WEIGHT_DENSE, 1, 4);

static HEAD_BIAS: [f32; 2] = [-0.1, 0.05];

const fn pad_u8<const D: usize, const P: usize>(
    dense: [u8; D],
    plane: usize,
    cstep: usize,
) -> [u8; P] {
    let mut out = [0u8; P];
    let mut i = 0;
    while i < D {
        out[(i / plane) * cstep + i % plane] = dense[i];
        i += 1;
    }
    out
}

const fn pad_f32<const D: usize, const P: usize>(
    dense: [f32; D],
    plane: usize,
    cstep: usize,
) -> [f32; P] {
    let mut out = [0.0f32; P];
    let mut i = 0;
    while i < D {
        out[(i / plane) * cstep + i % plane] = dense[i];
        i += 1;
    }
    out
}

/// Runs `tiny_detect` on a (1, 3, 8, 8) u8 image.
///
/// Sets the image's quantization parameters to the model's input scale.
/// Returns the (1, 2, 8, 8) f32 score planes.
pub fn tiny_detect(
    ctx: &mut ExecutionContext<'_>,
    image: &RamTensor,
) -> Result<RamTensor, RuntimeError> {
    check_input(image, INPUT_SHAPE, DType::U8)?;
    image.set_quant(QuantParams::new(INPUT_SCALE, 0));

    let conv0_weight = FlashTensor::from_static(CONV0_WEIGHT_SHAPE, DType::U8, &CONV0_WEIGHT)?
        .with_quant(QuantParams::new(CONV0_WEIGHT_SCALE, 0));
    let conv0_bias =
        FlashTensor::from_static(CONV0_BIAS_SHAPE, DType::I32, bytemuck::cast_slice(&CONV0_BIAS))?;
    let head_weight = FlashTensor::from_static(
        HEAD_WEIGHT_SHAPE,
        DType::F32,
        bytemuck::cast_slice(&HEAD_WEIGHT),
    )?;
    let head_bias =
        FlashTensor::from_static(HEAD_BIAS_SHAPE, DType::F32, bytemuck::cast_slice(&HEAD_BIAS))?;

    let conv0_out = ctx.alloc_quantized(
        CONV0_OUT_SHAPE,
        DType::U8,
        QuantParams::new(CONV0_OUT_SCALE, 0),
    )?;
    ctx.run("conv0", |accel| {
        KpuConvOp::new(
            accel,
            ConvParam::new(1, 1, 2).quantized(),
            image,
            &conv0_out,
            &conv0_weight,
            Some(&conv0_bias),
        )?
        .compute()
    })?;

    let conv0_real = ctx.alloc(CONV0_OUT_SHAPE, DType::F32)?;
    ctx.run("dequant0", |_| {
        QuantizeOp::new(
            QuantizeParam::new(QuantizeStrategy::AffineU8ToF32),
            &conv0_out,
            &conv0_real,
        )?
        .compute()
    })?;
    drop(conv0_out);

    let scores = ctx.alloc(SCORES_SHAPE, DType::F32)?;
    ctx.run("head", |_| {
        CpuConvOp::new(
            ConvParam::default(),
            &conv0_real,
            &scores,
            &head_weight,
            Some((&head_bias).into()),
        )?
        .compute()
    })?;
    Ok(scores)
}

/// `tiny_detect` as a manifest, with the same shapes and scales as the
/// compiled function.
pub fn tiny_detect_manifest() -> ModelManifest {
    let tensor = |name: &str, shape, dtype, kind, quant: Option<f32>| ManifestTensor {
        name: name.into(),
        shape,
        dtype,
        kind,
        quant: quant.map(|scale| ManifestQuant {
            scale,
            zero_point: 0,
        }),
    };
    let conv = |name: &str, op: &str, input: &str, output: &str, pad| ManifestNode {
        name: name.into(),
        op: op.into(),
        input: input.into(),
        output: output.into(),
        weight: Some(format!("{name}.weight")),
        bias: Some(format!("{name}.bias")),
        stride: 1,
        dilation: 1,
        pad,
        strategy: None,
    };
    let (act, weight) = (TensorKind::Activation, TensorKind::Weight);

    ModelManifest {
        name: TINY_DETECT.into(),
        input: "image".into(),
        output: "scores".into(),
        tensors: vec![
            tensor("image", INPUT_SHAPE, DType::U8, act, Some(INPUT_SCALE)),
            tensor("conv0.weight", CONV0_WEIGHT_SHAPE, DType::U8, weight, Some(CONV0_WEIGHT_SCALE)),
            tensor("conv0.bias", CONV0_BIAS_SHAPE, DType::I32, weight, None),
            tensor("conv0.out", CONV0_OUT_SHAPE, DType::U8, act, Some(CONV0_OUT_SCALE)),
            tensor("conv0.real", CONV0_OUT_SHAPE, DType::F32, act, None),
            tensor("head.weight", HEAD_WEIGHT_SHAPE, DType::F32, weight, None),
            tensor("head.bias", HEAD_BIAS_SHAPE, DType::F32, weight, None),
            tensor("scores", SCORES_SHAPE, DType::F32, act, None),
        ],
        nodes: vec![
            conv("conv0", "kpu_conv", "image", "conv0.out", 2),
            ManifestNode {
                strategy: Some(QuantizeStrategy::AffineU8ToF32.to_string()),
                weight: None,
                bias: None,
                ..conv("dequant0", "quantize", "conv0.out", "conv0.real", 0)
            },
            conv("head", "cpu_conv", "conv0.real", "scores", 0),
        ],
    }
}

/// The compiled-in weights of `tiny_detect`, keyed by manifest name.
pub fn tiny_detect_weights() -> WeightStore {
    let mut store = WeightStore::new();
    store.insert_static("conv0.weight", &CONV0_WEIGHT);
    store.insert_static("conv0.bias", bytemuck::cast_slice(&CONV0_BIAS));
    store.insert_static("head.weight", bytemuck::cast_slice(&HEAD_WEIGHT));
    store.insert_static("head.bias", bytemuck::cast_slice(&HEAD_BIAS));
    store
}

/// Compiled-in weights of the built-in model called `name`, if any.
pub fn weights_for(name: &str) -> Option<WeightStore> {
    match name {
        TINY_DETECT => Some(tiny_detect_weights()),
        _ => None,
    }
}

/// The manifest of a compiled-in model, for export and inspection.
pub fn manifest_for(name: &str) -> Option<ModelManifest> {
    match name {
        TINY_DETECT => Some(tiny_detect_manifest()),
        _ => None,
    }
}
