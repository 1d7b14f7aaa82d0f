// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Weight bytes that immutable tensor views are bound to.
//!
//! [`WeightStore`] holds each weight in the plane-padded layout the tensor
//! views expect, from one of three sources:
//!
//! 1. **Static**: byte arrays compiled into the binary, borrowed as-is.
//! 2. **Mapped**: a SafeTensors file opened with mmap. Weights whose dense
//!    layout already equals the padded layout are used in place.
//! 3. **Packed**: everything else, copied once into padded buffers.

use crate::RuntimeError;
use model_ir::{convert_safetensor_dtype, graph::Validated, CompiledModel, TensorSpec};
use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;
use tensor_core::{DType, FlashTensor, Shape};

enum WeightBytes {
    Static(&'static [u8]),
    Mapped(Range<usize>),
    Packed(Vec<u8>),
}

/// Named weight bytes for one model.
#[derive(Default)]
pub struct WeightStore {
    mmap: Option<memmap2::Mmap>,
    entries: HashMap<String, WeightBytes>,
}

impl WeightStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers compiled-in bytes, already in padded layout.
    pub fn insert_static(&mut self, name: impl Into<String>, bytes: &'static [u8]) {
        self.entries.insert(name.into(), WeightBytes::Static(bytes));
    }

    /// Registers owned bytes, already in padded layout.
    pub fn insert_owned(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.entries.insert(name.into(), WeightBytes::Packed(bytes));
    }

    /// Maps a SafeTensors file and prepares every weight `model` declares.
    pub fn open_safetensors(
        path: &Path,
        model: &CompiledModel<Validated>,
    ) -> Result<Self, RuntimeError> {
        let load_err = |detail: String| RuntimeError::WeightLoadError {
            name: path.display().to_string(),
            detail,
        };
        let file = std::fs::File::open(path).map_err(|e| load_err(format!("cannot open: {e}")))?;
        // SAFETY: the file is opened read-only and not modified while mapped.
        let mmap = unsafe { memmap2::Mmap::map(&file) }
            .map_err(|e| load_err(format!("mmap failed: {e}")))?;

        let mut entries = HashMap::new();
        {
            let tensors = safetensors::SafeTensors::deserialize(&mmap)
                .map_err(|e| load_err(format!("SafeTensors parse error: {e}")))?;
            let base = mmap.as_ptr() as usize;

            for (_, spec) in model.weights() {
                let view = tensors.tensor(&spec.name).map_err(|e| RuntimeError::WeightLoadError {
                    name: spec.name.clone(),
                    detail: e.to_string(),
                })?;
                let dtype = convert_safetensor_dtype(view.dtype())?;
                let data = view.data();
                check_entry(spec, dtype, data.len())?;

                let entry = if spec.size_bytes() == data.len() {
                    let start = data.as_ptr() as usize - base;
                    WeightBytes::Mapped(start..start + data.len())
                } else {
                    WeightBytes::Packed(pack_plane_bytes(spec.shape, spec.dtype, data))
                };
                entries.insert(spec.name.clone(), entry);
            }
        }

        tracing::info!(
            "weight store: mmap'd {} ({:.1} KB, {} weights)",
            path.display(),
            mmap.len() as f64 / 1024.0,
            entries.len()
        );
        Ok(Self {
            mmap: Some(mmap),
            entries,
        })
    }

    /// Returns `true` if any weight comes from a mapped file.
    pub fn is_file_backed(&self) -> bool {
        self.mmap.is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The padded bytes of weight `name`.
    pub fn bytes(&self, name: &str) -> Result<&[u8], RuntimeError> {
        let entry = self.entries.get(name).ok_or_else(|| RuntimeError::WeightLoadError {
            name: name.to_string(),
            detail: "not in the weight store".into(),
        })?;
        match entry {
            WeightBytes::Static(b) => Ok(b),
            WeightBytes::Packed(b) => Ok(b),
            WeightBytes::Mapped(range) => self
                .mmap
                .as_ref()
                .and_then(|m| m.get(range.clone()))
                .ok_or_else(|| RuntimeError::WeightLoadError {
                    name: name.to_string(),
                    detail: "mapped range is outside the file".into(),
                }),
        }
    }

    /// The weight for `spec` without channel padding, as a weight file
    /// stores it.
    pub fn dense_bytes(&self, spec: &TensorSpec) -> Result<Vec<u8>, RuntimeError> {
        let padded = self.bytes(&spec.name)?;
        if padded.len() != spec.size_bytes() {
            return Err(RuntimeError::WeightLoadError {
                name: spec.name.clone(),
                detail: format!(
                    "holds {} bytes, {} needs {}",
                    padded.len(),
                    spec.shape,
                    spec.size_bytes()
                ),
            });
        }
        Ok(unpack_plane_bytes(spec.shape, spec.dtype, padded))
    }

    /// Binds an immutable view for `spec`, with the declared quantization.
    pub fn bind(&self, spec: &TensorSpec) -> Result<FlashTensor<'_>, RuntimeError> {
        let mut view = FlashTensor::new(spec.shape, spec.dtype);
        view.bind_data(self.bytes(&spec.name)?)?;
        if let Some(q) = spec.quant {
            view.set_quant(q);
        }
        Ok(view)
    }
}

impl std::fmt::Debug for WeightStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightStore")
            .field("weights", &self.entries.len())
            .field("file_backed", &self.is_file_backed())
            .finish()
    }
}

fn check_entry(spec: &TensorSpec, dtype: DType, len: usize) -> Result<(), RuntimeError> {
    let mismatch = |detail: String| RuntimeError::WeightLoadError {
        name: spec.name.clone(),
        detail,
    };
    if dtype != spec.dtype {
        return Err(mismatch(format!("file has {dtype}, model declares {}", spec.dtype)));
    }
    if len != spec.dense_bytes() {
        return Err(mismatch(format!(
            "file has {len} bytes, {} {} needs {}",
            spec.shape,
            spec.dtype,
            spec.dense_bytes()
        )));
    }
    Ok(())
}

/// Spreads dense `(N, C, H, W)` bytes over channel planes `cstep` apart.
fn pack_plane_bytes(shape: Shape, dtype: DType, dense: &[u8]) -> Vec<u8> {
    let elem = dtype.size_bytes();
    let plane = shape.plane() * elem;
    let stride = shape.cstep(dtype) * elem;
    let mut out = vec![0u8; shape.size_bytes(dtype)];
    for (i, src) in dense.chunks_exact(plane).enumerate() {
        out[i * stride..i * stride + plane].copy_from_slice(src);
    }
    out
}

fn unpack_plane_bytes(shape: Shape, dtype: DType, padded: &[u8]) -> Vec<u8> {
    let elem = dtype.size_bytes();
    let plane = shape.plane() * elem;
    let stride = shape.cstep(dtype) * elem;
    padded
        .chunks(stride.max(1))
        .take(shape.planes())
        .flat_map(|c| &c[..plane])
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_ir::{ModelManifest, TensorKind};
    use safetensors::tensor::TensorView;
    use tensor_core::layout;

    static RAW: [u8; 4] = [1, 2, 3, 4];

    fn spec(name: &str, shape: Shape, dtype: DType) -> TensorSpec {
        TensorSpec {
            name: name.into(),
            shape,
            dtype,
            kind: TensorKind::Weight,
            quant: None,
        }
    }

    #[test]
    fn test_static_bind() {
        let mut store = WeightStore::new();
        store.insert_static("w", &RAW);
        let view = store.bind(&spec("w", Shape::new(4, 1, 1, 1), DType::U8)).unwrap();
        assert_eq!(view.to_vec::<u8>().unwrap(), RAW);
        assert!(!store.is_file_backed());
    }

    #[test]
    fn test_missing_and_wrong_size() {
        let mut store = WeightStore::new();
        store.insert_static("w", &RAW);
        assert!(matches!(
            store.bind(&spec("other", Shape::new(4, 1, 1, 1), DType::U8)),
            Err(RuntimeError::WeightLoadError { .. })
        ));
        assert!(matches!(
            store.bind(&spec("w", Shape::new(2, 1, 1, 1), DType::U8)),
            Err(RuntimeError::TensorError(_))
        ));
    }

    #[test]
    fn test_pack_plane_bytes_matches_layout() {
        let shape = Shape::new(2, 3, 3, 3);
        let dense: Vec<u8> = (0..54).collect();
        let packed = pack_plane_bytes(shape, DType::U8, &dense);
        assert_eq!(packed, layout::pack_planes(shape, &dense).unwrap());
        assert_eq!(unpack_plane_bytes(shape, DType::U8, &packed), dense);

        let f: Vec<f32> = (0..6).map(|v| v as f32).collect();
        let fshape = Shape::new(2, 3, 1, 1);
        let packed = pack_plane_bytes(fshape, DType::F32, bytemuck::cast_slice(&f));
        let expected = layout::pack_planes(fshape, &f).unwrap();
        assert_eq!(packed, bytemuck::cast_slice::<f32, u8>(&expected));
    }

    #[test]
    fn test_open_safetensors() {
        static W: [f32; 2] = [0.5, -1.0];
        static B: [f32; 1] = [2.0];
        let json = r#"{
            "name": "pair", "input": "x", "output": "y",
            "tensors": [
                { "name": "x", "shape": [1, 2, 3, 3], "dtype": "f32" },
                { "name": "w", "shape": [1, 2, 1, 1], "dtype": "f32", "kind": "weight" },
                { "name": "b", "shape": [1, 1, 1, 1], "dtype": "f32", "kind": "weight" },
                { "name": "y", "shape": [1, 1, 3, 3], "dtype": "f32" }
            ],
            "nodes": [
                { "name": "c", "op": "cpu_conv", "input": "x", "output": "y",
                  "weight": "w", "bias": "b" }
            ]
        }"#;
        let manifest = ModelManifest::from_json(json).unwrap();
        let model = CompiledModel::from_manifest(&manifest).unwrap().validate().unwrap();

        let view = |dims: Vec<usize>, data: &'static [f32]| {
            TensorView::new(safetensors::Dtype::F32, dims, bytemuck::cast_slice(data)).unwrap()
        };
        let views = [("w", view(vec![1, 2], &W)), ("b", view(vec![1], &B))];
        let bytes = safetensors::tensor::serialize(views, &None).unwrap();
        let path = std::env::temp_dir()
            .join(format!("rvt_weights_{}.safetensors", std::process::id()));
        std::fs::write(&path, bytes).unwrap();

        let store = WeightStore::open_safetensors(&path, &model).unwrap();
        assert!(store.is_file_backed());
        assert_eq!(store.len(), 2);

        let specs = model.tensors();
        let wv = store.bind(&specs[1]).unwrap();
        assert_eq!(wv.to_dense_vec::<f32>().unwrap(), W);
        // Two channels: each plane padded to 16 bytes.
        assert_eq!(wv.size_bytes(), 32);
        let bv = store.bind(&specs[2]).unwrap();
        assert_eq!(bv.to_vec::<f32>().unwrap(), B);

        std::fs::remove_file(&path).ok();
    }
}
