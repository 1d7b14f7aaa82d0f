// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Model loading from a manifest and an optional SafeTensors weight file.
//!
//! A model directory contains:
//! - `model.json`: the compiled-model manifest (see [`ModelManifest`]).
//! - `model.safetensors`: dense weight data, optional when the weights are
//!   compiled into the binary.
//!
//! Weight *data* is **not** loaded here. The loader reads the SafeTensors
//! header only, to check every declared weight is present with the right
//! dtype and element count. The runtime's weight store maps the data.

use crate::graph::Validated;
use crate::{CompiledModel, ModelError, ModelManifest};
use std::collections::HashMap;
use std::path::Path;
use tensor_core::DType;

/// Default manifest filename.
pub const MANIFEST_FILE: &str = "model.json";

/// Default SafeTensors filename.
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// Metadata for a single tensor extracted from the SafeTensors header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightMeta {
    pub name: String,
    /// Dimensions as stored, of any rank.
    pub dims: Vec<usize>,
    pub dtype: DType,
    /// Dense size in bytes.
    pub size_bytes: usize,
}

impl WeightMeta {
    pub fn elements(&self) -> usize {
        self.dims.iter().product()
    }
}

/// Loads a model from disk into a validated [`CompiledModel`].
///
/// # Example
/// ```no_run
/// use model_ir::ModelLoader;
/// use std::path::Path;
///
/// let model = ModelLoader::load(Path::new("./models/tiny_detect")).unwrap();
/// println!("{}", model.summary());
/// ```
pub struct ModelLoader;

impl ModelLoader {
    /// Loads and validates a model directory.
    ///
    /// Steps:
    /// 1. Parse `model.json` and validate the schedule.
    /// 2. If `model.safetensors` exists, check it against the declared
    ///    weights.
    pub fn load(model_dir: &Path) -> Result<CompiledModel<Validated>, ModelError> {
        let model = Self::load_manifest(&model_dir.join(MANIFEST_FILE))?;
        let weights_path = model_dir.join(WEIGHTS_FILE);
        if weights_path.exists() {
            let meta = Self::read_weight_metadata(&weights_path)?;
            Self::check_weights(&model, &meta)?;
        } else {
            tracing::debug!(
                "no '{}' next to the manifest, weights must be supplied by the caller",
                WEIGHTS_FILE
            );
        }
        Ok(model)
    }

    /// Parses and validates a manifest file.
    pub fn load_manifest(path: &Path) -> Result<CompiledModel<Validated>, ModelError> {
        let manifest = ModelManifest::from_file(path)?;
        let model = CompiledModel::from_manifest(&manifest)?.validate()?;
        tracing::info!("loaded {}", model.summary());
        Ok(model)
    }

    /// Reads the SafeTensors header to extract tensor shapes and dtypes.
    pub fn read_weight_metadata(path: &Path) -> Result<HashMap<String, WeightMeta>, ModelError> {
        let file = std::fs::File::open(path).map_err(|e| {
            ModelError::SafeTensorsError(format!("cannot open '{}': {e}", path.display()))
        })?;

        // SAFETY: the file is opened read-only and not modified while mapped.
        let mmap = unsafe { memmap2::Mmap::map(&file) }
            .map_err(|e| ModelError::SafeTensorsError(format!("mmap failed: {e}")))?;

        let tensors = safetensors::SafeTensors::deserialize(&mmap)
            .map_err(|e| ModelError::SafeTensorsError(format!("SafeTensors parse error: {e}")))?;

        let mut meta = HashMap::new();
        for (name, view) in tensors.tensors() {
            let dtype = convert_safetensor_dtype(view.dtype())?;
            meta.insert(
                name.clone(),
                WeightMeta {
                    name,
                    dims: view.shape().to_vec(),
                    dtype,
                    size_bytes: view.data().len(),
                },
            );
        }
        Ok(meta)
    }

    /// Checks that every declared weight is present with a matching dtype
    /// and element count.
    pub fn check_weights(
        model: &CompiledModel<Validated>,
        meta: &HashMap<String, WeightMeta>,
    ) -> Result<(), ModelError> {
        for (_, spec) in model.weights() {
            let m = meta.get(&spec.name).ok_or_else(|| ModelError::WeightNotFound {
                name: spec.name.clone(),
            })?;
            let mismatch = |detail: String| ModelError::WeightMismatch {
                name: spec.name.clone(),
                detail,
            };
            if m.dtype != spec.dtype {
                return Err(mismatch(format!(
                    "file has {}, model declares {}",
                    m.dtype, spec.dtype
                )));
            }
            if m.elements() != spec.shape.dense_elements() {
                return Err(mismatch(format!(
                    "file has {:?} ({} elements), model declares {}",
                    m.dims,
                    m.elements(),
                    spec.shape
                )));
            }
        }
        Ok(())
    }
}

/// Converts a SafeTensors `Dtype` to our [`DType`].
pub fn convert_safetensor_dtype(st_dtype: safetensors::Dtype) -> Result<DType, ModelError> {
    match st_dtype {
        safetensors::Dtype::F32 => Ok(DType::F32),
        safetensors::Dtype::I32 => Ok(DType::I32),
        safetensors::Dtype::F16 => Ok(DType::F16),
        safetensors::Dtype::I16 => Ok(DType::I16),
        safetensors::Dtype::U16 => Ok(DType::U16),
        safetensors::Dtype::U8 => Ok(DType::U8),
        safetensors::Dtype::I8 => Ok(DType::I8),
        other => Err(ModelError::SafeTensorsError(format!(
            "unsupported SafeTensors dtype: {other:?}"
        ))),
    }
}

/// Converts our [`DType`] to the SafeTensors `Dtype` a weight file stores.
pub fn to_safetensor_dtype(dtype: DType) -> safetensors::Dtype {
    match dtype {
        DType::F32 => safetensors::Dtype::F32,
        DType::I32 => safetensors::Dtype::I32,
        DType::F16 => safetensors::Dtype::F16,
        DType::I16 => safetensors::Dtype::I16,
        DType::U16 => safetensors::Dtype::U16,
        DType::U8 => safetensors::Dtype::U8,
        DType::I8 => safetensors::Dtype::I8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::tests::sample_manifest_json;
    use safetensors::tensor::TensorView;
    use safetensors::Dtype;

    fn meta(name: &str, dims: &[usize], dtype: DType) -> (String, WeightMeta) {
        let elements: usize = dims.iter().product();
        (
            name.to_string(),
            WeightMeta {
                name: name.to_string(),
                dims: dims.to_vec(),
                dtype,
                size_bytes: elements * dtype.size_bytes(),
            },
        )
    }

    fn sample_meta() -> HashMap<String, WeightMeta> {
        [
            meta("conv0.weight", &[3, 2, 3, 3], DType::U8),
            meta("conv0.bias", &[3], DType::I32),
            meta("head.weight", &[2, 3], DType::F32),
        ]
        .into_iter()
        .collect()
    }

    fn sample_model() -> CompiledModel<Validated> {
        let manifest = ModelManifest::from_json(sample_manifest_json()).unwrap();
        CompiledModel::from_manifest(&manifest).unwrap().validate().unwrap()
    }

    #[test]
    fn test_check_weights_ok() {
        ModelLoader::check_weights(&sample_model(), &sample_meta()).unwrap();
    }

    #[test]
    fn test_missing_weight_tensor() {
        let mut m = sample_meta();
        m.remove("head.weight");
        assert!(matches!(
            ModelLoader::check_weights(&sample_model(), &m),
            Err(ModelError::WeightNotFound { name }) if name == "head.weight"
        ));
    }

    #[test]
    fn test_weight_mismatch() {
        let mut m = sample_meta();
        m.extend([meta("conv0.bias", &[4], DType::I32)]);
        assert!(matches!(
            ModelLoader::check_weights(&sample_model(), &m),
            Err(ModelError::WeightMismatch { .. })
        ));
        let mut m = sample_meta();
        m.extend([meta("head.weight", &[2, 3], DType::F16)]);
        assert!(ModelLoader::check_weights(&sample_model(), &m).is_err());
    }

    #[test]
    fn test_load_directory() {
        let dir = std::env::temp_dir().join(format!("rvt_model_ir_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), sample_manifest_json()).unwrap();

        let model = ModelLoader::load(&dir).unwrap();
        assert_eq!(model.name(), "tiny_detect");

        let w = vec![1u8; 54];
        let b = vec![0u8; 12];
        let h = vec![0u8; 24];
        let views = [
            ("conv0.weight", TensorView::new(Dtype::U8, vec![3, 2, 3, 3], &w).unwrap()),
            ("conv0.bias", TensorView::new(Dtype::I32, vec![3], &b).unwrap()),
            ("head.weight", TensorView::new(Dtype::F32, vec![2, 3], &h).unwrap()),
        ];
        let bytes = safetensors::tensor::serialize(views, &None).unwrap();
        std::fs::write(dir.join(WEIGHTS_FILE), bytes).unwrap();

        let meta = ModelLoader::read_weight_metadata(&dir.join(WEIGHTS_FILE)).unwrap();
        assert_eq!(meta["conv0.weight"].size_bytes, 54);
        ModelLoader::load(&dir).unwrap();

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_dtype_conversions_agree() {
        let all = [
            DType::F32,
            DType::I32,
            DType::F16,
            DType::I16,
            DType::U16,
            DType::U8,
            DType::I8,
        ];
        for dtype in all {
            assert_eq!(convert_safetensor_dtype(to_safetensor_dtype(dtype)).unwrap(), dtype);
        }
        assert!(convert_safetensor_dtype(Dtype::F64).is_err());
    }

    #[test]
    fn test_missing_manifest() {
        let dir = std::env::temp_dir().join("rvt_model_ir_missing");
        assert!(matches!(
            ModelLoader::load(&dir),
            Err(ModelError::ManifestReadError(_))
        ));
    }
}
