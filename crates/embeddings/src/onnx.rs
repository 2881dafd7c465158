use crate::bag_of_words::normalize;
use crate::error::{EmbeddingError, Result};
use crate::service::EmbeddingService;
use async_trait::async_trait;
use ndarray::{Array, Axis, Dimension, Ix2, Ix3};
use once_cell::sync::OnceCell;
use ort::execution_providers::CPUExecutionProvider;
use ort::session::{builder::GraphOptimizationLevel, Input, Session, SessionInputs};
use ort::tensor::TensorElementType;
use ort::value::{DynTensor, Tensor};
use ort::Error as OrtError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokenizers::{Encoding, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tokio::task::spawn_blocking;

pub const DEFAULT_MODEL_ID: &str = "bge-small";

const CACHE_DIR_NAME: &str = "issue-epics";

#[derive(Clone, Debug, PartialEq, Eq)]
struct ModelSpec {
    id: String,
    onnx_rel_path: PathBuf,
    tokenizer_rel_path: PathBuf,
    dimension: usize,
    max_length: usize,
    max_batch: usize,
}

#[derive(Debug, Deserialize)]
struct ModelsManifest {
    schema_version: u32,
    models: Vec<ManifestModel>,
}

#[derive(Debug, Deserialize)]
struct ManifestModel {
    id: String,
    dimension: usize,
    max_length: usize,
    max_batch: usize,
    #[serde(default)]
    assets: Vec<ManifestAsset>,
}

#[derive(Debug, Deserialize)]
struct ManifestAsset {
    path: String,
}

/// Directory holding `manifest.json` and per-model asset folders.
///
/// `EPIC_MODEL_DIR` wins; otherwise the nearest `models/manifest.json` above the
/// current directory, then `$XDG_CACHE_HOME/issue-epics/models`, then
/// `~/.cache/issue-epics/models`.
pub fn default_model_dir() -> PathBuf {
    if let Ok(path) = std::env::var("EPIC_MODEL_DIR") {
        return PathBuf::from(path);
    }

    if let Ok(mut dir) = std::env::current_dir() {
        loop {
            let candidate = dir.join("models");
            if candidate.join("manifest.json").exists() {
                return candidate;
            }
            if !dir.pop() {
                break;
            }
        }
    }

    if let Ok(path) = std::env::var("XDG_CACHE_HOME") {
        return PathBuf::from(path).join(CACHE_DIR_NAME).join("models");
    }

    std::env::var("HOME")
        .map_or_else(|_| PathBuf::from("."), PathBuf::from)
        .join(".cache")
        .join(CACHE_DIR_NAME)
        .join("models")
}

fn normalize_model_id(raw: &str) -> String {
    let model_name = raw.trim().to_ascii_lowercase();
    match model_name.as_str() {
        "bge-small-en-v1.5" => "bge-small".to_string(),
        "all-minilm-l6-v2" => "all-minilm".to_string(),
        other => other.to_string(),
    }
}

fn validate_relative_manifest_path(path: &Path) -> Result<()> {
    let mut has_component = false;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                return Err(EmbeddingError::Backend(
                    "models manifest asset path must be relative".to_string(),
                ));
            }
            Component::ParentDir => {
                return Err(EmbeddingError::Backend(
                    "models manifest asset path must not contain '..'".to_string(),
                ));
            }
            Component::CurDir => {}
            Component::Normal(_) => {
                has_component = true;
            }
        }
    }

    if !has_component {
        return Err(EmbeddingError::Backend(
            "models manifest asset path is empty".to_string(),
        ));
    }

    Ok(())
}

fn safe_rel_path_from_manifest(model_id: &str, rel: &str) -> Result<PathBuf> {
    let path = Path::new(rel);
    validate_relative_manifest_path(path).map_err(|err| {
        EmbeddingError::Backend(format!(
            "Invalid models manifest asset path for model '{model_id}': '{rel}' ({err})"
        ))
    })?;
    Ok(path.to_path_buf())
}

fn resolve_model_spec(model_dir: &Path, model_id: &str) -> Result<ModelSpec> {
    let manifest_path = model_dir.join("manifest.json");
    if !manifest_path.exists() {
        if model_id == DEFAULT_MODEL_ID {
            return Ok(ModelSpec {
                id: model_id.to_string(),
                onnx_rel_path: PathBuf::from("model.onnx"),
                tokenizer_rel_path: PathBuf::from("tokenizer.json"),
                dimension: 384,
                max_length: 512,
                max_batch: 32,
            });
        }
        return Err(EmbeddingError::Backend(format!(
            "Unknown embedding model id '{model_id}' and no models manifest found at {}",
            manifest_path.display()
        )));
    }

    let raw = std::fs::read_to_string(&manifest_path)?;
    let manifest: ModelsManifest = serde_json::from_str(&raw)?;
    if manifest.schema_version != 1 {
        return Err(EmbeddingError::Backend(format!(
            "Unsupported models manifest schema_version {} (expected 1)",
            manifest.schema_version
        )));
    }

    let model = manifest
        .models
        .iter()
        .find(|m| normalize_model_id(&m.id) == model_id)
        .ok_or_else(|| {
            let available = manifest
                .models
                .iter()
                .map(|m| m.id.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            EmbeddingError::Backend(format!(
                "Unknown embedding model id '{model_id}'. Available: {available}"
            ))
        })?;

    let prefix = format!("{}/", model.id);
    let mut onnx_rel_path: Option<PathBuf> = None;
    let mut tokenizer_rel_path: Option<PathBuf> = None;
    for asset in &model.assets {
        let rel = asset
            .path
            .strip_prefix(&prefix)
            .unwrap_or(asset.path.as_str());
        let asset_path = Path::new(asset.path.as_str());
        if onnx_rel_path.is_none()
            && asset_path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"))
        {
            onnx_rel_path = Some(safe_rel_path_from_manifest(&model.id, rel)?);
        }
        if tokenizer_rel_path.is_none()
            && asset_path
                .file_name()
                .is_some_and(|name| name.eq_ignore_ascii_case("tokenizer.json"))
        {
            tokenizer_rel_path = Some(safe_rel_path_from_manifest(&model.id, rel)?);
        }
    }

    Ok(ModelSpec {
        id: model_id.to_string(),
        onnx_rel_path: onnx_rel_path.unwrap_or_else(|| PathBuf::from("model.onnx")),
        tokenizer_rel_path: tokenizer_rel_path.unwrap_or_else(|| PathBuf::from("tokenizer.json")),
        dimension: model.dimension,
        max_length: model.max_length,
        max_batch: model.max_batch.max(1),
    })
}

struct OrtBackend {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    max_length: usize,
    max_batch: usize,
    dimension: usize,
}

impl OrtBackend {
    fn new(spec: &ModelSpec, model_dir: &Path) -> Result<Self> {
        if !tokenizers::utils::parallelism::is_parallelism_configured() {
            tokenizers::utils::parallelism::set_parallelism(false);
        }

        let model_path = model_dir.join(&spec.id).join(&spec.onnx_rel_path);
        let tokenizer_path = model_dir.join(&spec.id).join(&spec.tokenizer_rel_path);
        if !model_path.exists() || !tokenizer_path.exists() {
            return Err(EmbeddingError::Backend(format!(
                "Model files for '{}' are missing. Expected ONNX at {} and tokenizer at {}",
                spec.id,
                model_path.display(),
                tokenizer_path.display(),
            )));
        }

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EmbeddingError::Backend(format!("Tokenizer load failed: {e}")))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..PaddingParams::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: spec.max_length,
                ..TruncationParams::default()
            }))
            .map_err(|e| EmbeddingError::Backend(format!("Tokenizer truncation failed: {e}")))?;

        let intra_threads = default_intra_threads();
        let session = Session::builder()
            .map_err(|e| to_embedding_error(&e))?
            .with_intra_threads(intra_threads)
            .map_err(|e| {
                EmbeddingError::Backend(format!("Failed to set ORT intra threads: {e}"))
            })?
            .with_inter_threads(1)
            .map_err(|e| {
                EmbeddingError::Backend(format!("Failed to set ORT inter threads: {e}"))
            })?
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .map_err(|e| {
                EmbeddingError::Backend(format!("Failed to register CPU execution provider: {e}"))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                EmbeddingError::Backend(format!("Failed to set optimization level: {e}"))
            })?
            .commit_from_file(&model_path)
            .map_err(|e| EmbeddingError::Backend(format!("Failed to load ONNX model: {e}")))?;

        log::info!(
            "Loaded ONNX model '{}' (dim {}, max_length {}, batch {})",
            spec.id,
            spec.dimension,
            spec.max_length,
            spec.max_batch
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            max_length: spec.max_length,
            max_batch: spec.max_batch,
            dimension: spec.dimension,
        })
    }

    fn embed_batch_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.max_batch) {
            let encodings = self
                .tokenizer
                .encode_batch(batch.to_vec(), true)
                .map_err(|e| EmbeddingError::Backend(format!("Tokenization failed: {e}")))?;

            if encodings.is_empty() {
                continue;
            }

            let seq_len = encodings[0].len();
            if seq_len > self.max_length {
                return Err(EmbeddingError::Backend(format!(
                    "Tokenized length {} exceeds max_length {}",
                    seq_len, self.max_length
                )));
            }
            if encodings.iter().any(|e| e.len() != seq_len) {
                return Err(EmbeddingError::Backend(
                    "Inconsistent sequence lengths after padding".to_string(),
                ));
            }
            let (ids, masks, type_ids, mask_rows) = build_flat_tensors(&encodings, seq_len);

            let ids_array = Array::from_shape_vec((batch.len(), seq_len), ids)
                .map_err(|e| EmbeddingError::Backend(format!("IDs shape error: {e}")))?;
            let mask_array = Array::from_shape_vec((batch.len(), seq_len), masks)
                .map_err(|e| EmbeddingError::Backend(format!("Mask shape error: {e}")))?;
            let type_array = Array::from_shape_vec((batch.len(), seq_len), type_ids)
                .map_err(|e| EmbeddingError::Backend(format!("Types shape error: {e}")))?;
            let ids_shape = ids_array.raw_dim().into_dyn();

            let mut available: HashMap<String, DynTensor> = HashMap::new();
            available.insert(
                "input_ids".to_string(),
                Tensor::from_array(ids_array.into_dyn())
                    .map_err(|e| to_embedding_error(&e))?
                    .upcast(),
            );
            available.insert(
                "attention_mask".to_string(),
                Tensor::from_array(mask_array.into_dyn())
                    .map_err(|e| to_embedding_error(&e))?
                    .upcast(),
            );
            available.insert(
                "token_type_ids".to_string(),
                Tensor::from_array(type_array.into_dyn())
                    .map_err(|e| to_embedding_error(&e))?
                    .upcast(),
            );

            let array = {
                let mut session = self.session.lock().map_err(|_| {
                    EmbeddingError::Backend("Failed to lock ONNX session".into())
                })?;

                let mut feed: HashMap<String, DynTensor> = HashMap::new();
                for input in &session.inputs {
                    let key = input.name.clone();
                    if let Some(value) = available.remove(&key) {
                        feed.insert(key, value);
                    } else {
                        feed.insert(key, zero_tensor(&ids_shape, input)?);
                    }
                }

                let outputs = session
                    .run(SessionInputs::from(feed))
                    .map_err(|e| EmbeddingError::Backend(format!("ONNX forward failed: {e}")))?;

                if outputs.len() == 0 {
                    return Err(EmbeddingError::Backend(
                        "ONNX returned no outputs".to_string(),
                    ));
                }

                outputs[0]
                    .try_extract_array::<f32>()
                    .map_err(|e| {
                        EmbeddingError::Backend(format!("Failed to decode ONNX output: {e}"))
                    })?
                    .to_owned()
            };
            results.extend(embeddings_from_output(array, &mask_rows, self.dimension)?);
        }

        Ok(results)
    }
}

fn default_intra_threads() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    if cpus <= 4 {
        1
    } else if cpus <= 12 {
        2
    } else {
        4
    }
}

const fn ensure_dimension(vec: &[f32], expected: usize) -> Result<()> {
    if vec.len() != expected {
        return Err(EmbeddingError::InvalidDimension {
            expected,
            actual: vec.len(),
        });
    }
    Ok(())
}

fn embeddings_from_output(
    array: ndarray::ArrayD<f32>,
    mask_rows: &[Vec<i64>],
    expected_dimension: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::new();
    match array.ndim() {
        2 => {
            let embeddings = array
                .into_dimensionality::<Ix2>()
                .map_err(|e| EmbeddingError::Backend(format!("Bad output shape: {e}")))?;
            out.reserve(embeddings.len_of(Axis(0)));
            for row in embeddings.outer_iter() {
                let mut emb = row.to_vec();
                ensure_dimension(&emb, expected_dimension)?;
                normalize(&mut emb);
                out.push(emb);
            }
        }
        3 => {
            let hidden = array
                .into_dimensionality::<Ix3>()
                .map_err(|e| EmbeddingError::Backend(format!("Bad output shape: {e}")))?;
            out.reserve(hidden.len_of(Axis(0)));
            for (idx, sample) in hidden.outer_iter().enumerate() {
                let attn = mask_rows
                    .get(idx)
                    .cloned()
                    .unwrap_or_else(|| vec![1; sample.len_of(Axis(0))]);
                let mut emb = mean_pool(sample.view(), &attn);
                ensure_dimension(&emb, expected_dimension)?;
                normalize(&mut emb);
                out.push(emb);
            }
        }
        _ => {
            return Err(EmbeddingError::Backend(format!(
                "Unexpected ONNX output dims: {:?}",
                array.shape()
            )));
        }
    }
    Ok(out)
}

fn mean_pool(sample: ndarray::ArrayView2<'_, f32>, mask: &[i64]) -> Vec<f32> {
    if sample.is_empty() {
        return vec![];
    }

    let hidden = sample.len_of(Axis(1));
    let mut sum = vec![0.0f32; hidden];
    let mut count = 0.0f32;

    for (token_idx, token) in sample.outer_iter().enumerate() {
        if *mask.get(token_idx).unwrap_or(&0) == 0 {
            continue;
        }
        count += 1.0;
        for (dim, value) in token.iter().enumerate() {
            sum[dim] += value;
        }
    }

    if count == 0.0 {
        return sum;
    }

    for value in &mut sum {
        *value /= count;
    }

    sum
}

fn build_flat_tensors(
    encodings: &[Encoding],
    seq_len: usize,
) -> (Vec<i64>, Vec<i64>, Vec<i64>, Vec<Vec<i64>>) {
    let mut ids = Vec::with_capacity(encodings.len() * seq_len);
    let mut masks = Vec::with_capacity(encodings.len() * seq_len);
    let mut type_ids = Vec::with_capacity(encodings.len() * seq_len);
    let mut mask_rows = Vec::with_capacity(encodings.len());

    for encoding in encodings {
        let encoding_ids = encoding.get_ids();
        let encoding_masks = encoding.get_attention_mask();
        let encoding_types = encoding.get_type_ids();

        for idx in 0..seq_len {
            ids.push(i64::from(*encoding_ids.get(idx).unwrap_or(&0)));
            masks.push(i64::from(*encoding_masks.get(idx).unwrap_or(&0)));
            type_ids.push(i64::from(*encoding_types.get(idx).unwrap_or(&0)));
        }

        mask_rows.push(
            encoding_masks
                .iter()
                .take(seq_len)
                .map(|v| i64::from(*v))
                .collect(),
        );
    }

    (ids, masks, type_ids, mask_rows)
}

fn to_embedding_error(error: &OrtError) -> EmbeddingError {
    EmbeddingError::Backend(format!("{error}"))
}

fn zero_tensor(shape: &ndarray::IxDyn, input: &Input) -> Result<DynTensor> {
    let tensor = match &input.input_type {
        ort::value::ValueType::Tensor { ty, .. } => match ty {
            TensorElementType::Int64 => {
                Tensor::from_array(ndarray::Array::<i64, _>::zeros(shape.clone()))
                    .map_err(|e| to_embedding_error(&e))?
                    .upcast()
            }
            TensorElementType::Float32 => {
                Tensor::from_array(ndarray::Array::<f32, _>::zeros(shape.clone()))
                    .map_err(|e| to_embedding_error(&e))?
                    .upcast()
            }
            other => {
                return Err(EmbeddingError::Backend(format!(
                    "Cannot synthesize zeros for tensor type {other:?} (input {})",
                    input.name
                )))
            }
        },
        other => {
            return Err(EmbeddingError::Backend(format!(
                "Unsupported ONNX input type {other:?} (input {})",
                input.name
            )))
        }
    };
    Ok(tensor)
}

/// Sentence encoder running on ONNX Runtime (CPU).
///
/// The model is loaded lazily on the first batch; a failed load is retried on
/// the next batch.
pub struct OnnxEmbedder {
    spec: ModelSpec,
    model_dir: PathBuf,
    backend: Arc<OnceCell<Arc<OrtBackend>>>,
}

impl OnnxEmbedder {
    pub fn new(model_dir: impl Into<PathBuf>, model_id: &str) -> Result<Self> {
        let model_dir = model_dir.into();
        let spec = resolve_model_spec(&model_dir, &normalize_model_id(model_id))?;
        Ok(Self {
            spec,
            model_dir,
            backend: Arc::new(OnceCell::new()),
        })
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.spec.dimension
    }

    /// Whether the model and tokenizer files are present on disk.
    #[must_use]
    pub fn assets_present(&self) -> bool {
        let dir = self.model_dir.join(&self.spec.id);
        dir.join(&self.spec.onnx_rel_path).exists()
            && dir.join(&self.spec.tokenizer_rel_path).exists()
    }
}

#[async_trait]
impl EmbeddingService for OnnxEmbedder {
    fn id(&self) -> String {
        format!("onnx:{}", self.spec.id)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let owned = texts.to_vec();
        let cell = self.backend.clone();
        let spec = self.spec.clone();
        let model_dir = self.model_dir.clone();
        spawn_blocking(move || {
            let backend = cell.get_or_try_init(|| OrtBackend::new(&spec, &model_dir).map(Arc::new))?;
            backend.embed_batch_blocking(&owned)
        })
        .await
        .map_err(|e| EmbeddingError::Backend(format!("Join error: {e}")))?
    }
}
