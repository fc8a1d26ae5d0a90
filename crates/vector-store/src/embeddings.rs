use crate::error::{Result, VectorStoreError};
use ndarray::{Array, Axis, Ix2, Ix3};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokenizers::{Encoding, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tokio::task::spawn_blocking;

use ort::execution_providers::CPUExecutionProvider;
use ort::session::{builder::GraphOptimizationLevel, Session, SessionInputs};
use ort::value::{DynTensor, Tensor};

/// Embedding backend selection. `Fast` runs the ONNX model; `Stub` is a
/// deterministic hash-based embedding for hermetic tests and offline runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EmbeddingMode {
    Fast,
    Stub,
}

impl FromStr for EmbeddingMode {
    type Err = VectorStoreError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "stub" => Ok(Self::Stub),
            other => Err(VectorStoreError::Embedding(format!(
                "Unsupported embedding mode '{other}' (expected 'fast' or 'stub')"
            ))),
        }
    }
}

/// Construction options for [`EmbeddingModel`].
#[derive(Clone, Debug)]
pub struct EmbeddingOptions {
    pub mode: EmbeddingMode,
    pub model_dir: PathBuf,
    pub model_id: String,
}

impl EmbeddingOptions {
    /// Reads options from the process environment:
    /// `BUILDRAG_EMBEDDING_MODE` (fast|stub, default fast),
    /// `BUILDRAG_MODEL_DIR` (default `./models`),
    /// `BUILDRAG_EMBEDDING_MODEL` (default `bge-small`).
    pub fn from_env() -> Result<Self> {
        let mode = env::var("BUILDRAG_EMBEDDING_MODE")
            .unwrap_or_else(|_| "fast".to_string())
            .parse()?;
        let model_dir = env::var("BUILDRAG_MODEL_DIR")
            .map_or_else(|_| PathBuf::from("models"), PathBuf::from);
        let model_id = env::var("BUILDRAG_EMBEDDING_MODEL")
            .unwrap_or_else(|_| "bge-small".to_string())
            .trim()
            .to_ascii_lowercase();
        Ok(Self {
            mode,
            model_dir,
            model_id,
        })
    }
}

#[derive(Clone, Copy)]
struct ModelSpec {
    dimension: usize,
    max_length: usize,
    max_batch: usize,
}

fn spec_for(model_id: &str) -> Result<ModelSpec> {
    let dimension = match model_id {
        "bge-small" => 384,
        "bge-base" => 768,
        "bge-large" => 1024,
        other => {
            return Err(VectorStoreError::Embedding(format!(
                "Unknown embedding model id '{other}'. Available: bge-small, bge-base, bge-large"
            )))
        }
    };
    Ok(ModelSpec {
        dimension,
        max_length: 512,
        max_batch: 32,
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
    fn new(model_dir: &Path, model_id: &str, spec: ModelSpec) -> Result<Self> {
        let model_path = model_dir.join(model_id).join("model.onnx");
        let tokenizer_path = model_dir.join(model_id).join("tokenizer.json");
        if !model_path.exists() || !tokenizer_path.exists() {
            return Err(VectorStoreError::Embedding(format!(
                "Model files for '{model_id}' are missing. Expected ONNX at {} and tokenizer at {} (set BUILDRAG_MODEL_DIR).",
                model_path.display(),
                tokenizer_path.display(),
            )));
        }

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| VectorStoreError::Embedding(format!("Tokenizer load failed: {e}")))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..PaddingParams::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: spec.max_length,
                ..TruncationParams::default()
            }))
            .map_err(|e| {
                VectorStoreError::Embedding(format!("Tokenizer truncation failed: {e}"))
            })?;

        let session = Session::builder()
            .map_err(|e| VectorStoreError::Embedding(format!("{e}")))?
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .map_err(|e| {
                VectorStoreError::Embedding(format!("Failed to register execution provider: {e}"))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                VectorStoreError::Embedding(format!("Failed to set optimization level: {e}"))
            })?
            .commit_from_file(&model_path)
            .map_err(|e| VectorStoreError::Embedding(format!("Failed to load ONNX model: {e}")))?;

        log::info!(
            "Loaded ONNX embedding model '{model_id}' (dim {}, max_length {})",
            spec.dimension,
            spec.max_length
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
                .map_err(|e| VectorStoreError::Embedding(format!("Tokenization failed: {e}")))?;

            if encodings.is_empty() {
                continue;
            }

            let seq_len = encodings[0].len();
            if seq_len > self.max_length {
                return Err(VectorStoreError::Embedding(format!(
                    "Tokenized length {seq_len} exceeds max_length {}",
                    self.max_length
                )));
            }
            if encodings.iter().any(|e| e.len() != seq_len) {
                return Err(VectorStoreError::Embedding(
                    "Inconsistent sequence lengths after padding".to_string(),
                ));
            }

            let (ids, masks, type_ids, mask_rows) = build_flat_tensors(&encodings, seq_len);

            let ids_array = Array::from_shape_vec((batch.len(), seq_len), ids)
                .map_err(|e| VectorStoreError::Embedding(format!("IDs shape error: {e}")))?;
            let mask_array = Array::from_shape_vec((batch.len(), seq_len), masks)
                .map_err(|e| VectorStoreError::Embedding(format!("Mask shape error: {e}")))?;
            let type_array = Array::from_shape_vec((batch.len(), seq_len), type_ids)
                .map_err(|e| VectorStoreError::Embedding(format!("Types shape error: {e}")))?;

            let ids_tensor: DynTensor = Tensor::from_array(ids_array.into_dyn())
                .map_err(|e| VectorStoreError::Embedding(format!("{e}")))?
                .upcast();
            let mask_tensor: DynTensor = Tensor::from_array(mask_array.into_dyn())
                .map_err(|e| VectorStoreError::Embedding(format!("{e}")))?
                .upcast();
            let type_tensor: DynTensor = Tensor::from_array(type_array.into_dyn())
                .map_err(|e| VectorStoreError::Embedding(format!("{e}")))?
                .upcast();

            let array = {
                let mut session = self.session.lock().map_err(|_| {
                    VectorStoreError::Embedding("Failed to lock ONNX session".into())
                })?;

                let mut feed: std::collections::HashMap<String, DynTensor> =
                    std::collections::HashMap::new();
                feed.insert("input_ids".to_string(), ids_tensor);
                feed.insert("attention_mask".to_string(), mask_tensor);
                feed.insert("token_type_ids".to_string(), type_tensor);
                let wanted: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
                feed.retain(|key, _| wanted.iter().any(|name| name == key));

                let outputs = session
                    .run(SessionInputs::from(feed))
                    .map_err(|e| VectorStoreError::Embedding(format!("ONNX forward failed: {e}")))?;

                if outputs.len() == 0 {
                    return Err(VectorStoreError::Embedding(
                        "ONNX returned no outputs".to_string(),
                    ));
                }

                outputs[0]
                    .try_extract_array::<f32>()
                    .map_err(|e| {
                        VectorStoreError::Embedding(format!("Failed to decode ONNX output: {e}"))
                    })?
                    .to_owned()
            };

            results.extend(embeddings_from_output(array, &mask_rows, self.dimension)?);
        }

        Ok(results)
    }
}

fn embeddings_from_output(
    array: ndarray::ArrayD<f32>,
    mask_rows: &[Vec<i64>],
    expected_dimension: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::new();
    match array.ndim() {
        // Pooled output: one row per input.
        2 => {
            let embeddings = array
                .into_dimensionality::<Ix2>()
                .map_err(|e| VectorStoreError::Embedding(format!("Bad output shape: {e}")))?;
            out.reserve(embeddings.len_of(Axis(0)));
            for row in embeddings.outer_iter() {
                let mut emb = row.to_owned().to_vec();
                ensure_dimension(&emb, expected_dimension)?;
                normalize(&mut emb);
                out.push(emb);
            }
        }
        // Token-level hidden states: mean-pool with the attention mask.
        3 => {
            let hidden = array
                .into_dimensionality::<Ix3>()
                .map_err(|e| VectorStoreError::Embedding(format!("Bad output shape: {e}")))?;
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
            return Err(VectorStoreError::Embedding(format!(
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

fn ensure_dimension(vec: &[f32], expected: usize) -> Result<()> {
    if vec.len() != expected {
        return Err(VectorStoreError::InvalidDimension {
            expected,
            actual: vec.len(),
        });
    }
    Ok(())
}

fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}

fn stub_embed(text: &str, dimension: usize) -> Vec<f32> {
    let mut state =
        fnv1a_64(text.as_bytes()) ^ (dimension as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let mut vec = Vec::with_capacity(dimension);
    for _ in 0..dimension {
        let bits = splitmix64(&mut state);
        let high = (bits >> 32) as u32;
        let mantissa = high >> 9;
        let unit = f32::from_bits(0x3f80_0000 | mantissa) - 1.0;
        vec.push(unit.mul_add(2.0, -1.0));
    }
    normalize(&mut vec);
    vec
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

enum EmbeddingBackend {
    Ort(Arc<OrtBackend>),
    Stub { dimension: usize },
}

/// Text embedding capability. Loaded once and reused for the process
/// lifetime; the same model must be used at index-build time and at query
/// time, so the artifact is tagged with [`EmbeddingModel::model_id`].
pub struct EmbeddingModel {
    backend: EmbeddingBackend,
    dimension: usize,
    model_id: String,
}

impl EmbeddingModel {
    pub fn new(options: &EmbeddingOptions) -> Result<Self> {
        let spec = spec_for(&options.model_id)?;
        let backend = match options.mode {
            EmbeddingMode::Stub => EmbeddingBackend::Stub {
                dimension: spec.dimension,
            },
            EmbeddingMode::Fast => EmbeddingBackend::Ort(Arc::new(OrtBackend::new(
                &options.model_dir,
                &options.model_id,
                spec,
            )?)),
        };
        Ok(Self {
            backend,
            dimension: spec.dimension,
            model_id: options.model_id.clone(),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(&EmbeddingOptions::from_env()?)
    }

    /// Deterministic hash-based embedder. Identical texts embed to
    /// identical vectors; distinct texts land far apart.
    #[must_use]
    pub fn stub(dimension: usize) -> Self {
        Self {
            backend: EmbeddingBackend::Stub { dimension },
            dimension,
            model_id: format!("stub-{dimension}"),
        }
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed_batch(vec![text]).await?;
        embeddings
            .pop()
            .ok_or_else(|| VectorStoreError::Embedding("Empty embedding result".to_string()))
    }

    pub async fn embed_batch(&self, texts: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let owned: Vec<String> = texts.into_iter().map(ToString::to_string).collect();
        match &self.backend {
            EmbeddingBackend::Stub { dimension } => {
                let dimension = *dimension;
                Ok(owned.iter().map(|t| stub_embed(t, dimension)).collect())
            }
            EmbeddingBackend::Ort(backend) => {
                let backend = backend.clone();
                spawn_blocking(move || backend.embed_batch_blocking(&owned))
                    .await
                    .map_err(|e| VectorStoreError::Embedding(format!("Join error: {e}")))?
            }
        }
    }
}
