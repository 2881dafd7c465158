use crate::bag_of_words::{BagOfWords, DEFAULT_DIMENSION};
use crate::error::{EmbeddingError, Result};
use crate::onnx::OnnxEmbedder;
use crate::service::EmbeddingService;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Which backend the engine tries first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingMode {
    /// Semantic encoder when its model files are installed, bag-of-words otherwise.
    #[default]
    Auto,
    Semantic,
    BagOfWords,
}

impl FromStr for EmbeddingMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "semantic" | "onnx" => Ok(Self::Semantic),
            "bag-of-words" | "bow" => Ok(Self::BagOfWords),
            other => Err(format!(
                "unknown embedding mode '{other}' (expected auto, semantic or bag-of-words)"
            )),
        }
    }
}

/// One vector per input text plus the backend that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct Embeddings {
    pub vectors: Vec<Vec<f32>>,
    pub backend: String,
}

/// Checks a backend batch: one vector per text, one shared non-zero dimension,
/// finite components. Returns the dimension.
pub fn validate_batch(vectors: &[Vec<f32>], expected_len: usize) -> Result<usize> {
    if vectors.len() != expected_len {
        return Err(EmbeddingError::CountMismatch {
            expected: expected_len,
            actual: vectors.len(),
        });
    }
    let Some(first) = vectors.first() else {
        return Ok(0);
    };
    let dimension = first.len();
    if dimension == 0 {
        return Err(EmbeddingError::InvalidDimension {
            expected: 1,
            actual: 0,
        });
    }
    for (index, vector) in vectors.iter().enumerate() {
        if vector.len() != dimension {
            return Err(EmbeddingError::InvalidDimension {
                expected: dimension,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(EmbeddingError::NonFinite { index });
        }
    }
    Ok(dimension)
}

/// Embedding front door used by the pipeline. [`EmbeddingEngine::embed`] never
/// fails: a broken primary backend degrades to bag-of-words, and an empty
/// vocabulary degrades to zero vectors.
#[derive(Clone)]
pub struct EmbeddingEngine {
    primary: Option<Arc<dyn EmbeddingService>>,
    fallback: BagOfWords,
}

impl EmbeddingEngine {
    pub fn new(primary: Arc<dyn EmbeddingService>, vocabulary_cap: usize) -> Self {
        Self {
            primary: Some(primary),
            fallback: BagOfWords::new(vocabulary_cap),
        }
    }

    pub fn bag_of_words_only(vocabulary_cap: usize) -> Self {
        Self {
            primary: None,
            fallback: BagOfWords::new(vocabulary_cap),
        }
    }

    /// Builds the engine for `mode`. `Semantic` keeps the encoder even when its
    /// files are missing so the failure shows up (and is logged) on first use.
    pub fn from_mode(
        mode: EmbeddingMode,
        model_id: &str,
        model_dir: &Path,
        vocabulary_cap: usize,
    ) -> Self {
        match mode {
            EmbeddingMode::BagOfWords => Self::bag_of_words_only(vocabulary_cap),
            EmbeddingMode::Semantic | EmbeddingMode::Auto => {
                match OnnxEmbedder::new(model_dir, model_id) {
                    Ok(embedder) if mode == EmbeddingMode::Semantic || embedder.assets_present() => {
                        Self::new(Arc::new(embedder), vocabulary_cap)
                    }
                    Ok(_) => {
                        log::debug!(
                            "No model files for '{model_id}' under {}; using bag-of-words",
                            model_dir.display()
                        );
                        Self::bag_of_words_only(vocabulary_cap)
                    }
                    Err(err) => {
                        log::warn!("Semantic embeddings unavailable: {err}");
                        Self::bag_of_words_only(vocabulary_cap)
                    }
                }
            }
        }
    }

    pub fn primary_id(&self) -> Option<String> {
        self.primary.as_ref().map(|service| service.id())
    }

    pub async fn embed(&self, texts: &[String]) -> Embeddings {
        if texts.is_empty() {
            return Embeddings {
                vectors: Vec::new(),
                backend: self.primary_id().unwrap_or_else(|| self.fallback.id()),
            };
        }

        if let Some(primary) = &self.primary {
            let attempt = primary
                .embed(texts)
                .await
                .and_then(|vectors| validate_batch(&vectors, texts.len()).map(|_| vectors));
            match attempt {
                Ok(vectors) => {
                    return Embeddings {
                        vectors,
                        backend: primary.id(),
                    }
                }
                Err(err) => {
                    log::warn!(
                        "Embedding backend {} failed, falling back to bag-of-words: {err}",
                        primary.id()
                    );
                }
            }
        }

        match self.fallback.embed_batch(texts) {
            Ok(vectors) => Embeddings {
                vectors,
                backend: self.fallback.id(),
            },
            Err(err) => {
                log::warn!("Bag-of-words embedding failed, using zero vectors: {err}");
                Embeddings {
                    vectors: vec![vec![0.0; DEFAULT_DIMENSION]; texts.len()],
                    backend: "zero".to_string(),
                }
            }
        }
    }
}
