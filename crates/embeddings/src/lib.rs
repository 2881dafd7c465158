//! # Issue Embeddings
//!
//! Turns issue text into fixed-length vectors for clustering.
//!
//! ## Backends
//!
//! - **Semantic** via an ONNX sentence encoder (`models/manifest.json`)
//! - **Bag-of-words** fallback over the batch vocabulary (no model, no network)
//! - **Zero vectors** when neither produces anything usable
//!
//! ```text
//! Issue[]
//!     │  "<title> <first 200 body words>"
//!     ├──> EmbeddingService (ONNX, one batched call)
//!     │      └─> validated Vector[dim]
//!     └──> on any failure: BagOfWords
//!            └─> Vector[vocabulary ≤ 512]
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use epic_embeddings::EmbeddingEngine;
//!
//! # async fn run() {
//! let engine = EmbeddingEngine::bag_of_words_only(512);
//! let texts = vec!["crash on start".to_string(), "docs typo".to_string()];
//! let embeddings = engine.embed(&texts).await;
//! assert_eq!(embeddings.vectors.len(), 2);
//! # }
//! ```

mod bag_of_words;
mod engine;
mod error;
mod onnx;
mod service;

pub use bag_of_words::{BagOfWords, DEFAULT_DIMENSION, DEFAULT_VOCABULARY_CAP};
pub use engine::{validate_batch, EmbeddingEngine, EmbeddingMode, Embeddings};
pub use error::{EmbeddingError, Result};
pub use onnx::{default_model_dir, OnnxEmbedder, DEFAULT_MODEL_ID};
pub use service::EmbeddingService;
