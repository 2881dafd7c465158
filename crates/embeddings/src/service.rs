use crate::error::Result;
use async_trait::async_trait;

/// Batched text embedding backend.
///
/// Implementations return one vector per input text, in input order. The
/// engine validates the batch, so implementations may fail or return
/// inconsistent output without aborting the pipeline.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Short backend identifier for diagnostics, e.g. `onnx:bge-small`.
    fn id(&self) -> String;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
