use thiserror::Error;

pub type Result<T> = std::result::Result<T, KMeansError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KMeansError {
    #[error("Cluster count must be at least 1")]
    ZeroClusters,

    #[error("Cannot form {k} clusters from {points} points")]
    TooFewPoints { k: usize, points: usize },

    #[error("Embedding {index} has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Embedding {index} is missing or empty")]
    MissingEmbedding { index: usize },

    #[error("Embedding {index} contains a non-finite value")]
    NonFinite { index: usize },
}
