//! End-to-end issue clustering.
//!
//! [`IssueClusterer`] drives one run: reference extraction, epic detection,
//! embeddings, cluster selection, TF-IDF summaries and epic synthesis.
//! Configuration comes from [`PipelineConfig`] (TOML plus `EPIC_*` env vars);
//! issues come from an [`IssueSource`]; [`ResultCache`] keeps finished runs per
//! repository.

mod cache;
mod config;
mod error;
mod orchestrator;
mod source;

pub use cache::ResultCache;
pub use config::{
    ClusteringConfig, EmbeddingConfig, PipelineConfig, ReferencesConfig, SummaryConfig,
    SynthesisConfig, DEFAULT_BODY_WORD_LIMIT,
};
pub use error::{ConfigError, PipelineError, Result};
pub use orchestrator::IssueClusterer;
pub use source::{parse_issues, IssueSource, JsonFileSource, MemorySource};
