use crate::error::ConfigError;
use epic_cluster::{ReferenceOptions, SelectorConfig, Summarizer, TermScoring};
use epic_embeddings::{
    default_model_dir, EmbeddingEngine, EmbeddingMode, DEFAULT_MODEL_ID, DEFAULT_VOCABULARY_CAP,
};
use epic_synth::{ChatCompletionsGenerator, EpicSynthesizer, RetryPolicy, TextGenerator};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_BODY_WORD_LIMIT: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReferencesConfig {
    pub include_loose_hash: bool,
}

impl Default for ReferencesConfig {
    fn default() -> Self {
        Self {
            include_loose_hash: ReferenceOptions::default().include_loose_hash,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub mode: EmbeddingMode,
    pub model: String,
    /// Defaults to `EPIC_MODEL_DIR`, then a `models/` directory up the tree.
    pub model_dir: Option<PathBuf>,
    /// Body words embedded after the title.
    pub body_word_limit: usize,
    pub vocabulary_cap: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            mode: EmbeddingMode::Auto,
            model: DEFAULT_MODEL_ID.to_string(),
            model_dir: None,
            body_word_limit: DEFAULT_BODY_WORD_LIMIT,
            vocabulary_cap: DEFAULT_VOCABULARY_CAP,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusteringConfig {
    pub small_set_threshold: usize,
    pub max_k: usize,
    pub max_iterations: usize,
    pub seed: u64,
    pub parallel_search: bool,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        let defaults = SelectorConfig::default();
        Self {
            small_set_threshold: defaults.small_set_threshold,
            max_k: defaults.max_k,
            max_iterations: defaults.max_iterations,
            seed: defaults.seed,
            parallel_search: defaults.parallel_search,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SummaryConfig {
    pub top_terms: usize,
    pub min_token_len: usize,
    pub scoring: TermScoring,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            top_terms: epic_cluster::summarize::DEFAULT_TOP_TERMS,
            min_token_len: epic_cluster::summarize::DEFAULT_MIN_TOKEN_LEN,
            scoring: TermScoring::default(),
        }
    }
}

/// Generative-text settings. The API key is read from the environment only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub retry_delay_secs: u64,
    pub max_retries: Option<u32>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: None,
            retry_delay_secs: epic_synth::DEFAULT_RETRY_DELAY.as_secs(),
            max_retries: None,
        }
    }
}

impl SynthesisConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            delay: Duration::from_secs(self.retry_delay_secs),
            max_retries: self.max_retries,
        }
    }
}

/// Pipeline settings: TOML file, then `EPIC_*` environment overrides, then
/// whatever the caller sets explicitly.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub references: ReferencesConfig,
    pub embedding: EmbeddingConfig,
    pub clustering: ClusteringConfig,
    pub summary: SummaryConfig,
    pub synthesis: SynthesisConfig,
}

impl PipelineConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// File (when given) plus process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(value) = get("EPIC_LOOSE_REFS") {
            self.references.include_loose_hash = parse_bool("EPIC_LOOSE_REFS", &value)?;
        }
        if let Some(value) = get("EPIC_EMBEDDING_MODE") {
            self.embedding.mode = value.parse().map_err(|reason| ConfigError::InvalidValue {
                key: "EPIC_EMBEDDING_MODE".to_string(),
                value: value.clone(),
                reason,
            })?;
        }
        if let Some(value) = get("EPIC_EMBEDDING_MODEL") {
            self.embedding.model = value;
        }
        if let Some(value) = get("EPIC_MODEL_DIR") {
            self.embedding.model_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = get("EPIC_LLM_BASE_URL") {
            self.synthesis.base_url = Some(value);
        }
        if let Some(value) = get("EPIC_LLM_MODEL") {
            self.synthesis.model = Some(value);
        }
        Ok(())
    }

    pub fn reference_options(&self) -> ReferenceOptions {
        ReferenceOptions {
            include_loose_hash: self.references.include_loose_hash,
        }
    }

    pub fn selector_config(&self) -> SelectorConfig {
        SelectorConfig {
            small_set_threshold: self.clustering.small_set_threshold,
            max_k: self.clustering.max_k,
            max_iterations: self.clustering.max_iterations,
            seed: self.clustering.seed,
            parallel_search: self.clustering.parallel_search,
        }
    }

    pub fn summarizer(&self) -> Summarizer {
        Summarizer::new(
            self.summary.top_terms,
            self.summary.min_token_len,
            self.summary.scoring,
        )
    }

    pub fn embedding_engine(&self) -> EmbeddingEngine {
        let model_dir = self
            .embedding
            .model_dir
            .clone()
            .unwrap_or_else(default_model_dir);
        EmbeddingEngine::from_mode(
            self.embedding.mode,
            &self.embedding.model,
            &model_dir,
            self.embedding.vocabulary_cap,
        )
    }

    /// Synthesizer with a chat generator when `EPIC_LLM_API_KEY` or
    /// `OPENAI_API_KEY` is set, fallback-only otherwise.
    pub fn synthesizer(&self) -> EpicSynthesizer {
        let generator = ChatCompletionsGenerator::from_env(
            self.synthesis.base_url.clone(),
            self.synthesis.model.clone(),
            self.synthesis.retry_policy(),
        );
        match generator {
            Some(generator) => {
                EpicSynthesizer::new(Some(Arc::new(generator) as Arc<dyn TextGenerator>))
            }
            None => {
                log::debug!("No LLM API key configured; epics use the template fallback");
                EpicSynthesizer::default()
            }
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn empty_file_yields_defaults() {
        let config: PipelineConfig = toml::from_str("").expect("config");
        assert_eq!(config, PipelineConfig::default());
        assert!(config.references.include_loose_hash);
        assert_eq!(config.embedding.body_word_limit, 200);
        assert_eq!(config.embedding.vocabulary_cap, 512);
        assert_eq!(config.clustering.max_k, 10);
        assert_eq!(config.clustering.small_set_threshold, 3);
        assert_eq!(config.summary.top_terms, 5);
        assert_eq!(config.synthesis.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("epics.toml");
        std::fs::write(
            &path,
            r#"
[embedding]
mode = "bag-of-words"

[summary]
scoring = "aggregate"

[synthesis]
max_retries = 3
"#,
        )
        .expect("write config");

        let config = PipelineConfig::from_toml_file(&path).expect("config");
        assert_eq!(config.embedding.mode, EmbeddingMode::BagOfWords);
        assert_eq!(config.embedding.model, DEFAULT_MODEL_ID);
        assert_eq!(config.summary.scoring, TermScoring::Aggregate);
        assert_eq!(config.synthesis.max_retries, Some(3));
        assert_eq!(config.synthesis.retry_delay_secs, 5);
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[embedding\nmode = 1").expect("write config");
        let err = PipelineConfig::from_toml_file(&path).unwrap_err();
        assert!(err.to_string().contains("broken.toml"), "{err}");
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("EPIC_LOOSE_REFS", "false"),
            ("EPIC_EMBEDDING_MODE", "semantic"),
            ("EPIC_LLM_MODEL", "local-model"),
            ("EPIC_MODEL_DIR", ""),
        ]
        .into_iter()
        .collect();

        let mut config = PipelineConfig::default();
        config
            .apply_env(|key| env.get(key).map(ToString::to_string))
            .expect("env");
        assert!(!config.references.include_loose_hash);
        assert_eq!(config.embedding.mode, EmbeddingMode::Semantic);
        assert_eq!(config.synthesis.model.as_deref(), Some("local-model"));
        assert_eq!(config.embedding.model_dir, None);
    }

    #[test]
    fn invalid_environment_values_are_rejected() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_env(|key| (key == "EPIC_LOOSE_REFS").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
