use crate::error::{EmbeddingError, Result};
use crate::service::EmbeddingService;
use async_trait::async_trait;
use epic_protocol::text::words;
use std::collections::{HashMap, HashSet};

/// Dimension used when no backend can say otherwise.
pub const DEFAULT_DIMENSION: usize = 512;
pub const DEFAULT_VOCABULARY_CAP: usize = 512;

const MIN_TOKEN_CHARS: usize = 3;

/// Term-count vectors over the vocabulary of one batch.
///
/// The vocabulary holds distinct lowercase words longer than two characters in
/// first-seen order, capped at `vocabulary_cap` terms. Vectors are
/// L2-normalized; an all-zero row stays zero.
#[derive(Clone, Debug)]
pub struct BagOfWords {
    vocabulary_cap: usize,
}

impl Default for BagOfWords {
    fn default() -> Self {
        Self::new(DEFAULT_VOCABULARY_CAP)
    }
}

impl BagOfWords {
    pub fn new(vocabulary_cap: usize) -> Self {
        Self {
            vocabulary_cap: vocabulary_cap.max(1),
        }
    }

    pub fn vocabulary(&self, texts: &[String]) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut vocabulary = Vec::new();
        'outer: for text in texts {
            for token in tokens(text) {
                if vocabulary.len() >= self.vocabulary_cap {
                    break 'outer;
                }
                if seen.insert(token.clone()) {
                    vocabulary.push(token);
                }
            }
        }
        vocabulary
    }

    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vocabulary = self.vocabulary(texts);
        if vocabulary.is_empty() {
            return Err(EmbeddingError::EmptyVocabulary);
        }
        let index: HashMap<&str, usize> = vocabulary
            .iter()
            .enumerate()
            .map(|(idx, term)| (term.as_str(), idx))
            .collect();

        let vectors = texts
            .iter()
            .map(|text| {
                let mut vec = vec![0.0f32; vocabulary.len()];
                for token in tokens(text) {
                    if let Some(&idx) = index.get(token.as_str()) {
                        vec[idx] += 1.0;
                    }
                }
                normalize(&mut vec);
                vec
            })
            .collect();
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingService for BagOfWords {
    fn id(&self) -> String {
        "bag-of-words".to_string()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_batch(texts)
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    words(text).filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
}

pub(crate) fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}
