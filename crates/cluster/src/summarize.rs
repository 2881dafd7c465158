use epic_protocol::text::words;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const DEFAULT_TOP_TERMS: usize = 5;
pub const DEFAULT_MIN_TOKEN_LEN: usize = 3;

/// How per-term scores are accumulated across a cluster's documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TermScoring {
    /// For every document containing a term, add that term's TF-IDF in the
    /// cluster's first document. Terms absent from the first document score 0.
    #[default]
    FirstDocument,
    /// Sum each term's TF-IDF over every document.
    Aggregate,
}

/// Top terms and their comma-joined label.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TermSummary {
    pub top_terms: Vec<String>,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct Summarizer {
    top_terms: usize,
    min_token_len: usize,
    scoring: TermScoring,
}

impl Default for Summarizer {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_TERMS, DEFAULT_MIN_TOKEN_LEN, TermScoring::default())
    }
}

impl Summarizer {
    pub fn new(top_terms: usize, min_token_len: usize, scoring: TermScoring) -> Self {
        Self {
            top_terms,
            min_token_len,
            scoring,
        }
    }

    /// Summarizes one cluster; `documents` holds one `title body` text per
    /// member issue, in cluster order.
    pub fn summarize(&self, documents: &[String]) -> TermSummary {
        let docs: Vec<Vec<String>> = documents.iter().map(|d| words(d).collect()).collect();
        if docs.is_empty() {
            return TermSummary::default();
        }

        let counts: Vec<HashMap<&str, usize>> = docs
            .iter()
            .map(|tokens| {
                let mut tf: HashMap<&str, usize> = HashMap::new();
                for token in tokens {
                    *tf.entry(token.as_str()).or_insert(0) += 1;
                }
                tf
            })
            .collect();

        let mut df: HashMap<&str, usize> = HashMap::new();
        for tf in &counts {
            for term in tf.keys() {
                *df.entry(*term).or_insert(0) += 1;
            }
        }

        let total_docs = docs.len() as f64;
        let tfidf = |term: &str, doc: usize| -> f64 {
            let tf = counts[doc].get(term).copied().unwrap_or(0) as f64;
            let df = df.get(term).copied().unwrap_or(0) as f64;
            tf * (1.0 + (total_docs / (1.0 + df)).ln())
        };

        // Distinct terms in first-appearance order; the sort below is stable.
        let mut order: Vec<&str> = Vec::new();
        let mut scores: HashMap<&str, f64> = HashMap::new();
        for (doc_idx, tokens) in docs.iter().enumerate() {
            let mut seen_in_doc: HashSet<&str> = HashSet::new();
            for token in tokens {
                let term = token.as_str();
                if term.chars().count() < self.min_token_len || !seen_in_doc.insert(term) {
                    continue;
                }
                let contribution = match self.scoring {
                    TermScoring::FirstDocument => tfidf(term, 0),
                    TermScoring::Aggregate => tfidf(term, doc_idx),
                };
                match scores.get_mut(term) {
                    Some(score) => *score += contribution,
                    None => {
                        order.push(term);
                        scores.insert(term, contribution);
                    }
                }
            }
        }

        let mut ranked: Vec<(&str, f64)> = order
            .into_iter()
            .map(|term| (term, scores.get(term).copied().unwrap_or(0.0)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let top_terms: Vec<String> = ranked
            .into_iter()
            .take(self.top_terms)
            .map(|(term, _)| term.to_string())
            .collect();
        let label = top_terms.join(", ");
        TermSummary { top_terms, label }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn docs(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn first_document_terms_lead_the_ranking() {
        let summary = Summarizer::default().summarize(&docs(&[
            "Login crash crash on submit",
            "Crash when the login token expires",
            "Session token refresh",
        ]));
        // crash: tf 2 in doc 0, present in 2 docs -> counted twice.
        assert_eq!(summary.top_terms[0], "crash");
        assert_eq!(summary.top_terms[1], "login");
        assert_eq!(summary.top_terms.len(), 5);
        assert!(!summary.top_terms.iter().any(|t| t.len() < 3));
        assert_eq!(summary.label, summary.top_terms.join(", "));
    }

    #[test]
    fn aggregate_scoring_counts_every_document() {
        let documents = docs(&[
            "Typo in readme",
            "Parser panics on unicode input",
            "Parser panics on empty input",
        ]);
        let first = Summarizer::default().summarize(&documents);
        assert_eq!(first.top_terms[..3], ["typo", "readme", "parser"]);

        let aggregate = Summarizer::new(5, 3, TermScoring::Aggregate).summarize(&documents);
        assert_eq!(aggregate.top_terms[..2], ["parser", "panics"]);
    }

    #[test]
    fn ties_keep_first_appearance_order() {
        let summary =
            Summarizer::default().summarize(&docs(&["alpha beta gamma delta epsilon zeta"]));
        assert_eq!(
            summary.top_terms,
            vec!["alpha", "beta", "gamma", "delta", "epsilon"]
        );
        assert_eq!(summary.label, "alpha, beta, gamma, delta, epsilon");
    }

    #[test]
    fn empty_cluster_has_no_terms() {
        assert_eq!(Summarizer::default().summarize(&[]), TermSummary::default());
        assert_eq!(
            Summarizer::default().summarize(&docs(&["a b c"])),
            TermSummary::default()
        );
    }
}
