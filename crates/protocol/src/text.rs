//! Word tokenization shared by the embedding and summarization stages.

use crate::Issue;
use unicode_segmentation::UnicodeSegmentation;

/// Lowercased words on Unicode word boundaries.
pub fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.unicode_words().map(str::to_lowercase)
}

/// `title + " " + body`, the text used for term statistics.
pub fn combined_text(issue: &Issue) -> String {
    format!("{} {}", issue.title, issue.body_text())
}

/// Title followed by the first `body_word_limit` words of the body.
pub fn embedding_text(issue: &Issue, body_word_limit: usize) -> String {
    let body = issue
        .body_text()
        .split_whitespace()
        .take(body_word_limit)
        .collect::<Vec<_>>()
        .join(" ");
    if body.is_empty() {
        return issue.title.clone();
    }
    format!("{} {body}", issue.title)
}
