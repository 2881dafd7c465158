use epic_protocol::Issue;
use std::fmt::Write as _;

/// Per-issue body excerpt length in characters.
pub const BODY_EXCERPT_CHARS: usize = 600;

const INSTRUCTION: &str = "\
Write an epic issue that groups the GitHub issues listed below.
Reply using exactly this format and nothing else:
<TITLE>: a short title for the epic
<BODY>: two or three sentences describing the shared goal. Do not list the issues.
<LABELS>: a comma-separated list of labels";

pub fn build_prompt(members: &[&Issue], top_terms: &[String]) -> String {
    let mut prompt = String::from(INSTRUCTION);
    if !top_terms.is_empty() {
        let _ = write!(prompt, "\n\nKey terms: {}", top_terms.join(", "));
    }
    prompt.push_str("\n\nIssues:");
    for issue in members {
        let labels: Vec<&str> = issue.labels.iter().map(|l| l.name.as_str()).collect();
        let _ = write!(prompt, "\n\n#{}: {}", issue.number, issue.title);
        if !labels.is_empty() {
            let _ = write!(prompt, "\nLabels: {}", labels.join(", "));
        }
        let body = excerpt(issue.body_text(), BODY_EXCERPT_CHARS);
        if !body.is_empty() {
            let _ = write!(prompt, "\n{body}");
        }
    }
    prompt
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
