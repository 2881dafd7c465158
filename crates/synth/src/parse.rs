use crate::error::{Result, SynthesisError};
use epic_protocol::EPIC_LABEL;
use regex::Regex;
use std::sync::OnceLock;

/// Title, body and label names of an epic before colours are attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpicDraft {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

struct Sections {
    title: Regex,
    body: Regex,
    labels: Regex,
}

fn sections() -> &'static Sections {
    static SECTIONS: OnceLock<Sections> = OnceLock::new();
    SECTIONS.get_or_init(|| {
        let section = |name: &str, others: &str| {
            Regex::new(&format!(r"(?s)<{name}>:\s*(.*?)\s*(?:{others}|\z)")).expect("valid regex")
        };
        Sections {
            title: section("TITLE", "<BODY>:|<LABELS>:"),
            body: section("BODY", "<TITLE>:|<LABELS>:"),
            labels: section("LABELS", "<TITLE>:|<BODY>:"),
        }
    })
}

/// `Epic: <first three terms>`, or `Epic: Cluster <id>` without terms.
pub fn default_title(cluster_id: usize, top_terms: &[String]) -> String {
    if top_terms.is_empty() {
        return format!("Epic: Cluster {cluster_id}");
    }
    let terms: Vec<&str> = top_terms.iter().take(3).map(String::as_str).collect();
    format!("Epic: {}", terms.join(", "))
}

/// Parses a `<TITLE>: ... <BODY>: ... <LABELS>: ...` completion.
///
/// Missing or blank sections take defaults (title from `top_terms`, empty
/// body, `["epic"]`). A completion with none of the three markers is an error.
pub fn parse_response(text: &str, cluster_id: usize, top_terms: &[String]) -> Result<EpicDraft> {
    let sections = sections();
    let capture = |re: &Regex| {
        re.captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
    };

    let title = capture(&sections.title);
    let body = capture(&sections.body);
    let labels = capture(&sections.labels);
    if title.is_none() && body.is_none() && labels.is_none() {
        return Err(SynthesisError::MissingSections);
    }

    let title = title
        .map(|t| t.lines().next().unwrap_or_default().trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| default_title(cluster_id, top_terms));
    let labels = labels.map(|raw| split_labels(&raw)).unwrap_or_default();
    let labels = if labels.is_empty() {
        vec![EPIC_LABEL.to_string()]
    } else {
        labels
    };

    Ok(EpicDraft {
        title,
        body: body.unwrap_or_default(),
        labels,
    })
}

fn split_labels(raw: &str) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    for part in raw.split([',', '\n']) {
        let label = part
            .trim()
            .trim_start_matches(['-', '*'])
            .trim()
            .trim_matches(['[', ']', '"', '\'', '`'])
            .trim();
        if !label.is_empty() && !labels.iter().any(|l| l.eq_ignore_ascii_case(label)) {
            labels.push(label.to_string());
        }
    }
    labels
}
