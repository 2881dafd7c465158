use crate::parse::{default_title, EpicDraft};
use epic_protocol::{Issue, EPIC_LABEL};
use std::fmt::Write as _;

const MAX_LABELS: usize = 3;

/// `- [ ] #<number>: <title>` per member, in cluster order.
pub fn checklist(members: &[&Issue]) -> String {
    let mut out = String::new();
    for issue in members {
        let _ = writeln!(out, "- [ ] #{}: {}", issue.number, issue.title);
    }
    out
}

/// Appends the `## Related Issues` checklist to `body`.
pub fn with_checklist(body: &str, members: &[&Issue]) -> String {
    let mut out = body.trim_end().to_string();
    if !out.is_empty() {
        out.push_str("\n\n");
    }
    out.push_str("## Related Issues\n\n");
    out.push_str(&checklist(members));
    out
}

/// Drops task-list items and any `Related Issues` section from generated text.
pub fn strip_checklists(body: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut in_related = false;
    for line in body.lines() {
        let trimmed = line.trim();
        if is_heading(trimmed) {
            in_related = trimmed.to_lowercase().contains("related issues");
            if in_related {
                continue;
            }
        }
        if in_related || is_task_item(trimmed) {
            continue;
        }
        if trimmed.is_empty() && kept.last().map_or(true, |prev| prev.trim().is_empty()) {
            continue;
        }
        kept.push(line);
    }
    kept.join("\n").trim_end().to_string()
}

fn is_heading(line: &str) -> bool {
    line.starts_with('#') && line.trim_start_matches('#').starts_with(' ')
}

fn is_task_item(line: &str) -> bool {
    line.strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .map(str::trim_start)
        .is_some_and(|rest| ["[ ]", "[x]", "[X]"].iter().any(|box_| rest.starts_with(box_)))
}

/// Adds `epic` unless some label already contains it (case-insensitive).
pub fn ensure_epic_label(mut labels: Vec<String>) -> Vec<String> {
    if !labels
        .iter()
        .any(|label| label.to_lowercase().contains(EPIC_LABEL))
    {
        labels.push(EPIC_LABEL.to_string());
    }
    labels
}

/// The most frequent member label names, ties by first occurrence.
fn frequent_labels(members: &[&Issue], limit: usize) -> Vec<String> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for label in members.iter().flat_map(|issue| issue.labels.iter()) {
        match counts.iter_mut().find(|(name, _)| *name == label.name) {
            Some((_, count)) => *count += 1,
            None => counts.push((label.name.as_str(), 1)),
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
        .into_iter()
        .take(limit)
        .map(|(name, _)| name.to_string())
        .collect()
}

fn summary_sentence(members: &[&Issue], top_terms: &[String]) -> String {
    let mut sentence = if top_terms.is_empty() {
        format!("This epic groups {} related issue(s).", members.len())
    } else {
        format!(
            "This epic groups {} related issue(s) about {}.",
            members.len(),
            top_terms.join(", ")
        )
    };

    // First maximum wins.
    let mut hub: Option<&Issue> = None;
    for &issue in members {
        if hub.map_or(true, |h| issue.references.len() > h.references.len()) {
            hub = Some(issue);
        }
    }
    if let Some(hub) = hub {
        let refs = hub.references.len();
        if refs > 0 {
            let _ = write!(
                sentence,
                " The most connected issue is #{} ({}), which references {refs} other issue(s).",
                hub.number, hub.title
            );
        } else {
            let _ = write!(
                sentence,
                " A good starting point is #{} ({}).",
                hub.number, hub.title
            );
        }
    }
    sentence
}

/// Deterministic epic built only from the cluster's own data.
pub fn fallback_epic(cluster_id: usize, members: &[&Issue], top_terms: &[String]) -> EpicDraft {
    let mut body = String::from("## Cluster Summary\n\n");
    body.push_str(&summary_sentence(members, top_terms));
    EpicDraft {
        title: default_title(cluster_id, top_terms),
        body: with_checklist(&body, members),
        labels: ensure_epic_label(frequent_labels(members, MAX_LABELS)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epic_protocol::Label;
    use pretty_assertions::assert_eq;

    fn labelled(number: u64, title: &str, labels: &[&str]) -> Issue {
        Issue::new(number, title, "").with_labels(
            labels
                .iter()
                .map(|name| Label::new(*name, "ededed"))
                .collect(),
        )
    }

    #[test]
    fn checklist_lists_members_in_order() {
        let a = Issue::new(3, "Fix X", "");
        let b = Issue::new(5, "Fix Y", "");
        let draft = fallback_epic(0, &[&a, &b], &[]);
        let items: Vec<&str> = draft
            .body
            .lines()
            .filter(|line| line.starts_with("- [ ]"))
            .collect();
        assert_eq!(items, vec!["- [ ] #3: Fix X", "- [ ] #5: Fix Y"]);
        assert!(draft.body.starts_with("## Cluster Summary"));
    }

    #[test]
    fn generated_task_lists_are_stripped() {
        let body = "Shared goal.\n\n- [x] #9: Done already\n* [ ] #10\n\n## Related Issues\n\n- [ ] #12: Other thing\n\n### Risks\n\nSee #4 for context.";
        assert_eq!(
            strip_checklists(body),
            "Shared goal.\n\n### Risks\n\nSee #4 for context."
        );
        assert_eq!(strip_checklists("#12 is the root cause"), "#12 is the root cause");
        assert_eq!(strip_checklists("- plain bullet"), "- plain bullet");
    }

    #[test]
    fn labels_are_top_three_plus_epic() {
        let issues = [
            labelled(1, "a", &["ui", "bug"]),
            labelled(2, "b", &["bug", "docs"]),
            labelled(3, "c", &["perf", "docs", "bug"]),
        ];
        let refs: Vec<&Issue> = issues.iter().collect();
        let draft = fallback_epic(0, &refs, &[]);
        assert_eq!(draft.labels, vec!["bug", "docs", "ui", "epic"]);
    }

    #[test]
    fn existing_epic_label_is_not_duplicated() {
        let issues = [labelled(1, "a", &["Epic: auth"]), labelled(2, "b", &["auth"])];
        let refs: Vec<&Issue> = issues.iter().collect();
        let draft = fallback_epic(0, &refs, &[]);
        assert_eq!(draft.labels, vec!["Epic: auth", "auth"]);
    }

    #[test]
    fn summary_names_the_most_connected_issue() {
        let mut a = Issue::new(1, "Login", "");
        a.references = [2].into_iter().collect();
        let mut b = Issue::new(2, "Tokens", "");
        b.references = [1, 3].into_iter().collect();
        let mut c = Issue::new(3, "Sessions", "");
        c.references = [1, 2].into_iter().collect();

        let terms = vec!["login".to_string(), "token".to_string()];
        let draft = fallback_epic(2, &[&a, &b, &c], &terms);
        assert_eq!(draft.title, "Epic: login, token");
        assert!(draft
            .body
            .contains("about login, token. The most connected issue is #2 (Tokens)"));
    }
}
