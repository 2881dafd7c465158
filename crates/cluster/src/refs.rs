use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Knobs for [`ReferenceExtractor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceOptions {
    /// Also count any bare `#<N>`. Catches plain mentions at the cost of
    /// false positives such as "see PR #5".
    pub include_loose_hash: bool,
}

impl Default for ReferenceOptions {
    fn default() -> Self {
        Self {
            include_loose_hash: true,
        }
    }
}

fn task_list_regex() -> &'static Regex {
    static TASK: OnceLock<Regex> = OnceLock::new();
    TASK.get_or_init(|| Regex::new(r"\[(?:[xX]|\s)\]\s?#([0-9]+)").expect("valid regex"))
}

fn loose_hash_regex() -> &'static Regex {
    static LOOSE: OnceLock<Regex> = OnceLock::new();
    LOOSE.get_or_init(|| Regex::new(r"#([0-9]+)").expect("valid regex"))
}

/// Finds issue numbers mentioned in free text for one repository.
///
/// Recognized forms:
/// - `/<owner>/<name>/issues/<N>` (issue URLs)
/// - `<owner>/<name>#<N>`
/// - `[ ] #<N>` and `[x] #<N>` task-list items
/// - bare `#<N>` when [`ReferenceOptions::include_loose_hash`] is set
#[derive(Debug, Clone)]
pub struct ReferenceExtractor {
    url: Regex,
    shorthand: Regex,
    options: ReferenceOptions,
}

impl ReferenceExtractor {
    pub fn new(owner: &str, name: &str, options: ReferenceOptions) -> Self {
        let owner = regex::escape(owner);
        let name = regex::escape(name);
        let url = Regex::new(&format!("/{owner}/{name}/issues/([0-9]+)")).expect("valid regex");
        let shorthand = Regex::new(&format!("{owner}/{name}#([0-9]+)")).expect("valid regex");
        Self {
            url,
            shorthand,
            options,
        }
    }

    pub fn extract(&self, text: Option<&str>) -> BTreeSet<u64> {
        let mut refs = BTreeSet::new();
        let Some(text) = text.filter(|t| !t.is_empty()) else {
            return refs;
        };

        let mut patterns = vec![&self.url, &self.shorthand, task_list_regex()];
        if self.options.include_loose_hash {
            patterns.push(loose_hash_regex());
        }
        for pattern in patterns {
            for caps in pattern.captures_iter(text) {
                // Digit runs too long for u64 are dropped rather than wrapped.
                if let Some(number) = caps.get(1).and_then(|m| m.as_str().parse::<u64>().ok()) {
                    refs.insert(number);
                }
            }
        }
        refs
    }
}

/// One-shot extraction with default options.
pub fn extract_issue_refs(text: Option<&str>, owner: &str, name: &str) -> BTreeSet<u64> {
    ReferenceExtractor::new(owner, name, ReferenceOptions::default()).extract(text)
}
