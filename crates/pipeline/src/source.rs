use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use epic_protocol::{Issue, RepoRef};
use serde::Deserialize;
use std::path::PathBuf;

/// Supplies the raw issue list for a repository.
#[async_trait]
pub trait IssueSource: Send + Sync {
    async fn fetch(&self, repo: &RepoRef) -> Result<Vec<Issue>>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IssueDocument {
    List(Vec<Issue>),
    Wrapped { issues: Vec<Issue> },
}

/// Parses a JSON array of issues, or an object with an `issues` array.
pub fn parse_issues(raw: &str) -> Result<Vec<Issue>> {
    let document: IssueDocument = serde_json::from_str(raw)?;
    Ok(match document {
        IssueDocument::List(issues) | IssueDocument::Wrapped { issues } => issues,
    })
}

/// Issues exported to a JSON file, e.g. by a scraper run.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl IssueSource for JsonFileSource {
    async fn fetch(&self, repo: &RepoRef) -> Result<Vec<Issue>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| PipelineError::Read {
                path: self.path.clone(),
                source,
            })?;
        let issues = parse_issues(&raw)?;
        log::debug!(
            "Read {} issues for {repo} from {}",
            issues.len(),
            self.path.display()
        );
        Ok(issues)
    }
}

/// Fixed in-memory issue list.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    issues: Vec<Issue>,
}

impl MemorySource {
    pub fn new(issues: Vec<Issue>) -> Self {
        Self { issues }
    }
}

#[async_trait]
impl IssueSource for MemorySource {
    async fn fetch(&self, _repo: &RepoRef) -> Result<Vec<Issue>> {
        Ok(self.issues.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn accepts_bare_and_wrapped_lists() {
        let bare = r#"[{"number": 1, "title": "a"}]"#;
        let wrapped = r#"{"issues": [{"number": 1, "title": "a"}]}"#;
        assert_eq!(parse_issues(bare).expect("bare"), parse_issues(wrapped).expect("wrapped"));
        assert!(parse_issues(r#"{"number": 1}"#).is_err());
    }

    #[tokio::test]
    async fn missing_file_is_a_read_error() {
        let repo = RepoRef::new("acme", "widgets").expect("repo");
        let err = JsonFileSource::new("/definitely/not/here.json")
            .fetch(&repo)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Read { .. }));
    }

    #[tokio::test]
    async fn reads_issue_file() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("issues.json");
        std::fs::write(&path, r#"[{"number": 4, "title": "Crash", "body": "see #2"}]"#)
            .expect("write");
        let repo = RepoRef::new("acme", "widgets").expect("repo");
        let issues = JsonFileSource::new(&path).fetch(&repo).await.expect("issues");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].body_text(), "see #2");
    }
}
