use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RepoRefError {
    #[error("Repository owner and name must be non-empty")]
    Empty,

    #[error("Invalid repository segment '{0}'")]
    InvalidSegment(String),

    #[error("Not a GitHub URL: {0}")]
    NotGitHub(String),

    #[error("Invalid GitHub repository reference '{0}' (expected owner/name)")]
    Malformed(String),
}

/// Owner/name identity of a GitHub repository.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, JsonSchema)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Result<Self, RepoRefError> {
        let owner = owner.into().trim().to_string();
        let name = name.into().trim().to_string();
        if owner.is_empty() || name.is_empty() {
            return Err(RepoRefError::Empty);
        }
        for segment in [&owner, &name] {
            if !segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            {
                return Err(RepoRefError::InvalidSegment(segment.clone()));
            }
        }
        Ok(Self { owner, name })
    }

    /// Accepts `owner/name` or `https://github.com/owner/name[/...]`.
    pub fn parse(raw: &str) -> Result<Self, RepoRefError> {
        let raw = raw.trim();
        let path = if let Some(rest) = raw
            .strip_prefix("https://")
            .or_else(|| raw.strip_prefix("http://"))
        {
            let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
            let host = host.trim_start_matches("www.");
            if !host.eq_ignore_ascii_case("github.com") {
                return Err(RepoRefError::NotGitHub(raw.to_string()));
            }
            path
        } else {
            raw
        };

        let mut parts = path.split('/').filter(|part| !part.is_empty());
        match (parts.next(), parts.next()) {
            (Some(owner), Some(name)) => Self::new(owner, name.trim_end_matches(".git")),
            _ => Err(RepoRefError::Malformed(raw.to_string())),
        }
    }

    /// Cache key, `owner/name`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}
