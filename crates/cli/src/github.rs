use anyhow::{Context, Result};
use epic_protocol::{EpicRecord, Issue, PublishedIssue, RepoRef, EPIC_LABEL};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("issue-epics/", env!("CARGO_PKG_VERSION"));

/// Body of `POST /repos/{owner}/{name}/issues`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewIssue {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

impl NewIssue {
    pub fn from_epic(epic: &EpicRecord, members: &[&Issue]) -> Self {
        let mut labels = epic.label_names();
        if !labels.iter().any(|l| l.eq_ignore_ascii_case(EPIC_LABEL)) {
            labels.push(EPIC_LABEL.to_string());
        }
        Self {
            title: epic.title.clone(),
            body: with_related_issues(&epic.body, members),
            labels,
        }
    }
}

/// Appends a `### Related Issues` list unless the body already has one.
pub fn with_related_issues(body: &str, members: &[&Issue]) -> String {
    if body.to_lowercase().contains("related issues") || members.is_empty() {
        return body.to_string();
    }
    let mut out = body.trim_end().to_string();
    out.push_str("\n\n### Related Issues\n\n");
    for issue in members {
        let _ = writeln!(out, "- #{}: {}", issue.number, issue.title);
    }
    out
}

#[derive(Debug, Deserialize)]
struct CreatedIssue {
    number: u64,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
}

/// Human-readable reason for a failed create call.
pub fn failure_message(status: StatusCode, body: &str) -> String {
    let api_message = serde_json::from_str::<ApiError>(body)
        .ok()
        .and_then(|e| e.message)
        .unwrap_or_else(|| body.trim().to_string());
    match status.as_u16() {
        401 => "Authentication failed: check GITHUB_TOKEN".to_string(),
        403 => "Permission denied: the token cannot create issues in this repository".to_string(),
        404 => "Repository not found (or not visible to this token)".to_string(),
        422 => format!("Validation failed: {api_message}"),
        code => format!("GitHub API error {code}: {api_message}"),
    }
}

pub struct GitHubClient {
    client: Client,
    api_url: String,
    token: String,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            token: token.into(),
        })
    }

    pub fn issues_endpoint(&self, repo: &RepoRef) -> String {
        issues_endpoint(&self.api_url, repo)
    }

    pub async fn create_issue(&self, repo: &RepoRef, issue: &NewIssue) -> Result<PublishedIssue> {
        let url = self.issues_endpoint(repo);
        log::debug!("POST {url}");
        let response = self
            .client
            .post(&url)
            .header("Accept", "application/vnd.github.v3+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header("Authorization", format!("token {}", self.token))
            .json(issue)
            .send()
            .await
            .with_context(|| format!("Request failed: POST {url}"))?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{}", failure_message(status, &body));
        }

        let created: CreatedIssue = response
            .json()
            .await
            .context("Unexpected response from GitHub")?;
        Ok(PublishedIssue {
            number: created.number,
            url: created.html_url,
        })
    }
}

pub fn issues_endpoint(api_url: &str, repo: &RepoRef) -> String {
    format!(
        "{}/repos/{}/{}/issues",
        api_url.trim_end_matches('/'),
        repo.owner,
        repo.name
    )
}
