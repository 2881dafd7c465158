use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

mod repo;
pub mod text;

pub use repo::{RepoRef, RepoRefError};

pub const RESULT_SCHEMA_VERSION: u32 = 1;

/// Label name that marks an issue as an epic.
pub const EPIC_LABEL: &str = "epic";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum IssueState {
    #[serde(alias = "open")]
    Open,
    #[serde(alias = "closed")]
    Closed,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct Label {
    pub name: String,
    /// Six hex digits without a leading `#`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Label {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: Some(color.into()),
        }
    }

    #[must_use]
    pub fn is_epic(&self) -> bool {
        self.name.to_lowercase().contains(EPIC_LABEL)
    }
}

/// A repository issue as handed to the clustering pipeline.
///
/// `references`, `embedding` and `cluster` are filled in by the pipeline; the
/// remaining fields come from the issue source and are never modified.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default, alias = "created_at")]
    #[schemars(with = "Option<String>")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<IssueState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub references: BTreeSet<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<usize>,
}

impl Issue {
    pub fn new(number: u64, title: impl Into<String>, body: impl Into<String>) -> Self {
        let body = body.into();
        Self {
            number,
            title: title.into(),
            body: (!body.is_empty()).then_some(body),
            labels: Vec::new(),
            created_at: None,
            state: None,
            url: None,
            references: BTreeSet::new(),
            embedding: None,
            cluster: None,
        }
    }

    #[must_use]
    pub fn with_labels(mut self, labels: Vec<Label>) -> Self {
        self.labels = labels;
        self
    }

    #[must_use]
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn body_text(&self) -> &str {
        self.body.as_deref().unwrap_or("")
    }

    #[must_use]
    pub fn is_epic(&self) -> bool {
        self.labels.iter().any(Label::is_epic)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EpicSource {
    Generated,
    Fallback,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublishedIssue {
    pub number: u64,
    pub url: String,
}

/// Synthesized parent issue for one cluster. Not a GitHub issue until published.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EpicRecord {
    /// Synthetic `epic-<clusterId>` number; never collides with real issue numbers.
    pub number: String,
    pub title: String,
    pub body: String,
    pub labels: Vec<Label>,
    pub state: IssueState,
    #[schemars(with = "String")]
    pub created_at: DateTime<Utc>,
    pub references: Vec<String>,
    pub source: EpicSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<PublishedIssue>,
}

impl EpicRecord {
    #[must_use]
    pub fn synthetic_number(cluster_id: usize) -> String {
        format!("epic-{cluster_id}")
    }

    pub fn label_names(&self) -> Vec<String> {
        self.labels.iter().map(|label| label.name.clone()).collect()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSummary {
    pub id: usize,
    /// Member issue numbers, in the order the issues appear in the result.
    #[serde(rename = "issues")]
    pub members: Vec<u64>,
    pub top_terms: Vec<String>,
    pub label: String,
    pub epic_issue: Option<EpicRecord>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    ReferencesExtracted,
    EpicsIdentified,
    Embedded,
    Clustered,
    Summarized,
    EpicsSynthesized,
    Done,
    Empty,
    SmallSet,
}

impl PipelineStage {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Empty | Self::SmallSet)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum ClusteringMethod {
    /// Too few issues to cluster; everything lands in cluster 0.
    Trivial,
    /// All embeddings were zero vectors.
    NoSignal,
    KMeans {
        k: usize,
        silhouette: Option<f64>,
    },
    Chronological {
        clusters: usize,
        reason: String,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunDiagnostics {
    pub stage: PipelineStage,
    pub trace: Vec<PipelineStage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clustering: Option<ClusteringMethod>,
    pub generated_epics: usize,
    pub fallback_epics: usize,
}

impl Default for RunDiagnostics {
    fn default() -> Self {
        Self {
            stage: PipelineStage::Received,
            trace: vec![PipelineStage::Received],
            embedding_backend: None,
            clustering: None,
            generated_epics: 0,
            fallback_epics: 0,
        }
    }
}

impl RunDiagnostics {
    pub fn advance(&mut self, stage: PipelineStage) {
        self.stage = stage;
        self.trace.push(stage);
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusteringResult {
    pub schema_version: u32,
    pub repository: String,
    pub issues: Vec<Issue>,
    /// Pre-existing epics (issues labelled as epics), surfaced for display only.
    pub epics: Vec<Issue>,
    /// Issue numbers already tracked by the pre-existing epics.
    pub references: Vec<u64>,
    pub clusters: BTreeMap<usize, ClusterSummary>,
    pub diagnostics: RunDiagnostics,
}

impl ClusteringResult {
    pub fn empty(repository: &RepoRef, diagnostics: RunDiagnostics) -> Self {
        Self {
            schema_version: RESULT_SCHEMA_VERSION,
            repository: repository.key(),
            issues: Vec::new(),
            epics: Vec::new(),
            references: Vec::new(),
            clusters: BTreeMap::new(),
            diagnostics,
        }
    }

    /// Member issues of `cluster_id`, in cluster order.
    pub fn members(&self, cluster_id: usize) -> Vec<&Issue> {
        let Some(cluster) = self.clusters.get(&cluster_id) else {
            return Vec::new();
        };
        cluster
            .members
            .iter()
            .filter_map(|number| self.issues.iter().find(|issue| issue.number == *number))
            .collect()
    }
}
