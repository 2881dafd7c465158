use crate::config::{PipelineConfig, DEFAULT_BODY_WORD_LIMIT};
use crate::error::Result;
use crate::source::IssueSource;
use chrono::Utc;
use epic_cluster::{
    collect_references, identify_epics, ClusterSelector, ReferenceExtractor, ReferenceOptions,
    Summarizer,
};
use epic_embeddings::{EmbeddingEngine, DEFAULT_VOCABULARY_CAP};
use epic_protocol::text::{combined_text, embedding_text};
use epic_protocol::{
    ClusterSummary, ClusteringMethod, ClusteringResult, Issue, PipelineStage, RepoRef,
    RunDiagnostics, RESULT_SCHEMA_VERSION,
};
use epic_synth::EpicSynthesizer;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;

/// Runs the whole clustering pipeline for one repository.
///
/// ```text
/// Received → ReferencesExtracted → EpicsIdentified → Embedded → Clustered
///          → Summarized → EpicsSynthesized → Done
/// ```
///
/// Zero issues end in `Empty`. Small sets skip `Embedded`/`Clustered` and end
/// in `SmallSet` with a single cluster. The runner holds no per-run state, so
/// one instance can serve concurrent runs.
#[derive(Clone)]
pub struct IssueClusterer {
    embeddings: EmbeddingEngine,
    selector: ClusterSelector,
    summarizer: Summarizer,
    synthesizer: EpicSynthesizer,
    reference_options: ReferenceOptions,
    body_word_limit: usize,
}

impl Default for IssueClusterer {
    fn default() -> Self {
        Self {
            embeddings: EmbeddingEngine::bag_of_words_only(DEFAULT_VOCABULARY_CAP),
            selector: ClusterSelector::default(),
            summarizer: Summarizer::default(),
            synthesizer: EpicSynthesizer::default(),
            reference_options: ReferenceOptions::default(),
            body_word_limit: DEFAULT_BODY_WORD_LIMIT,
        }
    }
}

impl IssueClusterer {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            embeddings: config.embedding_engine(),
            selector: ClusterSelector::new(config.selector_config()),
            summarizer: config.summarizer(),
            synthesizer: config.synthesizer(),
            reference_options: config.reference_options(),
            body_word_limit: config.embedding.body_word_limit,
        }
    }

    #[must_use]
    pub fn with_embeddings(mut self, embeddings: EmbeddingEngine) -> Self {
        self.embeddings = embeddings;
        self
    }

    #[must_use]
    pub fn with_synthesizer(mut self, synthesizer: EpicSynthesizer) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    #[must_use]
    pub fn with_selector(mut self, selector: ClusterSelector) -> Self {
        self.selector = selector;
        self
    }

    #[must_use]
    pub fn with_reference_options(mut self, options: ReferenceOptions) -> Self {
        self.reference_options = options;
        self
    }

    /// Reads issues from `source`, then clusters them. Only the read can fail.
    pub async fn run_from_source(
        &self,
        source: &dyn IssueSource,
        repo: &RepoRef,
        requested: Option<NonZeroUsize>,
    ) -> Result<ClusteringResult> {
        let issues = source.fetch(repo).await?;
        Ok(self.run(&issues, repo, requested).await)
    }

    /// Clusters a copy of `issues`; the input is left untouched.
    pub async fn run(
        &self,
        issues: &[Issue],
        repo: &RepoRef,
        requested: Option<NonZeroUsize>,
    ) -> ClusteringResult {
        let mut diagnostics = RunDiagnostics::default();
        if issues.is_empty() {
            advance(&mut diagnostics, PipelineStage::Empty);
            log::info!("{repo}: no issues to cluster");
            return ClusteringResult::empty(repo, diagnostics);
        }

        let mut issues: Vec<Issue> = issues.to_vec();
        let extractor = ReferenceExtractor::new(&repo.owner, &repo.name, self.reference_options);
        for issue in &mut issues {
            issue.references = extractor.extract(issue.body.as_deref());
            issue.embedding = None;
            issue.cluster = None;
        }
        advance(&mut diagnostics, PipelineStage::ReferencesExtracted);

        let epics = identify_epics(&issues);
        let references = collect_references(&epics);
        advance(&mut diagnostics, PipelineStage::EpicsIdentified);

        let small_set = issues.len() <= self.selector.config().small_set_threshold;
        let assignments = if small_set {
            diagnostics.clustering = Some(ClusteringMethod::Trivial);
            vec![0; issues.len()]
        } else {
            self.embed(&mut issues, &mut diagnostics).await;
            let selection = self.selector.select(&issues, requested);
            diagnostics.clustering = Some(selection.method);
            advance(&mut diagnostics, PipelineStage::Clustered);
            selection.assignments
        };
        for (issue, cluster) in issues.iter_mut().zip(assignments) {
            issue.cluster = Some(cluster);
        }

        let mut clusters = self.summarize(&issues);
        advance(&mut diagnostics, PipelineStage::Summarized);

        self.synthesize(&issues, &mut clusters, &mut diagnostics).await;
        advance(&mut diagnostics, PipelineStage::EpicsSynthesized);

        let terminal = if small_set {
            PipelineStage::SmallSet
        } else {
            PipelineStage::Done
        };
        advance(&mut diagnostics, terminal);

        log::info!(
            "{repo}: {} issues in {} clusters ({}, embeddings: {}), {} generated / {} fallback epics",
            issues.len(),
            clusters.len(),
            describe(diagnostics.clustering.as_ref()),
            diagnostics.embedding_backend.as_deref().unwrap_or("none"),
            diagnostics.generated_epics,
            diagnostics.fallback_epics,
        );

        ClusteringResult {
            schema_version: RESULT_SCHEMA_VERSION,
            repository: repo.key(),
            issues,
            epics,
            references,
            clusters,
            diagnostics,
        }
    }

    async fn embed(&self, issues: &mut [Issue], diagnostics: &mut RunDiagnostics) {
        let texts: Vec<String> = issues
            .iter()
            .map(|issue| embedding_text(issue, self.body_word_limit))
            .collect();
        let embeddings = self.embeddings.embed(&texts).await;
        for (issue, vector) in issues.iter_mut().zip(embeddings.vectors) {
            issue.embedding = Some(vector);
        }
        diagnostics.embedding_backend = Some(embeddings.backend);
        advance(diagnostics, PipelineStage::Embedded);
    }

    fn summarize(&self, issues: &[Issue]) -> BTreeMap<usize, ClusterSummary> {
        let mut members: BTreeMap<usize, Vec<&Issue>> = BTreeMap::new();
        for issue in issues {
            if let Some(cluster) = issue.cluster {
                members.entry(cluster).or_default().push(issue);
            }
        }

        members
            .into_iter()
            .map(|(id, members)| {
                let documents: Vec<String> = members.iter().map(|i| combined_text(i)).collect();
                let summary = self.summarizer.summarize(&documents);
                (
                    id,
                    ClusterSummary {
                        id,
                        members: members.iter().map(|i| i.number).collect(),
                        top_terms: summary.top_terms,
                        label: summary.label,
                        epic_issue: None,
                    },
                )
            })
            .collect()
    }

    /// One generator call per cluster, sequentially.
    async fn synthesize(
        &self,
        issues: &[Issue],
        clusters: &mut BTreeMap<usize, ClusterSummary>,
        diagnostics: &mut RunDiagnostics,
    ) {
        let now = Utc::now();
        for (id, cluster) in clusters.iter_mut() {
            let members: Vec<&Issue> = issues
                .iter()
                .filter(|issue| issue.cluster == Some(*id))
                .collect();
            let epic = self
                .synthesizer
                .synthesize(*id, &members, &cluster.top_terms, now)
                .await;
            match epic.source {
                epic_protocol::EpicSource::Generated => diagnostics.generated_epics += 1,
                epic_protocol::EpicSource::Fallback => diagnostics.fallback_epics += 1,
            }
            cluster.epic_issue = Some(epic);
        }
    }
}

fn advance(diagnostics: &mut RunDiagnostics, stage: PipelineStage) {
    log::debug!("pipeline stage: {:?} -> {:?}", diagnostics.stage, stage);
    diagnostics.advance(stage);
}

fn describe(method: Option<&ClusteringMethod>) -> String {
    match method {
        None => "unclustered".to_string(),
        Some(ClusteringMethod::Trivial) => "single cluster".to_string(),
        Some(ClusteringMethod::NoSignal) => "no signal".to_string(),
        Some(ClusteringMethod::KMeans { k, .. }) => format!("k-means k={k}"),
        Some(ClusteringMethod::Chronological { clusters, .. }) => {
            format!("chronological x{clusters}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epic_protocol::{EpicSource, Label};
    use pretty_assertions::assert_eq;

    fn repo() -> RepoRef {
        RepoRef::new("acme", "widgets").expect("repo")
    }

    #[tokio::test]
    async fn empty_input_ends_in_empty_stage() {
        let result = IssueClusterer::default().run(&[], &repo(), None).await;
        assert!(result.issues.is_empty());
        assert!(result.clusters.is_empty());
        assert_eq!(result.diagnostics.stage, PipelineStage::Empty);
        assert_eq!(
            result.diagnostics.trace,
            vec![PipelineStage::Received, PipelineStage::Empty]
        );
    }

    #[tokio::test]
    async fn small_sets_skip_embedding_and_get_one_epic() {
        let issues = vec![
            Issue::new(1, "Crash on save", "see acme/widgets#2"),
            Issue::new(2, "Save button greyed out", ""),
        ];
        let result = IssueClusterer::default()
            .run(&issues, &repo(), NonZeroUsize::new(2))
            .await;

        assert_eq!(result.diagnostics.stage, PipelineStage::SmallSet);
        assert!(!result
            .diagnostics
            .trace
            .contains(&PipelineStage::Embedded));
        assert_eq!(result.clusters.len(), 1);
        assert!(result.issues.iter().all(|i| i.cluster == Some(0)));
        assert!(result.issues.iter().all(|i| i.embedding.is_none()));
        assert_eq!(result.issues[0].references.iter().copied().collect::<Vec<_>>(), vec![2]);

        let epic = result.clusters[&0].epic_issue.as_ref().expect("epic");
        assert_eq!(epic.number, "epic-0");
        assert_eq!(epic.source, EpicSource::Fallback);
        assert_eq!(result.diagnostics.fallback_epics, 1);
    }

    #[tokio::test]
    async fn input_issues_are_not_modified() {
        let issues: Vec<Issue> = (1..=5)
            .map(|n| Issue::new(n, format!("Issue {n} about parsing"), "body #1"))
            .collect();
        let before = issues.clone();
        let _ = IssueClusterer::default().run(&issues, &repo(), None).await;
        assert_eq!(issues, before);
    }

    #[tokio::test]
    async fn pre_existing_epics_and_their_references_are_reported() {
        let issues = vec![
            Issue::new(10, "Auth epic", "- [ ] #11\n- [x] #12")
                .with_labels(vec![Label::new("epic", "3e4b9e")]),
            Issue::new(11, "Login fails", ""),
            Issue::new(12, "Token refresh", ""),
            Issue::new(13, "Docs typo", "unrelated"),
        ];
        let result = IssueClusterer::default().run(&issues, &repo(), None).await;
        assert_eq!(
            result.epics.iter().map(|i| i.number).collect::<Vec<_>>(),
            vec![10]
        );
        assert_eq!(result.references, vec![11, 12]);
        assert_eq!(result.diagnostics.stage, PipelineStage::Done);
    }
}
