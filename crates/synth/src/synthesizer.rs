use crate::colors::resolve_label;
use crate::fallback::{ensure_epic_label, fallback_epic, strip_checklists, with_checklist};
use crate::generator::TextGenerator;
use crate::parse::{parse_response, EpicDraft};
use crate::prompt::build_prompt;
use chrono::{DateTime, Utc};
use epic_protocol::{EpicRecord, EpicSource, Issue, IssueState};
use std::sync::Arc;

/// Builds one epic per cluster. Never fails: any generator problem degrades to
/// the deterministic fallback.
#[derive(Clone, Default)]
pub struct EpicSynthesizer {
    generator: Option<Arc<dyn TextGenerator>>,
}

impl EpicSynthesizer {
    pub fn new(generator: Option<Arc<dyn TextGenerator>>) -> Self {
        Self { generator }
    }

    pub fn generator_name(&self) -> Option<String> {
        self.generator.as_ref().map(|g| g.name())
    }

    pub async fn synthesize(
        &self,
        cluster_id: usize,
        members: &[&Issue],
        top_terms: &[String],
        now: DateTime<Utc>,
    ) -> EpicRecord {
        let (draft, source) = match self.generate(cluster_id, members, top_terms).await {
            Some(draft) => (draft, EpicSource::Generated),
            None => (
                fallback_epic(cluster_id, members, top_terms),
                EpicSource::Fallback,
            ),
        };

        EpicRecord {
            number: EpicRecord::synthetic_number(cluster_id),
            title: draft.title,
            body: draft.body,
            labels: draft
                .labels
                .iter()
                .map(|name| resolve_label(name, members))
                .collect(),
            state: IssueState::Open,
            created_at: now,
            references: members.iter().map(|i| i.number.to_string()).collect(),
            source,
            published: None,
        }
    }

    async fn generate(
        &self,
        cluster_id: usize,
        members: &[&Issue],
        top_terms: &[String],
    ) -> Option<EpicDraft> {
        let generator = self.generator.as_ref()?;
        let prompt = build_prompt(members, top_terms);
        let parsed = generator
            .complete(&prompt)
            .await
            .and_then(|text| parse_response(&text, cluster_id, top_terms));
        match parsed {
            Ok(draft) => Some(EpicDraft {
                body: with_checklist(&strip_checklists(&draft.body), members),
                labels: ensure_epic_label(draft.labels),
                title: draft.title,
            }),
            Err(err) => {
                log::warn!(
                    "Epic generation for cluster {cluster_id} failed via {}: {err}; using fallback",
                    generator.name()
                );
                None
            }
        }
    }
}
