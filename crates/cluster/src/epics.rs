use epic_protocol::Issue;
use std::collections::BTreeSet;

/// Issues already labelled as epics (any label name containing "epic",
/// case-insensitive), in input order.
pub fn identify_epics(issues: &[Issue]) -> Vec<Issue> {
    issues.iter().filter(|issue| issue.is_epic()).cloned().collect()
}

/// Sorted union of the references held by `epics`.
pub fn collect_references(epics: &[Issue]) -> Vec<u64> {
    epics
        .iter()
        .flat_map(|epic| epic.references.iter().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
