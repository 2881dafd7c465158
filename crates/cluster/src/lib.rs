//! Clustering stages of the epic pipeline.
//!
//! - [`refs`]: cross-issue reference extraction
//! - [`epics`]: pre-existing epic detection
//! - [`selector`]: k selection (silhouette search) and k-means partitioning,
//!   with chronological bucketing as the fallback
//! - [`summarize`]: TF-IDF top terms per cluster

mod error;
pub mod epics;
pub mod kmeans;
pub mod refs;
pub mod selector;
pub mod silhouette;
pub mod summarize;

pub use epics::{collect_references, identify_epics};
pub use error::{KMeansError, Result};
pub use kmeans::{KMeans, Partition};
pub use refs::{extract_issue_refs, ReferenceExtractor, ReferenceOptions};
pub use selector::{chronological, ClusterSelector, Selection, SelectorConfig};
pub use silhouette::silhouette_score;
pub use summarize::{Summarizer, TermScoring, TermSummary};
