use crate::kmeans::{to_matrix, KMeans, Partition, DEFAULT_MAX_ITERATIONS, DEFAULT_SEED};
use crate::silhouette::silhouette_score;
use epic_protocol::{ClusteringMethod, Issue};
use ndarray::ArrayView2;
use std::num::NonZeroUsize;

pub const DEFAULT_SMALL_SET_THRESHOLD: usize = 3;
pub const DEFAULT_MAX_K: usize = 10;
const MIN_K: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorConfig {
    /// Sets of at most this many issues skip k-means and share cluster 0.
    pub small_set_threshold: usize,
    pub max_k: usize,
    pub max_iterations: usize,
    pub seed: u64,
    /// Evaluate candidate k values on scoped threads.
    pub parallel_search: bool,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            small_set_threshold: DEFAULT_SMALL_SET_THRESHOLD,
            max_k: DEFAULT_MAX_K,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            seed: DEFAULT_SEED,
            parallel_search: true,
        }
    }
}

/// Cluster id per issue (input order) and how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub assignments: Vec<usize>,
    pub method: ClusteringMethod,
}

impl Selection {
    fn single(n: usize, method: ClusteringMethod) -> Self {
        Self {
            assignments: vec![0; n],
            method,
        }
    }

    pub fn cluster_count(&self) -> usize {
        self.assignments.iter().max().map_or(0, |m| m + 1)
    }
}

/// Chooses k and partitions issues by their embeddings.
///
/// Every path yields contiguous zero-based ids covering each issue exactly
/// once. Invalid embeddings and k-means failures degrade to chronological
/// bucketing rather than erroring.
#[derive(Debug, Clone, Default)]
pub struct ClusterSelector {
    config: SelectorConfig,
}

impl ClusterSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    pub fn select(&self, issues: &[Issue], requested: Option<NonZeroUsize>) -> Selection {
        let n = issues.len();
        if n <= self.config.small_set_threshold {
            return Selection::single(n, ClusteringMethod::Trivial);
        }

        let rows: Vec<Option<&[f32]>> = issues.iter().map(|i| i.embedding.as_deref()).collect();
        let data = match to_matrix(&rows) {
            Ok(data) => data,
            Err(err) => {
                log::warn!("Embeddings unusable ({err}); clustering chronologically");
                return chronological(issues, requested, err.to_string());
            }
        };

        if data.iter().all(|v| *v == 0.0) {
            log::warn!("All {n} embeddings are zero vectors; using a single cluster");
            return Selection::single(n, ClusteringMethod::NoSignal);
        }

        let outcome = match requested {
            Some(k) => self
                .kmeans(k.get())
                .fit(data.view())
                .map(|partition| (k.get(), partition, None)),
            None => self.search(data.view()),
        };

        match outcome {
            Ok((k, partition, silhouette)) => {
                log::debug!(
                    "Selected k={k} ({} non-empty clusters, silhouette {silhouette:?})",
                    partition.clusters
                );
                Selection {
                    assignments: partition.assignments,
                    method: ClusteringMethod::KMeans { k, silhouette },
                }
            }
            Err(reason) => {
                log::warn!("k-means failed ({reason}); clustering chronologically");
                chronological(issues, requested, reason.to_string())
            }
        }
    }

    fn kmeans(&self, k: usize) -> KMeans {
        KMeans::new(k)
            .with_max_iterations(self.config.max_iterations)
            .with_seed(self.config.seed)
    }

    /// Candidate range `[2, max_k]` with
    /// `max_k = min(cap, n / 2, max(2, floor(sqrt(n))))`.
    pub fn candidate_range(&self, n: usize) -> std::ops::RangeInclusive<usize> {
        let sqrt = (n as f64).sqrt().floor() as usize;
        let max_k = self.config.max_k.min(n / 2).min(sqrt.max(MIN_K));
        MIN_K..=max_k.max(MIN_K)
    }

    fn search(&self, data: ArrayView2<'_, f64>) -> crate::Result<(usize, Partition, Option<f64>)> {
        let candidates: Vec<usize> = self.candidate_range(data.nrows()).collect();

        let evaluate = |k: usize| {
            self.kmeans(k).fit(data).map(|partition| {
                let score = silhouette_score(data, &partition.assignments);
                (k, partition, score)
            })
        };

        let scored: Vec<crate::Result<(usize, Partition, f64)>> =
            if self.config.parallel_search && candidates.len() > 1 {
                std::thread::scope(|scope| {
                    let handles: Vec<_> = candidates
                        .iter()
                        .map(|&k| scope.spawn(move || evaluate(k)))
                        .collect();
                    // A panicked candidate is skipped like a failed one.
                    handles
                        .into_iter()
                        .filter_map(|handle| handle.join().ok())
                        .collect()
                })
            } else {
                candidates.iter().map(|&k| evaluate(k)).collect()
            };

        // -1 is below any achievable mean silhouette; strict `>` keeps the smallest k on ties.
        let mut best: Option<(usize, Partition, f64)> = None;
        let mut best_score = -1.0;
        let mut last_error = None;
        for result in scored {
            match result {
                Ok((k, partition, score)) => {
                    log::debug!("k={k}: silhouette {score:.4}");
                    if best.is_none() || score > best_score {
                        best_score = score;
                        best = Some((k, partition, score));
                    }
                }
                Err(err) => last_error = Some(err),
            }
        }

        match (best, last_error) {
            (Some((k, partition, score)), _) => Ok((k, partition, Some(score))),
            (None, Some(err)) => Err(err),
            (None, None) => Err(crate::KMeansError::ZeroClusters),
        }
    }
}

/// Sorts by creation time (undated issues last, input order otherwise) and cuts
/// the sequence into equal runs of `ceil(n / clusters)` issues.
pub fn chronological(
    issues: &[Issue],
    requested: Option<NonZeroUsize>,
    reason: String,
) -> Selection {
    let n = issues.len();
    if n == 0 {
        return Selection {
            assignments: Vec::new(),
            method: ClusteringMethod::Chronological {
                clusters: 0,
                reason,
            },
        };
    }

    let wanted = requested.map_or_else(
        || ((n as f64 / 2.0).sqrt().floor() as usize).clamp(2, 5),
        NonZeroUsize::get,
    );
    let per_bucket = n.div_ceil(wanted);

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&idx| (issues[idx].created_at.is_none(), issues[idx].created_at));

    let mut assignments = vec![0; n];
    for (position, &idx) in order.iter().enumerate() {
        assignments[idx] = position / per_bucket;
    }
    let clusters = assignments.iter().max().map_or(0, |m| m + 1);
    Selection {
        assignments,
        method: ClusteringMethod::Chronological { clusters, reason },
    }
}
