use crate::error::{KMeansError, Result};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

pub const DEFAULT_MAX_ITERATIONS: usize = 100;
pub const DEFAULT_SEED: u64 = 0x5EED_C1A5_7E25_0001;

/// Copies embeddings into a dense row-major matrix, rejecting ragged, empty or
/// non-finite rows.
pub fn to_matrix(vectors: &[Option<&[f32]>]) -> Result<Array2<f64>> {
    let dimension = match vectors.first() {
        Some(Some(first)) if !first.is_empty() => first.len(),
        Some(_) => return Err(KMeansError::MissingEmbedding { index: 0 }),
        None => return Ok(Array2::zeros((0, 0))),
    };

    let mut data = Array2::<f64>::zeros((vectors.len(), dimension));
    for (index, (vector, mut row)) in vectors.iter().zip(data.outer_iter_mut()).enumerate() {
        let Some(vector) = (*vector).filter(|v| !v.is_empty()) else {
            return Err(KMeansError::MissingEmbedding { index });
        };
        if vector.len() != dimension {
            return Err(KMeansError::DimensionMismatch {
                index,
                expected: dimension,
                actual: vector.len(),
            });
        }
        for (slot, value) in row.iter_mut().zip(vector.iter()) {
            if !value.is_finite() {
                return Err(KMeansError::NonFinite { index });
            }
            *slot = f64::from(*value);
        }
    }
    Ok(data)
}

pub fn euclidean(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    squared_euclidean(a, b).sqrt()
}

fn squared_euclidean(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Output of one k-means run.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    /// Cluster id per point. Ids are contiguous from 0, numbered in order of
    /// first appearance.
    pub assignments: Vec<usize>,
    /// Number of distinct ids in `assignments`. Can be below the requested k
    /// when points coincide.
    pub clusters: usize,
    pub iterations: usize,
}

/// Lloyd's algorithm with k-means++ seeding driven by a fixed-seed SplitMix64
/// stream, so identical input always yields the same partition.
#[derive(Debug, Clone, Copy)]
pub struct KMeans {
    k: usize,
    max_iterations: usize,
    seed: u64,
}

impl KMeans {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            seed: DEFAULT_SEED,
        }
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn fit(&self, data: ArrayView2<'_, f64>) -> Result<Partition> {
        let n = data.nrows();
        if self.k == 0 {
            return Err(KMeansError::ZeroClusters);
        }
        if self.k > n {
            return Err(KMeansError::TooFewPoints { k: self.k, points: n });
        }

        let mut centroids = self.seed_centroids(data);
        let mut assignments = vec![usize::MAX; n];
        let mut iterations = 0;

        while iterations < self.max_iterations {
            iterations += 1;
            let mut changed = false;
            for (i, point) in data.outer_iter().enumerate() {
                let nearest = nearest_centroid(point, centroids.view());
                if assignments[i] != nearest {
                    assignments[i] = nearest;
                    changed = true;
                }
            }
            if !changed {
                break;
            }

            let mut sums = Array2::<f64>::zeros(centroids.raw_dim());
            let mut counts = vec![0usize; self.k];
            for (point, &cluster) in data.outer_iter().zip(assignments.iter()) {
                let mut row = sums.row_mut(cluster);
                row += &point;
                counts[cluster] += 1;
            }
            for (cluster, count) in counts.iter().enumerate() {
                // Empty clusters keep their previous centroid.
                if *count > 0 {
                    let mean = &sums.row(cluster) / *count as f64;
                    centroids.row_mut(cluster).assign(&mean);
                }
            }
        }

        let (assignments, clusters) = compact(&assignments);
        log::debug!(
            "k-means k={} converged to {} clusters after {} iterations",
            self.k,
            clusters,
            iterations
        );
        Ok(Partition {
            assignments,
            clusters,
            iterations,
        })
    }

    fn seed_centroids(&self, data: ArrayView2<'_, f64>) -> Array2<f64> {
        let n = data.nrows();
        let mut state = self.seed ^ (n as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let mut chosen = Vec::with_capacity(self.k);
        chosen.push((splitmix64(&mut state) % n as u64) as usize);

        let mut min_dist: Vec<f64> = data
            .outer_iter()
            .map(|p| squared_euclidean(p, data.row(chosen[0])))
            .collect();

        while chosen.len() < self.k {
            let total: f64 = min_dist.iter().sum();
            let next = if total > 0.0 {
                let target = unit_f64(splitmix64(&mut state)) * total;
                let mut acc = 0.0;
                let mut pick = None;
                for (i, d) in min_dist.iter().enumerate() {
                    acc += d;
                    if *d > 0.0 && acc >= target {
                        pick = Some(i);
                        break;
                    }
                }
                pick.or_else(|| min_dist.iter().rposition(|d| *d > 0.0))
            } else {
                None
            };
            // All remaining points coincide with a centroid: take the first unused index.
            let next = next
                .or_else(|| (0..n).find(|i| !chosen.contains(i)))
                .unwrap_or(0);
            chosen.push(next);
            for (i, point) in data.outer_iter().enumerate() {
                let d = squared_euclidean(point, data.row(next));
                if d < min_dist[i] {
                    min_dist[i] = d;
                }
            }
        }

        data.select(Axis(0), &chosen)
    }
}

fn nearest_centroid(point: ArrayView1<'_, f64>, centroids: ArrayView2<'_, f64>) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (idx, centroid) in centroids.outer_iter().enumerate() {
        let d = squared_euclidean(point, centroid);
        if d < best_dist {
            best_dist = d;
            best = idx;
        }
    }
    best
}

/// Renumbers ids to `0..m` in order of first appearance.
fn compact(assignments: &[usize]) -> (Vec<usize>, usize) {
    let mut mapping: Vec<(usize, usize)> = Vec::new();
    let mut out = Vec::with_capacity(assignments.len());
    for &raw in assignments {
        let id = match mapping.iter().find(|(from, _)| *from == raw) {
            Some((_, to)) => *to,
            None => {
                let to = mapping.len();
                mapping.push((raw, to));
                to
            }
        };
        out.push(id);
    }
    (out, mapping.len())
}

const fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn unit_f64(bits: u64) -> f64 {
    (bits >> 11) as f64 / (1u64 << 53) as f64
}
