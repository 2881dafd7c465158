use crate::kmeans::euclidean;
use ndarray::ArrayView2;

/// Point counts up to which pairwise distances are memoized for a scoring pass.
pub const MEMO_LIMIT: usize = 2048;

struct Distances<'a> {
    data: ArrayView2<'a, f64>,
    condensed: Option<Vec<f64>>,
}

impl<'a> Distances<'a> {
    fn new(data: ArrayView2<'a, f64>) -> Self {
        let n = data.nrows();
        let condensed = (n <= MEMO_LIMIT).then(|| {
            let mut values = Vec::with_capacity(n * n.saturating_sub(1) / 2);
            for i in 0..n {
                for j in (i + 1)..n {
                    values.push(euclidean(data.row(i), data.row(j)));
                }
            }
            values
        });
        Self { data, condensed }
    }

    fn get(&self, i: usize, j: usize) -> f64 {
        if i == j {
            return 0.0;
        }
        let (lo, hi) = if i < j { (i, j) } else { (j, i) };
        match &self.condensed {
            Some(values) => {
                let n = self.data.nrows();
                values[lo * (2 * n - lo - 1) / 2 + (hi - lo - 1)]
            }
            None => euclidean(self.data.row(lo), self.data.row(hi)),
        }
    }
}

/// Mean silhouette coefficient of `labels` over `data`.
///
/// Per point `s = (b - a) / max(a, b)` with `a` the mean distance to the rest
/// of its own cluster (0 when alone) and `b` the smallest mean distance to any
/// other non-empty cluster. `s` is 0 when `max(a, b)` is 0 or there is no other
/// cluster, so a single-cluster labelling scores 0.
pub fn silhouette_score(data: ArrayView2<'_, f64>, labels: &[usize]) -> f64 {
    let n = data.nrows().min(labels.len());
    if n == 0 {
        return 0.0;
    }
    let clusters = labels.iter().take(n).max().map_or(0, |m| m + 1);
    let mut sizes = vec![0usize; clusters];
    for &label in labels.iter().take(n) {
        sizes[label] += 1;
    }

    let distances = Distances::new(data);
    let mut total = 0.0;
    let mut sums = vec![0.0f64; clusters];
    for i in 0..n {
        sums.iter_mut().for_each(|s| *s = 0.0);
        for j in 0..n {
            if i != j {
                sums[labels[j]] += distances.get(i, j);
            }
        }

        let own = labels[i];
        let a = if sizes[own] > 1 {
            sums[own] / (sizes[own] - 1) as f64
        } else {
            0.0
        };
        let b = (0..clusters)
            .filter(|&c| c != own && sizes[c] > 0)
            .map(|c| sums[c] / sizes[c] as f64)
            .fold(None, |best: Option<f64>, mean| {
                Some(best.map_or(mean, |b| b.min(mean)))
            });

        let s = match b {
            Some(b) if a.max(b) > 0.0 => (b - a) / a.max(b),
            _ => 0.0,
        };
        total += s;
    }
    total / n as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    #[test]
    fn well_separated_clusters_score_near_one() {
        let data = array![[0.0, 0.0], [0.0, 1.0], [100.0, 0.0], [100.0, 1.0]];
        let score = silhouette_score(data.view(), &[0, 0, 1, 1]);
        assert!(score > 0.95, "score {score}");
    }

    #[test]
    fn bad_labelling_scores_negative() {
        let data = array![[0.0, 0.0], [0.0, 1.0], [100.0, 0.0], [100.0, 1.0]];
        let score = silhouette_score(data.view(), &[0, 1, 0, 1]);
        assert!(score < 0.0, "score {score}");
    }

    #[test]
    fn identical_points_score_zero() {
        let data = Array2::<f64>::from_elem((5, 3), 0.5);
        assert_eq!(silhouette_score(data.view(), &[0, 0, 1, 1, 1]), 0.0);
        assert_eq!(silhouette_score(data.view(), &[0, 0, 0, 0, 0]), 0.0);
    }

    #[test]
    fn singleton_uses_zero_intra_distance() {
        // Point 2 is alone: a = 0, b > 0, so it contributes 1.
        let data = array![[0.0], [1.0], [10.0]];
        let score = silhouette_score(data.view(), &[0, 0, 1]);
        let s0 = (10.0 - 1.0) / 10.0;
        let s1 = (9.0 - 1.0) / 9.0;
        let expected = (s0 + s1 + 1.0) / 3.0;
        assert!((score - expected).abs() < 1e-12, "score {score}");
    }

    #[test]
    fn memoized_and_direct_distances_agree() {
        let data = array![[0.0, 3.0], [4.0, 0.0], [1.0, 1.0], [2.0, 5.0]];
        let memo = Distances::new(data.view());
        let direct = Distances {
            data: data.view(),
            condensed: None,
        };
        for i in 0..4 {
            for j in 0..4 {
                assert!((memo.get(i, j) - direct.get(i, j)).abs() < 1e-12);
            }
        }
    }
}
