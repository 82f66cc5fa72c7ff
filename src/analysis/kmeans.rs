//! Deterministic k-means for grouping projects by performance.
//!
//! Features are z-scored (population std, as a standard scaler does), then
//! Lloyd's algorithm runs from k-means++ seeds. Several restarts share one
//! seeded ChaCha8 stream; the restart with the lowest inertia wins, so the
//! same input always yields the same labels.

use crate::analysis::stats::{mean, population_std};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy)]
pub struct KMeans {
    pub k: usize,
    pub max_iter: usize,
    pub n_init: usize,
    pub seed: u64,
}

impl Default for KMeans {
    fn default() -> Self {
        Self { k: 3, max_iter: 300, n_init: 10, seed: 42 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clustering {
    /// Cluster index per input point
    pub labels: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    pub inertia: f64,
}

/// Z-score every column. Constant columns become 0.
pub fn standardize(points: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let Some(dims) = points.first().map(Vec::len) else {
        return Vec::new();
    };
    let mut out = points.to_vec();
    for d in 0..dims {
        let column: Vec<f64> = points.iter().map(|p| p[d]).collect();
        let mu = mean(&column);
        let sigma = population_std(&column);
        for row in out.iter_mut() {
            row[d] = if sigma > 0.0 { (row[d] - mu) / sigma } else { 0.0 };
        }
    }
    out
}

fn sq_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest(point: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, c) in centroids.iter().enumerate() {
        let d = sq_dist(point, c);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

impl KMeans {
    fn seed_centroids(&self, points: &[Vec<f64>], rng: &mut ChaCha8Rng) -> Vec<Vec<f64>> {
        let mut centroids = vec![points[rng.gen_range(0..points.len())].clone()];
        while centroids.len() < self.k {
            let weights: Vec<f64> = points.iter().map(|p| nearest(p, &centroids).1).collect();
            let total: f64 = weights.iter().sum();
            let pick = if total > 0.0 {
                let mut target = rng.gen::<f64>() * total;
                let mut chosen = points.len() - 1;
                for (i, w) in weights.iter().enumerate() {
                    if target < *w {
                        chosen = i;
                        break;
                    }
                    target -= w;
                }
                chosen
            } else {
                rng.gen_range(0..points.len())
            };
            centroids.push(points[pick].clone());
        }
        centroids
    }

    fn lloyd(&self, points: &[Vec<f64>], mut centroids: Vec<Vec<f64>>) -> Clustering {
        let dims = points[0].len();
        let mut labels = vec![0usize; points.len()];

        for iteration in 0..self.max_iter {
            let mut changed = false;
            for (i, p) in points.iter().enumerate() {
                let (c, _) = nearest(p, &centroids);
                if c != labels[i] || iteration == 0 {
                    changed |= c != labels[i];
                    labels[i] = c;
                }
            }

            let mut sums = vec![vec![0.0; dims]; self.k];
            let mut counts = vec![0usize; self.k];
            for (p, &l) in points.iter().zip(&labels) {
                counts[l] += 1;
                for (s, v) in sums[l].iter_mut().zip(p) {
                    *s += v;
                }
            }
            for (c, (sum, n)) in centroids.iter_mut().zip(sums.into_iter().zip(counts)) {
                // Empty clusters keep their previous centroid.
                if n > 0 {
                    *c = sum.into_iter().map(|s| s / n as f64).collect();
                }
            }

            if iteration > 0 && !changed {
                break;
            }
        }

        let inertia = points
            .iter()
            .zip(&labels)
            .map(|(p, &l)| sq_dist(p, &centroids[l]))
            .sum();
        Clustering { labels, centroids, inertia }
    }

    /// Cluster `points`. `None` when there are fewer points than clusters.
    pub fn fit(&self, points: &[Vec<f64>]) -> Option<Clustering> {
        if self.k == 0 || points.len() < self.k {
            return None;
        }
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut best: Option<Clustering> = None;
        for _ in 0..self.n_init.max(1) {
            let seeds = self.seed_centroids(points, &mut rng);
            let run = self.lloyd(points, seeds);
            if best.as_ref().map_or(true, |b| run.inertia < b.inertia) {
                best = Some(run);
            }
        }
        best
    }
}
