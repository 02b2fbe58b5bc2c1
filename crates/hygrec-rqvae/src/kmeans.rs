//! k-means codebook seeding.
//!
//! Lloyd's algorithm on plain `ndarray` arrays, outside the autodiff graph.
//! Seeding is k-means++ from an [`RngKey`]; `n_init` restarts run from split
//! keys and the lowest-inertia run wins. Clusters that lose all their points
//! are re-seeded with the point farthest from its current centroid.

use hygrec_core::rng::RngKey;
use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::Rng;

use crate::error::{Result, RqVaeError};

/// k-means settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KMeansConfig {
    /// Maximum Lloyd iterations per restart
    pub max_iters: usize,
    /// Stop when the largest squared centroid shift falls below this
    pub tolerance: f64,
    /// Number of k-means++ restarts
    pub n_init: usize,
    pub seed: u64,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            max_iters: 100,
            tolerance: 1e-6,
            n_init: 3,
            seed: 0,
        }
    }
}

impl KMeansConfig {
    pub const fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }

    pub const fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init;
        self
    }

    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub const fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }
}

/// Result of a k-means run.
#[derive(Clone, Debug)]
pub struct KMeansResult {
    /// `[K, D]`
    pub centroids: Array2<f32>,
    /// Cluster of every sample
    pub assignments: Vec<usize>,
    /// Sum of squared distances to the assigned centroids
    pub inertia: f64,
    /// Lloyd iterations of the winning restart
    pub iterations: usize,
}

/// Cluster `samples` (`[B, D]`) into `k` groups.
///
/// # Errors
///
/// `InsufficientSamples` when `B < k` (or `k == 0`).
pub fn kmeans(samples: ArrayView2<f32>, k: usize, config: &KMeansConfig) -> Result<KMeansResult> {
    let n = samples.nrows();
    if k == 0 || n < k {
        return Err(RqVaeError::InsufficientSamples {
            need: k.max(1),
            got: n,
        });
    }

    let data = samples.mapv(f64::from);
    let restarts = config.n_init.max(1);
    let keys = RngKey::new(config.seed).split(restarts);

    let mut best: Option<KMeansResult> = None;
    for (restart, key) in keys.into_iter().enumerate() {
        let run = lloyd(&data, k, config, key);
        log::debug!(
            "k-means restart {}: inertia {:.6} after {} iterations",
            restart,
            run.inertia,
            run.iterations
        );
        if best.as_ref().is_none_or(|b| run.inertia < b.inertia) {
            best = Some(run);
        }
    }

    best.ok_or(RqVaeError::InsufficientSamples { need: k, got: n })
}

fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Index and squared distance of the nearest centroid.
fn nearest(point: ArrayView1<f64>, centroids: &Array2<f64>) -> (usize, f64) {
    centroids
        .outer_iter()
        .enumerate()
        .map(|(j, c)| (j, squared_distance(point, c)))
        .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best })
}

/// k-means++ seeding: first centroid uniform, the rest proportional to D².
fn seed_plus_plus(data: &Array2<f64>, k: usize, key: RngKey) -> Array2<f64> {
    let (n, dim) = data.dim();
    let mut rng = key.rng();
    let mut centroids = Array2::<f64>::zeros((k, dim));

    let first = rng.gen_range(0..n);
    centroids.row_mut(0).assign(&data.row(first));

    let mut closest: Vec<f64> = data
        .outer_iter()
        .map(|p| squared_distance(p, centroids.row(0)))
        .collect();

    for c in 1..k {
        let total: f64 = closest.iter().sum();
        let chosen = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            let mut pick = n - 1;
            for (i, &d) in closest.iter().enumerate() {
                if target < d {
                    pick = i;
                    break;
                }
                target -= d;
            }
            pick
        } else {
            // All remaining points coincide with a centroid
            rng.gen_range(0..n)
        };

        centroids.row_mut(c).assign(&data.row(chosen));
        for (i, p) in data.outer_iter().enumerate() {
            closest[i] = closest[i].min(squared_distance(p, centroids.row(c)));
        }
    }

    centroids
}

fn lloyd(data: &Array2<f64>, k: usize, config: &KMeansConfig, key: RngKey) -> KMeansResult {
    let (n, dim) = data.dim();
    let mut centroids = seed_plus_plus(data, k, key);
    let mut assignments = vec![0usize; n];
    let mut iterations = 0;

    for _ in 0..config.max_iters {
        iterations += 1;

        let mut point_dist = vec![0.0f64; n];
        for (i, p) in data.outer_iter().enumerate() {
            let (j, d) = nearest(p, &centroids);
            assignments[i] = j;
            point_dist[i] = d;
        }

        let mut sums = Array2::<f64>::zeros((k, dim));
        let mut counts = vec![0usize; k];
        for (i, p) in data.outer_iter().enumerate() {
            let mut row = sums.row_mut(assignments[i]);
            row += &p;
            counts[assignments[i]] += 1;
        }

        // Empty clusters take the currently worst-served points
        for j in 0..k {
            if counts[j] > 0 {
                continue;
            }
            let far = point_dist
                .iter()
                .enumerate()
                .filter(|(i, _)| counts[assignments[*i]] > 1)
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i);
            if let Some(i) = far {
                counts[assignments[i]] -= 1;
                let mut old = sums.row_mut(assignments[i]);
                old -= &data.row(i);
                assignments[i] = j;
                point_dist[i] = 0.0;
                sums.row_mut(j).assign(&data.row(i));
                counts[j] = 1;
            }
        }

        let mut max_shift = 0.0f64;
        for j in 0..k {
            if counts[j] == 0 {
                continue;
            }
            let updated = sums.row(j).mapv(|s| s / counts[j] as f64);
            max_shift = max_shift.max(squared_distance(centroids.row(j), updated.view()));
            centroids.row_mut(j).assign(&updated);
        }

        if max_shift < config.tolerance {
            break;
        }
    }

    // Final assignment against the converged centroids
    let mut inertia = 0.0;
    for (i, p) in data.outer_iter().enumerate() {
        let (j, d) = nearest(p, &centroids);
        assignments[i] = j;
        inertia += d;
    }

    KMeansResult {
        centroids: centroids.mapv(|v| v as f32),
        assignments,
        inertia,
        iterations,
    }
}

/// Per-cluster sample counts of an assignment.
pub fn cluster_sizes(assignments: &[usize], k: usize) -> Vec<usize> {
    let mut sizes = vec![0usize; k];
    for &a in assignments {
        if a < k {
            sizes[a] += 1;
        }
    }
    sizes
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand_distr::{Distribution, Normal};

    fn gaussian_blobs(means: &[[f32; 2]], per_blob: usize, std: f32, seed: u64) -> Array2<f32> {
        let mut rng = RngKey::new(seed).rng();
        let noise = Normal::new(0.0f32, std).unwrap();
        let mut data = Array2::<f32>::zeros((means.len() * per_blob, 2));
        for (b, mean) in means.iter().enumerate() {
            for i in 0..per_blob {
                let row = b * per_blob + i;
                data[[row, 0]] = mean[0] + noise.sample(&mut rng);
                data[[row, 1]] = mean[1] + noise.sample(&mut rng);
            }
        }
        data
    }

    #[test]
    fn test_recovers_separated_gaussians() {
        let means: Vec<[f32; 2]> = (0..10)
            .map(|i| {
                let angle = i as f32 * std::f32::consts::TAU / 10.0;
                [20.0 * angle.cos(), 20.0 * angle.sin()]
            })
            .collect();
        let data = gaussian_blobs(&means, 100, 0.5, 11);
        assert_eq!(data.nrows(), 1000);

        let config = KMeansConfig::default().with_n_init(5).with_seed(3);
        let result = kmeans(data.view(), 10, &config).expect("kmeans");

        for mean in &means {
            let best = result
                .centroids
                .outer_iter()
                .map(|c| ((c[0] - mean[0]).powi(2) + (c[1] - mean[1]).powi(2)).sqrt())
                .fold(f32::INFINITY, f32::min);
            assert!(best < 0.3, "mean {:?} missed by {}", mean, best);
        }
        assert_eq!(cluster_sizes(&result.assignments, 10), vec![100; 10]);
    }

    #[test]
    fn test_insufficient_samples() {
        let data = Array2::<f32>::zeros((3, 2));
        let err = kmeans(data.view(), 5, &KMeansConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            RqVaeError::InsufficientSamples { need: 5, got: 3 }
        ));
    }

    #[test]
    fn test_deterministic_for_seed() {
        let data = gaussian_blobs(&[[0.0, 0.0], [5.0, 5.0], [-5.0, 5.0]], 20, 1.0, 2);
        let config = KMeansConfig::default().with_seed(9);
        let a = kmeans(data.view(), 3, &config).expect("a");
        let b = kmeans(data.view(), 3, &config).expect("b");
        assert_eq!(a.centroids, b.centroids);
        assert_eq!(a.assignments, b.assignments);
    }

    #[test]
    fn test_k_equals_n_is_exact() {
        let data = array![[0.0f32, 0.0], [1.0, 0.0], [0.0, 1.0], [3.0, 3.0]];
        let result = kmeans(data.view(), 4, &KMeansConfig::default()).expect("kmeans");
        assert!(result.inertia < 1e-12);
        let mut sizes = cluster_sizes(&result.assignments, 4);
        sizes.sort_unstable();
        assert_eq!(sizes, vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_duplicate_points_keep_every_cluster() {
        // 6 copies of one point and 2 of another, 3 clusters
        let mut data = Array2::<f32>::zeros((8, 2));
        for i in 6..8 {
            data[[i, 0]] = 4.0;
        }
        let result = kmeans(data.view(), 3, &KMeansConfig::default()).expect("kmeans");
        assert_eq!(result.centroids.nrows(), 3);
        assert!(result.centroids.iter().all(|v| v.is_finite()));
    }
}
