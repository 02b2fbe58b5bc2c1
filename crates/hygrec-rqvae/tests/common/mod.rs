//! Synthetic catalogs shared by the integration tests.

#![allow(dead_code)]

use hygrec_core::rng::RngKey;
use hygrec_rqvae::ItemCatalog;
use ndarray::Array2;
use rand_distr::{Distribution, Normal};

/// `n_clusters` standard-normal centers in `dim` dimensions, `per_cluster`
/// items around each with noise `spread`.
pub fn clustered_catalog(
    n_clusters: usize,
    per_cluster: usize,
    dim: usize,
    spread: f32,
    seed: u64,
) -> ItemCatalog {
    let mut rng = RngKey::new(seed).rng();
    let unit = Normal::new(0.0f32, 1.0).unwrap();
    let noise = Normal::new(0.0f32, spread).unwrap();

    let centers = Array2::from_shape_fn((n_clusters, dim), |_| unit.sample(&mut rng));
    let features = Array2::from_shape_fn((n_clusters * per_cluster, dim), |(i, j)| {
        centers[[i / per_cluster, j]] + noise.sample(&mut rng)
    });
    ItemCatalog::new(features)
}

/// `n` items scattered around a single center.
pub fn near_duplicates(n: usize, dim: usize, spread: f32, seed: u64) -> ItemCatalog {
    clustered_catalog(1, n, dim, spread, seed)
}
