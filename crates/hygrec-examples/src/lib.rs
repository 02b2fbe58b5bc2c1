//! # hygrec-examples utilities
//!
//! Shared helpers for the HyGRec command-line examples: logger setup and a
//! synthetic clustered item catalog for trying the tokenizer without real
//! embeddings.

use hygrec_core::rng::RngKey;
use hygrec_rqvae::ItemCatalog;
use ndarray::Array2;
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Initialize `env_logger` at `info` unless `RUST_LOG` says otherwise.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

/// Generate a catalog of `n_items` feature vectors around `n_clusters` centers.
///
/// Centers are drawn from `N(0, 1)` per dimension and items add `N(0, spread)`
/// noise to a uniformly chosen center. Ids are `item_<row>`.
///
/// # Arguments
///
/// * `n_items` - Number of items
/// * `dim` - Feature dimension
/// * `n_clusters` - Number of cluster centers (at least 1)
/// * `spread` - Standard deviation of the per-item noise
/// * `key` - Seed for centers and noise
pub fn synthetic_catalog(
    n_items: usize,
    dim: usize,
    n_clusters: usize,
    spread: f32,
    key: RngKey,
) -> anyhow::Result<ItemCatalog> {
    anyhow::ensure!(n_clusters > 0, "need at least one cluster");
    anyhow::ensure!(spread >= 0.0, "spread must be non-negative, got {spread}");

    let (center_key, item_key) = key.split_two();
    let unit = Normal::new(0.0f32, 1.0)?;
    let noise = Normal::new(0.0f32, spread)?;

    let mut rng = center_key.rng();
    let centers = Array2::from_shape_fn((n_clusters, dim), |_| unit.sample(&mut rng));

    let mut rng = item_key.rng();
    let mut features = Array2::<f32>::zeros((n_items, dim));
    for mut row in features.outer_iter_mut() {
        let c = rng.gen_range(0..n_clusters);
        for (v, &center) in row.iter_mut().zip(centers.row(c).iter()) {
            *v = center + noise.sample(&mut rng);
        }
    }

    log::debug!(
        "Synthetic catalog: {} items, {} dims, {} clusters, spread {}",
        n_items,
        dim,
        n_clusters,
        spread
    );
    let ids = (0..n_items).map(|i| format!("item_{i}")).collect();
    ItemCatalog::new(features).with_ids(ids)
}
