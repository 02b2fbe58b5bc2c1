//! Distance utilities between latent vectors and codebook entries.
//!
//! - [`squared_distances`]: `[N, D] x [K, D] -> [N, K]` squared Euclidean distances
//! - [`nearest_codes`]: arg-min over codebook entries
//!
//! Both are generic over the burn backend so they run unchanged inside the
//! autodiff graph during training and on the plain backend at inference.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

/// Compute squared Euclidean distances from every point to every centroid.
///
/// ```text
/// dist_sq[i,k] = ||x[i]||^2 + ||e[k]||^2 - 2 * dot(x[i], e[k])
/// ```
///
/// # Arguments
/// * `points` - Point matrix [N, D]
/// * `centroids` - Codebook matrix [K, D]
///
/// # Returns
/// Squared distance matrix [N, K]
pub fn squared_distances<B: Backend>(
    points: Tensor<B, 2>,
    centroids: Tensor<B, 2>,
) -> Tensor<B, 2> {
    // sum_dim(1) on [N, D] returns [N, 1] in Burn 0.19
    let point_norms = points.clone().powf_scalar(2.0).sum_dim(1); // [N, 1]
    let centroid_norms = centroids.clone().powf_scalar(2.0).sum_dim(1).transpose(); // [1, K]
    let dots = points.matmul(centroids.transpose()); // [N, K]

    // Clamp to avoid negative values from numerical error
    (point_norms + centroid_norms - dots.mul_scalar(2.0)).clamp_min(0.0)
}

/// Index of the nearest centroid for every row of a distance matrix.
///
/// # Arguments
/// * `distances` - Distance matrix [N, K]
///
/// # Returns
/// Code indices [N]
pub fn nearest_codes<B: Backend>(distances: Tensor<B, 2>) -> Tensor<B, 1, Int> {
    let [n, _] = distances.dims();
    distances.argmin(1).reshape([n])
}
