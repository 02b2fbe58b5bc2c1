//! Sinkhorn balanced assignment.
//!
//! Given an `[N, K]` distance matrix, computes the entropic transport plan
//! between `N` items with uniform mass and `K` codes with uniform capacity:
//!
//! ```text
//! Q0 = exp(-D / eps) / sum(exp(-D / eps))
//! repeat: rows    <- rows    scaled to 1/N
//!         columns <- columns scaled to 1/K
//! Q  = N * Q
//! ```
//!
//! so every row of the result sums to (approximately) one and every code
//! receives `N/K` items worth of mass. Evaluation happens in the log domain
//! in `f64`, which keeps tiny epsilons from underflowing to zero. None of this
//! takes part in autodiff; callers feed detached distances and get plain
//! arrays back.

use ndarray::{Array2, ArrayView2, Axis};

use crate::error::{Result, RqVaeError};

/// Added to the amplitude of centered distances.
const CENTERING_EPS: f64 = 1e-5;

/// Rescale distances into roughly `[-1, 1]` around their midrange.
///
/// Makes a single epsilon meaningful regardless of the latent scale.
pub fn center_distances(distances: &mut Array2<f64>) {
    if distances.is_empty() {
        return;
    }
    let max = distances.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
    let min = distances.fold(f64::INFINITY, |acc, &v| acc.min(v));
    let middle = (max + min) / 2.0;
    let amplitude = max - middle + CENTERING_EPS;
    distances.mapv_inplace(|d| (d - middle) / amplitude);
}

fn log_sum_exp<'a>(values: impl Iterator<Item = &'a f64> + Clone) -> f64 {
    let max = values.clone().fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
    if !max.is_finite() {
        return max;
    }
    max + values.map(|&v| (v - max).exp()).sum::<f64>().ln()
}

/// Run `iterations` Sinkhorn-Knopp sweeps over `distances`.
///
/// Returns `Q` with the shape of `distances`, non-negative, rows summing to
/// about one.
///
/// # Errors
///
/// - `InvalidEpsilon` when `epsilon` is not a positive finite number
/// - `NonFiniteDistances` when any distance is NaN or infinite
pub fn sinkhorn(distances: ArrayView2<f64>, epsilon: f64, iterations: usize) -> Result<Array2<f64>> {
    if !(epsilon.is_finite() && epsilon > 0.0) {
        return Err(RqVaeError::InvalidEpsilon(epsilon));
    }
    if distances.iter().any(|d| !d.is_finite()) {
        return Err(RqVaeError::NonFiniteDistances);
    }

    let (n, k) = distances.dim();
    if n == 0 || k == 0 {
        return Ok(Array2::zeros((n, k)));
    }

    let log_n = (n as f64).ln();
    let log_k = (k as f64).ln();

    let mut log_q = distances.mapv(|d| -d / epsilon);
    let total = log_sum_exp(log_q.iter());
    log_q.mapv_inplace(|v| v - total);

    for _ in 0..iterations {
        for mut row in log_q.axis_iter_mut(Axis(0)) {
            let shift = log_sum_exp(row.iter()) + log_n;
            row.mapv_inplace(|v| v - shift);
        }
        for mut col in log_q.axis_iter_mut(Axis(1)) {
            let shift = log_sum_exp(col.iter()) + log_k;
            col.mapv_inplace(|v| v - shift);
        }
    }

    Ok(log_q.mapv(|v| (v + log_n).exp()))
}

/// Center `distances`, run Sinkhorn and pick the arg-max code of every row.
///
/// Returns the codes together with the transport plan.
pub fn balanced_assignment(
    distances: ArrayView2<f64>,
    epsilon: f64,
    iterations: usize,
) -> Result<(Vec<usize>, Array2<f64>)> {
    let mut centered = distances.to_owned();
    center_distances(&mut centered);
    let q = sinkhorn(centered.view(), epsilon, iterations)?;
    Ok((argmax_rows(q.view()), q))
}

/// Column index of the largest entry of every row.
pub fn argmax_rows(q: ArrayView2<f64>) -> Vec<usize> {
    q.outer_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (j, &v)| {
                    if v > best.1 {
                        (j, v)
                    } else {
                        best
                    }
                })
                .0
        })
        .collect()
}

/// L1 deviation of the row sums of `q` from one.
pub fn row_marginal_error(q: ArrayView2<f64>) -> f64 {
    q.sum_axis(Axis(1)).iter().map(|s| (s - 1.0).abs()).sum()
}

/// L1 deviation of the column sums of `q` from `N/K`.
pub fn column_marginal_error(q: ArrayView2<f64>) -> f64 {
    let (n, k) = q.dim();
    if k == 0 {
        return 0.0;
    }
    let target = n as f64 / k as f64;
    q.sum_axis(Axis(0)).iter().map(|s| (s - target).abs()).sum()
}
