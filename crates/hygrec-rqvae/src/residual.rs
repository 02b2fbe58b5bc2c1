//! Residual quantizer cascade.
//!
//! ```text
//! r_1 = z
//! for level l in 1..=L:
//!     q_l, c_l = quantize_l(r_l)
//!     r_{l+1} = r_l - q_l
//! z_q = q_1 + ... + q_L
//! ```
//!
//! Every level sees only what the previous levels failed to explain, so the
//! ordered codes `(c_1, ..., c_L)` form a coarse-to-fine semantic ID.

use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use hygrec_core::metrics::code_histogram;
use ndarray::Array2;

use crate::error::{Result, RqVaeError};
use crate::kmeans::{kmeans, KMeansConfig};
use crate::quantizer::{Assignment, QuantizerSettings, VectorQuantizer};
use crate::tensor_io::{code_rows, from_array2};

/// Ordered collection of quantization levels.
#[derive(Module, Debug)]
pub struct ResidualQuantizer<B: Backend> {
    levels: Vec<VectorQuantizer<B>>,
}

/// Output of [`ResidualQuantizer::forward`].
#[derive(Debug, Clone)]
pub struct CascadeOutput<B: Backend> {
    /// Sum of the straight-through quantized levels `[N, D]`
    pub quantized: Tensor<B, 2>,
    /// Mean of the per-level losses `[1]`
    pub loss: Tensor<B, 1>,
    /// Codes `[N, L]`
    pub indices: Tensor<B, 2, Int>,
}

impl<B: Backend> ResidualQuantizer<B> {
    pub fn new(levels: Vec<QuantizerSettings>, device: &B::Device) -> Self {
        Self {
            levels: levels
                .into_iter()
                .map(|settings| VectorQuantizer::new(settings, device))
                .collect(),
        }
    }

    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn codebook_sizes(&self) -> Vec<usize> {
        self.levels.iter().map(|l| l.codebook_size()).collect()
    }

    pub fn level(&self, index: usize) -> Option<&VectorQuantizer<B>> {
        self.levels.get(index)
    }

    /// Quantize `x` level by level.
    ///
    /// `plan[l]` chooses the assignment of level `l`; missing entries mean
    /// [`Assignment::Nearest`].
    pub fn forward(&self, x: Tensor<B, 2>, plan: &[Assignment]) -> CascadeOutput<B> {
        let [n, _] = x.dims();
        let mut residual = x.clone();
        let mut quantized = x.zeros_like();
        let mut losses = Vec::with_capacity(self.levels.len());
        let mut indices = Vec::with_capacity(self.levels.len());

        for (l, level) in self.levels.iter().enumerate() {
            let assignment = plan.get(l).copied().unwrap_or(Assignment::Nearest);
            let out = level.forward(residual.clone(), assignment);

            residual = residual - out.quantized.clone();
            quantized = quantized + out.quantized;
            losses.push(out.loss);
            indices.push(out.indices.reshape([n, 1]));
        }

        CascadeOutput {
            quantized,
            loss: Tensor::cat(losses, 0).mean(),
            indices: Tensor::cat(indices, 1),
        }
    }

    /// Sum of the codebook rows selected by `indices` (`[N, L]`).
    pub fn decode(&self, indices: Tensor<B, 2, Int>) -> Result<Tensor<B, 2>> {
        let [n, levels] = indices.dims();
        if levels != self.levels.len() {
            return Err(RqVaeError::DimensionMismatch {
                expected: self.levels.len(),
                got: levels,
            });
        }
        let sizes = self.codebook_sizes();
        for row in code_rows(indices.clone()) {
            for (level, (&code, &size)) in row.iter().zip(&sizes).enumerate() {
                if code >= size {
                    return Err(RqVaeError::CodeOutOfRange { level, code, size });
                }
            }
        }

        let mut sum: Option<Tensor<B, 2>> = None;
        for (l, level) in self.levels.iter().enumerate() {
            let codes = indices.clone().slice([0..n, l..l + 1]).reshape([n]);
            let rows = level.lookup(codes);
            sum = Some(match sum {
                Some(acc) => acc + rows,
                None => rows,
            });
        }
        sum.ok_or_else(|| RqVaeError::InvalidConfig("cascade has no levels".to_string()))
    }

    /// Seed every codebook by k-means over the residuals of `latents`.
    ///
    /// Level `l` clusters what levels `1..l` leave behind, using the k-means
    /// assignment itself to form the next residual.
    pub fn init_codebooks(self, latents: Array2<f32>, config: &KMeansConfig) -> Result<Self> {
        let mut residual = latents;
        let mut levels = Vec::with_capacity(self.levels.len());

        for (l, level) in self.levels.into_iter().enumerate() {
            let k = level.codebook_size();
            let level_config = config.with_seed(config.seed.wrapping_add(l as u64));
            let result = kmeans(residual.view(), k, &level_config)?;

            let used = code_histogram(&result.assignments, k)
                .iter()
                .filter(|&&c| c > 0)
                .count();
            log::info!(
                "k-means seeded level {}: {}/{} codes used, inertia {:.6}",
                l,
                used,
                k,
                result.inertia
            );

            for (mut row, &a) in residual.outer_iter_mut().zip(result.assignments.iter()) {
                row -= &result.centroids.row(a);
            }

            let device = level.codebook().device();
            let centroids = from_array2::<B>(result.centroids.view(), &device);
            levels.push(level.with_codebook(centroids)?);
        }

        Ok(Self { levels })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor_io::{rows_to_code_tensor, to_array2_f32};
    use burn::tensor::Distribution;
    use hygrec_core::backend::{init_cpu_device, CpuBackend};

    fn cascade(levels: usize, k: usize, d: usize) -> ResidualQuantizer<CpuBackend> {
        let settings = (0..levels)
            .map(|_| QuantizerSettings {
                codebook_size: k,
                e_dim: d,
                beta: 0.25,
                sk_iters: 30,
            })
            .collect();
        ResidualQuantizer::new(settings, &init_cpu_device())
    }

    #[test]
    fn test_quantized_is_sum_of_selected_entries() {
        let device = init_cpu_device();
        let rq = cascade(3, 8, 4);
        let x: Tensor<CpuBackend, 2> =
            Tensor::random([10, 4], Distribution::Normal(0.0, 0.2), &device);

        let out = rq.forward(x, &[]);
        assert_eq!(out.indices.dims(), [10, 3]);

        let codes = code_rows(out.indices.clone());
        let quantized = to_array2_f32(out.quantized);
        for (i, row_codes) in codes.iter().enumerate() {
            let mut expected = vec![0.0f32; 4];
            for (l, &c) in row_codes.iter().enumerate() {
                let entry = to_array2_f32(rq.level(l).expect("level").codebook());
                for (e, v) in expected.iter_mut().zip(entry.row(c).iter()) {
                    *e += v;
                }
            }
            for (a, b) in quantized.row(i).iter().zip(expected.iter()) {
                assert!((a - b).abs() < 1e-5, "{a} vs {b}");
            }
        }

        let decoded = to_array2_f32(rq.decode(out.indices).expect("decode"));
        let diff = (&decoded - &quantized).mapv(f32::abs).sum();
        assert!(diff < 1e-4);
    }

    #[test]
    fn test_decode_rejects_wrong_level_count() {
        let device = init_cpu_device();
        let rq = cascade(3, 4, 2);
        let codes = rows_to_code_tensor::<CpuBackend>(&[vec![0, 1]], 2, &device);
        assert!(matches!(
            rq.decode(codes),
            Err(RqVaeError::DimensionMismatch {
                expected: 3,
                got: 2
            })
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_code() {
        let device = init_cpu_device();
        let rq = cascade(2, 4, 2);
        let codes = rows_to_code_tensor::<CpuBackend>(&[vec![1, 4]], 2, &device);
        assert!(matches!(
            rq.decode(codes),
            Err(RqVaeError::CodeOutOfRange {
                level: 1,
                code: 4,
                size: 4
            })
        ));
    }

    #[test]
    fn test_kmeans_init_shrinks_residual() {
        let device = init_cpu_device();
        let rq = cascade(2, 4, 2);
        let x: Tensor<CpuBackend, 2> =
            Tensor::random([64, 2], Distribution::Normal(0.0, 1.0), &device);

        let before = rq.forward(x.clone(), &[]);
        let before_err = (before.quantized - x.clone()).powf_scalar(2.0).mean();

        let seeded = rq
            .init_codebooks(to_array2_f32(x.clone()), &KMeansConfig::default())
            .expect("init");
        let after = seeded.forward(x.clone(), &[]);
        let after_err = (after.quantized - x).powf_scalar(2.0).mean();

        let before_err: f32 = before_err.into_scalar();
        let after_err: f32 = after_err.into_scalar();
        assert!(after_err < 0.5 * before_err, "{after_err} vs {before_err}");
    }

    #[test]
    fn test_kmeans_init_needs_enough_samples() {
        let rq = cascade(2, 16, 3);
        let latents = Array2::<f32>::zeros((8, 3));
        assert!(matches!(
            rq.init_codebooks(latents, &KMeansConfig::default()),
            Err(RqVaeError::InsufficientSamples { need: 16, got: 8 })
        ));
    }
}
