//! Single-level vector quantizer.
//!
//! Maps every latent row to one entry of a learnable `[K, D]` codebook:
//!
//! ```text
//! d      = ||x - e_k||^2                        [N, K]
//! index  = argmin_k d            (Nearest)
//!        = argmax_k Sinkhorn(d)  (Balanced)
//! q      = e_index
//! loss   = mse(q, sg(x)) + beta * mse(sg(q), x)
//! output = x + sg(q - x)                        (straight-through)
//! ```

use burn::module::{Ignored, Module, Param};
use burn::tensor::activation::log_softmax;
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Int, Tensor, TensorData};
use hygrec_core::distance::{nearest_codes, squared_distances};
use ndarray::Array2;

use crate::error::{Result, RqVaeError};
use crate::sinkhorn::balanced_assignment;
use crate::tensor_io::{codes_to_tensor, to_array2};

/// How a level turns distances into codes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Assignment {
    /// Plain nearest-centroid lookup.
    Nearest,
    /// Arg-max of the Sinkhorn plan over centered distances.
    Balanced { epsilon: f64 },
    /// Nearest-centroid codes plus `weight * CE(Q, softmax(-d))`.
    BalanceLoss { epsilon: f64, weight: f64 },
}

/// Non-learned settings of one level.
#[derive(Clone, Debug, PartialEq)]
pub struct QuantizerSettings {
    pub codebook_size: usize,
    pub e_dim: usize,
    /// Commitment weight
    pub beta: f64,
    pub sk_iters: usize,
}

/// One quantization level.
#[derive(Module, Debug)]
pub struct VectorQuantizer<B: Backend> {
    codebook: Param<Tensor<B, 2>>,
    settings: Ignored<QuantizerSettings>,
}

/// Output of [`VectorQuantizer::forward`].
#[derive(Debug, Clone)]
pub struct QuantizerOutput<B: Backend> {
    /// Straight-through quantized latents `[N, D]`
    pub quantized: Tensor<B, 2>,
    /// Codebook + commitment (+ balance) loss `[1]`
    pub loss: Tensor<B, 1>,
    /// Selected codes `[N]`
    pub indices: Tensor<B, 1, Int>,
}

pub(crate) fn mse<B: Backend>(a: Tensor<B, 2>, b: Tensor<B, 2>) -> Tensor<B, 1> {
    (a - b).powf_scalar(2.0).mean()
}

impl<B: Backend> VectorQuantizer<B> {
    /// New level with entries drawn from `U(-1/K, 1/K)`.
    pub fn new(settings: QuantizerSettings, device: &B::Device) -> Self {
        let bound = 1.0 / settings.codebook_size.max(1) as f64;
        let codebook = Tensor::random(
            [settings.codebook_size, settings.e_dim],
            Distribution::Uniform(-bound, bound),
            device,
        );
        Self {
            codebook: Param::from_tensor(codebook),
            settings: Ignored(settings),
        }
    }

    pub fn codebook(&self) -> Tensor<B, 2> {
        self.codebook.val()
    }

    pub fn codebook_size(&self) -> usize {
        self.settings.codebook_size
    }

    pub fn settings(&self) -> &QuantizerSettings {
        &self.settings
    }

    /// Replace the codebook, e.g. with k-means centroids.
    pub fn with_codebook(mut self, entries: Tensor<B, 2>) -> Result<Self> {
        let [k, d] = entries.dims();
        if k != self.settings.codebook_size {
            return Err(RqVaeError::DimensionMismatch {
                expected: self.settings.codebook_size,
                got: k,
            });
        }
        if d != self.settings.e_dim {
            return Err(RqVaeError::DimensionMismatch {
                expected: self.settings.e_dim,
                got: d,
            });
        }
        self.codebook = Param::from_tensor(entries);
        Ok(self)
    }

    /// Squared distances `[N, K]` from `x` to every entry.
    pub fn distances(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        squared_distances(x, self.codebook.val())
    }

    /// Codebook rows for `indices`.
    pub fn lookup(&self, indices: Tensor<B, 1, Int>) -> Tensor<B, 2> {
        self.codebook.val().select(0, indices)
    }

    /// Pick codes from detached distances.
    ///
    /// Returns the codes and, when a Sinkhorn plan was computed, the plan.
    /// A plan that cannot be computed (diverged latents) falls back to
    /// nearest-centroid codes.
    fn select(
        &self,
        distances: Tensor<B, 2>,
        assignment: Assignment,
    ) -> (Tensor<B, 1, Int>, Option<Array2<f64>>) {
        let epsilon = match assignment {
            Assignment::Nearest => return (nearest_codes(distances), None),
            Assignment::Balanced { epsilon } | Assignment::BalanceLoss { epsilon, .. } => epsilon,
        };

        let device = distances.device();
        let host = to_array2(distances.clone());
        match balanced_assignment(host.view(), epsilon, self.settings.sk_iters) {
            Ok((codes, plan)) => {
                let indices = match assignment {
                    Assignment::Balanced { .. } => codes_to_tensor(&codes, &device),
                    _ => nearest_codes(distances),
                };
                (indices, Some(plan))
            }
            Err(err) => {
                log::warn!("sinkhorn skipped, using nearest codes: {err}");
                (nearest_codes(distances), None)
            }
        }
    }

    pub fn forward(&self, x: Tensor<B, 2>, assignment: Assignment) -> QuantizerOutput<B> {
        let distances = self.distances(x.clone());
        let (indices, plan) = self.select(distances.clone().detach(), assignment);

        let q = self.lookup(indices.clone());
        let codebook_loss = mse(q.clone(), x.clone().detach());
        let commitment_loss = mse(q.clone().detach(), x.clone());
        let mut loss = codebook_loss + commitment_loss.mul_scalar(self.settings.beta);

        if let (Assignment::BalanceLoss { weight, .. }, Some(plan)) = (assignment, plan) {
            loss = loss + self.balance_loss(distances, &plan).mul_scalar(weight);
        }

        let quantized = x.clone() + (q - x).detach();

        QuantizerOutput {
            quantized,
            loss,
            indices,
        }
    }

    /// Cross-entropy between the Sinkhorn plan and `softmax(-d)`.
    fn balance_loss(&self, distances: Tensor<B, 2>, plan: &Array2<f64>) -> Tensor<B, 1> {
        let (n, k) = plan.dim();
        let mut target = Vec::with_capacity(n * k);
        for row in plan.outer_iter() {
            let total: f64 = row.sum();
            let scale = if total > 0.0 { 1.0 / total } else { 0.0 };
            target.extend(row.iter().map(|&v| (v * scale) as f32));
        }
        let target: Tensor<B, 2> =
            Tensor::from_data(TensorData::new(target, [n, k]), &distances.device());

        let log_probs = log_softmax(distances.neg(), 1);
        (target * log_probs).sum_dim(1).mean().neg()
    }
}
