//! The RQ-VAE autoencoder.
//!
//! ```text
//! features ──► encoder ──► z ──► cascade ──► z_q ──► decoder ──► reconstruction
//!                                   │
//!                                   └──► codes [N, L]
//! ```
//!
//! `loss = recon(reconstruction, features) + quant_loss_weight * cascade_loss`
//!
//! Checkpoints are a burn named-msgpack record (`<name>.mpk`) plus the
//! `config.json` the model is rebuilt from before the record is loaded.

use burn::module::{Ignored, Module};
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use std::path::Path;

use crate::config::{BalanceMode, LossType, RqVaeConfig};
use crate::error::{Result, RqVaeError};
use crate::kmeans::KMeansConfig;
use crate::layers::MlpLayers;
use crate::quantizer::{mse, Assignment, QuantizerSettings};
use crate::residual::ResidualQuantizer;
use crate::tensor_io::{code_rows, to_array2_f32};

/// File name of the configuration stored beside a checkpoint record.
pub const CONFIG_FILE: &str = "config.json";

/// Non-learned settings of the autoencoder.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSettings {
    pub in_dim: usize,
    pub e_dim: usize,
    pub loss_type: LossType,
    pub quant_loss_weight: f64,
    pub sk_epsilons: Vec<f64>,
    pub balance_mode: BalanceMode,
    pub balance_weight: f64,
}

/// Encoder, residual quantizer cascade and decoder.
#[derive(Module, Debug)]
pub struct RqVae<B: Backend> {
    encoder: MlpLayers<B>,
    quantizer: ResidualQuantizer<B>,
    decoder: MlpLayers<B>,
    settings: Ignored<ModelSettings>,
}

/// Output of [`RqVae::forward`].
#[derive(Debug, Clone)]
pub struct RqVaeOutput<B: Backend> {
    pub reconstruction: Tensor<B, 2>,
    /// `recon_loss + quant_loss_weight * quant_loss`
    pub loss: Tensor<B, 1>,
    pub recon_loss: Tensor<B, 1>,
    pub quant_loss: Tensor<B, 1>,
    /// Codes `[N, L]`
    pub indices: Tensor<B, 2, Int>,
}

impl RqVaeConfig {
    /// Build a freshly initialized model.
    ///
    /// # Errors
    ///
    /// Any [`validate`](Self::validate) failure, including
    /// `UnsupportedActivation`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<RqVae<B>> {
        self.validate()?;
        let activation = self.activation()?;

        let encoder = MlpLayers::new(
            &self.encoder_widths(),
            self.dropout_prob,
            activation,
            self.bn,
            device,
        )?;
        let decoder = MlpLayers::new(
            &self.decoder_widths(),
            self.dropout_prob,
            activation,
            self.bn,
            device,
        )?;

        let levels = self
            .num_emb_list
            .iter()
            .map(|&k| QuantizerSettings {
                codebook_size: k,
                e_dim: self.e_dim,
                beta: self.beta,
                sk_iters: self.sk_iters,
            })
            .collect();

        Ok(RqVae {
            encoder,
            quantizer: ResidualQuantizer::new(levels, device),
            decoder,
            settings: Ignored(ModelSettings {
                in_dim: self.in_dim,
                e_dim: self.e_dim,
                loss_type: self.loss_type,
                quant_loss_weight: self.quant_loss_weight,
                sk_epsilons: self.sk_epsilons.clone(),
                balance_mode: self.balance_mode,
                balance_weight: self.balance_weight,
            }),
        })
    }
}

impl<B: Backend> RqVae<B> {
    pub fn n_levels(&self) -> usize {
        self.quantizer.n_levels()
    }

    pub fn codebook_sizes(&self) -> Vec<usize> {
        self.quantizer.codebook_sizes()
    }

    pub fn in_dim(&self) -> usize {
        self.settings.in_dim
    }

    pub fn quantizer(&self) -> &ResidualQuantizer<B> {
        &self.quantizer
    }

    /// Per-level assignment used in training: Sinkhorn wherever the level's
    /// epsilon is positive, as routing or as an auxiliary loss.
    pub fn training_plan(&self) -> Vec<Assignment> {
        self.settings
            .sk_epsilons
            .iter()
            .map(|&epsilon| {
                if epsilon <= 0.0 {
                    Assignment::Nearest
                } else {
                    match self.settings.balance_mode {
                        BalanceMode::Routing => Assignment::Balanced { epsilon },
                        BalanceMode::AuxiliaryLoss => Assignment::BalanceLoss {
                            epsilon,
                            weight: self.settings.balance_weight,
                        },
                    }
                }
            })
            .collect()
    }

    /// Nearest-centroid lookup at every level.
    pub fn nearest_plan(&self) -> Vec<Assignment> {
        vec![Assignment::Nearest; self.n_levels()]
    }

    /// Nearest lookup except Sinkhorn routing on the last level.
    pub fn resolution_plan(&self, epsilon: f64) -> Vec<Assignment> {
        let mut plan = self.nearest_plan();
        if let Some(last) = plan.last_mut() {
            *last = Assignment::Balanced { epsilon };
        }
        plan
    }

    /// Encoder output `[N, e_dim]`.
    pub fn latents(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        self.encoder.forward(features)
    }

    /// Training forward pass with the configured balancing.
    pub fn forward(&self, features: Tensor<B, 2>) -> RqVaeOutput<B> {
        let plan = self.training_plan();
        self.forward_with(features, &plan)
    }

    pub fn forward_with(&self, features: Tensor<B, 2>, plan: &[Assignment]) -> RqVaeOutput<B> {
        let latents = self.latents(features.clone());
        let cascade = self.quantizer.forward(latents, plan);
        let reconstruction = self.decoder.forward(cascade.quantized);

        let recon_loss = self.reconstruction_loss(reconstruction.clone(), features);
        let loss = recon_loss.clone()
            + cascade
                .loss
                .clone()
                .mul_scalar(self.settings.quant_loss_weight);

        RqVaeOutput {
            reconstruction,
            loss,
            recon_loss,
            quant_loss: cascade.loss,
            indices: cascade.indices,
        }
    }

    pub fn reconstruction_loss(
        &self,
        reconstruction: Tensor<B, 2>,
        features: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        match self.settings.loss_type {
            LossType::Mse => mse(reconstruction, features),
            LossType::L1 => (reconstruction - features).abs().mean(),
        }
    }

    /// Nearest-centroid codes `[N, L]`.
    pub fn encode(&self, features: Tensor<B, 2>) -> Tensor<B, 2, Int> {
        let plan = self.nearest_plan();
        self.encode_with(features, &plan)
    }

    pub fn encode_with(&self, features: Tensor<B, 2>, plan: &[Assignment]) -> Tensor<B, 2, Int> {
        let latents = self.latents(features);
        self.quantizer.forward(latents, plan).indices
    }

    /// Codes of every row as plain vectors.
    pub fn encode_codes(&self, features: Tensor<B, 2>, plan: &[Assignment]) -> Vec<Vec<usize>> {
        code_rows(self.encode_with(features, plan))
    }

    /// Reconstruct features from codes `[N, L]`.
    ///
    /// # Errors
    ///
    /// - `DimensionMismatch` when the number of code columns differs from the
    ///   number of levels
    /// - `CodeOutOfRange` when a code exceeds its level's codebook
    pub fn decode(&self, indices: Tensor<B, 2, Int>) -> Result<Tensor<B, 2>> {
        let quantized = self.quantizer.decode(indices)?;
        Ok(self.decoder.forward(quantized))
    }

    /// Seed all codebooks by k-means over the latents of `features`.
    pub fn init_codebooks(self, features: Tensor<B, 2>, kmeans: &KMeansConfig) -> Result<Self> {
        let latents = to_array2_f32(self.latents(features).detach());
        let quantizer = self.quantizer.init_codebooks(latents, kmeans)?;
        Ok(Self { quantizer, ..self })
    }

    /// Write `<dir>/<name>.mpk` and `<dir>/config.json`.
    pub fn save_checkpoint(&self, dir: &Path, name: &str, config: &RqVaeConfig) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        self.clone()
            .save_file(dir.join(name), &recorder)
            .map_err(|e| RqVaeError::Checkpoint(format!("{e:?}")))?;
        config.save_json(&dir.join(CONFIG_FILE))?;
        log::info!("Saved checkpoint {}", dir.join(name).display());
        Ok(())
    }
}

/// Rebuild a model from `<dir>/config.json` and load `<dir>/<name>.mpk`.
pub fn load_checkpoint<B: Backend>(
    dir: &Path,
    name: &str,
    device: &B::Device,
) -> Result<(RqVae<B>, RqVaeConfig)> {
    let config = RqVaeConfig::load_json(&dir.join(CONFIG_FILE))?;
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let model = config
        .init::<B>(device)?
        .load_file(dir.join(name), &recorder, device)
        .map_err(|e| RqVaeError::Checkpoint(format!("{e:?}")))?;
    Ok((model, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScaleProfile;
    use burn::tensor::{Distribution, ElementConversion};
    use hygrec_core::backend::{init_cpu_device, CpuBackend};

    fn small_config() -> RqVaeConfig {
        RqVaeConfig::from(ScaleProfile::Dev)
            .with_in_dim(12)
            .with_layers(vec![16])
            .with_e_dim(4)
            .with_num_emb_list(vec![8, 8, 8])
            .with_sk_epsilons(vec![0.0, 0.0, 0.003])
    }

    #[test]
    fn test_shapes() {
        let device = init_cpu_device();
        let model = small_config().init::<CpuBackend>(&device).expect("model");
        let x = Tensor::random([6, 12], Distribution::Normal(0.0, 1.0), &device);

        let out = model.forward(x.clone());
        assert_eq!(out.reconstruction.dims(), [6, 12]);
        assert_eq!(out.indices.dims(), [6, 3]);
        assert_eq!(out.loss.dims(), [1]);

        let codes = model.encode(x);
        assert_eq!(codes.dims(), [6, 3]);
        assert_eq!(model.decode(codes).expect("decode").dims(), [6, 12]);
    }

    #[test]
    fn test_total_loss_composition() {
        let device = init_cpu_device();
        let model = small_config()
            .with_quant_loss_weight(2.0)
            .init::<CpuBackend>(&device)
            .expect("model");
        let x = Tensor::random([5, 12], Distribution::Normal(0.0, 1.0), &device);
        let out = model.forward(x);

        let total: f64 = out.loss.into_scalar().elem();
        let recon: f64 = out.recon_loss.into_scalar().elem();
        let quant: f64 = out.quant_loss.into_scalar().elem();
        assert!((total - (recon + 2.0 * quant)).abs() < 1e-5);
    }

    #[test]
    fn test_l1_loss() {
        let device = init_cpu_device();
        let model = small_config()
            .with_loss_type(LossType::L1)
            .init::<CpuBackend>(&device)
            .expect("model");
        let a = Tensor::<CpuBackend, 2>::zeros([2, 2], &device);
        let b = Tensor::<CpuBackend, 2>::ones([2, 2], &device).mul_scalar(-3.0);
        let loss: f64 = model.reconstruction_loss(a, b).into_scalar().elem();
        assert!((loss - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_plans() {
        let device = init_cpu_device();
        let model = small_config().init::<CpuBackend>(&device).expect("model");
        assert_eq!(
            model.training_plan(),
            vec![
                Assignment::Nearest,
                Assignment::Nearest,
                Assignment::Balanced { epsilon: 0.003 }
            ]
        );
        assert_eq!(
            model.resolution_plan(0.01)[2],
            Assignment::Balanced { epsilon: 0.01 }
        );

        let aux = small_config()
            .with_balance(BalanceMode::AuxiliaryLoss, 0.2)
            .init::<CpuBackend>(&device)
            .expect("model");
        assert_eq!(
            aux.training_plan()[2],
            Assignment::BalanceLoss {
                epsilon: 0.003,
                weight: 0.2
            }
        );
    }

    #[test]
    fn test_unsupported_activation() {
        let device = init_cpu_device();
        let result = small_config()
            .with_activation("rrelu")
            .init::<CpuBackend>(&device);
        assert!(matches!(result, Err(RqVaeError::UnsupportedActivation(name)) if name == "rrelu"));
    }

    #[test]
    fn test_encode_is_idempotent() {
        let device = init_cpu_device();
        let model = small_config().init::<CpuBackend>(&device).expect("model");
        let x = Tensor::random([20, 12], Distribution::Normal(0.0, 1.0), &device);

        let plan = model.nearest_plan();
        let first = model.encode_codes(x.clone(), &plan);
        let second = model.encode_codes(x, &plan);
        assert_eq!(first, second);
    }

    #[test]
    fn test_init_codebooks_from_features() {
        let device = init_cpu_device();
        let model = small_config().init::<CpuBackend>(&device).expect("model");
        let x = Tensor::random([32, 12], Distribution::Normal(0.0, 1.0), &device);

        let seeded = model
            .init_codebooks(x.clone(), &KMeansConfig::default())
            .expect("seed");
        let latents = seeded.latents(x.clone());
        let out = seeded.quantizer().forward(latents.clone(), &seeded.nearest_plan());
        let err: f32 = (out.quantized - latents).powf_scalar(2.0).mean().into_scalar();
        assert!(err.is_finite());
        assert_eq!(seeded.encode(x).dims(), [32, 3]);
    }
}
