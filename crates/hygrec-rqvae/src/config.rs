//! RQ-VAE configuration.
//!
//! [`RqVaeConfig`] describes the whole tokenizer: encoder/decoder widths,
//! per-level codebook sizes, losses and Sinkhorn balancing. It is loaded from
//! TOML and persisted as `config.json` next to every checkpoint so the model
//! can be rebuilt before its record is loaded.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, RqVaeError};
use crate::layers::Activation;

/// Scale profile for different catalog sizes.
///
/// - `Dev`: small synthetic catalogs for development and tests
/// - `Default`: LLM-sized item embeddings (4096-d) with four 256-entry levels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScaleProfile {
    /// Small profile (~1K items, 64-d features)
    Dev,
    /// Full-size profile
    #[default]
    Default,
}

impl ScaleProfile {
    /// Parse scale profile from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Some(Self::Dev),
            "default" | "full" => Some(Self::Default),
            _ => None,
        }
    }
}

/// Reconstruction loss of the autoencoder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossType {
    #[default]
    Mse,
    L1,
}

/// How Sinkhorn balancing enters training.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceMode {
    /// Codes are the arg-max of the Sinkhorn assignment.
    #[default]
    Routing,
    /// Codes stay nearest-centroid; the assignment is a soft target for an
    /// extra cross-entropy term weighted by `balance_weight`.
    AuxiliaryLoss,
}

/// Configuration of the RQ-VAE tokenizer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RqVaeConfig {
    /// Item feature dimension
    pub in_dim: usize,
    /// Hidden widths of the encoder (the decoder mirrors them)
    pub layers: Vec<usize>,
    /// Latent (codebook entry) dimension
    pub e_dim: usize,
    /// Codebook size per level; its length is the number of levels
    pub num_emb_list: Vec<usize>,
    pub dropout_prob: f64,
    pub bn: bool,
    /// Activation name, see [`Activation`]
    pub activation: String,
    pub loss_type: LossType,
    /// Weight of the cascade loss in the total loss
    pub quant_loss_weight: f64,
    /// Commitment weight
    pub beta: f64,
    /// Seed codebooks by k-means on the first training batch
    pub kmeans_init: bool,
    pub kmeans_iters: usize,
    /// Sinkhorn epsilon per level; 0 disables balancing at that level
    pub sk_epsilons: Vec<f64>,
    pub sk_iters: usize,
    pub balance_mode: BalanceMode,
    /// Weight of the auxiliary balance loss (only in `AuxiliaryLoss` mode)
    pub balance_weight: f64,
}

impl Default for RqVaeConfig {
    fn default() -> Self {
        ScaleProfile::Default.into()
    }
}

impl From<ScaleProfile> for RqVaeConfig {
    fn from(profile: ScaleProfile) -> Self {
        match profile {
            ScaleProfile::Dev => RqVaeConfig {
                in_dim: 64,
                layers: vec![128, 64],
                e_dim: 16,
                num_emb_list: vec![32, 32, 32],
                dropout_prob: 0.0,
                bn: false,
                activation: "relu".to_string(),
                loss_type: LossType::Mse,
                quant_loss_weight: 1.0,
                beta: 0.25,
                kmeans_init: true,
                kmeans_iters: 50,
                sk_epsilons: vec![0.0, 0.0, 0.003],
                sk_iters: 50,
                balance_mode: BalanceMode::Routing,
                balance_weight: 0.1,
            },
            ScaleProfile::Default => RqVaeConfig {
                in_dim: 4096,
                layers: vec![2048, 1024, 512, 256, 128, 64],
                e_dim: 32,
                num_emb_list: vec![256, 256, 256, 256],
                dropout_prob: 0.0,
                bn: false,
                activation: "relu".to_string(),
                loss_type: LossType::Mse,
                quant_loss_weight: 1.0,
                beta: 0.25,
                kmeans_init: true,
                kmeans_iters: 100,
                sk_epsilons: vec![0.0, 0.0, 0.0, 0.003],
                sk_iters: 50,
                balance_mode: BalanceMode::Routing,
                balance_weight: 0.1,
            },
        }
    }
}

impl RqVaeConfig {
    pub fn with_in_dim(mut self, in_dim: usize) -> Self {
        self.in_dim = in_dim;
        self
    }

    pub fn with_layers(mut self, layers: Vec<usize>) -> Self {
        self.layers = layers;
        self
    }

    pub fn with_e_dim(mut self, e_dim: usize) -> Self {
        self.e_dim = e_dim;
        self
    }

    /// Set the codebook sizes; Sinkhorn epsilons are padded with zeros (or
    /// truncated) to the new number of levels.
    pub fn with_num_emb_list(mut self, num_emb_list: Vec<usize>) -> Self {
        self.sk_epsilons.resize(num_emb_list.len(), 0.0);
        self.num_emb_list = num_emb_list;
        self
    }

    pub fn with_sk_epsilons(mut self, sk_epsilons: Vec<f64>) -> Self {
        self.sk_epsilons = sk_epsilons;
        self
    }

    pub fn with_sk_iters(mut self, sk_iters: usize) -> Self {
        self.sk_iters = sk_iters;
        self
    }

    pub fn with_activation(mut self, activation: impl Into<String>) -> Self {
        self.activation = activation.into();
        self
    }

    pub fn with_dropout(mut self, dropout_prob: f64) -> Self {
        self.dropout_prob = dropout_prob;
        self
    }

    pub fn with_batch_norm(mut self, bn: bool) -> Self {
        self.bn = bn;
        self
    }

    pub fn with_loss_type(mut self, loss_type: LossType) -> Self {
        self.loss_type = loss_type;
        self
    }

    pub fn with_beta(mut self, beta: f64) -> Self {
        self.beta = beta;
        self
    }

    pub fn with_quant_loss_weight(mut self, weight: f64) -> Self {
        self.quant_loss_weight = weight;
        self
    }

    pub fn with_kmeans_init(mut self, enabled: bool) -> Self {
        self.kmeans_init = enabled;
        self
    }

    pub fn with_kmeans_iters(mut self, iters: usize) -> Self {
        self.kmeans_iters = iters;
        self
    }

    pub fn with_balance(mut self, mode: BalanceMode, weight: f64) -> Self {
        self.balance_mode = mode;
        self.balance_weight = weight;
        self
    }

    /// Number of quantization levels.
    pub fn n_levels(&self) -> usize {
        self.num_emb_list.len()
    }

    /// Encoder widths: `[in_dim, layers.., e_dim]`.
    pub fn encoder_widths(&self) -> Vec<usize> {
        let mut widths = Vec::with_capacity(self.layers.len() + 2);
        widths.push(self.in_dim);
        widths.extend_from_slice(&self.layers);
        widths.push(self.e_dim);
        widths
    }

    /// Decoder widths: the encoder widths reversed.
    pub fn decoder_widths(&self) -> Vec<usize> {
        let mut widths = self.encoder_widths();
        widths.reverse();
        widths
    }

    /// Parse the activation name.
    pub fn activation(&self) -> Result<Activation> {
        self.activation.parse()
    }

    /// Check the configuration for values the model cannot be built from.
    pub fn validate(&self) -> Result<()> {
        if self.in_dim == 0 || self.e_dim == 0 || self.layers.contains(&0) {
            return Err(RqVaeError::InvalidConfig(
                "layer widths must be positive".to_string(),
            ));
        }
        if self.num_emb_list.is_empty() {
            return Err(RqVaeError::InvalidConfig(
                "at least one quantization level is required".to_string(),
            ));
        }
        if self.num_emb_list.contains(&0) {
            return Err(RqVaeError::InvalidConfig(
                "codebook sizes must be positive".to_string(),
            ));
        }
        if self.sk_epsilons.len() != self.num_emb_list.len() {
            return Err(RqVaeError::InvalidConfig(format!(
                "{} sinkhorn epsilons for {} levels",
                self.sk_epsilons.len(),
                self.num_emb_list.len()
            )));
        }
        if let Some(&eps) = self
            .sk_epsilons
            .iter()
            .find(|eps| !eps.is_finite() || **eps < 0.0)
        {
            return Err(RqVaeError::InvalidEpsilon(eps));
        }
        if !(0.0..1.0).contains(&self.dropout_prob) {
            return Err(RqVaeError::InvalidConfig(format!(
                "dropout probability {} outside [0, 1)",
                self.dropout_prob
            )));
        }
        self.activation()?;
        Ok(())
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Write the configuration as pretty JSON (`config.json` of a checkpoint).
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Read a configuration written by [`save_json`](Self::save_json).
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}
