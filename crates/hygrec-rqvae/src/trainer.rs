//! RQ-VAE training loop.
//!
//! Fixed-learning-rate Adam over shuffled mini-batches of the catalog:
//!
//! 1. optionally seed every codebook by k-means on the first batch
//! 2. per batch: forward with the configured balancing, backward, Adam step
//! 3. per epoch: mean losses, EMA code usage, best-loss checkpoint
//! 4. every `eval_every` epochs: encode the whole catalog with the frozen
//!    model and keep the checkpoint with the lowest collision rate
//!
//! Checkpoints land in `ckpt_dir` as `best_loss_model.mpk` and
//! `best_collision_model.mpk`, each with the shared `config.json`.

use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use hygrec_core::metrics::{collision_rate, EmaUsage};
use hygrec_core::rng::{shuffled_indices, RngKey};
use std::fmt;
use std::path::PathBuf;

use crate::config::RqVaeConfig;
use crate::error::{Result, RqVaeError};
use crate::index::encode_catalog;
use crate::kmeans::KMeansConfig;
use crate::loader::ItemCatalog;
use crate::model::RqVae;
use crate::tensor_io::code_rows;

/// Checkpoint name of the lowest-loss model.
pub const BEST_LOSS_CHECKPOINT: &str = "best_loss_model";
/// Checkpoint name of the lowest-collision model.
pub const BEST_COLLISION_CHECKPOINT: &str = "best_collision_model";

/// EMA usage below this fraction of uniform counts as a dead code.
const DEAD_CODE_FRACTION: f64 = 0.01;

/// Training configuration.
#[derive(Clone, Debug)]
pub struct TrainerConfig {
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    /// Collision-rate evaluation period in epochs
    pub eval_every: usize,
    pub seed: u64,
    /// Decay of the code-usage moving average
    pub ema_decay: f64,
    /// Restarts and tolerance of k-means seeding
    pub kmeans: KMeansConfig,
    /// Where checkpoints are written; `None` disables saving
    pub ckpt_dir: Option<PathBuf>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            epochs: 200,
            batch_size: 1024,
            eval_every: 50,
            seed: 2024,
            ema_decay: 0.99,
            kmeans: KMeansConfig::default(),
            ckpt_dir: None,
        }
    }
}

impl TrainerConfig {
    /// Builder: set learning rate.
    pub const fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    /// Builder: set number of epochs.
    pub const fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Builder: set batch size.
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Builder: set evaluation period.
    pub const fn with_eval_every(mut self, epochs: usize) -> Self {
        self.eval_every = epochs;
        self
    }

    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_ckpt_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ckpt_dir = Some(dir.into());
        self
    }
}

/// Mean losses of one epoch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EpochStats {
    pub epoch: usize,
    pub loss: f64,
    pub recon_loss: f64,
    pub quant_loss: f64,
}

/// Report of a training run.
#[derive(Clone, Debug)]
pub struct TrainingReport {
    pub epochs: Vec<EpochStats>,
    /// `(epoch, collision rate)` of every evaluation
    pub collision_evals: Vec<(usize, f64)>,
    pub best_loss: f64,
    pub best_loss_epoch: usize,
    pub best_collision_rate: f64,
    pub best_collision_epoch: usize,
    /// Perplexity of the EMA code usage per level
    pub perplexity: Vec<f64>,
    /// Codes per level whose EMA usage is near zero
    pub dead_codes: Vec<usize>,
}

impl TrainingReport {
    /// Reconstruction loss of the first and last epoch.
    pub fn recon_trend(&self) -> Option<(f64, f64)> {
        Some((self.epochs.first()?.recon_loss, self.epochs.last()?.recon_loss))
    }
}

impl fmt::Display for TrainingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "TrainingReport:")?;
        writeln!(f, "  Epochs trained: {}", self.epochs.len())?;
        writeln!(
            f,
            "  Best loss: {:.6} at epoch {}",
            self.best_loss, self.best_loss_epoch
        )?;
        writeln!(
            f,
            "  Best collision rate: {:.4} at epoch {}",
            self.best_collision_rate, self.best_collision_epoch
        )?;
        if let Some(last) = self.epochs.last() {
            writeln!(
                f,
                "  Final loss: {:.6} (recon {:.6}, quant {:.6})",
                last.loss, last.recon_loss, last.quant_loss
            )?;
        }
        for (level, (ppl, dead)) in self.perplexity.iter().zip(&self.dead_codes).enumerate() {
            writeln!(f, "  Level {level}: perplexity {ppl:.2}, dead codes {dead}")?;
        }
        Ok(())
    }
}

/// Trains an [`RqVae`] on an autodiff backend.
pub struct RqVaeTrainer<B: AutodiffBackend> {
    model_config: RqVaeConfig,
    config: TrainerConfig,
    device: B::Device,
}

impl<B: AutodiffBackend> RqVaeTrainer<B> {
    pub fn new(model_config: RqVaeConfig, config: TrainerConfig, device: &B::Device) -> Self {
        Self {
            model_config,
            config,
            device: device.clone(),
        }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Build a model from the configuration and train it.
    pub fn fit(&self, catalog: &ItemCatalog) -> Result<(RqVae<B>, TrainingReport)> {
        let model = self.model_config.init::<B>(&self.device)?;
        self.train(model, catalog)
    }

    /// Train `model` on every row of `catalog`.
    ///
    /// # Errors
    ///
    /// - `DimensionMismatch` when the catalog feature dimension is not the
    ///   model input dimension
    /// - `InsufficientSamples` when k-means seeding gets fewer items than a
    ///   codebook has entries
    /// - checkpoint I/O failures
    pub fn train(
        &self,
        model: RqVae<B>,
        catalog: &ItemCatalog,
    ) -> Result<(RqVae<B>, TrainingReport)> {
        if catalog.dim() != model.in_dim() {
            return Err(RqVaeError::DimensionMismatch {
                expected: model.in_dim(),
                got: catalog.dim(),
            });
        }
        if catalog.is_empty() {
            return Err(RqVaeError::InsufficientSamples { need: 1, got: 0 });
        }

        let n = catalog.len();
        let batch_size = self.config.batch_size.max(1);
        let key = RngKey::new(self.config.seed);
        let mut model = model;

        if self.model_config.kmeans_init {
            let order = shuffled_indices(n, key.fold_in(0));
            let first = &order[..batch_size.min(n)];
            let kmeans = self
                .config
                .kmeans
                .with_max_iters(self.model_config.kmeans_iters)
                .with_seed(self.config.seed);
            model = model.init_codebooks(catalog.batch::<B>(first, &self.device), &kmeans)?;
        }

        let mut optim = AdamConfig::new().init::<B, RqVae<B>>();
        let mut ema = EmaUsage::new(&model.codebook_sizes(), self.config.ema_decay);

        let mut epochs = Vec::with_capacity(self.config.epochs);
        let mut collision_evals = Vec::new();
        let mut best_loss = f64::INFINITY;
        let mut best_loss_epoch = 0;
        let mut best_collision_rate = f64::INFINITY;
        let mut best_collision_epoch = 0;

        for epoch in 0..self.config.epochs {
            let order = shuffled_indices(n, key.fold_in(epoch as u64));
            let (mut loss_sum, mut recon_sum, mut quant_sum) = (0.0, 0.0, 0.0);

            for chunk in order.chunks(batch_size) {
                let batch = catalog.batch::<B>(chunk, &self.device);
                let out = model.forward(batch);

                let weight = chunk.len() as f64;
                let loss: f64 = out.loss.clone().into_scalar().elem();
                let recon: f64 = out.recon_loss.into_scalar().elem();
                let quant: f64 = out.quant_loss.into_scalar().elem();
                loss_sum += loss * weight;
                recon_sum += recon * weight;
                quant_sum += quant * weight;
                ema.update(&code_rows(out.indices));

                let grads = out.loss.backward();
                let grads = GradientsParams::from_grads(grads, &model);
                model = optim.step(self.config.learning_rate, model, grads);
            }

            let stats = EpochStats {
                epoch,
                loss: loss_sum / n as f64,
                recon_loss: recon_sum / n as f64,
                quant_loss: quant_sum / n as f64,
            };
            if !stats.loss.is_finite() {
                log::warn!("Epoch {}: non-finite loss {}", epoch, stats.loss);
            }
            log::info!(
                "Epoch {}: loss {:.6} (recon {:.6}, quant {:.6})",
                epoch,
                stats.loss,
                stats.recon_loss,
                stats.quant_loss
            );
            epochs.push(stats);

            if stats.loss < best_loss {
                best_loss = stats.loss;
                best_loss_epoch = epoch;
                self.save(&model, BEST_LOSS_CHECKPOINT)?;
            }

            let last_epoch = epoch + 1 == self.config.epochs;
            if (epoch + 1) % self.config.eval_every.max(1) == 0 || last_epoch {
                let frozen = model.valid();
                let plan = frozen.nearest_plan();
                let codes = encode_catalog(&frozen, catalog, batch_size, &plan, &self.device);
                let rate = collision_rate(&codes);
                log::info!("Epoch {}: collision rate {:.4}", epoch, rate);
                collision_evals.push((epoch, rate));

                if rate < best_collision_rate {
                    best_collision_rate = rate;
                    best_collision_epoch = epoch;
                    self.save(&model, BEST_COLLISION_CHECKPOINT)?;
                }
            }
        }

        let levels = ema.n_levels();
        let report = TrainingReport {
            epochs,
            collision_evals,
            best_loss,
            best_loss_epoch,
            best_collision_rate,
            best_collision_epoch,
            perplexity: (0..levels).map(|l| ema.perplexity(l)).collect(),
            dead_codes: (0..levels)
                .map(|l| {
                    let k = ema.usage(l).len().max(1) as f64;
                    ema.dead_codes(l, DEAD_CODE_FRACTION / k)
                })
                .collect(),
        };
        Ok((model, report))
    }

    fn save(&self, model: &RqVae<B>, name: &str) -> Result<()> {
        match &self.config.ckpt_dir {
            Some(dir) => model.valid().save_checkpoint(dir, name, &self.model_config),
            None => Ok(()),
        }
    }
}
