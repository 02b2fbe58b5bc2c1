//! Train an RQ-VAE tokenizer on a catalog of item embeddings.
//!
//! Reads `<data>/<dataset>/<dataset>.emb.npy` (or `--input`), seeds the
//! codebooks with k-means, trains with Adam and writes the best-loss and
//! best-collision checkpoints under `<ckpt>/<dataset>/`.
//!
//! # Usage
//!
//! ```bash
//! # Full-size run on a prepared dataset
//! cargo run --example train_rqvae --release -- --dataset Games --epochs 200
//!
//! # Small profile with a custom feature file
//! cargo run --example train_rqvae --release -- \
//!   --dataset demo \
//!   --input demo.emb.npy \
//!   --profile dev \
//!   --epochs 50 \
//!   --batch-size 256
//!
//! # Model configuration from TOML, auxiliary balance loss
//! cargo run --example train_rqvae --release -- \
//!   --dataset Games \
//!   --model-config rqvae.toml \
//!   --balance-mode auxiliary-loss \
//!   --balance-weight 0.1
//! ```

use anyhow::{Context, Result};
use burn::module::AutodiffModule;
use clap::{Parser, ValueEnum};
use hygrec_core::backend::{init_cpu_device, CpuAutodiffBackend};
use hygrec_core::config::{PathArgs, PathConfig};
use hygrec_examples::init_logging;
use hygrec_rqvae::{
    BalanceMode, IndexGenerator, IndexGeneratorConfig, ItemCatalog, RqVaeConfig, RqVaeTrainer,
    ScaleProfile, TrainerConfig, BEST_COLLISION_CHECKPOINT,
};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BalanceArg {
    /// Sinkhorn plan picks the codes of balanced levels
    Routing,
    /// Nearest codes plus a cross-entropy pull toward the Sinkhorn plan
    AuxiliaryLoss,
}

impl From<BalanceArg> for BalanceMode {
    fn from(arg: BalanceArg) -> Self {
        match arg {
            BalanceArg::Routing => BalanceMode::Routing,
            BalanceArg::AuxiliaryLoss => BalanceMode::AuxiliaryLoss,
        }
    }
}

#[derive(Parser)]
#[command(name = "train_rqvae")]
#[command(author, version, about = "Train an RQ-VAE semantic-ID tokenizer")]
struct Args {
    #[command(flatten)]
    paths: PathArgs,

    /// Dataset name; features default to <data>/<dataset>/<dataset>.emb.npy
    #[arg(short, long)]
    dataset: String,

    /// Feature file (.npy or .safetensors) overriding the dataset path
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Text file with one item id per line
    #[arg(long)]
    ids: Option<PathBuf>,

    /// Model configuration TOML; overrides --profile
    #[arg(long)]
    model_config: Option<PathBuf>,

    /// Scale profile: dev or default
    #[arg(long, default_value = "default")]
    profile: String,

    /// Number of training epochs
    #[arg(short, long, default_value = "200")]
    epochs: usize,

    /// Batch size
    #[arg(short, long, default_value = "1024")]
    batch_size: usize,

    /// Learning rate
    #[arg(long, default_value = "0.001")]
    lr: f64,

    /// Evaluate the collision rate every N epochs
    #[arg(long, default_value = "50")]
    eval_every: usize,

    /// Commitment weight of the quantization loss
    #[arg(long)]
    beta: Option<f64>,

    /// Sinkhorn epsilon per level, e.g. 0,0,0,0.003 (0 disables a level)
    #[arg(long, value_delimiter = ',')]
    sk_epsilons: Option<Vec<f64>>,

    /// How balanced levels use the Sinkhorn plan (default: from the model config)
    #[arg(long, value_enum)]
    balance_mode: Option<BalanceArg>,

    /// Weight of the auxiliary balance loss (default: from the model config)
    #[arg(long)]
    balance_weight: Option<f64>,

    /// Random seed
    #[arg(long, default_value = "2024")]
    seed: u64,

    /// Skip the post-training collision check
    #[arg(long)]
    skip_check: bool,
}

/// Override the configured balancing only with the flags that were given.
fn apply_balance_args(
    config: RqVaeConfig,
    mode: Option<BalanceArg>,
    weight: Option<f64>,
) -> RqVaeConfig {
    let mode = mode.map_or(config.balance_mode, BalanceMode::from);
    let weight = weight.unwrap_or(config.balance_weight);
    config.with_balance(mode, weight)
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let paths = PathConfig::from_path_args(args.paths.clone());
    println!("=== RQ-VAE Training ===\n");
    log::info!("Paths: {}", paths.summary());

    let input = args
        .input
        .clone()
        .unwrap_or_else(|| paths.features_path(&args.dataset));
    println!("Loading features from {:?}...", input);
    let mut catalog = ItemCatalog::load(&input)?;
    if let Some(ids) = &args.ids {
        catalog = catalog.with_ids_file(ids)?;
    }
    println!("  {} items, {} dimensions", catalog.len(), catalog.dim());

    let mut model_config = match &args.model_config {
        Some(path) => RqVaeConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load model config {:?}", path))?,
        None => {
            let profile = ScaleProfile::from_str(&args.profile)
                .with_context(|| format!("Unknown profile '{}'", args.profile))?;
            RqVaeConfig::from(profile)
        }
    }
    .with_in_dim(catalog.dim());
    model_config = apply_balance_args(model_config, args.balance_mode, args.balance_weight);
    if let Some(beta) = args.beta {
        model_config = model_config.with_beta(beta);
    }
    if let Some(eps) = args.sk_epsilons.clone() {
        model_config = model_config.with_sk_epsilons(eps);
    }
    model_config.validate()?;
    log::debug!("Model config: {:?}", model_config);

    let ckpt_dir = paths.run_ckpt_dir(&args.dataset);
    let trainer_config = TrainerConfig::default()
        .with_epochs(args.epochs)
        .with_batch_size(args.batch_size)
        .with_learning_rate(args.lr)
        .with_eval_every(args.eval_every)
        .with_seed(args.seed)
        .with_ckpt_dir(ckpt_dir.clone());

    println!("\nModel configuration:");
    println!("  Encoder widths: {:?}", model_config.encoder_widths());
    println!("  Codebooks: {:?}", model_config.num_emb_list);
    println!("  Sinkhorn epsilons: {:?}", model_config.sk_epsilons);
    println!("  Balance: {:?} (weight {})", model_config.balance_mode, model_config.balance_weight);
    println!("\nTraining configuration:");
    println!("  Epochs: {}", args.epochs);
    println!("  Batch size: {}", args.batch_size);
    println!("  Learning rate: {}", args.lr);
    println!("  Checkpoints: {:?}", ckpt_dir);

    println!("\n=== Training ===\n");
    let device = init_cpu_device();
    let trainer = RqVaeTrainer::<CpuAutodiffBackend>::new(model_config, trainer_config, &device);
    let (model, report) = trainer.fit(&catalog)?;

    println!("\n=== Training Complete ===\n");
    println!("{}", report);

    if !args.skip_check {
        let frozen = model.valid();
        let (_, stats) = IndexGenerator::new(&frozen, IndexGeneratorConfig::default(), &device)
            .generate(&catalog)?;
        println!("=== Index Check ===\n");
        println!("{}", stats);
    }

    println!(
        "Generate the index with: cargo run --example generate_indices -- --dataset {} --checkpoint {}",
        args.dataset, BEST_COLLISION_CHECKPOINT
    );
    println!("\nDone!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auxiliary_config() -> RqVaeConfig {
        RqVaeConfig::from_toml_str("balance_mode = \"auxiliary_loss\"\nbalance_weight = 0.5\n")
            .expect("toml")
    }

    #[test]
    fn test_missing_flags_keep_model_config_balance() {
        let config = apply_balance_args(auxiliary_config(), None, None);
        assert_eq!(config.balance_mode, BalanceMode::AuxiliaryLoss);
        assert_eq!(config.balance_weight, 0.5);

        let dev = RqVaeConfig::from(ScaleProfile::Dev);
        let kept = apply_balance_args(dev.clone(), None, None);
        assert_eq!(kept.balance_weight, dev.balance_weight);
    }

    #[test]
    fn test_given_flags_override_one_setting_each() {
        let config = apply_balance_args(auxiliary_config(), Some(BalanceArg::Routing), None);
        assert_eq!(config.balance_mode, BalanceMode::Routing);
        assert_eq!(config.balance_weight, 0.5);

        let config = apply_balance_args(auxiliary_config(), None, Some(0.2));
        assert_eq!(config.balance_mode, BalanceMode::AuxiliaryLoss);
        assert_eq!(config.balance_weight, 0.2);
    }

    #[test]
    fn test_parse_without_balance_flags() {
        let args = Args::try_parse_from(["train_rqvae", "--dataset", "Games"]).expect("args");
        assert!(args.balance_mode.is_none());
        assert!(args.balance_weight.is_none());

        let args = Args::try_parse_from([
            "train_rqvae",
            "--dataset",
            "Games",
            "--balance-mode",
            "auxiliary-loss",
        ])
        .expect("args");
        assert!(matches!(args.balance_mode, Some(BalanceArg::AuxiliaryLoss)));
    }
}
