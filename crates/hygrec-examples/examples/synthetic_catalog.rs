//! End-to-end demo on a synthetic clustered catalog.
//!
//! Writes `<data>/<dataset>/<dataset>.emb.npy`, trains a small-profile RQ-VAE
//! on it, and prints the semantic IDs of a few items before and after
//! collision resolution.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example synthetic_catalog --release
//!
//! # Only write the feature file, for use with train_rqvae
//! cargo run --example synthetic_catalog --release -- --items 4096 --write-only
//! ```

use anyhow::Result;
use burn::module::AutodiffModule;
use clap::Parser;
use hygrec_core::backend::{init_cpu_device, CpuAutodiffBackend};
use hygrec_core::config::{PathArgs, PathConfig};
use hygrec_core::rng::RngKey;
use hygrec_examples::{init_logging, synthetic_catalog};
use hygrec_rqvae::{
    IndexFormat, IndexGenerator, IndexGeneratorConfig, RqVaeConfig, RqVaeTrainer, ScaleProfile,
    TrainerConfig,
};

#[derive(Parser)]
#[command(name = "synthetic_catalog")]
#[command(author, version, about = "Synthetic catalog through the full tokenizer pipeline")]
struct Args {
    #[command(flatten)]
    paths: PathArgs,

    /// Dataset name used for the written files
    #[arg(short, long, default_value = "synthetic")]
    dataset: String,

    /// Number of items
    #[arg(short = 'n', long, default_value = "2048")]
    items: usize,

    /// Feature dimension
    #[arg(long, default_value = "64")]
    dim: usize,

    /// Number of cluster centers
    #[arg(long, default_value = "32")]
    clusters: usize,

    /// Per-item noise around its center
    #[arg(long, default_value = "0.3")]
    spread: f32,

    /// Number of training epochs
    #[arg(short, long, default_value = "40")]
    epochs: usize,

    /// Random seed
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Stop after writing the feature file
    #[arg(long)]
    write_only: bool,

    /// Number of items whose IDs are printed
    #[arg(long, default_value = "5")]
    show: usize,
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    let paths = PathConfig::from_path_args(args.paths.clone());
    log::info!("Paths: {}", paths.summary());

    println!("=== Synthetic Catalog ===\n");
    let catalog = synthetic_catalog(
        args.items,
        args.dim,
        args.clusters,
        args.spread,
        RngKey::new(args.seed),
    )?;
    let features_path = paths.features_path(&args.dataset);
    catalog.save_npy(&features_path)?;
    println!(
        "Wrote {} items x {} dims ({} clusters) to {:?}",
        catalog.len(),
        catalog.dim(),
        args.clusters,
        features_path
    );
    if args.write_only {
        return Ok(());
    }

    let model_config = RqVaeConfig::from(ScaleProfile::Dev).with_in_dim(catalog.dim());
    let trainer_config = TrainerConfig::default()
        .with_epochs(args.epochs)
        .with_batch_size(256)
        .with_learning_rate(3e-3)
        .with_eval_every(10)
        .with_seed(args.seed)
        .with_ckpt_dir(paths.run_ckpt_dir(&args.dataset));

    println!("\n=== Training ({} epochs) ===\n", args.epochs);
    let device = init_cpu_device();
    let trainer = RqVaeTrainer::<CpuAutodiffBackend>::new(model_config, trainer_config, &device);
    let (model, report) = trainer.fit(&catalog)?;
    println!("{}", report);
    let frozen = model.valid();

    println!("=== Semantic IDs ===\n");
    let plain = IndexGeneratorConfig::default().with_resolution(false);
    let (nearest, _) = IndexGenerator::new(&frozen, plain, &device).generate(&catalog)?;
    let (index, stats) =
        IndexGenerator::new(&frozen, IndexGeneratorConfig::default(), &device).generate(&catalog)?;

    for (pos, id) in index.ids().iter().take(args.show).enumerate() {
        println!(
            "  {:<10} nearest {:?} -> resolved {}",
            id,
            nearest.codes()[pos],
            index.tokens(pos).concat()
        );
    }
    println!("\n{}", stats);

    let output = paths.index_path(&args.dataset);
    index.write_json(&output, IndexFormat::Tokens)?;
    println!("\nWrote index to {:?}", output);

    println!("\nDone!");
    Ok(())
}
