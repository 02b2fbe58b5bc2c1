//! Generate the semantic-ID index of a catalog from a trained checkpoint.
//!
//! Encodes every item with nearest-code assignment, then re-encodes colliding
//! groups with a Sinkhorn-balanced last level until the IDs are unique or the
//! round limit is hit. Writes `<output>/<dataset>.index.json`.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example generate_indices --release -- --dataset Games
//!
//! # Token strings instead of integer codes, no collision resolution
//! cargo run --example generate_indices --release -- \
//!   --dataset Games \
//!   --format tokens \
//!   --no-resolve
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use hygrec_core::backend::{init_cpu_device, CpuBackend};
use hygrec_core::config::{PathArgs, PathConfig};
use hygrec_examples::init_logging;
use hygrec_rqvae::{
    load_checkpoint, IndexFormat, IndexGenerator, IndexGeneratorConfig, ItemCatalog,
    BEST_COLLISION_CHECKPOINT,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "generate_indices")]
#[command(author, version, about = "Generate semantic IDs from a trained RQ-VAE")]
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

    /// Checkpoint directory; defaults to <ckpt>/<dataset>
    #[arg(long)]
    run_dir: Option<PathBuf>,

    /// Checkpoint name inside the run directory
    #[arg(long, default_value = BEST_COLLISION_CHECKPOINT)]
    checkpoint: String,

    /// Output file; defaults to <output>/<dataset>.index.json
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Index values: codes or tokens
    #[arg(long, default_value = "codes")]
    format: String,

    /// Items encoded per forward pass
    #[arg(short, long, default_value = "1024")]
    batch_size: usize,

    /// Keep the nearest-code IDs even when they collide
    #[arg(long)]
    no_resolve: bool,

    /// Maximum collision-resolution rounds
    #[arg(long, default_value = "20")]
    max_rounds: usize,

    /// Sinkhorn epsilon of the last level during resolution
    #[arg(long, default_value = "0.003")]
    epsilon: f64,
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let paths = PathConfig::from_path_args(args.paths.clone());
    log::info!("Paths: {}", paths.summary());
    let format = IndexFormat::from_str(&args.format)
        .with_context(|| format!("Unknown index format '{}'", args.format))?;

    println!("=== Semantic ID Generation ===\n");

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

    let run_dir = args
        .run_dir
        .clone()
        .unwrap_or_else(|| paths.run_ckpt_dir(&args.dataset));
    println!("Loading checkpoint {:?} from {:?}...", args.checkpoint, run_dir);
    let device = init_cpu_device();
    let (model, config) = load_checkpoint::<CpuBackend>(&run_dir, &args.checkpoint, &device)
        .context("Failed to load checkpoint")?;
    println!(
        "  {} levels, codebooks {:?}, latent dim {}",
        config.n_levels(),
        config.num_emb_list,
        config.e_dim
    );

    let generator_config = IndexGeneratorConfig::default()
        .with_batch_size(args.batch_size)
        .with_resolution(!args.no_resolve)
        .with_max_rounds(args.max_rounds)
        .with_resolution_epsilon(args.epsilon);
    log::debug!("Generator config: {:?}", generator_config);

    println!("\n=== Encoding ===\n");
    let (index, report) = IndexGenerator::new(&model, generator_config, &device).generate(&catalog)?;
    println!("{}", report);

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| paths.index_path(&args.dataset));
    index.write_json(&output, format)?;
    println!("\nWrote {} IDs to {:?}", index.len(), output);

    if let Some(id) = index.ids().first() {
        println!("  e.g. {} -> {:?}", id, index.tokens(0));
    }
    println!("  Vocabulary: {} tokens", index.vocabulary().len());

    println!("\nDone!");
    Ok(())
}
