//! # hygrec-rqvae
//!
//! RQ-VAE tokenizer turning item feature vectors into hierarchical semantic
//! IDs.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  RqVae                                                           │
//! │  ├── encoder: MlpLayers [in_dim -> .. -> e_dim]                  │
//! │  ├── quantizer: ResidualQuantizer                                │
//! │  │   └── L x VectorQuantizer (codebook [K_l, e_dim])             │
//! │  │       └── nearest lookup or Sinkhorn-balanced routing         │
//! │  └── decoder: MlpLayers [e_dim -> .. -> in_dim]                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - [`layers`]: MLP encoder/decoder blocks and activations
//! - [`kmeans`]: k-means++ / Lloyd codebook seeding on `ndarray` arrays
//! - [`sinkhorn`]: log-domain Sinkhorn balanced assignment
//! - [`quantizer`]: a single quantization level with straight-through output
//! - [`residual`]: the residual cascade of levels
//! - [`model`]: the autoencoder, its losses and checkpoints
//! - [`trainer`]: Adam training loop with collision-rate evaluation
//! - [`index`]: catalog-wide semantic ID generation and collision resolution
//! - [`loader`]: item features from `.npy` / SafeTensors
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hygrec_core::backend::{init_cpu_device, CpuAutodiffBackend};
//! use hygrec_rqvae::{IndexGenerator, IndexGeneratorConfig, ItemCatalog, RqVaeConfig,
//!     RqVaeTrainer, TrainerConfig};
//! use burn::module::AutodiffModule;
//!
//! let device = init_cpu_device();
//! let catalog = ItemCatalog::load(Path::new("Games.emb.npy"))?;
//! let config = RqVaeConfig::default().with_in_dim(catalog.dim());
//!
//! let trainer = RqVaeTrainer::<CpuAutodiffBackend>::new(config, TrainerConfig::default(), &device);
//! let (model, report) = trainer.fit(&catalog)?;
//! println!("{report}");
//!
//! let frozen = model.valid();
//! let (index, stats) = IndexGenerator::new(&frozen, IndexGeneratorConfig::default(), &device)
//!     .generate(&catalog)?;
//! index.write_json(Path::new("Games.index.json"), IndexFormat::Codes)?;
//! ```

pub mod config;
pub mod error;
pub mod index;
pub mod kmeans;
pub mod layers;
pub mod loader;
pub mod model;
pub mod quantizer;
pub mod residual;
pub mod sinkhorn;
mod tensor_io;
pub mod trainer;

pub use config::{BalanceMode, LossType, RqVaeConfig, ScaleProfile};
pub use error::{Result, RqVaeError};
pub use index::{
    encode_catalog, level_token, IndexFormat, IndexGenerator, IndexGeneratorConfig, IndexReport,
    SemanticIndex,
};
pub use kmeans::{kmeans, KMeansConfig, KMeansResult};
pub use layers::{Activation, MlpLayers};
pub use loader::ItemCatalog;
pub use model::{load_checkpoint, RqVae, RqVaeOutput, CONFIG_FILE};
pub use quantizer::{Assignment, QuantizerOutput, QuantizerSettings, VectorQuantizer};
pub use residual::{CascadeOutput, ResidualQuantizer};
pub use sinkhorn::{balanced_assignment, sinkhorn};
pub use trainer::{
    EpochStats, RqVaeTrainer, TrainerConfig, TrainingReport, BEST_COLLISION_CHECKPOINT,
    BEST_LOSS_CHECKPOINT,
};
