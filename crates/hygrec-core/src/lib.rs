//! # hygrec-core
//!
//! Shared foundations for the HyGRec semantic-ID tokenizer.
//!
//! - [`backend`]: burn backend aliases (CPU `NdArray` by default, `Wgpu` behind the `gpu` feature)
//! - [`config`]: data/output/checkpoint path resolution (CLI > env > config file > defaults)
//! - [`distance`]: squared Euclidean distances between points and codebook entries
//! - [`rng`]: deterministic [`RngKey`] splitting for seeding and shuffling
//! - [`metrics`]: collision rate, code usage and perplexity of semantic IDs
//!
//! ```rust,ignore
//! use hygrec_core::backend::{init_cpu_device, CpuBackend};
//! use hygrec_core::distance::squared_distances;
//!
//! let device = init_cpu_device();
//! let d = squared_distances::<CpuBackend>(latents, codebook); // [N, K]
//! ```

#![recursion_limit = "256"] // Required for burn-wgpu

pub mod backend;
pub mod config;
pub mod distance;
pub mod metrics;
pub mod rng;

pub use backend::*;
pub use config::*;
pub use distance::*;
pub use metrics::*;
pub use rng::*;
