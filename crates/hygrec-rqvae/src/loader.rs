//! Item-feature loading.
//!
//! An [`ItemCatalog`] is the `[N, D]` feature matrix of a catalog plus one id
//! per row. Features come from:
//!
//! | Format | Source | Notes |
//! |--------|--------|-------|
//! | `.npy` | `ndarray-npy` | `f32` 2-D array |
//! | `.safetensors` | `safetensors` | tensor `embeddings`, F32, `[N, D]` or `[1, N, D]` |
//!
//! Ids default to row indices; a text file with one id per line overrides
//! them.
//!
//! ```rust,ignore
//! use hygrec_rqvae::loader::ItemCatalog;
//!
//! let catalog = ItemCatalog::load(Path::new("data/Games/Games.emb.npy"))?;
//! println!("{} items, {} dims", catalog.len(), catalog.dim());
//! ```

use anyhow::{Context, Result};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use ndarray::{Array2, ArrayView2};
use ndarray_npy::{read_npy, write_npy};
use safetensors::SafeTensors;
use std::path::Path;

/// Name of the feature tensor in SafeTensors files.
pub const EMBEDDINGS_TENSOR: &str = "embeddings";

/// Feature matrix of a catalog with one id per row.
#[derive(Clone, Debug)]
pub struct ItemCatalog {
    ids: Vec<String>,
    features: Array2<f32>,
}

impl ItemCatalog {
    /// Catalog whose ids are the row indices.
    pub fn new(features: Array2<f32>) -> Self {
        let ids = (0..features.nrows()).map(|i| i.to_string()).collect();
        Self { ids, features }
    }

    /// Replace the row-index ids.
    pub fn with_ids(mut self, ids: Vec<String>) -> Result<Self> {
        anyhow::ensure!(
            ids.len() == self.features.nrows(),
            "{} ids for {} items",
            ids.len(),
            self.features.nrows()
        );
        self.ids = ids;
        Ok(self)
    }

    /// Load by extension: `.npy` or `.safetensors`.
    pub fn load(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("npy") => Self::from_npy(path),
            Some("safetensors") => Self::from_safetensors(path),
            other => anyhow::bail!("Unsupported feature file extension {:?} ({:?})", other, path),
        }
    }

    pub fn from_npy(path: &Path) -> Result<Self> {
        let features: Array2<f32> =
            read_npy(path).with_context(|| format!("Failed to read {:?}", path))?;
        Ok(Self::new(features))
    }

    pub fn from_safetensors(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
        let tensors = SafeTensors::deserialize(&bytes)
            .with_context(|| format!("Failed to deserialize SafeTensors from {:?}", path))?;
        let view = tensors
            .tensor(EMBEDDINGS_TENSOR)
            .with_context(|| format!("SafeTensors file missing '{}' tensor", EMBEDDINGS_TENSOR))?;

        anyhow::ensure!(
            view.dtype() == safetensors::Dtype::F32,
            "Expected F32 dtype, got {:?}",
            view.dtype()
        );
        let (n, d) = match view.shape() {
            [n, d] => (*n, *d),
            [1, n, d] => (*n, *d),
            shape => anyhow::bail!(
                "Expected 2D tensor [N, D] or batched [1, N, D], got shape {:?}",
                shape
            ),
        };

        let floats: Vec<f32> = bytemuck::pod_collect_to_vec(view.data());
        let features = Array2::from_shape_vec((n, d), floats)
            .context("Embeddings data does not match its shape")?;
        Ok(Self::new(features))
    }

    /// Read ids from a text file, one per line, and attach them.
    pub fn with_ids_file(self, path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let ids = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        self.with_ids(ids)
    }

    /// Write the features as `.npy`.
    pub fn save_npy(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_npy(path, &self.features).with_context(|| format!("Failed to write {:?}", path))
    }

    pub fn len(&self) -> usize {
        self.features.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.features.nrows() == 0
    }

    /// Feature dimension.
    pub fn dim(&self) -> usize {
        self.features.ncols()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn features(&self) -> ArrayView2<'_, f32> {
        self.features.view()
    }

    /// Gather `rows` into a `[rows.len(), D]` tensor.
    pub fn batch<B: Backend>(&self, rows: &[usize], device: &B::Device) -> Tensor<B, 2> {
        let d = self.dim();
        let mut values = Vec::with_capacity(rows.len() * d);
        for &r in rows {
            values.extend(self.features.row(r).iter().copied());
        }
        Tensor::from_data(TensorData::new(values, [rows.len(), d]), device)
    }
}
