//! Path configuration for HyGRec.
//!
//! This module resolves where the tokenizer reads and writes files:
//! - **Data directory**: per-dataset item feature files (`<data>/<dataset>/<dataset>.emb.npy`)
//! - **Output directory**: generated semantic-ID index files (`<dataset>.index.json`)
//! - **Checkpoint directory**: RQ-VAE checkpoints and their `config.json`
//!
//! Paths can be configured via:
//! 1. CLI arguments (highest priority)
//! 2. Environment variables
//! 3. Config file (`~/.config/hygrec/config.toml`)
//! 4. Default system directories
//!
//! # Example
//!
//! ```ignore
//! use hygrec_core::config::PathConfig;
//!
//! let config = PathConfig::builder()
//!     .base_dir("/mnt/experiments/hygrec")
//!     .build();
//!
//! let features = config.features_path("Instruments");
//! let index = config.index_path("Instruments");
//! ```

use clap::Args;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// CLI arguments for path configuration, meant to be flattened into a binary's parser.
#[derive(Args, Debug, Clone, Default)]
pub struct PathArgs {
    /// Data directory holding `<dataset>/<dataset>.emb.npy` feature files
    #[arg(long, env = "HYGREC_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Output directory for generated index files
    #[arg(long, env = "HYGREC_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Checkpoint directory for RQ-VAE models
    #[arg(long, env = "HYGREC_CKPT_DIR")]
    pub ckpt_dir: Option<PathBuf>,

    /// Base directory for all HyGRec files (overrides individual defaults)
    #[arg(long, env = "HYGREC_BASE_DIR")]
    pub base_dir: Option<PathBuf>,

    /// Path to config file
    #[arg(long, env = "HYGREC_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,
}

/// Path configuration from config file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PathConfigFile {
    pub data_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub ckpt_dir: Option<PathBuf>,
    /// Base directory (overrides individual paths if set)
    pub base_dir: Option<PathBuf>,
}

/// Resolved path configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathConfig {
    data_dir: PathBuf,
    output_dir: PathBuf,
    ckpt_dir: PathBuf,
}

impl PathConfig {
    /// Create configuration from parsed [`PathArgs`].
    ///
    /// Priority order:
    /// 1. CLI arguments (clap also fills them from the environment)
    /// 2. Base directory
    /// 3. Config file
    /// 4. Default directories
    pub fn from_path_args(args: PathArgs) -> Self {
        let file_config = Self::load_config_file(args.config_file.as_deref());

        let base_dir = args.base_dir.or(file_config.base_dir.clone());
        let defaults = Self::default_dirs();

        let data_dir = args
            .data_dir
            .or_else(|| base_dir.as_ref().map(|b| b.join("data")))
            .or(file_config.data_dir)
            .unwrap_or(defaults.0);

        let output_dir = args
            .output_dir
            .or_else(|| base_dir.as_ref().map(|b| b.join("output")))
            .or(file_config.output_dir)
            .unwrap_or(defaults.1);

        let ckpt_dir = args
            .ckpt_dir
            .or_else(|| base_dir.as_ref().map(|b| b.join("ckpt")))
            .or(file_config.ckpt_dir)
            .unwrap_or(defaults.2);

        PathConfig {
            data_dir,
            output_dir,
            ckpt_dir,
        }
    }

    /// Create a new builder for custom configuration
    pub fn builder() -> PathConfigBuilder {
        PathConfigBuilder::new()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn ckpt_dir(&self) -> &Path {
        &self.ckpt_dir
    }

    /// Item feature file of a dataset: `<data>/<dataset>/<dataset>.emb.npy`.
    pub fn features_path(&self, dataset: &str) -> PathBuf {
        self.data_dir
            .join(dataset)
            .join(format!("{dataset}.emb.npy"))
    }

    /// Semantic-ID index file of a dataset: `<output>/<dataset>.index.json`.
    pub fn index_path(&self, dataset: &str) -> PathBuf {
        self.output_dir.join(format!("{dataset}.index.json"))
    }

    /// Checkpoint directory of one dataset's training run.
    pub fn run_ckpt_dir(&self, dataset: &str) -> PathBuf {
        self.ckpt_dir.join(dataset)
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "data={:?} output={:?} ckpt={:?}",
            self.data_dir, self.output_dir, self.ckpt_dir
        )
    }

    /// Get default directories based on OS conventions
    fn default_dirs() -> (PathBuf, PathBuf, PathBuf) {
        if let Some(proj_dirs) = ProjectDirs::from("", "", "hygrec") {
            (
                proj_dirs.data_dir().join("data"),
                proj_dirs.data_dir().join("output"),
                proj_dirs.data_dir().join("ckpt"),
            )
        } else {
            // Fallback to current directory
            let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            (
                cwd.join(".hygrec/data"),
                cwd.join("output"),
                cwd.join("ckpt"),
            )
        }
    }

    /// Load config file from path or default location
    fn load_config_file(path: Option<&Path>) -> PathConfigFile {
        let config_path = path.map(PathBuf::from).or_else(|| {
            ProjectDirs::from("", "", "hygrec").map(|dirs| dirs.config_dir().join("config.toml"))
        });

        if let Some(path) = config_path {
            if path.exists() {
                if let Ok(contents) = fs::read_to_string(&path) {
                    if let Ok(config) = toml::from_str::<PathConfigFile>(&contents) {
                        return config;
                    }
                }
            }
        }

        PathConfigFile::default()
    }

    /// Save current configuration to a file
    pub fn save_to_file(&self, path: &Path) -> std::io::Result<()> {
        let config = PathConfigFile {
            data_dir: Some(self.data_dir.clone()),
            output_dir: Some(self.output_dir.clone()),
            ckpt_dir: Some(self.ckpt_dir.clone()),
            base_dir: None,
        };

        let toml_str = toml::to_string_pretty(&config)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, toml_str)
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        let (data, output, ckpt) = Self::default_dirs();
        PathConfig {
            data_dir: data,
            output_dir: output,
            ckpt_dir: ckpt,
        }
    }
}

/// Builder for PathConfig
#[derive(Debug, Clone, Default)]
pub struct PathConfigBuilder {
    data_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    ckpt_dir: Option<PathBuf>,
    base_dir: Option<PathBuf>,
}

impl PathConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    pub fn output_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output_dir = Some(path.into());
        self
    }

    pub fn ckpt_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.ckpt_dir = Some(path.into());
        self
    }

    /// Set base directory (will create data/output/ckpt subdirectories)
    pub fn base_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.base_dir = Some(path.into());
        self
    }

    pub fn build(self) -> PathConfig {
        let (data_default, output_default, ckpt_default) = if let Some(base) = &self.base_dir {
            (base.join("data"), base.join("output"), base.join("ckpt"))
        } else {
            PathConfig::default_dirs()
        };

        PathConfig {
            data_dir: self.data_dir.unwrap_or(data_default),
            output_dir: self.output_dir.unwrap_or(output_default),
            ckpt_dir: self.ckpt_dir.unwrap_or(ckpt_default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PathConfig::default();
        assert!(!config.data_dir().as_os_str().is_empty());
        assert!(!config.output_dir().as_os_str().is_empty());
        assert!(!config.ckpt_dir().as_os_str().is_empty());
    }

    #[test]
    fn test_base_dir_builder() {
        let config = PathConfig::builder().base_dir("/srv/hygrec").build();

        assert_eq!(config.data_dir(), Path::new("/srv/hygrec/data"));
        assert_eq!(config.output_dir(), Path::new("/srv/hygrec/output"));
        assert_eq!(config.ckpt_dir(), Path::new("/srv/hygrec/ckpt"));
    }

    #[test]
    fn test_dataset_paths() {
        let config = PathConfig::builder()
            .data_dir("/data")
            .output_dir("/out")
            .ckpt_dir("/ckpt")
            .build();

        assert_eq!(
            config.features_path("Games"),
            Path::new("/data/Games/Games.emb.npy")
        );
        assert_eq!(config.index_path("Games"), Path::new("/out/Games.index.json"));
        assert_eq!(config.run_ckpt_dir("Games"), Path::new("/ckpt/Games"));
    }

    #[test]
    fn test_cli_overrides_base_dir() {
        let args = PathArgs {
            output_dir: Some(PathBuf::from("/explicit/out")),
            base_dir: Some(PathBuf::from("/base")),
            config_file: Some(PathBuf::from("/nonexistent/hygrec.toml")),
            ..PathArgs::default()
        };
        let config = PathConfig::from_path_args(args);

        assert_eq!(config.output_dir(), Path::new("/explicit/out"));
        assert_eq!(config.data_dir(), Path::new("/base/data"));
        assert_eq!(config.ckpt_dir(), Path::new("/base/ckpt"));
    }

    #[test]
    fn test_config_file_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("config.toml");
        let saved = PathConfig::builder().base_dir("/from/file").build();
        saved.save_to_file(&file).expect("save config");

        let args = PathArgs {
            config_file: Some(file),
            ..PathArgs::default()
        };
        assert_eq!(PathConfig::from_path_args(args), saved);
    }
}
