use thiserror::Error;

#[derive(Debug, Error)]
pub enum RqVaeError {
    #[error("activation function `{0}` is not implemented")]
    UnsupportedActivation(String),

    #[error("not enough samples for k-means: need at least {need}, got {got}")]
    InsufficientSamples { need: usize, got: usize },

    #[error("sinkhorn epsilon must be positive and finite, got {0}")]
    InvalidEpsilon(f64),

    #[error("distance matrix contains non-finite values")]
    NonFiniteDistances,

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("code {code} out of range at level {level} (codebook size {size})")]
    CodeOutOfRange {
        level: usize,
        code: usize,
        size: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, RqVaeError>;
